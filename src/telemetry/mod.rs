//! Telemetry Contract
//!
//! Fire-and-forget usage events emitted once per successful
//! generation. Sink failures are logged by the caller and never abort
//! a result; persistence and transport live outside this crate.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::generate::TokenUsage;
use crate::types::Result;

/// One successful-generation event
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    pub correlation_id: String,
    pub usage: TokenUsage,
    /// Composed prompt sent to the provider
    pub request: String,
    /// Raw response text
    pub response: String,
    /// `"{model}-{tier}"` the call was served by
    pub model_label: String,
    pub task_label: Option<String>,
}

/// External telemetry collaborator
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, event: &TelemetryEvent) -> Result<()>;
}

/// In-tree sink that emits events as tracing records only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTelemetry;

#[async_trait]
impl TelemetrySink for LogTelemetry {
    async fn record(&self, event: &TelemetryEvent) -> Result<()> {
        info!(
            correlation_id = %event.correlation_id,
            input_tokens = event.usage.input_tokens,
            attachment_tokens = event.usage.attachment_tokens,
            output_tokens = event.usage.output_tokens,
            model = %event.model_label,
            task = event.task_label.as_deref().unwrap_or("-"),
            "generation event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_sink_always_succeeds() {
        let event = TelemetryEvent {
            correlation_id: "cid-1".into(),
            usage: TokenUsage::new(10, 0, 5),
            request: "prompt".into(),
            response: "{}".into(),
            model_label: "m-flash-free".into(),
            task_label: None,
        };
        assert!(LogTelemetry.record(&event).await.is_ok());
    }

    #[test]
    fn test_event_serializes() {
        let event = TelemetryEvent {
            correlation_id: "cid-2".into(),
            usage: TokenUsage::default(),
            request: "p".into(),
            response: "r".into(),
            model_label: "m-pro-paid".into(),
            task_label: Some("ingest".into()),
        };
        let json = serde_json::to_value(&event).expect("serializable");
        assert_eq!(json["model_label"], "m-pro-paid");
        assert_eq!(json["usage"]["input_tokens"], 0);
    }
}
