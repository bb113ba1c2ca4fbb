//! Retry Orchestrator
//!
//! Drives one logical generation request through the pool:
//! acquire → invoke → classify/release → retry-or-return.
//!
//! ## Strategy
//!
//! 1. Bound attempts at pool capacity plus a small margin
//! 2. No free slot: sleep a fixed short interval, spend an attempt
//! 3. Backend failure: feed the text to the allocator's classifier so
//!    the next attempt lands on a different pair, then keep looping
//! 4. Malformed structured payload: retryable, nothing suspended
//! 5. Exhaustion surfaces a single generic overload failure; the real
//!    causes are logged and never leak to the caller

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::backend::{GenerationBackend, TokenUsage};
use super::request::{GenerationRequest, GenerationTask, rough_token_estimate};
use crate::config::PoolSettings;
use crate::constants::retry;
use crate::pool::SlotAllocator;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::types::{KeywheelError, Result};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Sleep between attempts when no slot is free
    pub acquire_backoff: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            acquire_backoff: Duration::from_millis(retry::ACQUIRE_BACKOFF_MS),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &PoolSettings) -> Self {
        Self {
            acquire_backoff: Duration::from_millis(settings.acquire_backoff_ms),
        }
    }
}

// =============================================================================
// Result Types
// =============================================================================

/// Validated response payload
#[derive(Debug, Clone)]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
}

impl Payload {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Json(_) => None,
            Self::Text(text) => Some(text),
        }
    }
}

/// Final outcome of one orchestrated request
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub payload: Payload,
    pub usage: TokenUsage,
    pub correlation_id: String,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Retry/fallback loop over one shared allocator. Construct once and
/// reuse across concurrent requests; all rotation state lives in the
/// allocator.
pub struct RetryOrchestrator {
    allocator: Arc<SlotAllocator>,
    backend: Arc<dyn GenerationBackend>,
    telemetry: Arc<dyn TelemetrySink>,
    config: OrchestratorConfig,
}

impl RetryOrchestrator {
    pub fn new(
        allocator: Arc<SlotAllocator>,
        backend: Arc<dyn GenerationBackend>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self::with_config(allocator, backend, telemetry, OrchestratorConfig::default())
    }

    pub fn with_config(
        allocator: Arc<SlotAllocator>,
        backend: Arc<dyn GenerationBackend>,
        telemetry: Arc<dyn TelemetrySink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            allocator,
            backend,
            telemetry,
            config,
        }
    }

    /// Run one generation task to completion or terminal overload.
    pub async fn run(&self, task: GenerationTask) -> Result<GenerationResult> {
        let request = GenerationRequest::from_task(&task, Utc::now());

        let estimate = rough_token_estimate(&request.prompt);
        if estimate > 0 {
            debug!(tokens = estimate, "rough prompt token estimate");
        }

        let max_attempts = self.allocator.capacity() + retry::ATTEMPT_MARGIN;
        let mut last_failure: Option<KeywheelError> = None;

        for attempt in 1..=max_attempts {
            let Some(grant) = self.allocator.acquire_slot(
                task.model_filter.as_deref(),
                task.force_paid,
                task.force_free,
            ) else {
                warn!(attempt, max_attempts, "no slot available, backing off");
                sleep(self.config.acquire_backoff).await;
                continue;
            };

            let credential = grant.credential().clone();
            let model = grant.model().to_string();
            let tier = grant.tier();

            debug!(
                attempt,
                backend = self.backend.name(),
                model = %model,
                tier = %tier,
                credential = %credential.fingerprint(),
                "invoking generation backend"
            );

            let outcome = self.backend.generate(&credential, &model, &request).await;
            // The grant models the in-flight call only; give the slot
            // back before looking at the outcome.
            drop(grant);

            match outcome {
                Ok(output) => match parse_payload(&output.text, task.structured) {
                    Ok(payload) => {
                        let correlation_id = task
                            .correlation_id
                            .clone()
                            .unwrap_or_else(|| Uuid::new_v4().to_string());
                        let event = TelemetryEvent {
                            correlation_id: correlation_id.clone(),
                            usage: output.usage,
                            request: request.prompt.clone(),
                            response: output.text,
                            model_label: format!("{model}-{tier}"),
                            task_label: task.task_label.clone(),
                        };
                        if let Err(err) = self.telemetry.record(&event).await {
                            warn!(error = %err, "telemetry sink failed, continuing");
                        }
                        return Ok(GenerationResult {
                            payload,
                            usage: output.usage,
                            correlation_id,
                        });
                    }
                    Err(err) => {
                        warn!(
                            attempt,
                            error = %err,
                            credential = %credential.fingerprint(),
                            "malformed structured payload, retrying"
                        );
                        last_failure = Some(err);
                    }
                },
                Err(err) => {
                    let handled =
                        self.allocator
                            .record_failure(&credential, &model, &err.to_string());
                    if handled {
                        warn!(
                            attempt,
                            credential = %credential.fingerprint(),
                            "quota or credential failure, rotating"
                        );
                    } else {
                        error!(attempt, error = %err, "unclassified backend failure, retrying");
                    }
                    last_failure = Some(err);
                }
            }
        }

        match last_failure {
            Some(err) => error!(error = %err, "attempt budget exhausted"),
            None => error!("attempt budget exhausted without a free slot"),
        }
        Err(KeywheelError::Overloaded)
    }
}

fn parse_payload(text: &str, structured: bool) -> Result<Payload> {
    if structured {
        Ok(Payload::Json(serde_json::from_str(text)?))
    } else {
        Ok(Payload::Text(text.to_owned()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelSpec, PoolConfig};
    use crate::generate::backend::GenerationOutput;
    use crate::pool::CredentialRef;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn pool(models: &[(&str, u32)], free: &[&str], paid: &[&str]) -> Arc<SlotAllocator> {
        SlotAllocator::new(PoolConfig {
            models: models
                .iter()
                .map(|(name, limit)| ModelSpec::new(*name, *limit))
                .collect(),
            free_credentials: free.iter().map(|s| s.to_string()).collect(),
            paid_credentials: paid.iter().map(|s| s.to_string()).collect(),
            daily_reset_utc_hour: 8,
            daily_reset_margin_secs: 300,
        })
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            acquire_backoff: Duration::from_millis(1),
        }
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Backend scripted with one outcome per call; panics past the end.
    struct ScriptedBackend {
        calls: AtomicU32,
        script: Mutex<VecDeque<std::result::Result<&'static str, &'static str>>>,
    }

    impl ScriptedBackend {
        fn new(steps: Vec<std::result::Result<&'static str, &'static str>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                script: Mutex::new(steps.into()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn generate(
            &self,
            _credential: &CredentialRef,
            _model: &str,
            _request: &GenerationRequest,
        ) -> Result<GenerationOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .script
                .lock()
                .expect("script lock")
                .pop_front()
                .expect("script exhausted");
            match step {
                Ok(text) => Ok(GenerationOutput::new(text, TokenUsage::new(12, 0, 7))),
                Err(message) => Err(KeywheelError::generation(message)),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Backend that always fails with the same unclassifiable message.
    struct FailingBackend {
        calls: AtomicU32,
    }

    #[async_trait]
    impl GenerationBackend for FailingBackend {
        async fn generate(
            &self,
            _credential: &CredentialRef,
            _model: &str,
            _request: &GenerationRequest,
        ) -> Result<GenerationOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(KeywheelError::generation("socket closed unexpectedly"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<TelemetryEvent>>,
    }

    #[async_trait]
    impl TelemetrySink for RecordingSink {
        async fn record(&self, event: &TelemetryEvent) -> Result<()> {
            self.events.lock().expect("events lock").push(event.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl TelemetrySink for FailingSink {
        async fn record(&self, _event: &TelemetryEvent) -> Result<()> {
            Err(KeywheelError::Telemetry("sink offline".into()))
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        init_tracing();
        let allocator = pool(&[("m-flash", 1)], &["free-1"], &[]);
        let backend = ScriptedBackend::new(vec![Ok(r#"{"answer": 42}"#)]);
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = RetryOrchestrator::new(
            Arc::clone(&allocator),
            backend.clone(),
            Arc::clone(&sink) as Arc<dyn TelemetrySink>,
        );

        let result = orchestrator
            .run(GenerationTask::new("answer me"))
            .await
            .expect("success");

        assert_eq!(result.payload.as_json().unwrap()["answer"], 42);
        assert_eq!(result.usage, TokenUsage::new(12, 0, 7));
        assert!(Uuid::parse_str(&result.correlation_id).is_ok());
        assert_eq!(backend.calls(), 1);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].model_label, "m-flash-free");
        assert_eq!(events[0].correlation_id, result.correlation_id);
    }

    #[tokio::test]
    async fn test_plain_text_payload() {
        let allocator = pool(&[("m-flash", 1)], &["free-1"], &[]);
        let backend = ScriptedBackend::new(vec![Ok("plain words")]);
        let orchestrator =
            RetryOrchestrator::new(allocator, backend, Arc::new(RecordingSink::default()));

        let result = orchestrator
            .run(GenerationTask::new("say it").with_structured(false))
            .await
            .expect("success");
        assert_eq!(result.payload.as_text(), Some("plain words"));
    }

    #[tokio::test]
    async fn test_malformed_json_retries_without_suspending() {
        let allocator = pool(&[("m-flash", 1)], &["free-1"], &[]);
        let backend = ScriptedBackend::new(vec![Ok("not json at all"), Ok(r#"{"ok": true}"#)]);
        let orchestrator = RetryOrchestrator::new(
            Arc::clone(&allocator),
            backend.clone(),
            Arc::new(RecordingSink::default()),
        );

        let result = orchestrator
            .run(GenerationTask::new("strict"))
            .await
            .expect("recovers on retry");
        assert_eq!(result.payload.as_json().unwrap()["ok"], true);
        assert_eq!(backend.calls(), 2);
        assert_eq!(allocator.stats().suspended_pairs, 0);
    }

    #[tokio::test]
    async fn test_quota_failure_suspends_and_rotates() {
        let allocator = pool(&[("m-flash", 1)], &["free-1", "free-2"], &[]);
        let backend = ScriptedBackend::new(vec![
            Err("429 RESOURCE_EXHAUSTED: GenerateRequestsPerMinute"),
            Ok(r#"{"ok": true}"#),
        ]);
        let orchestrator = RetryOrchestrator::new(
            Arc::clone(&allocator),
            backend.clone(),
            Arc::new(RecordingSink::default()),
        );

        let result = orchestrator.run(GenerationTask::new("go")).await;
        assert!(result.is_ok());
        assert_eq!(backend.calls(), 2);
        assert_eq!(allocator.stats().suspended_pairs, 1);
    }

    #[tokio::test]
    async fn test_invalid_credential_removed_midway() {
        let allocator = pool(&[("m-flash", 1)], &["free-1", "free-2"], &[]);
        let backend = ScriptedBackend::new(vec![
            Err("400 API_KEY_INVALID: key not valid"),
            Ok(r#"{"ok": true}"#),
        ]);
        let orchestrator = RetryOrchestrator::new(
            Arc::clone(&allocator),
            backend.clone(),
            Arc::new(RecordingSink::default()),
        );

        orchestrator
            .run(GenerationTask::new("go"))
            .await
            .expect("second credential serves");
        assert_eq!(allocator.stats().free_credentials, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_generic_overload() {
        init_tracing();
        // capacity 1 -> 3 attempts, all failing with an unclassified error
        let allocator = pool(&[("m-flash", 1)], &["free-1"], &[]);
        let backend = Arc::new(FailingBackend {
            calls: AtomicU32::new(0),
        });
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = RetryOrchestrator::with_config(
            Arc::clone(&allocator),
            backend.clone(),
            Arc::clone(&sink) as Arc<dyn TelemetrySink>,
            fast_config(),
        );

        let err = orchestrator
            .run(GenerationTask::new("doomed"))
            .await
            .expect_err("terminal overload");
        assert!(matches!(err, KeywheelError::Overloaded));
        assert!(!err.to_string().contains("socket"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert!(sink.events.lock().unwrap().is_empty());
        // Every grant was returned on the failure path.
        assert_eq!(allocator.stats().active_slots, 0);
    }

    #[tokio::test]
    async fn test_force_free_with_empty_free_tier_never_calls_backend() {
        let allocator = pool(&[("m-flash", 1)], &[], &["paid-1"]);
        let backend = ScriptedBackend::new(vec![]);
        let orchestrator = RetryOrchestrator::with_config(
            allocator,
            backend.clone(),
            Arc::new(RecordingSink::default()),
            fast_config(),
        );

        let err = orchestrator
            .run(GenerationTask::new("free only").force_free())
            .await
            .expect_err("no free capacity");
        assert!(matches!(err, KeywheelError::Overloaded));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_fully_held_pool_exhausts_attempt_budget() {
        // 2 free + 1 paid credentials x 2 models: capacity 6, bound 8.
        let allocator = pool(
            &[("m-pro", 1), ("m-flash", 1)],
            &["free-1", "free-2"],
            &["paid-1"],
        );
        assert_eq!(allocator.capacity(), 6);

        let held: Vec<_> = (0..6)
            .map(|_| allocator.acquire_slot(None, false, false).expect("slot"))
            .collect();
        assert_eq!(held.len(), 6);

        let backend = ScriptedBackend::new(vec![]);
        let orchestrator = RetryOrchestrator::with_config(
            Arc::clone(&allocator),
            backend.clone(),
            Arc::new(RecordingSink::default()),
            fast_config(),
        );

        let err = orchestrator
            .run(GenerationTask::new("wait forever"))
            .await
            .expect_err("nothing ever frees up");
        assert!(matches!(err, KeywheelError::Overloaded));
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = PoolSettings {
            acquire_backoff_ms: 250,
            ..Default::default()
        };
        let config = OrchestratorConfig::from_settings(&settings);
        assert_eq!(config.acquire_backoff, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_supplied_correlation_id_round_trips() {
        let allocator = pool(&[("m-flash", 1)], &["free-1"], &[]);
        let backend = ScriptedBackend::new(vec![Ok(r#"{"ok": true}"#)]);
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = RetryOrchestrator::new(
            allocator,
            backend,
            Arc::clone(&sink) as Arc<dyn TelemetrySink>,
        );

        let result = orchestrator
            .run(GenerationTask::new("go").with_correlation_id("event-7"))
            .await
            .expect("success");
        assert_eq!(result.correlation_id, "event-7");
        assert_eq!(sink.events.lock().unwrap()[0].correlation_id, "event-7");
    }

    #[tokio::test]
    async fn test_telemetry_failure_does_not_abort_result() {
        let allocator = pool(&[("m-flash", 1)], &["free-1"], &[]);
        let backend = ScriptedBackend::new(vec![Ok(r#"{"ok": true}"#)]);
        let orchestrator = RetryOrchestrator::new(allocator, backend, Arc::new(FailingSink));

        let result = orchestrator.run(GenerationTask::new("go")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_allocator() {
        let allocator = pool(&[("m-flash", 1)], &["free-1", "free-2"], &[]);
        let backend = ScriptedBackend::new(vec![
            Ok(r#"{"n": 1}"#),
            Ok(r#"{"n": 2}"#),
            Ok(r#"{"n": 3}"#),
            Ok(r#"{"n": 4}"#),
        ]);
        let orchestrator = Arc::new(RetryOrchestrator::with_config(
            Arc::clone(&allocator),
            backend,
            Arc::new(RecordingSink::default()),
            fast_config(),
        ));

        let runs = (0..4).map(|_| {
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.run(GenerationTask::new("go")).await }
        });
        let results = futures::future::join_all(runs).await;

        assert!(results.iter().all(|result| result.is_ok()));
        assert_eq!(allocator.stats().active_slots, 0);
    }

    /// Backend that proves the slot is held during the call and free
    /// afterwards.
    struct ProbingBackend {
        allocator: Arc<SlotAllocator>,
        saw_saturation: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl GenerationBackend for ProbingBackend {
        async fn generate(
            &self,
            _credential: &CredentialRef,
            _model: &str,
            _request: &GenerationRequest,
        ) -> Result<GenerationOutput> {
            // Limit 1 and we are the in-flight call, so nothing else fits.
            let denied = self.allocator.acquire_slot(None, false, false).is_none();
            self.saw_saturation.store(denied, Ordering::SeqCst);
            Ok(GenerationOutput::new(r#"{"ok": true}"#, TokenUsage::default()))
        }

        fn name(&self) -> &str {
            "probing"
        }
    }

    #[tokio::test]
    async fn test_slot_held_during_call_released_after() {
        let allocator = pool(&[("m-flash", 1)], &["free-1"], &[]);
        let backend = Arc::new(ProbingBackend {
            allocator: Arc::clone(&allocator),
            saw_saturation: std::sync::atomic::AtomicBool::new(false),
        });
        let orchestrator = RetryOrchestrator::new(
            Arc::clone(&allocator),
            backend.clone(),
            Arc::new(RecordingSink::default()),
        );

        orchestrator
            .run(GenerationTask::new("probe"))
            .await
            .expect("success");
        assert!(backend.saw_saturation.load(Ordering::SeqCst));
        assert_eq!(allocator.stats().active_slots, 0);
    }
}
