//! Unified Error Type System
//!
//! Centralized error types for the entire crate.
//!
//! ## Design Principles
//!
//! - Single unified error type (KeywheelError) for the entire crate
//! - Intermediate failures (quota hits, invalid credentials, malformed
//!   payloads) are handled inside the retry loop and logged; only
//!   [`KeywheelError::Overloaded`] crosses the caller boundary from it,
//!   carrying no internal diagnostic detail
//! - No panic/unwrap - all errors are recoverable

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeywheelError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("Config error: {0}")]
    Config(String),

    /// Failure raised by a generation backend. The stringified form is
    /// what the failure classifier inspects.
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// Terminal failure of the retry loop. Deliberately generic: the
    /// causes behind it are logged, never surfaced.
    #[error("Generation capacity is temporarily exhausted, try again in a few minutes")]
    Overloaded,
}

impl From<anyhow::Error> for KeywheelError {
    fn from(err: anyhow::Error) -> Self {
        // Backend implementations commonly bubble context-wrapped errors;
        // the classifier only needs the stringified chain.
        KeywheelError::Generation(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, KeywheelError>;

impl KeywheelError {
    /// Create a generation error from any displayable cause
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation(message.into())
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overloaded_is_generic() {
        let msg = KeywheelError::Overloaded.to_string();
        assert!(msg.contains("temporarily exhausted"));
        assert!(!msg.contains("429"));
    }

    #[test]
    fn test_from_anyhow_keeps_chain() {
        let inner = anyhow::anyhow!("429 RESOURCE_EXHAUSTED").context("provider call failed");
        let err: KeywheelError = inner.into();
        let text = err.to_string();
        assert!(text.contains("RESOURCE_EXHAUSTED"));
        assert!(text.contains("provider call failed"));
    }

    #[test]
    fn test_json_from_impl() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: KeywheelError = parse_err.into();
        assert!(matches!(err, KeywheelError::Json(_)));
    }
}
