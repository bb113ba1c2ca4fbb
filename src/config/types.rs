//! Configuration Types
//!
//! Raw settings (env-facing strings) and the validated pool
//! configuration built from them.
//!
//! The model-limit spec accepts two forms:
//! 1. JSON map: `{"model-a": 2, "model-b": 1}`
//! 2. Flat (env friendly): `model-a=2,model-b=1`
//!
//! Malformed specs fall back to the built-in default table and are
//! never surfaced to the caller.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::constants::{defaults, retry, suspension};
use crate::types::{KeywheelError, Result};

// =============================================================================
// Raw Settings
// =============================================================================

/// Raw pool settings as resolved from the environment.
///
/// Note: credential lists are secrets - they are never serialized to
/// output and are redacted in debug output. The pool converts them to
/// `SecretString` internally for runtime protection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Model-limit spec (JSON map or flat `name=limit,...` form)
    pub model_limits: Option<String>,

    /// Comma-separated free-tier credentials
    #[serde(skip_serializing)]
    pub free_credentials: Option<String>,

    /// Comma-separated paid-tier credentials
    #[serde(skip_serializing)]
    pub paid_credentials: Option<String>,

    /// UTC hour at which daily quotas renew
    pub daily_reset_utc_hour: u32,

    /// Safety margin added past the daily renewal boundary (seconds)
    pub daily_reset_margin_secs: u64,

    /// Sleep between retry attempts when no slot is free (milliseconds)
    pub acquire_backoff_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            model_limits: None,
            free_credentials: None,
            paid_credentials: None,
            daily_reset_utc_hour: suspension::DEFAULT_DAILY_RESET_HOUR_UTC,
            daily_reset_margin_secs: suspension::DEFAULT_DAILY_RESET_MARGIN_SECS,
            acquire_backoff_ms: retry::ACQUIRE_BACKOFF_MS,
        }
    }
}

impl std::fmt::Debug for PoolSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolSettings")
            .field("model_limits", &self.model_limits)
            .field(
                "free_credentials",
                &self.free_credentials.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "paid_credentials",
                &self.paid_credentials.as_ref().map(|_| "[REDACTED]"),
            )
            .field("daily_reset_utc_hour", &self.daily_reset_utc_hour)
            .field("daily_reset_margin_secs", &self.daily_reset_margin_secs)
            .field("acquire_backoff_ms", &self.acquire_backoff_ms)
            .finish()
    }
}

// =============================================================================
// Validated Pool Configuration
// =============================================================================

/// One model with its concurrency limit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub limit: u32,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, limit: u32) -> Self {
        Self {
            name: name.into(),
            limit,
        }
    }
}

/// Validated configuration the allocator is built from.
///
/// Model order matches the limit spec's insertion order; credential
/// lists are trimmed and deduplicated preserving first occurrence.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub models: Vec<ModelSpec>,
    pub free_credentials: Vec<String>,
    pub paid_credentials: Vec<String>,
    pub daily_reset_utc_hour: u32,
    pub daily_reset_margin_secs: u64,
}

impl PoolConfig {
    /// Build from raw settings, applying the parse-or-fallback rules.
    pub fn from_settings(settings: &PoolSettings) -> Self {
        Self {
            models: parse_model_limits(settings.model_limits.as_deref()),
            free_credentials: parse_credential_list(settings.free_credentials.as_deref()),
            paid_credentials: parse_credential_list(settings.paid_credentials.as_deref()),
            daily_reset_utc_hour: settings.daily_reset_utc_hour,
            daily_reset_margin_secs: settings.daily_reset_margin_secs,
        }
    }

    /// Build directly from the three configuration strings.
    pub fn from_parts(
        model_limits: Option<&str>,
        free_credentials: Option<&str>,
        paid_credentials: Option<&str>,
    ) -> Self {
        Self {
            models: parse_model_limits(model_limits),
            free_credentials: parse_credential_list(free_credentials),
            paid_credentials: parse_credential_list(paid_credentials),
            daily_reset_utc_hour: suspension::DEFAULT_DAILY_RESET_HOUR_UTC,
            daily_reset_margin_secs: suspension::DEFAULT_DAILY_RESET_MARGIN_SECS,
        }
    }

    /// Validate configuration values are within acceptable ranges.
    /// Returns `KeywheelError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if self.daily_reset_utc_hour > 23 {
            return Err(KeywheelError::Config(format!(
                "daily_reset_utc_hour must be between 0 and 23, got {}",
                self.daily_reset_utc_hour
            )));
        }
        Ok(())
    }

    pub fn total_credentials(&self) -> usize {
        self.free_credentials.len() + self.paid_credentials.len()
    }
}

// =============================================================================
// Parsing
// =============================================================================

fn default_models() -> Vec<ModelSpec> {
    defaults::MODELS
        .iter()
        .map(|name| ModelSpec::new(*name, defaults::MODEL_LIMIT))
        .collect()
}

/// Parse the model-limit spec, falling back to the built-in default
/// table on absence or any parse failure.
pub(crate) fn parse_model_limits(spec: Option<&str>) -> Vec<ModelSpec> {
    let Some(raw) = spec.map(str::trim).filter(|s| !s.is_empty()) else {
        return default_models();
    };

    let parsed = if raw.starts_with('{') {
        parse_json_form(raw)
    } else {
        parse_flat_form(raw)
    };

    match parsed {
        Some(models) if !models.is_empty() => {
            info!(count = models.len(), "model limit table loaded");
            models
        }
        _ => {
            error!("malformed model limit spec, using built-in defaults");
            default_models()
        }
    }
}

fn parse_json_form(raw: &str) -> Option<Vec<ModelSpec>> {
    // serde_json's preserve_order feature keeps map insertion order
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(raw).ok()?;
    let mut models = Vec::with_capacity(map.len());
    for (name, value) in map {
        let limit = value.as_u64().filter(|l| *l >= 1)?;
        models.push(ModelSpec::new(name, u32::try_from(limit).ok()?));
    }
    Some(models)
}

fn parse_flat_form(raw: &str) -> Option<Vec<ModelSpec>> {
    let mut models = Vec::new();
    for item in raw.split(',') {
        let Some((name, value)) = item.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let limit: u32 = value.trim().parse().ok().filter(|l| *l >= 1)?;
        models.push(ModelSpec::new(name, limit));
    }
    Some(models)
}

/// Split a comma-separated credential list, trimming whitespace and
/// deduplicating while preserving first-occurrence order.
pub(crate) fn parse_credential_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let mut seen = std::collections::HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter(|item| seen.insert(item.to_string()))
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_form_preserves_order() {
        let models = parse_model_limits(Some(r#"{"model-ultra": 2, "model-flash": 8}"#));
        assert_eq!(models.len(), 2);
        assert_eq!(models[0], ModelSpec::new("model-ultra", 2));
        assert_eq!(models[1], ModelSpec::new("model-flash", 8));
    }

    #[test]
    fn test_flat_form() {
        let models = parse_model_limits(Some("model-pro=4, model-flash=10"));
        assert_eq!(models[0], ModelSpec::new("model-pro", 4));
        assert_eq!(models[1], ModelSpec::new("model-flash", 10));
    }

    #[test]
    fn test_flat_form_skips_items_without_equals() {
        let models = parse_model_limits(Some("garbage,model-flash=1"));
        assert_eq!(models, vec![ModelSpec::new("model-flash", 1)]);
    }

    #[test]
    fn test_malformed_json_falls_back() {
        let models = parse_model_limits(Some(r#"{"model": "#));
        assert_eq!(models, super::default_models());
    }

    #[test]
    fn test_malformed_flat_value_falls_back() {
        let models = parse_model_limits(Some("model-a=ten"));
        assert_eq!(models, super::default_models());
    }

    #[test]
    fn test_zero_limit_falls_back() {
        let models = parse_model_limits(Some("model-a=0"));
        assert_eq!(models, super::default_models());
    }

    #[test]
    fn test_absent_spec_uses_defaults() {
        let models = parse_model_limits(None);
        assert_eq!(models.len(), 2);
        assert!(models.iter().all(|m| m.limit == 1));

        let blank = parse_model_limits(Some("   "));
        assert_eq!(blank, models);
    }

    #[test]
    fn test_credential_list_trims_and_dedupes() {
        let creds = parse_credential_list(Some(" key-a , key-b ,key-a,, key-c "));
        assert_eq!(creds, vec!["key-a", "key-b", "key-c"]);
    }

    #[test]
    fn test_credential_list_absent() {
        assert!(parse_credential_list(None).is_empty());
        assert!(parse_credential_list(Some("")).is_empty());
    }

    #[test]
    fn test_validate_reset_hour() {
        let mut config = PoolConfig::from_parts(None, Some("k1"), None);
        assert!(config.validate().is_ok());

        config.daily_reset_utc_hour = 24;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_debug_redacts_credentials() {
        let settings = PoolSettings {
            free_credentials: Some("super-secret-key".into()),
            ..Default::default()
        };
        let debug = format!("{settings:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret-key"));
    }
}
