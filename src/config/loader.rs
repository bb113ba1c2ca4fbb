//! Configuration Loader (Figment-based)
//!
//! Resolves pool settings from two sources:
//! 1. Built-in defaults (Serialized)
//! 2. Environment variables (KEYWHEEL_* prefix)
//!
//! There is no file surface: allocator state is rebuilt from
//! configuration at process start, so the environment is the only
//! external input.

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use tracing::debug;

use super::types::{PoolConfig, PoolSettings};
use crate::types::{KeywheelError, Result};

/// Environment variable prefix (e.g. `KEYWHEEL_MODEL_LIMITS`)
const ENV_PREFIX: &str = "KEYWHEEL_";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load raw settings: defaults → env vars.
    pub fn load_settings() -> Result<PoolSettings> {
        debug!("resolving pool settings from environment");
        Figment::new()
            .merge(Serialized::defaults(PoolSettings::default()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| KeywheelError::Config(format!("Configuration error: {e}")))
    }

    /// Load and validate the full pool configuration.
    pub fn load() -> Result<PoolConfig> {
        let settings = Self::load_settings()?;
        let config = PoolConfig::from_settings(&settings);
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        figment::Jail::expect_with(|_| {
            let settings = ConfigLoader::load_settings().expect("defaults load");
            assert!(settings.model_limits.is_none());
            assert_eq!(settings.daily_reset_utc_hour, 8);
            assert_eq!(settings.acquire_backoff_ms, 1_000);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("KEYWHEEL_MODEL_LIMITS", "model-a=3");
            jail.set_env("KEYWHEEL_FREE_CREDENTIALS", "k1,k2");
            jail.set_env("KEYWHEEL_DAILY_RESET_UTC_HOUR", "6");

            let config = ConfigLoader::load().expect("env load");
            assert_eq!(config.models.len(), 1);
            assert_eq!(config.models[0].name, "model-a");
            assert_eq!(config.free_credentials, vec!["k1", "k2"]);
            assert_eq!(config.daily_reset_utc_hour, 6);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_reset_hour_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("KEYWHEEL_DAILY_RESET_UTC_HOUR", "30");
            assert!(ConfigLoader::load().is_err());
            Ok(())
        });
    }
}
