//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Suspension policy constants
pub mod suspension {
    /// Suspension applied when the provider reports a hard zero limit
    /// for the (credential, model) pair (seconds)
    pub const LIMIT_ZERO_SECS: u64 = 86_400;

    /// Suspension applied on per-minute quota exhaustion (seconds)
    pub const PER_MINUTE_SECS: u64 = 120;

    /// Suspension applied on an otherwise unspecified rate-limit signal (seconds)
    pub const GENERIC_SECS: u64 = 60;

    /// Default UTC hour at which daily quotas renew
    pub const DEFAULT_DAILY_RESET_HOUR_UTC: u32 = 8;

    /// Safety margin added past the daily renewal boundary (seconds)
    pub const DEFAULT_DAILY_RESET_MARGIN_SECS: u64 = 300;
}

/// Retry loop constants
pub mod retry {
    /// Extra attempts granted beyond the pool's theoretical capacity
    pub const ATTEMPT_MARGIN: usize = 2;

    /// Default sleep between attempts when no slot is free (milliseconds)
    pub const ACQUIRE_BACKOFF_MS: u64 = 1_000;
}

/// Model weight buckets used to order per-credential preference lists
pub mod model_weight {
    pub const ULTRA: u32 = 100;
    pub const PRO: u32 = 80;
    pub const OTHER: u32 = 50;
    pub const FLASH: u32 = 10;
}

/// Built-in defaults used when no model-limit spec is configured
pub mod defaults {
    /// Concurrency limit assumed for models absent from the limit table
    pub const MODEL_LIMIT: u32 = 1;

    /// Default model table (each at [`MODEL_LIMIT`])
    pub const MODELS: &[&str] = &["gemini-3-flash-preview", "gemini-2.5-flash"];
}

/// Token estimation constants
pub mod estimate {
    /// Rough prompt bytes per token for the pre-flight estimate
    pub const PROMPT_BYTES_PER_TOKEN: usize = 3;
}

/// Credential fingerprint constants
pub mod fingerprint {
    /// Hex characters of the sha256 digest kept as the bookkeeping id
    pub const HEX_LEN: usize = 16;
}
