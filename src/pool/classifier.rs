//! Failure Classification Strategy
//!
//! Maps a raw provider error description to an allocation decision.
//! Classification is substring/pattern based - providers signal quota
//! and credential problems through message text, not structured codes,
//! so the pattern set is isolated behind the [`FailureClassifier`]
//! trait and can be swapped without touching allocation logic.

use chrono::{DateTime, Utc};
use regex::Regex;

// =============================================================================
// Decision Types
// =============================================================================

/// Which quota window a rate-limit signal points at. Determines the
/// suspension length the allocator applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    /// The provider reports a hard zero limit for the pair
    LimitZero,
    /// Daily quota exhausted; renews at the configured UTC boundary
    Daily,
    /// Per-minute quota exhausted
    PerMinute,
    /// Rate-limit signal without a recognizable window
    Generic,
}

/// Outcome of classifying one failure message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Temporarily suspend the (credential, model) pair
    Suspend(QuotaScope),
    /// The credential is invalid; remove it from rotation permanently
    RemoveCredential,
    /// Not a quota or credential signal; caller decides what to do
    Unclassified,
}

/// Pluggable classification strategy
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, message: &str) -> FailureDecision;
}

// =============================================================================
// Pattern Classifier
// =============================================================================

/// Default classifier matching the provider's known error wording.
pub struct PatternClassifier {
    rate_limit: Regex,
    limit_zero: Regex,
    per_day: Regex,
    per_minute: Regex,
    invalid_credential: Regex,
}

impl PatternClassifier {
    pub fn new() -> Self {
        Self {
            rate_limit: compile(r"(?i)(429|RESOURCE_EXHAUSTED)"),
            limit_zero: compile(r"(?i)limit:\s*0"),
            per_day: compile(r"(?i)(PerDay|Quota.*Day)"),
            per_minute: compile(r"(?i)(PerMinute|Quota.*Minute)"),
            invalid_credential: compile(r"(?i)(API_KEY_INVALID|key not valid|unauthorized)"),
        }
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("hardcoded pattern compiles")
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureClassifier for PatternClassifier {
    fn classify(&self, message: &str) -> FailureDecision {
        if self.rate_limit.is_match(message) {
            let scope = if self.limit_zero.is_match(message) {
                QuotaScope::LimitZero
            } else if self.per_day.is_match(message) {
                QuotaScope::Daily
            } else if self.per_minute.is_match(message) {
                QuotaScope::PerMinute
            } else {
                QuotaScope::Generic
            };
            return FailureDecision::Suspend(scope);
        }
        if self.invalid_credential.is_match(message) {
            return FailureDecision::RemoveCredential;
        }
        FailureDecision::Unclassified
    }
}

// =============================================================================
// Daily Reset Arithmetic
// =============================================================================

/// Seconds from `now` until the next daily quota renewal boundary
/// (today's boundary if still ahead, otherwise tomorrow's), plus the
/// configured safety margin.
pub fn seconds_until_daily_reset(now: DateTime<Utc>, reset_hour: u32, margin_secs: u64) -> u64 {
    let midnight = now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc();
    let mut target = midnight + chrono::Duration::hours(i64::from(reset_hour.min(23)));
    if now >= target {
        target += chrono::Duration::days(1);
    }
    (target - now).num_seconds().max(0) as u64 + margin_secs
}

// =============================================================================
// Tests
// =============================================================================
