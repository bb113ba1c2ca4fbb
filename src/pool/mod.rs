//! Credential Pool
//!
//! Admission control for a pool of tiered provider credentials.
//!
//! ## Modules
//!
//! - `allocator`: slot accounting, round-robin scanning, suspension
//! - `classifier`: pluggable failure-classification strategy
//! - `credential`: tiers, credential handles, model preference order

mod allocator;
mod classifier;
mod credential;

pub use allocator::{PoolStats, SlotAllocator, SlotGrant};
pub use classifier::{
    FailureClassifier, FailureDecision, PatternClassifier, QuotaScope, seconds_until_daily_reset,
};
pub use credential::{CredentialRef, Tier};
