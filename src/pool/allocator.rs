//! Slot Allocator
//!
//! Tier-prioritized, round-robin-fair, quota-respecting placement of
//! one unit of in-flight work onto a (credential, model) pair.
//!
//! ## Strategy
//!
//! 1. Scan the Free tier from its rotation cursor, wrapping once
//! 2. Per credential, walk its fixed model preference list
//! 3. Skip filtered, suspended, and saturated pairs
//! 4. Fall back to the Paid tier with its own independent cursor
//!
//! All state lives behind one allocator-wide lock; critical sections
//! are pure in-memory bookkeeping. Suspension deadlines are cleared
//! lazily on the next inspection after they expire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};

use super::classifier::{
    FailureClassifier, FailureDecision, PatternClassifier, QuotaScope, seconds_until_daily_reset,
};
use super::credential::{CredentialRef, Tier, prioritized_models};
use crate::config::PoolConfig;
use crate::constants::{defaults, suspension};

// =============================================================================
// Internal State
// =============================================================================

/// Composite key of the flat slot table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKey {
    credential: Arc<str>,
    model: Arc<str>,
}

impl SlotKey {
    fn from_parts(fingerprint: &str, model: &str) -> Self {
        Self {
            credential: Arc::from(fingerprint),
            model: Arc::from(model),
        }
    }
}

#[derive(Debug, Default)]
struct SlotState {
    active: u32,
    suspended_until: Option<Instant>,
}

struct CredentialEntry {
    credential: CredentialRef,
    /// Model names in this credential's fixed preference order
    models: Vec<Arc<str>>,
}

#[derive(Default)]
struct TierState {
    credentials: Vec<CredentialEntry>,
    cursor: usize,
}

/// Unified internal state - all mutable state in a single struct so
/// every operation is atomic under the one allocator lock.
struct PoolInner {
    /// (name, limit) pairs in configuration order
    models: Vec<(Arc<str>, u32)>,
    free: TierState,
    paid: TierState,
    slots: HashMap<SlotKey, SlotState>,
}

impl PoolInner {
    fn limit_of(models: &[(Arc<str>, u32)], model: &str) -> u32 {
        models
            .iter()
            .find(|(name, _)| name.as_ref() == model)
            .map(|(_, limit)| *limit)
            .unwrap_or(defaults::MODEL_LIMIT)
    }

    fn total_credentials(&self) -> usize {
        self.free.credentials.len() + self.paid.credentials.len()
    }

    /// One wrapping scan of a tier starting at its cursor. On a hit the
    /// pair's count is incremented and the cursor moves to one past the
    /// satisfying credential.
    fn find_in_tier(
        &mut self,
        tier: Tier,
        filter: Option<&str>,
        now: Instant,
    ) -> Option<(CredentialRef, Arc<str>)> {
        let (tier_state, slots, models) = match tier {
            Tier::Free => (&mut self.free, &mut self.slots, &self.models),
            Tier::Paid => (&mut self.paid, &mut self.slots, &self.models),
        };
        let count = tier_state.credentials.len();
        if count == 0 {
            return None;
        }

        let mut found: Option<(usize, CredentialRef, Arc<str>)> = None;
        'scan: for step in 0..count {
            let idx = (tier_state.cursor + step) % count;
            let entry = &tier_state.credentials[idx];

            for model in &entry.models {
                if let Some(filter) = filter
                    && !model.to_lowercase().contains(filter)
                {
                    continue;
                }

                let key = SlotKey {
                    credential: entry.credential.fingerprint_arc(),
                    model: Arc::clone(model),
                };
                let Some(slot) = slots.get_mut(&key) else {
                    continue;
                };

                if let Some(deadline) = slot.suspended_until {
                    if now < deadline {
                        continue;
                    }
                    slot.suspended_until = None;
                }

                if slot.active < Self::limit_of(models, model) {
                    slot.active += 1;
                    found = Some((idx, entry.credential.clone(), Arc::clone(model)));
                    break 'scan;
                }
            }
        }

        let (idx, credential, model) = found?;
        tier_state.cursor = (idx + 1) % count;
        Some((credential, model))
    }

    /// Saturating decrement; releasing an already-zero count is a no-op.
    fn release(&mut self, fingerprint: &str, model: &str) {
        let key = SlotKey::from_parts(fingerprint, model);
        if let Some(slot) = self.slots.get_mut(&key)
            && slot.active > 0
        {
            slot.active -= 1;
            info!(credential = %fingerprint, model = %model, "slot released");
        }
    }

    fn remove(&mut self, fingerprint: &str) -> bool {
        let removed = Self::remove_from_tier(&mut self.free, fingerprint)
            || Self::remove_from_tier(&mut self.paid, fingerprint);
        if removed {
            self.slots
                .retain(|key, _| key.credential.as_ref() != fingerprint);
        }
        removed
    }

    fn remove_from_tier(tier: &mut TierState, fingerprint: &str) -> bool {
        let Some(idx) = tier
            .credentials
            .iter()
            .position(|entry| entry.credential.fingerprint() == fingerprint)
        else {
            return false;
        };
        tier.credentials.remove(idx);
        // Keep the cursor aimed at the same next credential, back in
        // bounds of the shrunk tier.
        if idx < tier.cursor {
            tier.cursor -= 1;
        }
        if tier.credentials.is_empty() {
            tier.cursor = 0;
        } else {
            tier.cursor %= tier.credentials.len();
        }
        true
    }
}

// =============================================================================
// Slot Allocator
// =============================================================================

/// Snapshot of pool occupancy for logging and monitoring
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub free_credentials: usize,
    pub paid_credentials: usize,
    pub models: usize,
    pub capacity: usize,
    pub active_slots: u32,
    pub suspended_pairs: usize,
}

/// Thread-safe slot allocator. Construct one per pool and share it via
/// the returned `Arc`; there is deliberately no process-wide instance.
pub struct SlotAllocator {
    classifier: Box<dyn FailureClassifier>,
    daily_reset_utc_hour: u32,
    daily_reset_margin_secs: u64,
    inner: Mutex<PoolInner>,
}

impl SlotAllocator {
    /// Build an allocator with the default pattern classifier.
    pub fn new(config: PoolConfig) -> Arc<Self> {
        Self::with_classifier(config, Box::new(PatternClassifier::new()))
    }

    /// Build an allocator with a custom failure-classification strategy.
    pub fn with_classifier(config: PoolConfig, classifier: Box<dyn FailureClassifier>) -> Arc<Self> {
        let models: Vec<(Arc<str>, u32)> = config
            .models
            .iter()
            .map(|spec| (Arc::from(spec.name.as_str()), spec.limit))
            .collect();

        let mut slots = HashMap::new();
        let mut seen = std::collections::HashSet::new();

        let free = Self::build_tier(
            &config.free_credentials,
            Tier::Free,
            &config,
            &models,
            &mut slots,
            &mut seen,
        );
        let paid = Self::build_tier(
            &config.paid_credentials,
            Tier::Paid,
            &config,
            &models,
            &mut slots,
            &mut seen,
        );

        info!(
            free = free.credentials.len(),
            paid = paid.credentials.len(),
            models = models.len(),
            "credential pool initialized"
        );

        Arc::new(Self {
            classifier,
            daily_reset_utc_hour: config.daily_reset_utc_hour,
            daily_reset_margin_secs: config.daily_reset_margin_secs,
            inner: Mutex::new(PoolInner {
                models,
                free,
                paid,
                slots,
            }),
        })
    }

    fn build_tier(
        raw_credentials: &[String],
        tier: Tier,
        config: &PoolConfig,
        models: &[(Arc<str>, u32)],
        slots: &mut HashMap<SlotKey, SlotState>,
        seen: &mut std::collections::HashSet<Arc<str>>,
    ) -> TierState {
        let preference = prioritized_models(&config.models, tier);
        let mut credentials = Vec::with_capacity(raw_credentials.len());
        for raw in raw_credentials {
            let credential = CredentialRef::new(raw);
            // A credential belongs to at most one tier; first tier wins.
            if !seen.insert(credential.fingerprint_arc()) {
                warn!(
                    credential = %credential.fingerprint(),
                    tier = %tier,
                    "credential already pooled in another tier, skipping"
                );
                continue;
            }
            for (model, _) in models {
                slots.insert(
                    SlotKey {
                        credential: credential.fingerprint_arc(),
                        model: Arc::clone(model),
                    },
                    SlotState::default(),
                );
            }
            credentials.push(CredentialEntry {
                credential,
                models: preference.clone(),
            });
        }
        TierState {
            credentials,
            cursor: 0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Theoretical pool capacity: `max(1, credentials × models)`.
    /// The retry loop derives its attempt bound from this.
    pub fn capacity(&self) -> usize {
        let inner = self.lock();
        (inner.total_credentials() * inner.models.len()).max(1)
    }

    /// Reserve one slot. Scans Free then Paid (subject to the force
    /// flags), honoring suspensions, limits, and the optional
    /// case-insensitive model name filter. Returns `None` when nothing
    /// is admissible right now.
    ///
    /// The returned grant releases its slot when dropped, so the slot
    /// cannot leak on any exit path of the caller.
    pub fn acquire_slot(
        self: &Arc<Self>,
        model_filter: Option<&str>,
        force_paid: bool,
        force_free: bool,
    ) -> Option<SlotGrant> {
        let filter = model_filter.map(str::to_lowercase);
        let now = Instant::now();
        let mut inner = self.lock();

        let mut hit = None;
        if !force_paid {
            hit = inner
                .find_in_tier(Tier::Free, filter.as_deref(), now)
                .map(|(credential, model)| (credential, model, Tier::Free));
        }
        if hit.is_none() && !force_free {
            hit = inner
                .find_in_tier(Tier::Paid, filter.as_deref(), now)
                .map(|(credential, model)| (credential, model, Tier::Paid));
        }
        drop(inner);

        let (credential, model, tier) = hit?;
        info!(
            credential = %credential.fingerprint(),
            model = %model,
            tier = %tier,
            "slot acquired"
        );
        Some(SlotGrant {
            allocator: Arc::clone(self),
            credential,
            model,
            tier,
        })
    }

    /// Release one unit for the pair. Releasing an already-zero count
    /// is a no-op, never an error.
    pub fn release_slot(&self, credential: &CredentialRef, model: &str) {
        self.lock().release(credential.fingerprint(), model);
    }

    /// Suspend the pair until `now + duration`. Suspensions only ever
    /// extend: a shorter suspension never overwrites a later deadline.
    pub fn suspend(&self, credential: &CredentialRef, model: &str, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut inner = self.lock();
        let key = SlotKey::from_parts(credential.fingerprint(), model);
        if let Some(slot) = inner.slots.get_mut(&key) {
            match slot.suspended_until {
                Some(existing) if existing >= deadline => {}
                _ => slot.suspended_until = Some(deadline),
            }
        }
    }

    /// Time left on the pair's suspension, if one is still in force.
    pub fn suspension_remaining(&self, credential: &CredentialRef, model: &str) -> Option<Duration> {
        let now = Instant::now();
        let inner = self.lock();
        let key = SlotKey::from_parts(credential.fingerprint(), model);
        inner
            .slots
            .get(&key)
            .and_then(|slot| slot.suspended_until)
            .and_then(|deadline| deadline.checked_duration_since(now))
    }

    /// Classify a raw failure description and act on it. Returns `true`
    /// when the failure was a quota or credential signal and has been
    /// handled (suspension or removal); `false` leaves all state
    /// untouched and hands the decision back to the caller.
    pub fn record_failure(
        &self,
        credential: &CredentialRef,
        model: &str,
        error_text: &str,
    ) -> bool {
        match self.classifier.classify(error_text) {
            FailureDecision::Suspend(scope) => {
                let duration = self.suspension_for(scope);
                warn!(
                    credential = %credential.fingerprint(),
                    model = %model,
                    ?scope,
                    suspend_secs = duration.as_secs(),
                    "quota signal, suspending pair"
                );
                self.suspend(credential, model, duration);
                true
            }
            FailureDecision::RemoveCredential => {
                error!(
                    credential = %credential.fingerprint(),
                    "invalid credential, removing from rotation"
                );
                self.remove_credential(credential.fingerprint());
                true
            }
            FailureDecision::Unclassified => false,
        }
    }

    fn suspension_for(&self, scope: QuotaScope) -> Duration {
        let secs = match scope {
            QuotaScope::LimitZero => suspension::LIMIT_ZERO_SECS,
            QuotaScope::Daily => seconds_until_daily_reset(
                Utc::now(),
                self.daily_reset_utc_hour,
                self.daily_reset_margin_secs,
            ),
            QuotaScope::PerMinute => suspension::PER_MINUTE_SECS,
            QuotaScope::Generic => suspension::GENERIC_SECS,
        };
        Duration::from_secs(secs)
    }

    /// Permanently remove a credential from whichever tier holds it,
    /// deleting all its slot and suspension state. Returns whether the
    /// fingerprint was found.
    pub fn remove_credential(&self, fingerprint: &str) -> bool {
        self.lock().remove(fingerprint)
    }

    /// Occupancy snapshot for monitoring
    pub fn stats(&self) -> PoolStats {
        let now = Instant::now();
        let inner = self.lock();
        PoolStats {
            free_credentials: inner.free.credentials.len(),
            paid_credentials: inner.paid.credentials.len(),
            models: inner.models.len(),
            capacity: (inner.total_credentials() * inner.models.len()).max(1),
            active_slots: inner.slots.values().map(|slot| slot.active).sum(),
            suspended_pairs: inner
                .slots
                .values()
                .filter(|slot| slot.suspended_until.is_some_and(|deadline| deadline > now))
                .count(),
        }
    }
}

// =============================================================================
// Slot Grant
// =============================================================================

/// One reserved unit of concurrency on a (credential, model) pair.
///
/// The grant models an in-flight request, not a steady-state
/// reservation: hold it across the provider call and drop it as soon
/// as the call resolves. Dropping always returns the slot, so
/// cancellation and early returns cannot leak capacity.
pub struct SlotGrant {
    allocator: Arc<SlotAllocator>,
    credential: CredentialRef,
    model: Arc<str>,
    tier: Tier,
}

impl SlotGrant {
    pub fn credential(&self) -> &CredentialRef {
        &self.credential
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }
}

impl std::fmt::Debug for SlotGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGrant")
            .field("credential", &self.credential.fingerprint())
            .field("model", &self.model)
            .field("tier", &self.tier)
            .finish()
    }
}

impl Drop for SlotGrant {
    fn drop(&mut self) {
        self.allocator
            .lock()
            .release(self.credential.fingerprint(), &self.model);
    }
}

// =============================================================================
// Tests
// =============================================================================
