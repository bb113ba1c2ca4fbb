//! Credentials, Tiers, and Model Preference Ordering
//!
//! A credential is an opaque provider secret belonging to exactly one
//! tier. Internally it is tracked by a sha256 fingerprint; the raw
//! secret only ever leaves the crate through the generation backend
//! contract, and only the fingerprint appears in logs.

use std::sync::Arc;

use secrecy::SecretString;
use sha2::{Digest, Sha256};

use crate::config::ModelSpec;
use crate::constants::{fingerprint, model_weight};

// =============================================================================
// Tier
// =============================================================================

/// Priority class of a credential. Free-tier credentials are always
/// scanned before paid ones, and the two tiers order their model
/// preference lists in opposite directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Free,
    Paid,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Paid => write!(f, "paid"),
        }
    }
}

// =============================================================================
// Credential Reference
// =============================================================================

/// Handle to a pooled credential.
///
/// Cheap to clone; equality and ordering of bookkeeping are by
/// fingerprint. The secret is never exposed in Debug output.
#[derive(Clone)]
pub struct CredentialRef {
    fingerprint: Arc<str>,
    secret: Arc<SecretString>,
}

impl CredentialRef {
    pub(crate) fn new(raw: &str) -> Self {
        let digest = Sha256::digest(raw.as_bytes());
        let hex: String = digest
            .iter()
            .take(fingerprint::HEX_LEN / 2)
            .map(|byte| format!("{byte:02x}"))
            .collect();
        Self {
            fingerprint: Arc::from(hex.as_str()),
            secret: Arc::new(SecretString::from(raw.to_owned())),
        }
    }

    /// Stable non-secret identifier used for bookkeeping and logging
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub(crate) fn fingerprint_arc(&self) -> Arc<str> {
        Arc::clone(&self.fingerprint)
    }

    /// The raw secret, for handing to a generation backend
    pub fn secret(&self) -> &SecretString {
        &self.secret
    }
}

impl std::fmt::Debug for CredentialRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRef")
            .field("fingerprint", &self.fingerprint)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for CredentialRef {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for CredentialRef {}

// =============================================================================
// Model Preference Ordering
// =============================================================================

/// Weight bucket of a model name. Used only to order preference
/// lists, never to gate allocation.
pub(crate) fn weight_of(model: &str) -> u32 {
    let lower = model.to_lowercase();
    if lower.contains("ultra") {
        model_weight::ULTRA
    } else if lower.contains("pro") {
        model_weight::PRO
    } else if lower.contains("flash") {
        model_weight::FLASH
    } else {
        model_weight::OTHER
    }
}

/// Fixed per-tier model preference list.
///
/// Free credentials spend the most valuable model first (descending
/// weight); paid credentials spend the cheapest first (ascending).
/// The sort is stable, so config order breaks weight ties.
pub(crate) fn prioritized_models(models: &[ModelSpec], tier: Tier) -> Vec<Arc<str>> {
    let mut ordered: Vec<&ModelSpec> = models.iter().collect();
    match tier {
        Tier::Free => ordered.sort_by_key(|spec| std::cmp::Reverse(weight_of(&spec.name))),
        Tier::Paid => ordered.sort_by_key(|spec| weight_of(&spec.name)),
    }
    ordered
        .into_iter()
        .map(|spec| Arc::from(spec.name.as_str()))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
