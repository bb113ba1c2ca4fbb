//! Keywheel - Tiered Credential Rotation for Rate-Limited AI Services
//!
//! Allocates bounded, per-model execution capacity across a pool of
//! provider credentials split into two priority tiers (Free, Paid),
//! detects provider-signaled rate/quota errors, and temporarily or
//! permanently removes saturated or invalid credentials from rotation.
//!
//! ## Core Features
//!
//! - **Slot Allocation**: per-(credential, model) concurrency limits
//!   with round-robin fairness inside each tier
//! - **Free-First Routing**: free-tier credentials are exhausted before
//!   paid ones, with opposite model preference per tier
//! - **Quota Detection**: pattern-based failure classification driving
//!   suspensions sized to the quota window that was hit
//! - **Bounded Retries**: one retry loop capped at pool capacity that
//!   rotates pairs and surfaces a single generic overload failure
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use keywheel::{ConfigLoader, GenerationTask, LogTelemetry, RetryOrchestrator, SlotAllocator};
//!
//! let allocator = SlotAllocator::new(ConfigLoader::load()?);
//! let orchestrator = RetryOrchestrator::new(allocator, backend, Arc::new(LogTelemetry));
//! let result = orchestrator.run(GenerationTask::new("Summarize:").with_input(text)).await?;
//! ```
//!
//! ## Modules
//!
//! - [`pool`]: slot allocator, failure classification, credential tiers
//! - [`generate`]: retry orchestrator and the generation backend contract
//! - [`telemetry`]: fire-and-forget usage event contract
//! - [`config`]: settings resolution and limit-spec parsing

pub mod config;
pub mod constants;
pub mod generate;
pub mod pool;
pub mod telemetry;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{ConfigLoader, ModelSpec, PoolConfig, PoolSettings};

// Error Types
pub use types::error::{KeywheelError, Result};

// Pool
pub use pool::{
    CredentialRef, FailureClassifier, FailureDecision, PatternClassifier, PoolStats, QuotaScope,
    SlotAllocator, SlotGrant, Tier,
};

// =============================================================================
// Generation Re-exports
// =============================================================================

pub use generate::{
    Attachment, GenerationBackend, GenerationOutput, GenerationRequest, GenerationResult,
    GenerationTask, OrchestratorConfig, Payload, RetryOrchestrator, TokenUsage,
};

// =============================================================================
// Telemetry Re-exports
// =============================================================================

pub use telemetry::{LogTelemetry, TelemetryEvent, TelemetrySink};
