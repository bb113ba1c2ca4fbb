//! Generation Layer
//!
//! The retry/fallback loop and the contracts it drives.
//!
//! ## Modules
//!
//! - `backend`: external generation collaborator contract
//! - `request`: task description and prompt composition
//! - `orchestrator`: acquire → invoke → classify → retry loop

mod backend;
mod orchestrator;
mod request;

pub use backend::{GenerationBackend, GenerationOutput, TokenUsage};
pub use orchestrator::{GenerationResult, OrchestratorConfig, Payload, RetryOrchestrator};
pub use request::{Attachment, GenerationRequest, GenerationTask, rough_token_estimate};
