//! Generation Backend Contract
//!
//! The provider call itself lives outside this crate: implementors
//! wrap whatever transport they use and surface failures as
//! `KeywheelError::Generation`, whose stringified form is what the
//! failure classifier inspects. No structured error codes are assumed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::request::GenerationRequest;
use crate::pool::CredentialRef;
use crate::types::Result;

/// Token usage breakdown reported by a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub input_tokens: u32,
    /// Tokens attributed to the binary attachment, if any
    pub attachment_tokens: u32,
    /// Response tokens
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, attachment_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            attachment_tokens,
            output_tokens,
        }
    }

    /// Total tokens across all modalities
    pub fn total(&self) -> u32 {
        self.input_tokens + self.attachment_tokens + self.output_tokens
    }
}

/// Raw result bundle of one provider call
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub text: String,
    pub usage: TokenUsage,
}

impl GenerationOutput {
    pub fn new(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }
}

/// External generation collaborator
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Perform one provider call with the chosen credential and model.
    async fn generate(
        &self,
        credential: &CredentialRef,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage::new(100, 25, 50);
        assert_eq!(usage.total(), 175);
        assert_eq!(TokenUsage::default().total(), 0);
    }
}
