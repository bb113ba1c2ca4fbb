//! Generation Task Description
//!
//! What a caller wants generated, plus the routing knobs the retry
//! loop honors (model filter, tier forcing). The composed prompt the
//! backend receives is year-stamped and, for structured output without
//! an attachment, prefixed with a strict JSON-only instruction.

use chrono::{DateTime, Utc};

use crate::constants::estimate;

/// Instruction prefixed to structured text-only prompts
const JSON_INSTRUCTION: &str = "Respond ONLY with a valid JSON object. Do not use markdown.";

// =============================================================================
// Task
// =============================================================================

/// Binary payload shipped alongside the prompt
#[derive(Debug, Clone)]
pub struct Attachment {
    pub data: Vec<u8>,
    pub content_type: String,
}

impl Attachment {
    pub fn new(data: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            data,
            content_type: content_type.into(),
        }
    }
}

/// One logical generation request as seen by the retry loop
#[derive(Debug, Clone)]
pub struct GenerationTask {
    /// Instruction part of the prompt
    pub prompt: String,
    /// Free-form input appended below the instruction
    pub input: String,
    /// Optional binary attachment
    pub attachment: Option<Attachment>,
    /// Whether the response must parse as a JSON object
    pub structured: bool,
    /// Caller-side label carried into telemetry
    pub task_label: Option<String>,
    /// Caller-supplied correlation id; generated when absent
    pub correlation_id: Option<String>,
    /// Case-insensitive substring filter on model names
    pub model_filter: Option<String>,
    /// Never fall back to the paid tier
    pub force_free: bool,
    /// Skip the free tier entirely
    pub force_paid: bool,
}

impl GenerationTask {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            input: String::new(),
            attachment: None,
            structured: true,
            task_label: None,
            correlation_id: None,
            model_filter: None,
            force_free: false,
            force_paid: false,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn with_structured(mut self, structured: bool) -> Self {
        self.structured = structured;
        self
    }

    pub fn with_task_label(mut self, label: impl Into<String>) -> Self {
        self.task_label = Some(label.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_model_filter(mut self, filter: impl Into<String>) -> Self {
        self.model_filter = Some(filter.into());
        self
    }

    pub fn force_free(mut self) -> Self {
        self.force_free = true;
        self
    }

    pub fn force_paid(mut self) -> Self {
        self.force_paid = true;
        self
    }
}

// =============================================================================
// Backend-facing Request
// =============================================================================

/// The request a generation backend actually receives: composed
/// prompt, structured-output flag, optional attachment. Routing knobs
/// never reach the backend.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub structured: bool,
    pub attachment: Option<Attachment>,
}

impl GenerationRequest {
    pub(crate) fn from_task(task: &GenerationTask, now: DateTime<Utc>) -> Self {
        Self {
            prompt: compose_prompt(task, now),
            structured: task.structured,
            attachment: task.attachment.clone(),
        }
    }
}

/// Year-stamped prompt composition. The JSON-only instruction applies
/// to structured text-only requests; attachment requests rely on the
/// backend's response MIME negotiation instead.
pub(crate) fn compose_prompt(task: &GenerationTask, now: DateTime<Utc>) -> String {
    let body = format!("{} {}\n{}", task.prompt, now.format("%Y"), task.input);
    if task.structured && task.attachment.is_none() {
        format!("{JSON_INSTRUCTION}\n{body}")
    } else {
        body
    }
}

/// Rough pre-flight token estimate of a composed prompt.
pub fn rough_token_estimate(text: &str) -> usize {
    text.len().div_ceil(estimate::PROMPT_BYTES_PER_TOKEN)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_2025() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_compose_stamps_year_and_appends_input() {
        let task = GenerationTask::new("Summarize this")
            .with_input("some text")
            .with_structured(false);
        let prompt = compose_prompt(&task, at_2025());
        assert_eq!(prompt, "Summarize this 2025\nsome text");
    }

    #[test]
    fn test_structured_text_prompt_gets_json_instruction() {
        let task = GenerationTask::new("Extract fields");
        let prompt = compose_prompt(&task, at_2025());
        assert!(prompt.starts_with("Respond ONLY with a valid JSON object."));
    }

    #[test]
    fn test_attachment_prompt_skips_json_instruction() {
        let task = GenerationTask::new("Describe the image")
            .with_attachment(Attachment::new(vec![0xFF, 0xD8], "image/jpeg"));
        let prompt = compose_prompt(&task, at_2025());
        assert!(!prompt.contains("JSON object"));
    }

    #[test]
    fn test_rough_token_estimate() {
        assert_eq!(rough_token_estimate(""), 0);
        assert_eq!(rough_token_estimate("abc"), 1);
        assert_eq!(rough_token_estimate("abcdefghij"), 4);
    }

    #[test]
    fn test_request_from_task_carries_flags() {
        let task = GenerationTask::new("p")
            .with_structured(false)
            .with_attachment(Attachment::new(vec![1, 2, 3], "application/pdf"));
        let request = GenerationRequest::from_task(&task, at_2025());
        assert!(!request.structured);
        assert_eq!(
            request.attachment.as_ref().map(|a| a.content_type.as_str()),
            Some("application/pdf")
        );
    }
}
