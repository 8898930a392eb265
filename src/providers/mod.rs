//! Provider adapters
//!
//! One adapter per protocol family translates a canonical [`CompletionRequest`]
//! into a wire call and maps the outcome to a canonical [`CompletionResult`] or
//! a classified [`ProviderError`]. The router only ever sees this contract and
//! never branches on provider identity.

pub mod gemini;
pub mod http;
pub mod openai;

pub use gemini::GeminiAdapter;
pub use openai::OpenAiCompatAdapter;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Longest provider message kept in a classified error (characters)
pub const MAX_ERROR_MESSAGE_CHARS: usize = 200;

/// Conversation role of a canonical message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Inline binary attachment (base64 payload), for multimodal calls
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InlineBlob {
    pub mime_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

/// Provider-independent completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Filled in per candidate by the router
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub require_json_output: bool,
    pub system_instruction: Option<String>,
    /// Tool declarations, passed through in the provider's own schema
    pub tools: Option<Vec<serde_json::Value>>,
    pub attachment: Option<InlineBlob>,
    pub intent: String,
}

impl CompletionRequest {
    pub fn new(intent: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: String::new(),
            messages,
            max_tokens: None,
            temperature: None,
            require_json_output: false,
            system_instruction: None,
            tools: None,
            attachment: None,
            intent: intent.into(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_json_output(mut self, require_json_output: bool) -> Self {
        self.require_json_output = require_json_output;
        self
    }

    pub fn with_system_instruction(mut self, system: impl Into<String>) -> Self {
        self.system_instruction = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<serde_json::Value>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_attachment(mut self, attachment: InlineBlob) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Copy of this request addressed to a specific model
    pub fn for_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One citation attached to a search-grounded completion
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GroundingSource {
    pub title: Option<String>,
    pub uri: String,
}

/// Provider-independent completion result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionResult {
    /// Trimmed, never empty
    pub text: String,
    pub usage: Usage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grounding: Option<Vec<GroundingSource>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_parts: Option<serde_json::Value>,
}

/// Classification of a failed provider call
///
/// Drives which health mutator the router applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// HTTP 429, with the provider's retry hint when it sent one
    RateLimited { retry_after_ms: Option<u64> },
    /// HTTP 503
    Overloaded,
    /// HTTP 401/402: credentials or billing
    Fatal,
    /// Everything else, including transport errors and empty completions
    Generic,
}

impl ProviderErrorKind {
    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Overloaded => "overloaded",
            Self::Fatal => "fatal",
            Self::Generic => "generic",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited {
                retry_after_ms: Some(ms),
            } => write!(f, "rate limited (retry after {}ms)", ms),
            Self::RateLimited {
                retry_after_ms: None,
            } => f.write_str("rate limited"),
            Self::Overloaded => f.write_str("overloaded"),
            Self::Fatal => f.write_str("fatal"),
            Self::Generic => f.write_str("error"),
        }
    }
}

/// A classified provider failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{provider} {kind}: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    /// Original message, truncated to [`MAX_ERROR_MESSAGE_CHARS`]
    pub message: String,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl AsRef<str>,
    ) -> Self {
        Self {
            provider: provider.into(),
            kind,
            message: truncate_chars(message.as_ref(), MAX_ERROR_MESSAGE_CHARS),
        }
    }

    pub fn generic(provider: impl Into<String>, message: impl AsRef<str>) -> Self {
        Self::new(provider, ProviderErrorKind::Generic, message)
    }

    /// Canonical failure for a blank completion
    pub fn empty_completion(provider: impl Into<String>) -> Self {
        Self::generic(provider, "empty completion text")
    }
}

/// Truncate to at most `max_chars` characters, never splitting a code point
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}…", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Capability contract shared by every protocol family
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Registered provider name
    fn name(&self) -> &str;

    /// Whether a credential is configured
    fn is_available(&self) -> bool;

    /// Number of credentials this adapter rotates through
    fn credential_count(&self) -> usize;

    /// Perform one upstream call for `request.model`
    ///
    /// Must fail (never succeed with an empty string) when the provider
    /// returns no completion text.
    async fn complete(&self, request: &CompletionRequest)
    -> Result<CompletionResult, ProviderError>;
}

/// Adapters keyed by provider name
pub type AdapterMap = HashMap<String, Arc<dyn ProviderAdapter>>;

/// Round-robin set of API keys for one provider
pub struct KeyRing {
    keys: Vec<String>,
    next: AtomicUsize,
}

impl KeyRing {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            next: AtomicUsize::new(0),
        }
    }

    /// Next key in rotation, or None when no key is configured
    pub fn next_key(&self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        Some(&self.keys[idx])
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing")
            .field("keys", &format_args!("<{} redacted>", self.keys.len()))
            .finish()
    }
}

/// Build the adapter for a provider's protocol family
pub fn build_adapter(
    config: &ProviderConfig,
    credentials: Vec<String>,
    timeout: Duration,
) -> AppResult<Arc<dyn ProviderAdapter>> {
    let adapter: Arc<dyn ProviderAdapter> = match config.kind() {
        ProviderKind::OpenAi => Arc::new(OpenAiCompatAdapter::new(config, credentials, timeout)?),
        ProviderKind::Gemini => Arc::new(GeminiAdapter::new(config, credentials, timeout)?),
    };
    Ok(adapter)
}
