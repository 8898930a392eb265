//! REST adapter for OpenAI-compatible `/chat/completions` providers
//!
//! Covers Groq, OpenRouter, DeepSeek, Mistral and anything else that speaks
//! the OpenAI chat wire format at a configurable base URL.

use super::http;
use super::{
    CompletionRequest, CompletionResult, KeyRing, ProviderAdapter, ProviderError, Usage,
};
use crate::config::ProviderConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenAI-compatible REST adapter
pub struct OpenAiCompatAdapter {
    name: String,
    base_url: String,
    keys: KeyRing,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompatAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatAdapter")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("keys", &self.keys)
            .finish()
    }
}

impl OpenAiCompatAdapter {
    pub fn new(
        config: &ProviderConfig,
        credentials: Vec<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let base_url = config.base_url().ok_or_else(|| {
            AppError::Config(format!(
                "providers.{}.base_url is required for kind = \"openai\"",
                config.name()
            ))
        })?;

        Ok(Self {
            name: config.name().to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            keys: KeyRing::new(credentials),
            client: http::build_client(config.name(), timeout)?,
        })
    }

    /// Optional leading system message, then one entry per turn
    ///
    /// An image rides as an extra content part on the last user turn.
    fn wire_messages<'r>(
        request: &'r CompletionRequest,
        image: Option<ContentPart<'r>>,
    ) -> Vec<WireMessage<'r>> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system_instruction.as_deref() {
            messages.push(WireMessage {
                role: "system",
                content: WireContent::Text(system),
            });
        }
        messages.extend(request.messages.iter().map(|m| WireMessage {
            role: m.role.as_str(),
            content: WireContent::Text(&m.content),
        }));

        let Some(image) = image else {
            return messages;
        };
        match messages.iter().rposition(|m| m.role == "user") {
            Some(index) => {
                let last_user = &mut messages[index];
                let text = match last_user.content {
                    WireContent::Text(text) => text,
                    WireContent::Parts(_) => "",
                };
                last_user.content = WireContent::Parts(vec![ContentPart::Text { text }, image]);
            }
            None => messages.push(WireMessage {
                role: "user",
                content: WireContent::Parts(vec![image]),
            }),
        }
        messages
    }

    /// The request's attachment as a data-URI image part
    ///
    /// The chat completions format only carries images inline, so any other
    /// attachment fails this candidate instead of being dropped.
    fn image_part<'r>(
        &self,
        request: &'r CompletionRequest,
    ) -> Result<Option<ContentPart<'r>>, ProviderError> {
        let Some(blob) = &request.attachment else {
            return Ok(None);
        };
        if !blob.mime_type.starts_with("image/") {
            return Err(ProviderError::generic(
                &self.name,
                format!("attachment type '{}' is not supported", blob.mime_type),
            ));
        }
        Ok(Some(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{};base64,{}", blob.mime_type, blob.data),
            },
        }))
    }

    fn into_result(
        &self,
        response: ChatCompletionResponse,
    ) -> Result<CompletionResult, ProviderError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::generic(&self.name, "response contained no choices"))?;

        if choice.finish_reason.as_deref() == Some("length") {
            return Err(ProviderError::generic(
                &self.name,
                "completion truncated at token limit",
            ));
        }

        let text = choice
            .message
            .content
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();
        if text.is_empty() {
            return Err(ProviderError::empty_completion(&self.name));
        }

        let usage = response
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResult {
            text: text.to_string(),
            usage,
            grounding: None,
            raw_parts: None,
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        !self.keys.is_empty()
    }

    fn credential_count(&self) -> usize {
        self.keys.len()
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, ProviderError> {
        let key = self
            .keys
            .next_key()
            .ok_or_else(|| ProviderError::generic(&self.name, "no credential configured"))?;

        let body = ChatCompletionRequest {
            model: &request.model,
            messages: Self::wire_messages(request, self.image_part(request)?),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request
                .require_json_output
                .then_some(ResponseFormat { kind: "json_object" }),
            tools: request.tools.as_deref(),
        };

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(
            provider = %self.name,
            model = %request.model,
            messages = body.messages.len(),
            "Sending chat completion request"
        );

        let raw = http::send(
            &self.name,
            self.client.post(&url).bearer_auth(key).json(&body),
        )
        .await?;
        let response: ChatCompletionResponse = http::parse_body(&self.name, &raw)?;
        self.into_result(response)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [serde_json::Value]>,
}

#[derive(Debug, PartialEq, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: WireContent<'a>,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
enum WireContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, PartialEq, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
