//! Native Gemini adapter (`models/{model}:generateContent`)
//!
//! Picks one of three call shapes from the request:
//! - multimodal: an inline blob rides beside a single text part
//! - conversational: prior turns are replayed as `contents` history
//! - plain: every message is flattened into one prompt string
//!
//! Reasoning-capable models get their thinking budget pinned to the minimum
//! so a quick answer is not held up by hidden reasoning.

use super::http;
use super::{
    CompletionRequest, CompletionResult, GroundingSource, KeyRing, ProviderAdapter,
    ProviderError, Role, Usage,
};
use crate::config::ProviderConfig;
use crate::error::AppResult;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// Public endpoint used when no `base_url` is configured
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Request shape chosen from which optional fields are present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    Conversational,
    Multimodal,
    Plain,
}

impl CallMode {
    pub fn for_request(request: &CompletionRequest) -> Self {
        if request.attachment.is_some() {
            Self::Multimodal
        } else if request.messages.iter().any(|m| m.role == Role::Assistant) {
            Self::Conversational
        } else {
            Self::Plain
        }
    }
}

/// Whether a model belongs to a family with a tunable reasoning budget
pub fn is_reasoning_model(model: &str) -> bool {
    let model = model.to_ascii_lowercase();
    model.starts_with("gemini-2.5") || model.contains("thinking")
}

/// Smallest thinking budget the model accepts; pro models cannot go to zero
pub fn minimum_thinking_budget(model: &str) -> u32 {
    if model.to_ascii_lowercase().contains("pro") {
        128
    } else {
        0
    }
}

/// Gemini `generateContent` adapter
pub struct GeminiAdapter {
    name: String,
    base_url: String,
    keys: KeyRing,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiAdapter")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("keys", &self.keys)
            .finish()
    }
}

impl GeminiAdapter {
    pub fn new(
        config: &ProviderConfig,
        credentials: Vec<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        Ok(Self {
            name: config.name().to_string(),
            base_url: config
                .base_url()
                .unwrap_or(DEFAULT_GEMINI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            keys: KeyRing::new(credentials),
            client: http::build_client(config.name(), timeout)?,
        })
    }

    /// Assemble the JSON body for `generateContent`
    pub fn build_body(request: &CompletionRequest) -> Value {
        let mode = CallMode::for_request(request);

        let mut system_parts: Vec<&str> =
            request.system_instruction.as_deref().into_iter().collect();
        system_parts.extend(
            request
                .messages
                .iter()
                .filter(|m| m.role == Role::System)
                .map(|m| m.content.as_str()),
        );
        let turns = request.messages.iter().filter(|m| m.role != Role::System);

        let contents = match mode {
            CallMode::Conversational => turns
                .map(|m| {
                    let role = if m.role == Role::Assistant { "model" } else { "user" };
                    json!({ "role": role, "parts": [{ "text": m.content }] })
                })
                .collect::<Vec<_>>(),
            CallMode::Multimodal => {
                let prompt = flatten(turns);
                let mut parts = vec![json!({ "text": prompt })];
                if let Some(blob) = &request.attachment {
                    parts.push(json!({
                        "inline_data": { "mime_type": blob.mime_type, "data": blob.data }
                    }));
                }
                vec![json!({ "role": "user", "parts": parts })]
            }
            CallMode::Plain => {
                vec![json!({ "role": "user", "parts": [{ "text": flatten(turns) }] })]
            }
        };

        let mut generation = serde_json::Map::new();
        if let Some(max_tokens) = request.max_tokens {
            generation.insert("maxOutputTokens".into(), json!(max_tokens));
        }
        if let Some(temperature) = request.temperature {
            generation.insert("temperature".into(), json!(temperature));
        }
        if request.require_json_output {
            generation.insert("responseMimeType".into(), json!("application/json"));
        }
        if is_reasoning_model(&request.model) {
            generation.insert(
                "thinkingConfig".into(),
                json!({ "thinkingBudget": minimum_thinking_budget(&request.model) }),
            );
        }

        let mut body = json!({ "contents": contents });
        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system_parts.join("\n\n") }] });
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }
        if let Some(tools) = &request.tools {
            body["tools"] = json!(tools);
        }
        body
    }

    fn into_result(
        &self,
        response: GenerateContentResponse,
    ) -> Result<CompletionResult, ProviderError> {
        let Some(candidate) = response.candidates.into_iter().next() else {
            let reason = response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(ProviderError::generic(
                &self.name,
                format!("response contained no candidates ({})", reason),
            ));
        };

        if candidate.finish_reason.as_deref() == Some("MAX_TOKENS") {
            return Err(ProviderError::generic(
                &self.name,
                "completion truncated at token limit",
            ));
        }

        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        let text: String = parts
            .iter()
            .filter(|p| !p.get("thought").and_then(Value::as_bool).unwrap_or(false))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect();
        let text = text.trim();
        if text.is_empty() {
            return Err(ProviderError::empty_completion(&self.name));
        }

        let grounding = candidate.grounding_metadata.map(|g| {
            g.grounding_chunks
                .into_iter()
                .filter_map(|chunk| chunk.web)
                .map(|web| GroundingSource {
                    title: web.title,
                    uri: web.uri,
                })
                .collect::<Vec<_>>()
        });

        let usage = response
            .usage_metadata
            .map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        Ok(CompletionResult {
            text: text.to_string(),
            usage,
            grounding: grounding.filter(|g| !g.is_empty()),
            raw_parts: Some(Value::Array(parts)),
        })
    }
}

fn flatten<'a>(messages: impl Iterator<Item = &'a super::Message>) -> String {
    messages
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
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

        let body = Self::build_body(request);
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);

        tracing::debug!(
            provider = %self.name,
            model = %request.model,
            mode = ?CallMode::for_request(request),
            "Sending generateContent request"
        );

        let raw = http::send(
            &self.name,
            self.client
                .post(&url)
                .header("x-goog-api-key", key)
                .json(&body),
        )
        .await?;
        let response: GenerateContentResponse = http::parse_body(&self.name, &raw)?;
        self.into_result(response)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<UsageMetadata>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    web: Option<WebChunk>,
}

#[derive(Debug, Deserialize)]
struct WebChunk {
    uri: String,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{InlineBlob, Message, ProviderErrorKind};

    fn adapter() -> GeminiAdapter {
        let config: ProviderConfig = toml::from_str(
            r#"
name = "gemini"
kind = "gemini"
secret_env = "GEMINI_API_KEY"
"#,
        )
        .unwrap();
        GeminiAdapter::new(&config, vec!["AIza".into()], Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn test_default_base_url() {
        assert_eq!(adapter().base_url, DEFAULT_GEMINI_BASE_URL);
    }

    #[test]
    fn test_call_mode_selection() {
        let plain = CompletionRequest::new("chat", vec![Message::user("a"), Message::user("b")]);
        assert_eq!(CallMode::for_request(&plain), CallMode::Plain);

        let convo = CompletionRequest::new(
            "chat",
            vec![Message::user("a"), Message::assistant("b"), Message::user("c")],
        );
        assert_eq!(CallMode::for_request(&convo), CallMode::Conversational);

        let multimodal = convo.clone().with_attachment(InlineBlob {
            mime_type: "image/png".into(),
            data: "iVBORw0KGgo=".into(),
        });
        assert_eq!(CallMode::for_request(&multimodal), CallMode::Multimodal);
    }

    #[test]
    fn test_plain_mode_flattens_messages() {
        let request =
            CompletionRequest::new("chat", vec![Message::user("one"), Message::user("two")])
                .for_model("gemini-2.0-flash");
        let body = GeminiAdapter::build_body(&request);
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "one\n\ntwo");
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn test_conversational_mode_maps_roles() {
        let request = CompletionRequest::new(
            "chat",
            vec![
                Message::new(Role::System, "terse"),
                Message::user("hi"),
                Message::assistant("hello"),
                Message::user("again"),
            ],
        )
        .with_system_instruction("you are helpful");
        let body = GeminiAdapter::build_body(&request);

        let roles: Vec<_> = body["contents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["role"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "you are helpful\n\nterse"
        );
    }

    #[test]
    fn test_multimodal_mode_attaches_blob_beside_text() {
        let request = CompletionRequest::new("vision", vec![Message::user("what is this?")])
            .with_attachment(InlineBlob {
                mime_type: "image/jpeg".into(),
                data: "/9j/4AAQ".into(),
            });
        let body = GeminiAdapter::build_body(&request);
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], "what is this?");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/jpeg");
    }

    #[test]
    fn test_reasoning_models_get_minimum_budget() {
        let flash =
            CompletionRequest::new("chat", vec![Message::user("q")]).for_model("gemini-2.5-flash");
        let body = GeminiAdapter::build_body(&flash);
        assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingBudget"], 0);

        let pro = flash.for_model("gemini-2.5-pro");
        let body = GeminiAdapter::build_body(&pro);
        assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingBudget"], 128);

        let old = flash.for_model("gemini-1.5-flash");
        assert!(GeminiAdapter::build_body(&old).get("generationConfig").is_none());
    }

    #[test]
    fn test_json_output_sets_mime_type() {
        let request = CompletionRequest::new("extract", vec![Message::user("q")])
            .with_json_output(true)
            .with_max_tokens(100);
        let body = GeminiAdapter::build_body(&request);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 100);
    }

    #[test]
    fn test_result_skips_thought_parts_and_collects_grounding() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{
                "candidates": [{
                    "content": {"parts": [
                        {"text": "thinking...", "thought": true},
                        {"text": " Paris "}
                    ]},
                    "finishReason": "STOP",
                    "groundingMetadata": {"groundingChunks": [
                        {"web": {"uri": "https://example.org/paris", "title": "Paris"}}
                    ]}
                }],
                "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 2}
            }"#,
        )
        .unwrap();

        let result = adapter().into_result(response).unwrap();
        assert_eq!(result.text, "Paris");
        assert_eq!(result.usage.input_tokens, 7);
        assert_eq!(result.usage.output_tokens, 2);
        let grounding = result.grounding.unwrap();
        assert_eq!(grounding[0].uri, "https://example.org/paris");
        assert_eq!(result.raw_parts.unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_blocked_prompt_is_generic_failure() {
        let response: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#).unwrap();
        let err = adapter().into_result(response).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Generic);
        assert!(err.message.contains("SAFETY"));
    }

    #[test]
    fn test_max_tokens_finish_is_failure() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates": [{
                "content": {"parts": [{"text": "cut"}]},
                "finishReason": "MAX_TOKENS"
            }]}"#,
        )
        .unwrap();
        assert!(adapter().into_result(response).is_err());
    }
}
