//! Chat endpoint handler
//!
//! Handles POST /chat: validates the request, hands it to the router and
//! returns the first successful completion with its routing metadata.

use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::middleware::RequestId;
use crate::providers::{CompletionRequest, InlineBlob, Message};
use crate::router::RoutedCompletion;
use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};

/// Maximum allowed message length in characters (100K chars)
const MAX_MESSAGE_LENGTH: usize = 100_000;

/// Chat request from a client
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRequest {
    pub intent: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub json_output: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<InlineBlob>,
}

impl ChatRequest {
    /// Validate and convert into a canonical request
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a blank intent, an empty
    /// conversation, blank or oversized messages, a zero token budget or a
    /// temperature outside `[0.0, 2.0]`.
    pub fn into_completion(self) -> AppResult<(String, CompletionRequest)> {
        let intent = self.intent.trim().to_string();
        if intent.is_empty() {
            return Err(AppError::Validation("intent cannot be empty".to_string()));
        }

        if self.messages.is_empty() {
            return Err(AppError::Validation(
                "messages must contain at least one message".to_string(),
            ));
        }

        for (idx, message) in self.messages.iter().enumerate() {
            if message.content.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "messages[{}] cannot be empty or contain only whitespace",
                    idx
                )));
            }
            let char_count = message.content.chars().count();
            if char_count > MAX_MESSAGE_LENGTH {
                return Err(AppError::Validation(format!(
                    "messages[{}] exceeds maximum length of {} characters (got {})",
                    idx, MAX_MESSAGE_LENGTH, char_count
                )));
            }
        }

        if self.max_tokens == Some(0) {
            return Err(AppError::Validation(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        if let Some(temperature) = self
            .temperature
            .filter(|t| !(0.0..=2.0).contains(t))
        {
            return Err(AppError::Validation(format!(
                "temperature must be between 0.0 and 2.0 (got {})",
                temperature
            )));
        }

        let mut request = CompletionRequest::new(intent.clone(), self.messages)
            .with_json_output(self.json_output);
        request.max_tokens = self.max_tokens;
        request.temperature = self.temperature;
        request.system_instruction = self.system.filter(|s| !s.trim().is_empty());
        request.tools = self.tools;
        request.attachment = self.attachment;

        Ok((intent, request))
    }
}

/// POST /chat
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<ChatRequest>,
) -> AppResult<Json<RoutedCompletion>> {
    tracing::info!(
        request_id = %request_id,
        intent = %request.intent,
        messages = request.messages.len(),
        "Received chat request"
    );

    let (intent, completion) = request.into_completion()?;

    match state.router().execute(&intent, completion).await {
        Ok(routed) => {
            tracing::info!(
                request_id = %request_id,
                intent = %intent,
                provider = %routed.meta.provider,
                model = %routed.meta.model,
                latency_ms = routed.meta.latency_ms,
                "Chat request completed"
            );
            Ok(Json(routed))
        }
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                intent = %intent,
                error = %e,
                "Chat request failed"
            );
            Err(e)
        }
    }
}
