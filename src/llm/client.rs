//! Provider-agnostic LLM request/response types and the `LlmProvider` trait.
//!
//! Agents talk to the model exclusively through [`LlmProvider::generate_json`],
//! which wraps a plain chat completion with a JSON-schema instruction and
//! robust extraction of the returned object.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cost::estimate_cost_usd;
use crate::error::LlmError;
use crate::utils::json_extraction::extract_json_object;

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender ("system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request for text generation from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier; empty means "provider default".
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Create a new generation request with default parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the temperature for this request.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max tokens for this request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from an LLM generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Unique identifier for this response.
    pub id: String,
    /// Model that generated this response.
    pub model: String,
    /// Generated choices.
    pub choices: Vec<Choice>,
    /// Token usage statistics.
    pub usage: Usage,
}

impl GenerationResponse {
    /// Get the content of the first choice, if available.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// A single generated choice from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Index of this choice in the response.
    pub index: u32,
    /// Generated message.
    pub message: Message,
    /// Reason the generation stopped (e.g., "stop", "length").
    pub finish_reason: String,
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,
    /// Number of tokens generated.
    pub completion_tokens: u32,
    /// Total tokens used.
    pub total_tokens: u32,
}

impl Usage {
    /// Builds a usage record, deriving the total.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A structured-output request: the model must answer with a JSON object
/// matching `schema`.
#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: String,
    pub schema: Value,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Parsed structured output plus accounting.
#[derive(Debug, Clone)]
pub struct JsonResponse {
    pub data: Value,
    pub usage: Usage,
    pub estimated_cost_usd: f64,
}

/// Trait for LLM providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a response for the given request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;

    /// Generate a JSON object conforming to `request.schema`.
    ///
    /// The schema is appended to the system prompt; the first choice is run
    /// through JSON extraction so fenced or chatty answers still parse.
    async fn generate_json(&self, request: JsonRequest) -> Result<JsonResponse, LlmError> {
        let schema = serde_json::to_string_pretty(&request.schema)
            .map_err(|e| LlmError::ParseError(format!("Invalid schema: {}", e)))?;

        let mut system = request.system_prompt.clone().unwrap_or_default();
        if !system.is_empty() {
            system.push_str("\n\n");
        }
        system.push_str(
            "Respond with a single JSON object and nothing else. It must conform to this JSON schema:\n",
        );
        system.push_str(&schema);

        let generation = GenerationRequest::new(
            request.model.clone(),
            vec![Message::system(system), Message::user(request.prompt)],
        )
        .with_temperature(request.temperature)
        .with_max_tokens(request.max_tokens);

        let response = self.generate(generation).await?;
        let content = response
            .first_content()
            .ok_or_else(|| LlmError::ParseError("Empty LLM response".to_string()))?;
        let data =
            extract_json_object(content).map_err(|e| LlmError::ParseError(e.to_string()))?;

        let model = if response.model.is_empty() {
            request.model.as_str()
        } else {
            response.model.as_str()
        };

        Ok(JsonResponse {
            data,
            usage: response.usage,
            estimated_cost_usd: estimate_cost_usd(model, &response.usage),
        })
    }
}
