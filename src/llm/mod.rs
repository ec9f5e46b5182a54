//! LLM integration for article-forge.
//!
//! Agents reach the model through the [`LlmProvider`] trait. The bundled
//! [`OpenRouterProvider`] speaks the OpenAI-compatible chat-completions
//! protocol; tests substitute scripted providers.
//!
//! ```ignore
//! use article_forge::llm::{JsonRequest, LlmProvider, OpenRouterProvider};
//! use serde_json::json;
//!
//! let provider = OpenRouterProvider::from_env()?;
//! let response = provider
//!     .generate_json(JsonRequest {
//!         prompt: "Summarize the Rust ownership model".to_string(),
//!         system_prompt: None,
//!         model: "openai/gpt-4o-mini".to_string(),
//!         schema: json!({"type": "object"}),
//!         temperature: 0.3,
//!         max_tokens: 800,
//!     })
//!     .await?;
//! println!("cost: ${:.4}", response.estimated_cost_usd);
//! ```

pub mod client;
pub mod cost;
pub mod providers;

pub use client::{
    Choice, GenerationRequest, GenerationResponse, JsonRequest, JsonResponse, LlmProvider,
    Message, Usage,
};
pub use cost::{estimate_cost_usd, model_pricing};
pub use providers::OpenRouterProvider;
