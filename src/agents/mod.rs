//! Pipeline agents: one per stage, behind a uniform [`Agent`] contract.
//!
//! - **ResearchAgent**: gathers key points and keywords for the topic
//! - **WriterAgent**: drafts the article, or revises it from QA feedback
//! - **SeoAgent**: meta tags, slug and optional in-place optimization
//! - **QaAgent**: pass/fail verdict plus revision feedback
//! - **ProjectManagerAgent**: deterministic assembly of the final record
//!
//! Agents are looked up through an injected [`AgentRegistry`].

pub mod context;
pub mod error;
pub mod project_manager;
pub mod qa;
pub mod registry;
pub mod research;
pub mod seo;
pub mod types;
pub mod writer;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use context::AgentContext;
pub use error::{AgentError, AgentResult, RegistryError};
pub use project_manager::ProjectManagerAgent;
pub use qa::QaAgent;
pub use registry::AgentRegistry;
pub use research::ResearchAgent;
pub use seo::SeoAgent;
pub use types::{
    AgentOutcome, AgentType, Article, FinalArticle, ProjectManagerInput, QaInput, QaOutput,
    ResearchInput, ResearchOutput, SeoInput, SeoOutput, UnknownAgentType, WriterInput,
};
pub use writer::WriterAgent;

use crate::llm::Usage;
use crate::storage::LogLevel;

/// Capability every pipeline stage implements.
#[async_trait]
pub trait Agent: Send + Sync {
    fn agent_type(&self) -> AgentType;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Cheap structural check of `input`. Returns false on malformed input,
    /// never panics.
    fn validate_input(&self, input: &Value) -> bool;

    /// Runs the stage. Expected failures come back as an unsuccessful
    /// [`AgentOutcome`]; `Err` means something unexpected broke.
    async fn execute(&self, input: Value, ctx: &AgentContext) -> AgentResult<AgentOutcome>;

    /// JSON schema of a successful outcome's `output`.
    fn output_schema(&self) -> Value;
}

/// Deserializes a stage input, mapping failures to `InvalidInput`.
pub(crate) fn parse_input<T: DeserializeOwned>(
    agent: AgentType,
    input: Value,
) -> AgentResult<T> {
    serde_json::from_value(input).map_err(|e| AgentError::InvalidInput {
        agent,
        reason: e.to_string(),
    })
}

/// Asks the persona's model for `T`.
///
/// Provider errors and unparseable replies become a failed outcome carrying
/// the error text, so rate limits and timeouts stay recognizable upstream.
pub(crate) async fn generate_typed<T: DeserializeOwned>(
    ctx: &AgentContext,
    prompt: String,
    schema: Value,
) -> Result<(T, Usage), AgentOutcome> {
    let response = match ctx.generate_json(prompt, schema).await {
        Ok(response) => response,
        Err(e) => {
            ctx.log(LogLevel::Error, format!("LLM call failed: {}", e), None);
            return Err(AgentOutcome::failure(e.to_string(), Usage::default()));
        }
    };

    ctx.log(
        LogLevel::Debug,
        "LLM call finished",
        Some(serde_json::json!({
            "total_tokens": response.usage.total_tokens,
            "estimated_cost_usd": response.estimated_cost_usd,
        })),
    );

    match serde_json::from_value::<T>(response.data) {
        Ok(parsed) => Ok((parsed, response.usage)),
        Err(e) => {
            let message = format!("Model output did not match the expected shape: {}", e);
            ctx.log(LogLevel::Warn, message.clone(), None);
            Err(AgentOutcome::failure(message, response.usage))
        }
    }
}

/// Renders a list as markdown bullets, or `fallback` when empty.
pub(crate) fn bullet_list(items: &[String], fallback: &str) -> String {
    if items.is_empty() {
        return fallback.to_string();
    }
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}
