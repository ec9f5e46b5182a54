//! Error types for agent execution and registration.

use thiserror::Error;

use super::types::AgentType;

/// Unexpected errors raised by an agent.
///
/// Expected failure modes never surface here: agents report them as
/// unsuccessful [`AgentOutcome`](super::AgentOutcome)s instead.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Error from the LLM provider.
    #[error("LLM error: {0}")]
    Llm(#[from] crate::error::LlmError),

    /// Input did not match the agent's contract.
    #[error("Invalid input for {agent}: {reason}")]
    InvalidInput { agent: AgentType, reason: String },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything else an agent could not recover from.
    #[error("Agent '{agent}' failed: {reason}")]
    Internal { agent: AgentType, reason: String },
}

/// Errors raised while populating an [`AgentRegistry`](super::AgentRegistry).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("An agent is already registered for type '{0}'")]
    Duplicate(AgentType),
}

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
