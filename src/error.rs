//! Error types for article-forge operations.
//!
//! Defines the error types shared across subsystems:
//! - LLM API interactions
//! - Job, step and persona persistence
//! - Page publishing
//!
//! Agent, registry, configuration and pipeline errors live next to the
//! modules that raise them.

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: OPENROUTER_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited (429): {0}")]
    RateLimited(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

impl LlmError {
    /// Returns the HTTP status code carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            LlmError::RateLimited(_) => Some(429),
            LlmError::ApiError { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Errors raised by job, step and persona repositories.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Job '{0}' not found")]
    JobNotFound(uuid::Uuid),

    #[error("Step '{0}' not found")]
    StepNotFound(uuid::Uuid),

    #[error("Persona '{0}' not found")]
    PersonaNotFound(uuid::Uuid),

    /// The job already reached a terminal status.
    #[error("Job '{job_id}' is already {status}")]
    JobNotActive { job_id: uuid::Uuid, status: String },

    #[error("Invalid state transition for step '{step_id}': {from} -> {to}")]
    InvalidTransition {
        step_id: uuid::Uuid,
        from: String,
        to: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Errors raised while publishing a finished article as a page.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Page service rejected the page ({code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("Page service request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid page service response: {0}")]
    InvalidResponse(String),
}
