//! article-forge: multi-agent article generation pipeline.
//!
//! Research, Writer, SEO, QA and Project Manager agents run as one job
//! with a bounded revision loop, per-attempt step records, retries for
//! transient provider failures and cooperative cancellation.

pub mod agents;
pub mod cli;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod storage;
pub mod utils;

// Re-export commonly used error types
pub use error::{LlmError, PublishError, StorageError};
