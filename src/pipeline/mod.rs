//! Article pipeline orchestration.
//!
//! # Architecture
//!
//! - **Orchestrator**: the job state machine driving the agents
//! - **Retry**: exponential backoff around each stage attempt
//! - **LogSink**: non-blocking persistence of agent step logs
//! - **Events**: progress fan-out to any number of subscribers
//! - **Config**: defaults and environment overrides
//!
//! # Pipeline Flow
//!
//! 1. **Research**: once per job, unless skipped
//! 2. **Writer → SEO → QA**: repeated while QA fails, up to the iteration limit
//! 3. **Project Manager**: deterministic assembly of the final article
//! 4. **Publish**: optional, when the job asks for it and the article is ready
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use article_forge::agents::AgentRegistry;
//! use article_forge::pipeline::{PipelineConfig, PipelineDeps, PipelineOrchestrator};
//! use article_forge::storage::{InMemoryStore, Job, JobSettings};
//!
//! let store = Arc::new(InMemoryStore::new());
//! let deps = PipelineDeps {
//!     jobs: store.clone(),
//!     steps: store.clone(),
//!     personas: store.clone(),
//!     pages: None,
//!     llm,
//!     registry: Arc::new(AgentRegistry::with_builtin_agents()),
//! };
//! let orchestrator = PipelineOrchestrator::new(deps, PipelineConfig::default());
//!
//! let job = Job::new("rust error handling", JobSettings::default());
//! store.insert_job(job.clone());
//! let result = orchestrator.execute(job).await;
//! println!("success={} tokens={}", result.success, result.total_tokens);
//! ```

pub mod config;
pub mod events;
pub mod log_sink;
pub mod orchestrator;
pub mod retry;

pub use config::{ConfigError, PipelineConfig};
pub use events::{EventKind, PipelineEvent, ProgressHub};
pub use log_sink::LogSink;
pub use orchestrator::{PipelineDeps, PipelineError, PipelineOrchestrator, PipelineResult};
pub use retry::{
    is_retryable_error, is_transient_message, with_retry, with_retry_notify, RetryConfig,
};
