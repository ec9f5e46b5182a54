//! Persistence for jobs, steps and personas, plus the page-publishing seam.
//!
//! The orchestrator only ever talks to the traits defined here, so any
//! backend can sit behind it. Two backends ship with the crate:
//!
//! - **InMemoryStore**: process-local maps, for tests and embedding
//! - **SqliteStore**: `sqlx` on SQLite with idempotent migrations
//!
//! # Usage
//!
//! ```rust,ignore
//! use article_forge::storage::{Job, JobSettings, SqliteStore};
//!
//! let store = SqliteStore::connect("sqlite://article-forge.db?mode=rwc").await?;
//! store.run_migrations().await?;
//!
//! let job = Job::new("rust error handling", JobSettings::default().with_max_iterations(2));
//! store.insert_job(&job).await?;
//! ```

pub mod http;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use uuid::Uuid;

use crate::agents::{AgentType, FinalArticle};
use crate::error::{PublishError, StorageError};

pub use http::HttpPageService;
pub use memory::{InMemoryStore, RecordingPageService};
pub use models::{
    Job, JobProgress, JobSettings, JobStatus, LogLevel, NewStep, Page, PageDraft, Persona,
    StatusUpdate, Step, StepCompletion, StepLogEntry, StepStatus,
};
pub use sqlite::SqliteStore;

/// Result type alias for repository operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Job table operations used by the orchestrator.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn find_by_id(&self, job_id: Uuid) -> StorageResult<Option<Job>>;

    /// Marks the job `processing` and stamps its start time.
    async fn start_processing(&self, job_id: Uuid) -> StorageResult<()>;

    async fn update_progress(&self, job_id: Uuid, progress: JobProgress) -> StorageResult<()>;

    async fn set_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        update: StatusUpdate,
    ) -> StorageResult<()>;

    async fn set_final_output(
        &self,
        job_id: Uuid,
        final_output: &FinalArticle,
        page_id: Option<&str>,
    ) -> StorageResult<()>;

    async fn is_cancelled(&self, job_id: Uuid) -> StorageResult<bool>;
}

/// Step table operations used by the orchestrator and the log sink.
#[async_trait]
pub trait StepRepository: Send + Sync {
    async fn create(&self, step: NewStep) -> StorageResult<Step>;

    /// Moves a pending step to `running`.
    async fn start(&self, step_id: Uuid) -> StorageResult<()>;

    async fn complete(&self, step_id: Uuid, completion: StepCompletion) -> StorageResult<()>;

    async fn fail(
        &self,
        step_id: Uuid,
        error: &str,
        detail: Option<serde_json::Value>,
    ) -> StorageResult<()>;

    async fn append_log(&self, step_id: Uuid, entry: StepLogEntry) -> StorageResult<()>;

    /// All steps of a job in creation order.
    async fn list_for_job(&self, job_id: Uuid) -> StorageResult<Vec<Step>>;
}

/// Read-only persona lookups.
#[async_trait]
pub trait PersonaRepository: Send + Sync {
    async fn find_by_id(&self, persona_id: Uuid) -> StorageResult<Option<Persona>>;

    async fn find_default(&self, agent_type: AgentType) -> StorageResult<Option<Persona>>;
}

/// Creates CMS pages for published articles.
#[async_trait]
pub trait PageService: Send + Sync {
    async fn create_page(&self, draft: PageDraft) -> Result<Page, PublishError>;
}
