//! SQLite-backed repositories using sqlx.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use super::migrations::MigrationRunner;
use super::models::{
    Job, JobProgress, JobStatus, LogLevel, NewStep, Persona, StatusUpdate, Step, StepCompletion,
    StepLogEntry, StepStatus,
};
use super::{JobRepository, PersonaRepository, StepRepository, StorageResult};
use crate::agents::{AgentType, FinalArticle};
use crate::error::StorageError;

/// SQLite storage client implementing all three repositories.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to `database_url`, e.g. `sqlite://forge.db?mode=rwc` or
    /// `sqlite::memory:`.
    ///
    /// In-memory databases live only as long as their connection, so they
    /// get a single connection that is never recycled.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let in_memory = database_url.contains(":memory:");
        let mut options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .acquire_timeout(Duration::from_secs(30));
        if in_memory {
            options = options.idle_timeout(None).max_lifetime(None);
        }

        let pool = options.connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> StorageResult<()> {
        MigrationRunner::new(self.pool.clone()).run_migrations().await
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    /// Inserts a new job record.
    pub async fn insert_job(&self, job: &Job) -> StorageResult<()> {
        let final_output = job
            .final_output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, keyword, status, settings, current_iteration, current_agent,
                total_tokens_used, progress_percent, final_output, page_id, error,
                created_at, started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.keyword)
        .bind(job.status.as_str())
        .bind(serde_json::to_string(&job.settings)?)
        .bind(job.current_iteration as i64)
        .bind(job.current_agent.map(|a| a.as_str()))
        .bind(job.total_tokens_used as i64)
        .bind(job.progress_percent as i64)
        .bind(final_output)
        .bind(&job.page_id)
        .bind(&job.error)
        .bind(timestamp(job.created_at))
        .bind(job.started_at.map(timestamp))
        .bind(job.completed_at.map(timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Flags a job as cancelled; the running pipeline observes it at its
    /// next checkpoint.
    ///
    /// Cancelling twice is a no-op; a completed or failed job cannot be
    /// cancelled.
    pub async fn cancel_job(&self, job_id: Uuid) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = ?, completed_at = ?
            WHERE id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(JobStatus::Cancelled.as_str())
        .bind(timestamp(Utc::now()))
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        match self.ensure_active_update(result.rows_affected(), job_id).await {
            Err(StorageError::JobNotActive { status, .. })
                if status == JobStatus::Cancelled.as_str() =>
            {
                Ok(())
            }
            other => other,
        }
    }

    // =========================================================================
    // Persona Operations
    // =========================================================================

    /// Inserts or replaces a persona.
    pub async fn insert_persona(&self, persona: &Persona) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO personas (
                id, name, agent_type, model, system_prompt, temperature, max_tokens, is_default
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(persona.id.to_string())
        .bind(&persona.name)
        .bind(persona.agent_type.as_str())
        .bind(&persona.model)
        .bind(&persona.system_prompt)
        .bind(persona.temperature)
        .bind(persona.max_tokens as i64)
        .bind(persona.is_default)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_personas(&self) -> StorageResult<Vec<Persona>> {
        let rows = sqlx::query("SELECT * FROM personas ORDER BY agent_type, rowid")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(persona_from_row).collect()
    }

    // =========================================================================
    // Job Helpers
    // =========================================================================

    /// Explains why a guarded job update touched no row.
    async fn ensure_active_update(&self, rows_affected: u64, job_id: Uuid) -> StorageResult<()> {
        if rows_affected > 0 {
            return Ok(());
        }

        let current: Option<(String,)> = sqlx::query_as("SELECT status FROM jobs WHERE id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match current {
            Some((status,)) => Err(StorageError::JobNotActive { job_id, status }),
            None => Err(StorageError::JobNotFound(job_id)),
        }
    }

    // =========================================================================
    // Step Helpers
    // =========================================================================

    /// Explains why a guarded step update touched no row.
    async fn transition_error(&self, step_id: Uuid, to: StepStatus) -> StorageError {
        let current: Result<Option<(String,)>, sqlx::Error> =
            sqlx::query_as("SELECT status FROM steps WHERE id = ?")
                .bind(step_id.to_string())
                .fetch_optional(&self.pool)
                .await;

        match current {
            Ok(Some((from,))) => StorageError::InvalidTransition {
                step_id,
                from,
                to: to.to_string(),
            },
            Ok(None) => StorageError::StepNotFound(step_id),
            Err(e) => StorageError::Database(e),
        }
    }

    async fn logs_for_step(&self, step_id: &str) -> StorageResult<Vec<StepLogEntry>> {
        let rows = sqlx::query(
            "SELECT timestamp, level, message, data FROM step_logs WHERE step_id = ? ORDER BY id",
        )
        .bind(step_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StorageResult<StepLogEntry> {
                let level: String = row.try_get("level")?;
                Ok(StepLogEntry {
                    timestamp: parse_timestamp(&row.try_get::<String, _>("timestamp")?)?,
                    level: parse_log_level(&level)?,
                    message: row.try_get("message")?,
                    data: parse_optional_json(row.try_get("data")?)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl JobRepository for SqliteStore {
    async fn find_by_id(&self, job_id: Uuid) -> StorageResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn start_processing(&self, job_id: Uuid) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = ?, started_at = ?
            WHERE id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(JobStatus::Processing.as_str())
        .bind(timestamp(Utc::now()))
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        self.ensure_active_update(result.rows_affected(), job_id).await
    }

    async fn update_progress(&self, job_id: Uuid, progress: JobProgress) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                current_iteration = MAX(current_iteration, COALESCE(?, current_iteration)),
                current_agent = COALESCE(?, current_agent),
                total_tokens_used = MAX(total_tokens_used, COALESCE(?, total_tokens_used)),
                progress_percent = COALESCE(?, progress_percent)
            WHERE id = ?
            "#,
        )
        .bind(progress.current_iteration.map(|i| i as i64))
        .bind(progress.current_agent.map(|a| a.as_str()))
        .bind(progress.total_tokens_used.map(|t| t as i64))
        .bind(progress.progress_percent.map(|p| p.min(100) as i64))
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        ensure_job_updated(result.rows_affected(), job_id)
    }

    async fn set_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        update: StatusUpdate,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = ?,
                error = COALESCE(?, error),
                completed_at = COALESCE(?, completed_at)
            WHERE id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(status.as_str())
        .bind(update.error)
        .bind(update.completed_at.map(timestamp))
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        self.ensure_active_update(result.rows_affected(), job_id).await
    }

    async fn set_final_output(
        &self,
        job_id: Uuid,
        final_output: &FinalArticle,
        page_id: Option<&str>,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET final_output = ?, page_id = ?
            WHERE id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(serde_json::to_string(final_output)?)
        .bind(page_id)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        self.ensure_active_update(result.rows_affected(), job_id).await
    }

    async fn is_cancelled(&self, job_id: Uuid) -> StorageResult<bool> {
        let status: Option<(String,)> = sqlx::query_as("SELECT status FROM jobs WHERE id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match status {
            Some((status,)) => Ok(status.parse::<JobStatus>()? == JobStatus::Cancelled),
            None => Err(StorageError::JobNotFound(job_id)),
        }
    }
}

#[async_trait]
impl StepRepository for SqliteStore {
    async fn create(&self, step: NewStep) -> StorageResult<Step> {
        let step = step.into_step();

        sqlx::query(
            r#"
            INSERT INTO steps (
                id, job_id, agent_type, persona_id, iteration, input, status, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(step.id.to_string())
        .bind(step.job_id.to_string())
        .bind(step.agent_type.as_str())
        .bind(step.persona_id.map(|id| id.to_string()))
        .bind(step.iteration as i64)
        .bind(serde_json::to_string(&step.input)?)
        .bind(step.status.as_str())
        .bind(timestamp(step.created_at))
        .execute(&self.pool)
        .await?;

        Ok(step)
    }

    async fn start(&self, step_id: Uuid) -> StorageResult<()> {
        let result =
            sqlx::query("UPDATE steps SET status = ?, started_at = ? WHERE id = ? AND status = ?")
                .bind(StepStatus::Running.as_str())
                .bind(timestamp(Utc::now()))
                .bind(step_id.to_string())
                .bind(StepStatus::Pending.as_str())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(step_id, StepStatus::Running).await);
        }
        Ok(())
    }

    async fn complete(&self, step_id: Uuid, completion: StepCompletion) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE steps SET
                status = ?, output = ?, tokens_used = ?, prompt_tokens = ?,
                completion_tokens = ?, completed_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(StepStatus::Completed.as_str())
        .bind(serde_json::to_string(&completion.output)?)
        .bind(completion.tokens_used as i64)
        .bind(completion.prompt_tokens as i64)
        .bind(completion.completion_tokens as i64)
        .bind(timestamp(Utc::now()))
        .bind(step_id.to_string())
        .bind(StepStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(step_id, StepStatus::Completed).await);
        }
        Ok(())
    }

    async fn fail(&self, step_id: Uuid, error: &str, detail: Option<Value>) -> StorageResult<()> {
        let detail = detail.as_ref().map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE steps SET status = ?, error = ?, error_detail = ?, completed_at = ?
            WHERE id = ? AND status IN (?, ?)
            "#,
        )
        .bind(StepStatus::Failed.as_str())
        .bind(error)
        .bind(detail)
        .bind(timestamp(Utc::now()))
        .bind(step_id.to_string())
        .bind(StepStatus::Pending.as_str())
        .bind(StepStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(step_id, StepStatus::Failed).await);
        }
        Ok(())
    }

    async fn append_log(&self, step_id: Uuid, entry: StepLogEntry) -> StorageResult<()> {
        let data = entry.data.as_ref().map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO step_logs (step_id, timestamp, level, message, data)
            SELECT ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM steps WHERE id = ?)
            "#,
        )
        .bind(step_id.to_string())
        .bind(timestamp(entry.timestamp))
        .bind(log_level_str(entry.level))
        .bind(&entry.message)
        .bind(data)
        .bind(step_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::StepNotFound(step_id));
        }
        Ok(())
    }

    async fn list_for_job(&self, job_id: Uuid) -> StorageResult<Vec<Step>> {
        let rows = sqlx::query("SELECT * FROM steps WHERE job_id = ? ORDER BY rowid")
            .bind(job_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut step = step_from_row(row)?;
            step.logs = self.logs_for_step(&step.id.to_string()).await?;
            steps.push(step);
        }
        Ok(steps)
    }
}

#[async_trait]
impl PersonaRepository for SqliteStore {
    async fn find_by_id(&self, persona_id: Uuid) -> StorageResult<Option<Persona>> {
        let row = sqlx::query("SELECT * FROM personas WHERE id = ?")
            .bind(persona_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(persona_from_row).transpose()
    }

    async fn find_default(&self, agent_type: AgentType) -> StorageResult<Option<Persona>> {
        let row = sqlx::query(
            "SELECT * FROM personas WHERE agent_type = ? AND is_default = 1 ORDER BY rowid LIMIT 1",
        )
        .bind(agent_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(persona_from_row).transpose()
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("invalid timestamp '{}': {}", raw, e)))
}

fn parse_optional_timestamp(raw: Option<String>) -> StorageResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_timestamp).transpose()
}

fn parse_uuid(raw: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StorageError::Corrupt(format!("invalid id '{}': {}", raw, e)))
}

fn parse_agent_type(raw: &str) -> StorageResult<AgentType> {
    raw.parse()
        .map_err(|e: crate::agents::UnknownAgentType| StorageError::Corrupt(e.to_string()))
}

fn parse_optional_json(raw: Option<String>) -> StorageResult<Option<Value>> {
    Ok(raw.as_deref().map(serde_json::from_str).transpose()?)
}

fn log_level_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn parse_log_level(raw: &str) -> StorageResult<LogLevel> {
    match raw {
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        other => Err(StorageError::Corrupt(format!("unknown log level '{}'", other))),
    }
}

fn ensure_job_updated(rows_affected: u64, job_id: Uuid) -> StorageResult<()> {
    if rows_affected == 0 {
        return Err(StorageError::JobNotFound(job_id));
    }
    Ok(())
}

fn job_from_row(row: &SqliteRow) -> StorageResult<Job> {
    let current_agent: Option<String> = row.try_get("current_agent")?;
    let final_output: Option<String> = row.try_get("final_output")?;

    Ok(Job {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        keyword: row.try_get("keyword")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        settings: serde_json::from_str(&row.try_get::<String, _>("settings")?)?,
        current_iteration: row.try_get::<i64, _>("current_iteration")? as u32,
        current_agent: current_agent.as_deref().map(parse_agent_type).transpose()?,
        total_tokens_used: row.try_get::<i64, _>("total_tokens_used")? as u64,
        progress_percent: row.try_get::<i64, _>("progress_percent")? as u8,
        final_output: final_output
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        page_id: row.try_get("page_id")?,
        error: row.try_get("error")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        started_at: parse_optional_timestamp(row.try_get("started_at")?)?,
        completed_at: parse_optional_timestamp(row.try_get("completed_at")?)?,
    })
}

fn step_from_row(row: &SqliteRow) -> StorageResult<Step> {
    let persona_id: Option<String> = row.try_get("persona_id")?;

    Ok(Step {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        job_id: parse_uuid(&row.try_get::<String, _>("job_id")?)?,
        agent_type: parse_agent_type(&row.try_get::<String, _>("agent_type")?)?,
        persona_id: persona_id.as_deref().map(parse_uuid).transpose()?,
        iteration: row.try_get::<i64, _>("iteration")? as u32,
        input: serde_json::from_str(&row.try_get::<String, _>("input")?)?,
        output: parse_optional_json(row.try_get("output")?)?,
        status: row.try_get::<String, _>("status")?.parse()?,
        tokens_used: row.try_get::<i64, _>("tokens_used")? as u64,
        prompt_tokens: row.try_get::<i64, _>("prompt_tokens")? as u64,
        completion_tokens: row.try_get::<i64, _>("completion_tokens")? as u64,
        logs: Vec::new(),
        error: row.try_get("error")?,
        error_detail: parse_optional_json(row.try_get("error_detail")?)?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        started_at: parse_optional_timestamp(row.try_get("started_at")?)?,
        completed_at: parse_optional_timestamp(row.try_get("completed_at")?)?,
    })
}

fn persona_from_row(row: &SqliteRow) -> StorageResult<Persona> {
    Ok(Persona {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        agent_type: parse_agent_type(&row.try_get::<String, _>("agent_type")?)?,
        model: row.try_get("model")?,
        system_prompt: row.try_get("system_prompt")?,
        temperature: row.try_get("temperature")?,
        max_tokens: row.try_get::<i64, _>("max_tokens")? as u32,
        is_default: row.try_get("is_default")?,
    })
}
