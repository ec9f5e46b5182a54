//! Persisted records: jobs, steps, personas and published pages.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agents::{AgentType, FinalArticle};
use crate::error::StorageError;

// ============================================================================
// Jobs
// ============================================================================

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(StorageError::Corrupt(format!("unknown job status '{}'", other))),
        }
    }
}

/// Per-job knobs supplied by the submitter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobSettings {
    /// Stages to bypass entirely.
    #[serde(default)]
    pub skip_agents: Vec<AgentType>,
    #[serde(default)]
    pub target_word_count: Option<u32>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    /// Persona id to use instead of the agent type's default.
    #[serde(default)]
    pub persona_overrides: BTreeMap<AgentType, Uuid>,
    /// Publish automatically when the final article is ready.
    #[serde(default)]
    pub auto_post: bool,
    #[serde(default)]
    pub parent_page_id: Option<String>,
}

impl JobSettings {
    pub fn skips(&self, agent_type: AgentType) -> bool {
        self.skip_agents.contains(&agent_type)
    }

    pub fn with_skip(mut self, agent_type: AgentType) -> Self {
        if !self.skip_agents.contains(&agent_type) {
            self.skip_agents.push(agent_type);
        }
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_target_word_count(mut self, words: u32) -> Self {
        self.target_word_count = Some(words);
        self
    }

    pub fn with_persona_override(mut self, agent_type: AgentType, persona_id: Uuid) -> Self {
        self.persona_overrides.insert(agent_type, persona_id);
        self
    }

    pub fn with_auto_post(mut self, auto_post: bool) -> Self {
        self.auto_post = auto_post;
        self
    }

    pub fn with_parent_page(mut self, parent_page_id: impl Into<String>) -> Self {
        self.parent_page_id = Some(parent_page_id.into());
        self
    }
}

/// One end-to-end article generation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub keyword: String,
    pub status: JobStatus,
    pub settings: JobSettings,
    pub current_iteration: u32,
    pub current_agent: Option<AgentType>,
    pub total_tokens_used: u64,
    pub progress_percent: u8,
    pub final_output: Option<FinalArticle>,
    pub page_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a pending job for `keyword`.
    pub fn new(keyword: impl Into<String>, settings: JobSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            keyword: keyword.into(),
            status: JobStatus::Pending,
            settings,
            current_iteration: 1,
            current_agent: None,
            total_tokens_used: 0,
            progress_percent: 0,
            final_output: None,
            page_id: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Applies a progress update in memory, keeping the monotonic fields
    /// monotonic.
    pub fn apply_progress(&mut self, progress: &JobProgress) {
        if let Some(iteration) = progress.current_iteration {
            self.current_iteration = self.current_iteration.max(iteration);
        }
        if let Some(agent) = progress.current_agent {
            self.current_agent = Some(agent);
        }
        if let Some(tokens) = progress.total_tokens_used {
            self.total_tokens_used = self.total_tokens_used.max(tokens);
        }
        if let Some(percent) = progress.progress_percent {
            self.progress_percent = percent.min(100);
        }
    }
}

/// Partial progress update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobProgress {
    pub current_iteration: Option<u32>,
    pub current_agent: Option<AgentType>,
    pub total_tokens_used: Option<u64>,
    pub progress_percent: Option<u8>,
}

impl JobProgress {
    pub fn agent(agent_type: AgentType) -> Self {
        Self {
            current_agent: Some(agent_type),
            ..Self::default()
        }
    }

    pub fn iteration(iteration: u32) -> Self {
        Self {
            current_iteration: Some(iteration),
            ..Self::default()
        }
    }

    pub fn tokens(total_tokens_used: u64, progress_percent: u8) -> Self {
        Self {
            total_tokens_used: Some(total_tokens_used),
            progress_percent: Some(progress_percent),
            ..Self::default()
        }
    }
}

/// Extra fields written alongside a status change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn completed_now() -> Self {
        Self {
            error: None,
            completed_at: Some(Utc::now()),
        }
    }

    pub fn failed_now(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            completed_at: Some(Utc::now()),
        }
    }
}

// ============================================================================
// Steps
// ============================================================================

/// Lifecycle state of a single agent attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "running" => Ok(StepStatus::Running),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            other => Err(StorageError::Corrupt(format!("unknown step status '{}'", other))),
        }
    }
}

/// Severity of a step log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One entry of a step's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl StepLogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            data,
        }
    }
}

/// One recorded attempt to run an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: Uuid,
    pub job_id: Uuid,
    pub agent_type: AgentType,
    pub persona_id: Option<Uuid>,
    pub iteration: u32,
    pub input: Value,
    pub output: Option<Value>,
    pub status: StepStatus,
    pub tokens_used: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub logs: Vec<StepLogEntry>,
    pub error: Option<String>,
    pub error_detail: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields supplied when a step is created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStep {
    pub job_id: Uuid,
    pub agent_type: AgentType,
    pub persona_id: Option<Uuid>,
    pub iteration: u32,
    pub input: Value,
}

impl NewStep {
    /// Materializes a pending step record.
    pub fn into_step(self) -> Step {
        Step {
            id: Uuid::new_v4(),
            job_id: self.job_id,
            agent_type: self.agent_type,
            persona_id: self.persona_id,
            iteration: self.iteration,
            input: self.input,
            output: None,
            status: StepStatus::Pending,
            tokens_used: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            logs: Vec::new(),
            error: None,
            error_detail: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Fields recorded when a step succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCompletion {
    pub output: Value,
    pub tokens_used: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

// ============================================================================
// Personas
// ============================================================================

/// Model and prompt configuration bound to an agent type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Persona {
    pub id: Uuid,
    pub name: String,
    pub agent_type: AgentType,
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    #[serde(default)]
    pub is_default: bool,
}

impl Persona {
    /// Creates a default persona for `agent_type`.
    pub fn new(name: impl Into<String>, agent_type: AgentType, model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            agent_type,
            model: model.into(),
            system_prompt: None,
            temperature: 0.7,
            max_tokens: 4000,
            is_default: true,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn non_default(mut self) -> Self {
        self.is_default = false;
        self
    }
}

// ============================================================================
// Pages
// ============================================================================

/// Page payload handed to the page service on auto-publish.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageDraft {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: String,
    pub meta_title: String,
    pub meta_description: String,
    pub meta_keywords: Vec<String>,
    pub parent_id: Option<String>,
}

impl PageDraft {
    pub fn from_article(article: &FinalArticle, parent_id: Option<String>) -> Self {
        Self {
            title: article.title.clone(),
            slug: article.slug.clone(),
            content: article.content.clone(),
            excerpt: article.excerpt.clone(),
            meta_title: article.meta_title.clone(),
            meta_description: article.meta_description.clone(),
            meta_keywords: article.meta_keywords.clone(),
            parent_id,
        }
    }
}

/// A page created by the page service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}
