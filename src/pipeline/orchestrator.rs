//! Job state machine for article generation.
//!
//! `PipelineOrchestrator` drives one job through Research, a bounded
//! Writer/SEO/QA revision loop and Project Manager assembly:
//! - every agent attempt is recorded as a step before and after it runs
//! - transient agent failures are retried with exponential backoff
//! - cancellation is checked between stages, before each retry and before
//!   publishing; a cancelled job is never overwritten as failed or completed
//! - the finished article is optionally published through a `PageService`

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::agents::{
    AgentContext, AgentError, AgentOutcome, AgentRegistry, AgentType, Article, FinalArticle,
    ProjectManagerInput, QaInput, QaOutput, ResearchInput, ResearchOutput, SeoInput, SeoOutput,
    WriterInput,
};
use crate::error::StorageError;
use crate::llm::LlmProvider;
use crate::metrics::PipelineMetrics;
use crate::storage::{
    Job, JobProgress, JobRepository, JobStatus, NewStep, PageDraft, PageService, Persona,
    PersonaRepository, StatusUpdate, StepCompletion, StepRepository,
};
use crate::utils::{count_words, strip_markdown};

use super::config::PipelineConfig;
use super::events::{EventKind, PipelineEvent, ProgressHub};
use super::log_sink::LogSink;
use super::retry::{is_retryable_error, with_retry_notify, RetryConfig};

// ============================================================================
// Errors
// ============================================================================

/// Errors that can fail a job.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing agent or persona; never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The agent ran and reported an unsuccessful outcome.
    #[error("{agent} agent failed: {message}")]
    AgentFailed { agent: AgentType, message: String },

    /// The agent returned an unexpected error.
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Invalid input for {agent} agent: {reason}")]
    InvalidInput { agent: AgentType, reason: String },

    /// Cancellation observed between retry attempts.
    #[error("Job was cancelled")]
    Cancelled,
}

// ============================================================================
// Dependencies & Results
// ============================================================================

/// Collaborators injected into the orchestrator.
#[derive(Clone)]
pub struct PipelineDeps {
    pub jobs: Arc<dyn JobRepository>,
    pub steps: Arc<dyn StepRepository>,
    pub personas: Arc<dyn PersonaRepository>,
    /// Page service used for auto-publish; `None` disables publishing.
    pub pages: Option<Arc<dyn PageService>>,
    pub llm: Arc<dyn LlmProvider>,
    pub registry: Arc<AgentRegistry>,
}

/// Outcome of [`PipelineOrchestrator::execute`].
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub success: bool,
    /// The job as it stood when execution stopped.
    pub job: Job,
    pub error: Option<String>,
    pub iterations: u32,
    /// Tokens from successful stages only; failed attempts are not charged.
    pub total_tokens: u64,
    pub cancelled: bool,
}

impl PipelineResult {
    fn from_job(job: Job, success: bool, cancelled: bool) -> Self {
        Self {
            success,
            error: job.error.clone(),
            iterations: job.current_iteration,
            total_tokens: job.total_tokens_used,
            cancelled,
            job,
        }
    }
}

/// How far a run got before returning control.
enum Flow {
    Completed,
    Cancelled,
}

/// Progress percent reported once each stage succeeds.
fn stage_percent(agent_type: AgentType) -> u8 {
    match agent_type {
        AgentType::Research => 10,
        AgentType::Writer => 35,
        AgentType::Seo => 55,
        AgentType::Qa => 75,
        AgentType::ProjectManager => 90,
    }
}

/// Mutable state of one job while it runs.
struct JobRun {
    job: Job,
    iteration: u32,
    max_iterations: u32,
    target_word_count: u32,
    research: Option<ResearchOutput>,
    article: Option<Article>,
    seo: Option<SeoOutput>,
    qa: Option<QaOutput>,
    feedback: Option<String>,
}

impl JobRun {
    fn new(job: Job, config: &PipelineConfig) -> Self {
        let max_iterations = job
            .settings
            .max_iterations
            .unwrap_or(config.default_max_iterations)
            .max(1);
        let iteration = job.current_iteration.max(1).min(max_iterations);
        let target_word_count = job
            .settings
            .target_word_count
            .unwrap_or(config.default_word_count);

        Self {
            job,
            iteration,
            max_iterations,
            target_word_count,
            research: None,
            article: None,
            seo: None,
            qa: None,
            feedback: None,
        }
    }

    fn skips(&self, agent_type: AgentType) -> bool {
        self.job.settings.skips(agent_type)
    }
}

fn to_input<T: Serialize>(value: &T) -> Result<Value, PipelineError> {
    Ok(serde_json::to_value(value).map_err(AgentError::from)?)
}


// ============================================================================
// Orchestrator
// ============================================================================

/// Runs article jobs end to end.
///
/// `execute` takes `&self`, so one orchestrator can run several jobs
/// concurrently; the same job must never be executed twice at once.
pub struct PipelineOrchestrator {
    deps: PipelineDeps,
    config: PipelineConfig,
    retry: RetryConfig<PipelineError>,
    logs: LogSink,
    progress: ProgressHub,
    metrics: Option<PipelineMetrics>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("config", &self.config)
            .field("registry", &self.deps.registry)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Creates an orchestrator and spawns its step-log writer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(deps: PipelineDeps, config: PipelineConfig) -> Self {
        let logs = LogSink::spawn(deps.steps.clone(), config.log_buffer_capacity);
        let progress = ProgressHub::new(config.progress_channel_capacity);
        let retry = RetryConfig::new(
            config.max_retries,
            config.retry_base_delay,
            is_retryable_error,
        );

        Self {
            deps,
            config,
            retry,
            logs,
            progress,
            metrics: None,
        }
    }

    /// Records job and stage metrics into `metrics`.
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Receives progress events for every job this orchestrator runs.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.progress.subscribe()
    }

    /// Waits until queued step log entries have been written.
    pub async fn flush_logs(&self) {
        self.logs.flush().await;
    }

    /// Step log entries dropped because the buffer was full.
    pub fn dropped_log_entries(&self) -> u64 {
        self.logs.dropped()
    }

    /// Runs `job` to completion, failure or cancellation.
    ///
    /// Never returns an error: every failure is folded into the result and
    /// persisted on the job.
    pub async fn execute(&self, job: Job) -> PipelineResult {
        let job_id = job.id;

        match job.status {
            JobStatus::Cancelled => return self.cancelled(job).await,
            JobStatus::Completed => return PipelineResult::from_job(job, true, false),
            JobStatus::Failed => return PipelineResult::from_job(job, false, false),
            JobStatus::Pending | JobStatus::Processing => {}
        }

        tracing::info!(job_id = %job_id, keyword = %job.keyword, "Starting article pipeline");
        let mut run = JobRun::new(job, &self.config);

        match self.run_stages(&mut run).await {
            Ok(Flow::Completed) => {
                self.record_job("completed");
                tracing::info!(
                    job_id = %job_id,
                    iterations = run.iteration,
                    total_tokens = run.job.total_tokens_used,
                    "Article pipeline completed"
                );
                self.emit(
                    PipelineEvent::new(job_id, EventKind::Completed, "Job completed")
                        .with_data(json!({"total_tokens": run.job.total_tokens_used})),
                );
                let mut result = PipelineResult::from_job(run.job, true, false);
                result.iterations = run.iteration;
                result
            }
            Ok(Flow::Cancelled) => self.cancelled(run.job).await,
            Err(e) => self.fail(run, e).await,
        }
    }

    async fn run_stages(&self, run: &mut JobRun) -> Result<Flow, PipelineError> {
        let job_id = run.job.id;

        if self.deps.jobs.is_cancelled(job_id).await? {
            return Ok(Flow::Cancelled);
        }
        self.deps.jobs.start_processing(job_id).await?;
        run.job.status = JobStatus::Processing;
        run.job.started_at = Some(chrono::Utc::now());

        // Research
        if self.checkpoint(run).await? {
            return Ok(Flow::Cancelled);
        }
        if run.skips(AgentType::Research) {
            self.skip(run, AgentType::Research);
        } else {
            let input = to_input(&ResearchInput {
                keyword: run.job.keyword.clone(),
                target_word_count: run.job.settings.target_word_count,
            })?;
            let (_, research) = self
                .run_stage::<ResearchOutput>(run, AgentType::Research, input)
                .await?;
            if run.job.settings.target_word_count.is_none() {
                if let Some(words) = research.recommended_word_count {
                    run.target_word_count = words;
                }
            }
            run.research = Some(research);
        }

        // Writer / SEO / QA revision loop
        loop {
            if self.checkpoint(run).await? {
                return Ok(Flow::Cancelled);
            }
            self.start_iteration(run).await?;

            if run.skips(AgentType::Writer) {
                self.skip(run, AgentType::Writer);
            } else {
                let revising = run.iteration > 1;
                let input = to_input(&WriterInput {
                    keyword: run.job.keyword.clone(),
                    target_word_count: run.target_word_count,
                    iteration: run.iteration,
                    research: run.research.clone(),
                    previous_article: if revising { run.article.clone() } else { None },
                    feedback: if revising { run.feedback.clone() } else { None },
                })?;
                let (_, article) = self.run_stage::<Article>(run, AgentType::Writer, input).await?;
                run.article = Some(article);
            }

            if self.checkpoint(run).await? {
                return Ok(Flow::Cancelled);
            }

            match run.article.clone() {
                Some(article) if !run.skips(AgentType::Seo) => {
                    let input = to_input(&SeoInput {
                        keyword: run.job.keyword.clone(),
                        article,
                        research: run.research.clone(),
                    })?;
                    let (_, seo) = self.run_stage::<SeoOutput>(run, AgentType::Seo, input).await?;
                    if let (Some(content), Some(article)) =
                        (seo.optimized_content.as_ref(), run.article.as_mut())
                    {
                        article.content = content.clone();
                        article.word_count = count_words(&strip_markdown(content)) as u32;
                    }
                    run.seo = Some(seo);
                }
                _ => self.skip(run, AgentType::Seo),
            }

            if self.checkpoint(run).await? {
                return Ok(Flow::Cancelled);
            }

            let Some(article) = run.article.clone().filter(|_| !run.skips(AgentType::Qa)) else {
                self.skip(run, AgentType::Qa);
                break;
            };
            let input = to_input(&QaInput {
                keyword: run.job.keyword.clone(),
                article,
                target_word_count: run.target_word_count,
                iteration: run.iteration,
                seo: run.seo.clone(),
            })?;
            let (outcome, qa) = self.run_stage::<QaOutput>(run, AgentType::Qa, input).await?;
            let passed = qa.passed;
            run.feedback = outcome
                .feedback
                .clone()
                .or_else(|| Some(qa.feedback.clone()).filter(|f| !f.trim().is_empty()));
            run.qa = Some(qa);

            if passed {
                tracing::info!(job_id = %job_id, iteration = run.iteration, "QA passed");
                break;
            }
            if run.iteration >= run.max_iterations {
                tracing::warn!(
                    job_id = %job_id,
                    iteration = run.iteration,
                    "QA still failing at max iterations, continuing with best effort"
                );
                break;
            }
            run.iteration += 1;
        }

        // Project Manager
        if self.checkpoint(run).await? {
            return Ok(Flow::Cancelled);
        }
        let final_article = match run.article.clone() {
            Some(article) if !run.skips(AgentType::ProjectManager) => {
                let input = to_input(&ProjectManagerInput {
                    keyword: run.job.keyword.clone(),
                    article,
                    iterations: run.iteration,
                    research: run.research.clone(),
                    seo: run.seo.clone(),
                    qa: run.qa.clone(),
                })?;
                let (_, final_article) = self
                    .run_stage::<FinalArticle>(run, AgentType::ProjectManager, input)
                    .await?;
                final_article
            }
            article => {
                self.skip(run, AgentType::ProjectManager);
                let reason = if article.is_none() {
                    "No article was produced"
                } else {
                    "Final assembly was skipped"
                };
                FinalArticle::not_ready(&run.job.keyword, article.as_ref(), run.iteration, reason)
            }
        };

        if self.checkpoint(run).await? {
            return Ok(Flow::Cancelled);
        }
        let page_id = self.publish(run, &final_article).await;
        self.finish(run, final_article, page_id).await?;
        Ok(Flow::Completed)
    }

    /// True when the job was cancelled since the last checkpoint.
    async fn checkpoint(&self, run: &JobRun) -> Result<bool, PipelineError> {
        let cancelled = self.deps.jobs.is_cancelled(run.job.id).await?;
        if cancelled {
            tracing::info!(
                job_id = %run.job.id,
                iteration = run.iteration,
                "Job cancelled at checkpoint"
            );
        }
        Ok(cancelled)
    }

    async fn start_iteration(&self, run: &mut JobRun) -> Result<(), PipelineError> {
        let progress = JobProgress::iteration(run.iteration);
        self.deps.jobs.update_progress(run.job.id, progress.clone()).await?;
        run.job.apply_progress(&progress);

        tracing::debug!(job_id = %run.job.id, iteration = run.iteration, "Starting iteration");
        self.emit(
            PipelineEvent::new(
                run.job.id,
                EventKind::IterationStarted,
                format!("Iteration {} of {}", run.iteration, run.max_iterations),
            )
            .with_data(json!({"iteration": run.iteration, "max_iterations": run.max_iterations})),
        );
        Ok(())
    }

    fn skip(&self, run: &JobRun, agent_type: AgentType) {
        tracing::debug!(job_id = %run.job.id, agent = %agent_type, "Skipping stage");
        self.emit(
            PipelineEvent::new(
                run.job.id,
                EventKind::StageSkipped,
                format!("{} skipped", agent_type),
            )
            .with_agent(agent_type),
        );
    }

    /// Runs one stage with retries and charges its tokens to the job.
    ///
    /// Returns the outcome together with its output parsed as `T`.
    async fn run_stage<T: DeserializeOwned>(
        &self,
        run: &mut JobRun,
        agent_type: AgentType,
        input: Value,
    ) -> Result<(AgentOutcome, T), PipelineError> {
        let job_id = run.job.id;
        let iteration = run.iteration;
        let persona_override = run.job.settings.persona_overrides.get(&agent_type).copied();

        self.emit(
            PipelineEvent::new(job_id, EventKind::StageStarted, format!("{} started", agent_type))
                .with_agent(agent_type),
        );

        let this = self;
        let input = &input;
        let progress = self.progress.clone();
        let result = with_retry_notify(
            &self.retry,
            move |attempt| {
                this.run_agent::<T>(
                    job_id,
                    agent_type,
                    iteration,
                    input.clone(),
                    persona_override,
                    attempt,
                )
            },
            |error: &PipelineError, next_attempt: u32, delay: Duration| {
                progress.emit(
                    PipelineEvent::new(
                        job_id,
                        EventKind::RetryScheduled,
                        format!("Retrying {} after transient error: {}", agent_type, error),
                    )
                    .with_agent(agent_type)
                    .with_data(json!({
                        "attempt": next_attempt,
                        "delay_ms": delay.as_millis() as u64,
                    })),
                );
            },
        )
        .await;

        let (outcome, output) = match result {
            Ok(parsed) => parsed,
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                self.emit(
                    PipelineEvent::new(job_id, EventKind::StageFailed, e.to_string())
                        .with_agent(agent_type),
                );
                return Err(e);
            }
        };

        let tokens = u64::from(outcome.usage.total_tokens);
        let total = run.job.total_tokens_used + tokens;
        let progress = JobProgress {
            current_agent: Some(agent_type),
            ..JobProgress::tokens(total, stage_percent(agent_type))
        };
        self.deps.jobs.update_progress(job_id, progress.clone()).await?;
        run.job.apply_progress(&progress);

        self.emit(
            PipelineEvent::new(
                job_id,
                EventKind::StageCompleted,
                format!("{} completed", agent_type),
            )
            .with_agent(agent_type)
            .with_data(json!({"tokens": tokens, "total_tokens": total})),
        );
        Ok((outcome, output))
    }

    /// One attempt: resolve, record a step, validate, execute, parse the
    /// output, record.
    async fn run_agent<T: DeserializeOwned>(
        &self,
        job_id: Uuid,
        agent_type: AgentType,
        iteration: u32,
        input: Value,
        persona_override: Option<Uuid>,
        attempt: u32,
    ) -> Result<(AgentOutcome, T), PipelineError> {
        if attempt > 0 && self.deps.jobs.is_cancelled(job_id).await? {
            tracing::info!(
                job_id = %job_id,
                agent = %agent_type,
                attempt,
                "Job cancelled before retry"
            );
            return Err(PipelineError::Cancelled);
        }

        let agent = self.deps.registry.get(agent_type).ok_or_else(|| {
            PipelineError::Configuration(format!("No agent registered for {}", agent_type))
        })?;
        let persona = self.resolve_persona(agent_type, persona_override).await?;

        let step = self
            .deps
            .steps
            .create(NewStep {
                job_id,
                agent_type,
                persona_id: Some(persona.id),
                iteration,
                input: input.clone(),
            })
            .await?;
        if let Err(e) = self.start_step(job_id, agent_type, step.id).await {
            self.record_step_failure(step.id, &e.to_string(), None).await;
            return Err(e);
        }

        tracing::info!(
            job_id = %job_id,
            step_id = %step.id,
            agent = %agent_type,
            iteration,
            attempt,
            persona = %persona.name,
            "Running agent"
        );

        if !agent.validate_input(&input) {
            let reason = format!("{} rejected its input", agent.name());
            self.record_step_failure(step.id, &reason, None).await;
            return Err(PipelineError::InvalidInput {
                agent: agent_type,
                reason,
            });
        }

        let ctx = AgentContext::new(
            job_id,
            step.id,
            iteration,
            agent_type,
            persona,
            self.deps.llm.clone(),
            self.logs.clone(),
            self.progress.clone(),
        );

        let started = Instant::now();
        let result = agent.execute(input, &ctx).await;
        let elapsed = started.elapsed();

        match result {
            Ok(outcome) if outcome.success => {
                let output = match outcome.output_as::<T>() {
                    Ok(output) => output,
                    Err(e) => {
                        let message = format!("Malformed output: {}", e);
                        let detail = json!({
                            "attempt": attempt,
                            "unbilled_tokens": outcome.usage.total_tokens,
                        });
                        self.record_step_failure(step.id, &message, Some(detail)).await;
                        self.record_stage(agent_type, false, 0, elapsed);
                        return Err(PipelineError::AgentFailed {
                            agent: agent_type,
                            message,
                        });
                    }
                };
                let usage = outcome.usage;
                self.deps
                    .steps
                    .complete(
                        step.id,
                        StepCompletion {
                            output: outcome.output.clone().unwrap_or(Value::Null),
                            tokens_used: u64::from(usage.total_tokens),
                            prompt_tokens: u64::from(usage.prompt_tokens),
                            completion_tokens: u64::from(usage.completion_tokens),
                        },
                    )
                    .await?;
                self.record_stage(agent_type, true, u64::from(usage.total_tokens), elapsed);
                tracing::info!(
                    job_id = %job_id,
                    step_id = %step.id,
                    agent = %agent_type,
                    tokens = usage.total_tokens,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Agent completed"
                );
                Ok((outcome, output))
            }
            Ok(outcome) => {
                let message = outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "agent reported failure".to_string());
                let detail = json!({
                    "attempt": attempt,
                    "unbilled_tokens": outcome.usage.total_tokens,
                });
                self.record_step_failure(step.id, &message, Some(detail)).await;
                self.record_stage(agent_type, false, 0, elapsed);
                Err(PipelineError::AgentFailed {
                    agent: agent_type,
                    message,
                })
            }
            Err(e) => {
                let message = e.to_string();
                self.record_step_failure(step.id, &message, Some(json!({"attempt": attempt})))
                    .await;
                self.record_stage(agent_type, false, 0, elapsed);
                Err(PipelineError::Agent(e))
            }
        }
    }

    async fn start_step(
        &self,
        job_id: Uuid,
        agent_type: AgentType,
        step_id: Uuid,
    ) -> Result<(), PipelineError> {
        self.deps
            .jobs
            .update_progress(job_id, JobProgress::agent(agent_type))
            .await?;
        self.deps.steps.start(step_id).await?;
        Ok(())
    }

    async fn resolve_persona(
        &self,
        agent_type: AgentType,
        persona_override: Option<Uuid>,
    ) -> Result<Persona, PipelineError> {
        match persona_override {
            Some(persona_id) => {
                let persona = self
                    .deps
                    .personas
                    .find_by_id(persona_id)
                    .await?
                    .ok_or_else(|| {
                        PipelineError::Configuration(format!(
                            "Persona override {} for {} not found",
                            persona_id, agent_type
                        ))
                    })?;
                if persona.agent_type != agent_type {
                    return Err(PipelineError::Configuration(format!(
                        "Persona '{}' belongs to {}, not {}",
                        persona.name, persona.agent_type, agent_type
                    )));
                }
                Ok(persona)
            }
            None => self
                .deps
                .personas
                .find_default(agent_type)
                .await?
                .ok_or_else(|| {
                    PipelineError::Configuration(format!("No default persona for {}", agent_type))
                }),
        }
    }

    /// Marks a step failed; a storage error here is logged, not raised, so
    /// the original failure is what propagates.
    async fn record_step_failure(&self, step_id: Uuid, message: &str, detail: Option<Value>) {
        tracing::warn!(step_id = %step_id, error = %message, "Agent step failed");
        if let Err(e) = self.deps.steps.fail(step_id, message, detail).await {
            tracing::error!(step_id = %step_id, error = %e, "Failed to record step failure");
        }
    }

    /// Publishes when the job asks for it and the article is ready.
    async fn publish(&self, run: &JobRun, final_article: &FinalArticle) -> Option<String> {
        let job_id = run.job.id;
        if !run.job.settings.auto_post || !final_article.ready_for_publish {
            return None;
        }
        let Some(pages) = &self.deps.pages else {
            tracing::debug!(job_id = %job_id, "Auto-post requested but no page service configured");
            return None;
        };

        let draft = PageDraft::from_article(final_article, run.job.settings.parent_page_id.clone());
        match pages.create_page(draft).await {
            Ok(page) => {
                tracing::info!(job_id = %job_id, page_id = %page.id, "Published article");
                self.emit(
                    PipelineEvent::new(job_id, EventKind::Published, "Article published")
                        .with_data(json!({"page_id": page.id, "url": page.url})),
                );
                Some(page.id)
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Auto-publish failed");
                self.emit(PipelineEvent::new(
                    job_id,
                    EventKind::PublishFailed,
                    format!("Publishing failed: {}", e),
                ));
                None
            }
        }
    }

    async fn finish(
        &self,
        run: &mut JobRun,
        final_article: FinalArticle,
        page_id: Option<String>,
    ) -> Result<(), PipelineError> {
        let job_id = run.job.id;
        self.deps
            .jobs
            .set_final_output(job_id, &final_article, page_id.as_deref())
            .await?;

        let progress = JobProgress::tokens(run.job.total_tokens_used, 100);
        self.deps.jobs.update_progress(job_id, progress.clone()).await?;

        let update = StatusUpdate::completed_now();
        let completed_at = update.completed_at;
        self.deps
            .jobs
            .set_status(job_id, JobStatus::Completed, update)
            .await?;

        run.job.apply_progress(&progress);
        run.job.final_output = Some(final_article);
        run.job.page_id = page_id;
        run.job.status = JobStatus::Completed;
        run.job.completed_at = completed_at;
        Ok(())
    }

    async fn fail(&self, mut run: JobRun, error: PipelineError) -> PipelineResult {
        let job_id = run.job.id;
        // A cancel that landed mid-stage wins over the failure it caused.
        if matches!(error, PipelineError::Cancelled) || self.is_cancelled_now(job_id).await {
            return self.cancelled(run.job).await;
        }

        let message = error.to_string();
        tracing::error!(
            job_id = %job_id,
            iteration = run.iteration,
            error = %message,
            "Article pipeline failed"
        );

        let update = StatusUpdate::failed_now(message.clone());
        let completed_at = update.completed_at;
        if let Err(e) = self.deps.jobs.set_status(job_id, JobStatus::Failed, update).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to persist job failure");
        }

        run.job.status = JobStatus::Failed;
        run.job.error = Some(message.clone());
        run.job.completed_at = completed_at;

        self.record_job("failed");
        self.emit(PipelineEvent::new(job_id, EventKind::Failed, message));
        PipelineResult::from_job(run.job, false, false)
    }

    async fn is_cancelled_now(&self, job_id: Uuid) -> bool {
        match self.deps.jobs.is_cancelled(job_id).await {
            Ok(cancelled) => cancelled,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Could not check cancellation");
                false
            }
        }
    }

    /// Result for a cancelled job, reporting the last persisted progress.
    async fn cancelled(&self, job: Job) -> PipelineResult {
        let job_id = job.id;
        let mut job = match self.deps.jobs.find_by_id(job_id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => job,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Could not reload cancelled job");
                job
            }
        };
        job.status = JobStatus::Cancelled;

        tracing::info!(job_id = %job_id, "Article pipeline cancelled");
        self.record_job("cancelled");
        self.emit(PipelineEvent::new(job_id, EventKind::Cancelled, "Job cancelled"));
        PipelineResult::from_job(job, false, true)
    }

    fn emit(&self, event: PipelineEvent) {
        self.progress.emit(event);
    }

    fn record_job(&self, status: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_job(status);
        }
    }

    fn record_stage(&self, agent_type: AgentType, success: bool, tokens: u64, elapsed: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.record_stage(agent_type, success, tokens, elapsed);
        }
    }
}
