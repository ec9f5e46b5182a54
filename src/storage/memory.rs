//! In-memory repositories.
//!
//! Backed by plain maps behind a `std::sync::Mutex`; no lock is held across
//! an `.await`. Used by the test suite and by callers that embed the
//! pipeline without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::models::{
    Job, JobProgress, JobStatus, NewStep, Page, PageDraft, Persona, StatusUpdate, Step,
    StepCompletion, StepLogEntry, StepStatus,
};
use super::{JobRepository, PageService, PersonaRepository, StepRepository, StorageResult};
use crate::agents::{AgentType, FinalArticle};
use crate::error::{PublishError, StorageError};

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    /// Insertion order doubles as creation order.
    steps: Vec<Step>,
    personas: Vec<Persona>,
}

/// Job, step and persona repositories in one process-local store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn insert_job(&self, job: Job) {
        self.with_state(|s| {
            s.jobs.insert(job.id, job);
        });
    }

    pub fn insert_persona(&self, persona: Persona) {
        self.with_state(|s| s.personas.push(persona));
    }

    /// Flags a job as cancelled, as an operator would.
    ///
    /// Cancelling twice is a no-op; a completed or failed job cannot be
    /// cancelled.
    pub fn cancel_job(&self, job_id: Uuid) -> StorageResult<()> {
        self.with_state(|s| {
            let job = s
                .jobs
                .get_mut(&job_id)
                .ok_or(StorageError::JobNotFound(job_id))?;
            match job.status {
                JobStatus::Cancelled => Ok(()),
                status if status.is_terminal() => Err(not_active(job_id, status)),
                _ => {
                    job.status = JobStatus::Cancelled;
                    job.completed_at = Some(Utc::now());
                    Ok(())
                }
            }
        })
    }

    /// Snapshot of a job.
    pub fn job(&self, job_id: Uuid) -> Option<Job> {
        self.with_state(|s| s.jobs.get(&job_id).cloned())
    }

    /// Snapshot of a job's steps in creation order.
    pub fn steps(&self, job_id: Uuid) -> Vec<Step> {
        self.with_state(|s| {
            s.steps
                .iter()
                .filter(|step| step.job_id == job_id)
                .cloned()
                .collect()
        })
    }

    fn with_job<T>(
        &self,
        job_id: Uuid,
        f: impl FnOnce(&mut Job) -> T,
    ) -> StorageResult<T> {
        self.with_state(|s| {
            s.jobs
                .get_mut(&job_id)
                .map(f)
                .ok_or(StorageError::JobNotFound(job_id))
        })
    }

    /// Like `with_job`, refusing jobs that already reached a terminal status.
    fn with_active_job<T>(
        &self,
        job_id: Uuid,
        f: impl FnOnce(&mut Job) -> T,
    ) -> StorageResult<T> {
        self.with_state(|s| {
            let job = s
                .jobs
                .get_mut(&job_id)
                .ok_or(StorageError::JobNotFound(job_id))?;
            if job.status.is_terminal() {
                return Err(not_active(job_id, job.status));
            }
            Ok(f(job))
        })
    }

    fn with_step<T>(
        &self,
        step_id: Uuid,
        f: impl FnOnce(&mut Step) -> StorageResult<T>,
    ) -> StorageResult<T> {
        self.with_state(|s| {
            let step = s
                .steps
                .iter_mut()
                .find(|step| step.id == step_id)
                .ok_or(StorageError::StepNotFound(step_id))?;
            f(step)
        })
    }
}

fn not_active(job_id: Uuid, status: JobStatus) -> StorageError {
    StorageError::JobNotActive {
        job_id,
        status: status.to_string(),
    }
}

fn transition(step: &mut Step, allowed: &[StepStatus], to: StepStatus) -> StorageResult<()> {
    if !allowed.contains(&step.status) {
        return Err(StorageError::InvalidTransition {
            step_id: step.id,
            from: step.status.to_string(),
            to: to.to_string(),
        });
    }
    step.status = to;
    Ok(())
}

#[async_trait]
impl JobRepository for InMemoryStore {
    async fn find_by_id(&self, job_id: Uuid) -> StorageResult<Option<Job>> {
        Ok(self.job(job_id))
    }

    async fn start_processing(&self, job_id: Uuid) -> StorageResult<()> {
        self.with_active_job(job_id, |job| {
            job.status = JobStatus::Processing;
            job.started_at = Some(Utc::now());
        })
    }

    async fn update_progress(&self, job_id: Uuid, progress: JobProgress) -> StorageResult<()> {
        self.with_job(job_id, |job| job.apply_progress(&progress))
    }

    async fn set_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        update: StatusUpdate,
    ) -> StorageResult<()> {
        self.with_active_job(job_id, |job| {
            job.status = status;
            if update.error.is_some() {
                job.error = update.error;
            }
            if update.completed_at.is_some() {
                job.completed_at = update.completed_at;
            }
        })
    }

    async fn set_final_output(
        &self,
        job_id: Uuid,
        final_output: &FinalArticle,
        page_id: Option<&str>,
    ) -> StorageResult<()> {
        self.with_active_job(job_id, |job| {
            job.final_output = Some(final_output.clone());
            job.page_id = page_id.map(str::to_string);
        })
    }

    async fn is_cancelled(&self, job_id: Uuid) -> StorageResult<bool> {
        self.with_job(job_id, |job| job.status == JobStatus::Cancelled)
    }
}

#[async_trait]
impl StepRepository for InMemoryStore {
    async fn create(&self, step: NewStep) -> StorageResult<Step> {
        let step = step.into_step();
        self.with_state(|s| s.steps.push(step.clone()));
        Ok(step)
    }

    async fn start(&self, step_id: Uuid) -> StorageResult<()> {
        self.with_step(step_id, |step| {
            transition(step, &[StepStatus::Pending], StepStatus::Running)?;
            step.started_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn complete(&self, step_id: Uuid, completion: StepCompletion) -> StorageResult<()> {
        self.with_step(step_id, |step| {
            transition(step, &[StepStatus::Running], StepStatus::Completed)?;
            step.output = Some(completion.output);
            step.tokens_used = completion.tokens_used;
            step.prompt_tokens = completion.prompt_tokens;
            step.completion_tokens = completion.completion_tokens;
            step.completed_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn fail(
        &self,
        step_id: Uuid,
        error: &str,
        detail: Option<serde_json::Value>,
    ) -> StorageResult<()> {
        self.with_step(step_id, |step| {
            transition(
                step,
                &[StepStatus::Pending, StepStatus::Running],
                StepStatus::Failed,
            )?;
            step.error = Some(error.to_string());
            step.error_detail = detail;
            step.completed_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn append_log(&self, step_id: Uuid, entry: StepLogEntry) -> StorageResult<()> {
        self.with_step(step_id, |step| {
            step.logs.push(entry);
            Ok(())
        })
    }

    async fn list_for_job(&self, job_id: Uuid) -> StorageResult<Vec<Step>> {
        Ok(self.steps(job_id))
    }
}

#[async_trait]
impl PersonaRepository for InMemoryStore {
    async fn find_by_id(&self, persona_id: Uuid) -> StorageResult<Option<Persona>> {
        Ok(self.with_state(|s| s.personas.iter().find(|p| p.id == persona_id).cloned()))
    }

    async fn find_default(&self, agent_type: AgentType) -> StorageResult<Option<Persona>> {
        Ok(self.with_state(|s| {
            s.personas
                .iter()
                .find(|p| p.agent_type == agent_type && p.is_default)
                .cloned()
        }))
    }
}

/// Page service that records every draft it receives.
#[derive(Debug, Default)]
pub struct RecordingPageService {
    drafts: Mutex<Vec<PageDraft>>,
    fail_with: Option<String>,
}

impl RecordingPageService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A page service whose every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            drafts: Mutex::new(Vec::new()),
            fail_with: Some(message.into()),
        }
    }

    pub fn drafts(&self) -> Vec<PageDraft> {
        self.drafts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl PageService for RecordingPageService {
    async fn create_page(&self, draft: PageDraft) -> Result<Page, PublishError> {
        let slug = draft.slug.clone();
        self.drafts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(draft);

        match &self.fail_with {
            Some(message) => Err(PublishError::RequestFailed(message.clone())),
            None => Ok(Page {
                id: format!("page-{}", slug),
                url: Some(format!("/{}", slug)),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JobSettings;
    use crate::storage::LogLevel;
    use serde_json::json;

    fn new_step(job_id: Uuid) -> NewStep {
        NewStep {
            job_id,
            agent_type: AgentType::Writer,
            persona_id: None,
            iteration: 1,
            input: json!({"keyword": "rust"}),
        }
    }

    #[tokio::test]
    async fn test_step_lifecycle() {
        let store = InMemoryStore::new();
        let job = Job::new("rust", JobSettings::default());
        let job_id = job.id;
        store.insert_job(job);

        let step = store.create(new_step(job_id)).await.unwrap();
        assert_eq!(step.status, StepStatus::Pending);

        store.start(step.id).await.unwrap();
        store
            .append_log(step.id, StepLogEntry::new(LogLevel::Info, "drafting", None))
            .await
            .unwrap();
        store
            .complete(
                step.id,
                StepCompletion {
                    output: json!({"title": "Rust"}),
                    tokens_used: 30,
                    prompt_tokens: 10,
                    completion_tokens: 20,
                },
            )
            .await
            .unwrap();

        let steps = store.list_for_job(job_id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepStatus::Completed);
        assert_eq!(steps[0].tokens_used, 30);
        assert_eq!(steps[0].logs.len(), 1);
        assert!(steps[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_requires_running() {
        let store = InMemoryStore::new();
        let step = store.create(new_step(Uuid::new_v4())).await.unwrap();

        let err = store
            .complete(
                step.id,
                StepCompletion {
                    output: json!({}),
                    tokens_used: 0,
                    prompt_tokens: 0,
                    completion_tokens: 0,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_cancel_and_find_default_persona() {
        let store = InMemoryStore::new();
        let job = Job::new("rust", JobSettings::default());
        let job_id = job.id;
        store.insert_job(job);
        assert!(!store.is_cancelled(job_id).await.unwrap());
        store.cancel_job(job_id).unwrap();
        assert!(store.is_cancelled(job_id).await.unwrap());

        store.insert_persona(Persona::new("Alt QA", AgentType::Qa, "m").non_default());
        let default_qa = Persona::new("QA", AgentType::Qa, "m");
        store.insert_persona(default_qa.clone());

        let found = store.find_default(AgentType::Qa).await.unwrap();
        assert_eq!(found, Some(default_qa));
        assert!(store.find_default(AgentType::Seo).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_jobs_accept_no_transitions() {
        let store = InMemoryStore::new();
        let job = Job::new("rust", JobSettings::default());
        let job_id = job.id;
        store.insert_job(job);

        store.start_processing(job_id).await.unwrap();
        store.cancel_job(job_id).unwrap();
        // A second cancel is a no-op.
        store.cancel_job(job_id).unwrap();

        let err = store
            .set_status(job_id, JobStatus::Failed, StatusUpdate::failed_now("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::JobNotActive { .. }));
        assert!(store.start_processing(job_id).await.is_err());
        let article = FinalArticle::not_ready("rust", None, 1, "x");
        assert!(store.set_final_output(job_id, &article, None).await.is_err());

        let stored = store.job(job_id).unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert!(stored.error.is_none());
        assert!(stored.final_output.is_none());
    }

    #[tokio::test]
    async fn test_completed_job_cannot_be_cancelled() {
        let store = InMemoryStore::new();
        let job = Job::new("rust", JobSettings::default());
        let job_id = job.id;
        store.insert_job(job);
        store
            .set_status(job_id, JobStatus::Completed, StatusUpdate::completed_now())
            .await
            .unwrap();

        let err = store.cancel_job(job_id).unwrap_err();
        assert!(matches!(err, StorageError::JobNotActive { .. }));
        assert_eq!(store.job(job_id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_recording_page_service() {
        let pages = RecordingPageService::new();
        let article = FinalArticle::not_ready("rust", None, 1, "x");
        let page = pages
            .create_page(PageDraft::from_article(&article, None))
            .await
            .unwrap();
        assert_eq!(page.id, "page-rust");
        assert_eq!(pages.drafts().len(), 1);

        let failing = RecordingPageService::failing("cms down");
        assert!(failing
            .create_page(PageDraft::from_article(&article, None))
            .await
            .is_err());
    }
}
