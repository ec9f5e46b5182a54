//! End-to-end pipeline scenarios against the in-memory store.
//!
//! Stage agents are scripted fakes so each scenario controls exactly what
//! every attempt returns; the Project Manager is the real deterministic one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use article_forge::agents::{
    Agent, AgentContext, AgentOutcome, AgentRegistry, AgentResult, AgentType, ProjectManagerAgent,
    ProjectManagerInput, WriterInput,
};
use article_forge::error::{LlmError, StorageError};
use article_forge::llm::{
    Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage,
};
use article_forge::pipeline::{EventKind, PipelineConfig, PipelineDeps, PipelineOrchestrator};
use article_forge::storage::{
    InMemoryStore, Job, JobSettings, JobStatus, LogLevel, NewStep, PageService, Persona,
    RecordingPageService, Step, StepCompletion, StepLogEntry, StepRepository, StepStatus,
    StorageResult,
};
use uuid::Uuid;

// ============================================================================
// Fakes
// ============================================================================

type Behavior = Box<dyn Fn(usize, &Value, &AgentContext) -> AgentOutcome + Send + Sync>;

/// Agent whose outcome for the n-th call (0-based) comes from a closure.
struct FakeAgent {
    agent_type: AgentType,
    behavior: Behavior,
    accepts_input: bool,
    calls: AtomicUsize,
    inputs: Mutex<Vec<Value>>,
}

impl FakeAgent {
    fn new(
        agent_type: AgentType,
        behavior: impl Fn(usize, &Value, &AgentContext) -> AgentOutcome + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            agent_type,
            behavior: Box::new(behavior),
            accepts_input: true,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    fn rejecting_input(agent_type: AgentType) -> Arc<Self> {
        Arc::new(Self {
            agent_type,
            behavior: Box::new(|_, _, _| AgentOutcome::failure("unreachable", Usage::default())),
            accepts_input: false,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn input(&self, index: usize) -> Value {
        self.inputs.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Agent for FakeAgent {
    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    fn name(&self) -> &str {
        "fake"
    }

    fn description(&self) -> &str {
        "scripted test agent"
    }

    fn validate_input(&self, _input: &Value) -> bool {
        self.accepts_input
    }

    async fn execute(&self, input: Value, ctx: &AgentContext) -> AgentResult<AgentOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input.clone());
        Ok((self.behavior)(call, &input, ctx))
    }

    fn output_schema(&self) -> Value {
        json!({"type": "object"})
    }
}

/// Lets a fake agent cancel its own job mid-stage, as an operator would.
#[derive(Clone, Default)]
struct CancelSwitch(Arc<Mutex<Option<Arc<InMemoryStore>>>>);

impl CancelSwitch {
    fn arm(&self, store: &Arc<InMemoryStore>) {
        *self.0.lock().unwrap() = Some(store.clone());
    }

    fn cancel(&self, ctx: &AgentContext) {
        if let Some(store) = self.0.lock().unwrap().as_ref() {
            store.cancel_job(ctx.job_id).unwrap();
        }
    }
}

/// Step repository whose `start` always fails; everything else goes to the
/// wrapped store.
struct UnstartableSteps(Arc<InMemoryStore>);

#[async_trait]
impl StepRepository for UnstartableSteps {
    async fn create(&self, step: NewStep) -> StorageResult<Step> {
        self.0.create(step).await
    }

    async fn start(&self, _step_id: Uuid) -> StorageResult<()> {
        Err(StorageError::Corrupt("disk full".into()))
    }

    async fn complete(&self, step_id: Uuid, completion: StepCompletion) -> StorageResult<()> {
        self.0.complete(step_id, completion).await
    }

    async fn fail(&self, step_id: Uuid, error: &str, detail: Option<Value>) -> StorageResult<()> {
        self.0.fail(step_id, error, detail).await
    }

    async fn append_log(&self, step_id: Uuid, entry: StepLogEntry) -> StorageResult<()> {
        self.0.append_log(step_id, entry).await
    }

    async fn list_for_job(&self, job_id: Uuid) -> StorageResult<Vec<Step>> {
        self.0.list_for_job(job_id).await
    }
}

/// Provider that must never be reached by the fake agents.
struct UnusedLlm;

#[async_trait]
impl LlmProvider for UnusedLlm {
    async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        Err(LlmError::RequestFailed("LLM should not be called".into()))
    }
}

/// Replies with queued JSON bodies in order.
struct QueueLlm {
    replies: Mutex<Vec<String>>,
}

#[async_trait]
impl LlmProvider for QueueLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(LlmError::RequestFailed("queue exhausted".into()));
        }
        let content = replies.remove(0);
        Ok(GenerationResponse {
            id: "queued".into(),
            model: request.model,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: "stop".into(),
            }],
            usage: Usage::new(40, 60),
        })
    }
}

// ============================================================================
// Outcomes
// ============================================================================

fn research_ok(recommended: Option<u32>) -> AgentOutcome {
    AgentOutcome::success(
        json!({
            "summary": "Traits describe shared behavior",
            "key_points": ["bounds", "dyn"],
            "keywords": ["rust traits", "trait objects"],
            "questions": [],
            "recommended_word_count": recommended,
        }),
        Usage::new(60, 40),
    )
}

fn article_ok(title: &str, content: &str) -> AgentOutcome {
    AgentOutcome::success(
        json!({
            "title": title,
            "content": content,
            "word_count": content.split_whitespace().count(),
        }),
        Usage::new(120, 80),
    )
}

fn seo_ok() -> AgentOutcome {
    AgentOutcome::success(
        json!({
            "meta_title": "Rust Traits",
            "meta_description": "A guide to Rust traits",
            "focus_keyword": "rust traits",
            "keywords": ["traits"],
            "slug": "rust-traits",
            "score": 0.8,
        }),
        Usage::new(30, 20),
    )
}

fn qa(passed: bool) -> AgentOutcome {
    let outcome = AgentOutcome::success(
        json!({
            "passed": passed,
            "score": if passed { 0.9 } else { 0.4 },
            "issues": if passed { json!([]) } else { json!(["Needs examples"]) },
            "feedback": if passed { "" } else { "Add examples" },
        }),
        Usage::new(20, 10),
    );
    if passed {
        outcome
    } else {
        outcome.with_feedback("Add examples")
    }
}

const RESEARCH_TOKENS: u64 = 100;
const WRITER_TOKENS: u64 = 200;
const SEO_TOKENS: u64 = 50;
const QA_TOKENS: u64 = 30;

// ============================================================================
// Harness
// ============================================================================

struct Agents {
    research: Arc<FakeAgent>,
    writer: Arc<FakeAgent>,
    seo: Arc<FakeAgent>,
    qa: Arc<FakeAgent>,
}

impl Agents {
    fn passing() -> Self {
        Self {
            research: FakeAgent::new(AgentType::Research, |_, _, _| research_ok(None)),
            writer: FakeAgent::new(AgentType::Writer, |n, _, _| {
                article_ok("Rust Traits", &format!("Draft {} explains traits with care.", n + 1))
            }),
            seo: FakeAgent::new(AgentType::Seo, |_, _, _| seo_ok()),
            qa: FakeAgent::new(AgentType::Qa, |_, _, _| qa(true)),
        }
    }

    fn registry(&self) -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        registry.register(self.research.clone()).unwrap();
        registry.register(self.writer.clone()).unwrap();
        registry.register(self.seo.clone()).unwrap();
        registry.register(self.qa.clone()).unwrap();
        registry.register(Arc::new(ProjectManagerAgent::new())).unwrap();
        registry
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    pages: Arc<RecordingPageService>,
    orchestrator: PipelineOrchestrator,
}

fn fast_config() -> PipelineConfig {
    PipelineConfig::default().with_retry_base_delay(Duration::from_millis(1))
}

fn seed_personas(store: &InMemoryStore) {
    for agent_type in AgentType::all() {
        store.insert_persona(Persona::new(
            format!("{} persona", agent_type),
            agent_type,
            "openai/gpt-4o-mini",
        ));
    }
}

fn harness_with(
    registry: AgentRegistry,
    pages: RecordingPageService,
    llm: Arc<dyn LlmProvider>,
) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    seed_personas(&store);
    let pages = Arc::new(pages);

    let deps = PipelineDeps {
        jobs: store.clone(),
        steps: store.clone(),
        personas: store.clone(),
        pages: Some(pages.clone() as Arc<dyn PageService>),
        llm,
        registry: Arc::new(registry),
    };

    Harness {
        store,
        pages,
        orchestrator: PipelineOrchestrator::new(deps, fast_config()),
    }
}

fn harness(agents: &Agents) -> Harness {
    harness_with(agents.registry(), RecordingPageService::new(), Arc::new(UnusedLlm))
}

impl Harness {
    fn submit(&self, keyword: &str, settings: JobSettings) -> Job {
        let job = Job::new(keyword, settings);
        self.store.insert_job(job.clone());
        job
    }

    fn steps_for(&self, job: &Job, agent_type: AgentType) -> Vec<Step> {
        self.store
            .steps(job.id)
            .into_iter()
            .filter(|s| s.agent_type == agent_type)
            .collect()
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_happy_path_runs_each_stage_once() {
    let agents = Agents::passing();
    let h = harness(&agents);
    let job = h.submit("rust traits", JobSettings::default());

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.success, "error: {:?}", result.error);
    assert!(!result.cancelled);
    assert_eq!(result.iterations, 1);
    assert_eq!(
        result.total_tokens,
        RESEARCH_TOKENS + WRITER_TOKENS + SEO_TOKENS + QA_TOKENS
    );

    let stored = h.store.job(job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress_percent, 100);
    assert_eq!(stored.total_tokens_used, result.total_tokens);
    assert!(stored.completed_at.is_some());

    let final_article = stored.final_output.unwrap();
    assert!(final_article.ready_for_publish);
    assert_eq!(final_article.slug, "rust-traits");
    assert_eq!(final_article.qa_passed, Some(true));

    let steps = h.store.steps(job.id);
    let order: Vec<AgentType> = steps.iter().map(|s| s.agent_type).collect();
    assert_eq!(order, AgentType::all().to_vec());
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
    assert_eq!(steps[1].tokens_used, WRITER_TOKENS);
    assert_eq!(steps[1].prompt_tokens, 120);
}

#[tokio::test]
async fn test_qa_failure_drives_revision_with_feedback() {
    let mut agents = Agents::passing();
    agents.qa = FakeAgent::new(AgentType::Qa, |n, _, _| qa(n >= 1));
    let h = harness(&agents);
    let job = h.submit("rust traits", JobSettings::default());

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.success);
    assert_eq!(result.iterations, 2);
    assert_eq!(agents.writer.calls(), 2);
    assert_eq!(agents.seo.calls(), 2);
    // Nothing runs after QA passes.
    assert_eq!(agents.qa.calls(), 2);

    let first: WriterInput = serde_json::from_value(agents.writer.input(0)).unwrap();
    assert!(first.previous_article.is_none());
    assert!(first.feedback.is_none());

    let revision: WriterInput = serde_json::from_value(agents.writer.input(1)).unwrap();
    assert_eq!(revision.iteration, 2);
    assert_eq!(revision.feedback.as_deref(), Some("Add examples"));
    assert_eq!(
        revision.previous_article.unwrap().content,
        "Draft 1 explains traits with care."
    );

    let writer_steps = h.steps_for(&job, AgentType::Writer);
    assert_eq!(writer_steps.iter().map(|s| s.iteration).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(
        result.total_tokens,
        RESEARCH_TOKENS + 2 * (WRITER_TOKENS + SEO_TOKENS + QA_TOKENS)
    );
}

#[tokio::test]
async fn test_qa_failing_at_max_iterations_completes_not_ready() {
    let mut agents = Agents::passing();
    agents.qa = FakeAgent::new(AgentType::Qa, |_, _, _| qa(false));
    let h = harness(&agents);
    let job = h.submit(
        "rust traits",
        JobSettings::default().with_max_iterations(2).with_auto_post(true),
    );

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.success);
    assert_eq!(result.iterations, 2);
    assert_eq!(agents.writer.calls(), 2);
    assert_eq!(agents.qa.calls(), 2);

    let final_article = result.job.final_output.clone().unwrap();
    assert!(!final_article.ready_for_publish);
    assert_eq!(final_article.qa_passed, Some(false));
    assert!(final_article.validation_errors[0].starts_with("QA did not pass"));

    // Not ready, so auto-post must not publish.
    assert!(h.pages.drafts().is_empty());
    assert!(h.store.job(job.id).unwrap().page_id.is_none());
}

#[tokio::test]
async fn test_skipping_research_uses_setting_or_default_word_count() {
    let agents = Agents::passing();
    let h = harness(&agents);

    let job = h.submit(
        "rust traits",
        JobSettings::default().with_skip(AgentType::Research),
    );
    let result = h.orchestrator.execute(job.clone()).await;
    assert!(result.success);
    assert!(h.steps_for(&job, AgentType::Research).is_empty());
    assert_eq!(agents.research.calls(), 0);

    let input: WriterInput = serde_json::from_value(agents.writer.input(0)).unwrap();
    assert_eq!(input.target_word_count, 1500);
    assert!(input.research.is_none());

    let job = h.submit(
        "rust traits",
        JobSettings::default()
            .with_skip(AgentType::Research)
            .with_target_word_count(800),
    );
    h.orchestrator.execute(job).await;
    let input: WriterInput = serde_json::from_value(agents.writer.input(1)).unwrap();
    assert_eq!(input.target_word_count, 800);
}

#[tokio::test]
async fn test_research_recommendation_sets_word_count() {
    let mut agents = Agents::passing();
    agents.research = FakeAgent::new(AgentType::Research, |_, _, _| research_ok(Some(2200)));
    let h = harness(&agents);

    h.orchestrator
        .execute(h.submit("rust traits", JobSettings::default()))
        .await;
    let input: WriterInput = serde_json::from_value(agents.writer.input(0)).unwrap();
    assert_eq!(input.target_word_count, 2200);

    // An explicit setting wins over the recommendation.
    h.orchestrator
        .execute(h.submit(
            "rust traits",
            JobSettings::default().with_target_word_count(900),
        ))
        .await;
    let input: WriterInput = serde_json::from_value(agents.writer.input(1)).unwrap();
    assert_eq!(input.target_word_count, 900);
}

#[tokio::test]
async fn test_rate_limit_is_retried_with_a_step_per_attempt() {
    let mut agents = Agents::passing();
    agents.writer = FakeAgent::new(AgentType::Writer, |n, _, _| {
        if n < 2 {
            AgentOutcome::failure("Rate limited (429): slow down", Usage::new(10, 0))
        } else {
            article_ok("Rust Traits", "Traits explained.")
        }
    });
    let h = harness(&agents);
    let mut events = h.orchestrator.subscribe();
    let job = h.submit("rust traits", JobSettings::default());

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.success, "error: {:?}", result.error);
    let writer_steps = h.steps_for(&job, AgentType::Writer);
    let statuses: Vec<StepStatus> = writer_steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Failed, StepStatus::Failed, StepStatus::Completed]
    );
    assert!(writer_steps[0].error.as_deref().unwrap().contains("429"));

    // Failed attempts are not charged.
    assert_eq!(
        result.total_tokens,
        RESEARCH_TOKENS + WRITER_TOKENS + SEO_TOKENS + QA_TOKENS
    );

    let mut retries = 0;
    while let Ok(event) = events.try_recv() {
        if event.kind == EventKind::RetryScheduled {
            retries += 1;
        }
    }
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_job() {
    let mut agents = Agents::passing();
    agents.writer = FakeAgent::new(AgentType::Writer, |_, _, _| {
        AgentOutcome::failure("network error: connection reset", Usage::default())
    });
    let h = harness(&agents);
    let job = h.submit("rust traits", JobSettings::default());

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(!result.success);
    assert_eq!(agents.writer.calls(), 3);
    assert_eq!(h.steps_for(&job, AgentType::Writer).len(), 3);
    assert_eq!(agents.seo.calls(), 0);

    let stored = h.store.job(job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error.unwrap().contains("connection reset"));
    assert_eq!(stored.total_tokens_used, RESEARCH_TOKENS);
    assert_eq!(result.total_tokens, RESEARCH_TOKENS);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let mut agents = Agents::passing();
    agents.seo = FakeAgent::new(AgentType::Seo, |_, _, _| {
        AgentOutcome::failure("model refused the request", Usage::new(5, 5))
    });
    let h = harness(&agents);
    let job = h.submit("rust traits", JobSettings::default());

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(!result.success);
    assert_eq!(agents.seo.calls(), 1);
    assert_eq!(agents.qa.calls(), 0);
    assert_eq!(result.error.as_deref(), Some("seo agent failed: model refused the request"));
    assert_eq!(result.total_tokens, RESEARCH_TOKENS + WRITER_TOKENS);
}

#[tokio::test]
async fn test_invalid_input_fails_step_without_retry() {
    let mut agents = Agents::passing();
    agents.writer = FakeAgent::rejecting_input(AgentType::Writer);
    let h = harness(&agents);
    let job = h.submit("rust traits", JobSettings::default());

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(!result.success);
    assert_eq!(agents.writer.calls(), 0);
    let writer_steps = h.steps_for(&job, AgentType::Writer);
    assert_eq!(writer_steps.len(), 1);
    assert_eq!(writer_steps[0].status, StepStatus::Failed);
    assert!(result.error.unwrap().contains("Invalid input"));
}

#[tokio::test]
async fn test_cancellation_stops_at_next_checkpoint() {
    let mut agents = Agents::passing();
    let switch = CancelSwitch::default();
    let trigger = switch.clone();
    agents.writer = FakeAgent::new(AgentType::Writer, move |_, _, ctx| {
        trigger.cancel(ctx);
        article_ok("Rust Traits", "Traits explained.")
    });
    let h = harness(&agents);
    switch.arm(&h.store);
    let job = h.submit("rust traits", JobSettings::default());

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.cancelled);
    assert!(!result.success);
    assert_eq!(agents.seo.calls(), 0);
    assert!(h.steps_for(&job, AgentType::Seo).is_empty());
    assert!(h.steps_for(&job, AgentType::ProjectManager).is_empty());

    let stored = h.store.job(job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(stored.final_output.is_none());
    assert_eq!(result.iterations, stored.current_iteration);
    assert_eq!(result.total_tokens, stored.total_tokens_used);
    assert_eq!(result.total_tokens, RESEARCH_TOKENS + WRITER_TOKENS);
}

#[tokio::test]
async fn test_already_cancelled_job_does_no_work() {
    let agents = Agents::passing();
    let h = harness(&agents);
    let job = h.submit("rust traits", JobSettings::default());
    h.store.cancel_job(job.id).unwrap();

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.cancelled);
    assert!(h.store.steps(job.id).is_empty());
    assert_eq!(agents.research.calls(), 0);
}

#[tokio::test]
async fn test_cancel_during_seo_stops_before_qa() {
    let mut agents = Agents::passing();
    let switch = CancelSwitch::default();
    let trigger = switch.clone();
    agents.seo = FakeAgent::new(AgentType::Seo, move |_, _, ctx| {
        trigger.cancel(ctx);
        seo_ok()
    });
    let h = harness(&agents);
    switch.arm(&h.store);
    let job = h.submit("rust traits", JobSettings::default());

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.cancelled);
    assert_eq!(agents.qa.calls(), 0);
    assert!(h.steps_for(&job, AgentType::Qa).is_empty());
    assert!(h.steps_for(&job, AgentType::ProjectManager).is_empty());

    let stored = h.store.job(job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(stored.final_output.is_none());
    assert_eq!(
        result.total_tokens,
        RESEARCH_TOKENS + WRITER_TOKENS + SEO_TOKENS
    );
}

#[tokio::test]
async fn test_cancel_during_failed_qa_stops_before_revision() {
    let mut agents = Agents::passing();
    let switch = CancelSwitch::default();
    let trigger = switch.clone();
    agents.qa = FakeAgent::new(AgentType::Qa, move |_, _, ctx| {
        trigger.cancel(ctx);
        qa(false)
    });
    let h = harness(&agents);
    switch.arm(&h.store);
    let job = h.submit("rust traits", JobSettings::default().with_max_iterations(3));

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.cancelled);
    // The checkpoint at the top of iteration 2 stops the revision.
    assert_eq!(agents.writer.calls(), 1);
    assert_eq!(h.steps_for(&job, AgentType::Writer).len(), 1);
    assert!(h.steps_for(&job, AgentType::ProjectManager).is_empty());
    assert_eq!(result.iterations, 1);

    let stored = h.store.job(job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert_eq!(stored.current_iteration, 1);
}

#[tokio::test]
async fn test_cancel_during_last_qa_skips_assembly_and_publish() {
    let mut agents = Agents::passing();
    let switch = CancelSwitch::default();
    let trigger = switch.clone();
    agents.qa = FakeAgent::new(AgentType::Qa, move |_, _, ctx| {
        trigger.cancel(ctx);
        qa(true)
    });
    let h = harness(&agents);
    switch.arm(&h.store);
    let job = h.submit("rust traits", JobSettings::default().with_auto_post(true));

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.cancelled);
    assert!(h.steps_for(&job, AgentType::ProjectManager).is_empty());
    assert!(h.pages.drafts().is_empty());

    let stored = h.store.job(job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(stored.final_output.is_none());
}

#[tokio::test]
async fn test_cancel_during_assembly_prevents_publish() {
    let agents = Agents::passing();
    let switch = CancelSwitch::default();
    let trigger = switch.clone();
    let project_manager = FakeAgent::new(AgentType::ProjectManager, move |_, input, ctx| {
        let input: ProjectManagerInput = serde_json::from_value(input.clone()).unwrap();
        let final_article = ProjectManagerAgent::assemble(&input);
        trigger.cancel(ctx);
        AgentOutcome::success(serde_json::to_value(final_article).unwrap(), Usage::default())
    });
    let mut registry = AgentRegistry::new();
    registry.register(agents.research.clone()).unwrap();
    registry.register(agents.writer.clone()).unwrap();
    registry.register(agents.seo.clone()).unwrap();
    registry.register(agents.qa.clone()).unwrap();
    registry.register(project_manager.clone()).unwrap();
    let h = harness_with(registry, RecordingPageService::new(), Arc::new(UnusedLlm));
    switch.arm(&h.store);
    let job = h.submit("rust traits", JobSettings::default().with_auto_post(true));

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.cancelled);
    assert_eq!(project_manager.calls(), 1);
    assert!(h.pages.drafts().is_empty());

    let stored = h.store.job(job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(stored.final_output.is_none());
    assert!(stored.page_id.is_none());
}

#[tokio::test]
async fn test_cancel_is_not_overwritten_by_stage_failure() {
    let mut agents = Agents::passing();
    let switch = CancelSwitch::default();
    let trigger = switch.clone();
    agents.writer = FakeAgent::new(AgentType::Writer, move |_, _, ctx| {
        trigger.cancel(ctx);
        AgentOutcome::failure("model refused", Usage::default())
    });
    let h = harness(&agents);
    switch.arm(&h.store);
    let job = h.submit("rust traits", JobSettings::default());

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.cancelled);
    assert!(!result.success);
    let stored = h.store.job(job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(stored.error.is_none());
    assert_eq!(h.steps_for(&job, AgentType::Writer)[0].status, StepStatus::Failed);
}

#[tokio::test]
async fn test_cancel_stops_pending_retries() {
    let mut agents = Agents::passing();
    let switch = CancelSwitch::default();
    let trigger = switch.clone();
    agents.writer = FakeAgent::new(AgentType::Writer, move |_, _, ctx| {
        trigger.cancel(ctx);
        AgentOutcome::failure("Rate limited (429): slow down", Usage::default())
    });
    let h = harness(&agents);
    switch.arm(&h.store);
    let job = h.submit("rust traits", JobSettings::default());

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.cancelled);
    assert_eq!(agents.writer.calls(), 1);
    assert_eq!(h.steps_for(&job, AgentType::Writer).len(), 1);
    assert_eq!(h.store.job(job.id).unwrap().status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_completed_job_cannot_be_cancelled() {
    let agents = Agents::passing();
    let h = harness(&agents);
    let job = h.submit("rust traits", JobSettings::default());

    let result = h.orchestrator.execute(job.clone()).await;
    assert!(result.success);

    assert!(matches!(
        h.store.cancel_job(job.id),
        Err(StorageError::JobNotActive { .. })
    ));
    let stored = h.store.job(job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert!(stored.final_output.is_some());
}

#[tokio::test]
async fn test_step_start_failure_is_recorded_on_the_step() {
    let agents = Agents::passing();
    let store = Arc::new(InMemoryStore::new());
    seed_personas(&store);
    let orchestrator = PipelineOrchestrator::new(
        PipelineDeps {
            jobs: store.clone(),
            steps: Arc::new(UnstartableSteps(store.clone())),
            personas: store.clone(),
            pages: None,
            llm: Arc::new(UnusedLlm),
            registry: Arc::new(agents.registry()),
        },
        fast_config(),
    );
    let job = Job::new("rust traits", JobSettings::default());
    store.insert_job(job.clone());

    let result = orchestrator.execute(job.clone()).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("disk full"));
    assert_eq!(agents.research.calls(), 0);

    let steps = store.steps(job.id);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, StepStatus::Failed);
    assert!(steps[0].error.as_deref().unwrap().contains("disk full"));
    assert_eq!(store.job(job.id).unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_malformed_output_fails_the_step_and_is_not_charged() {
    let mut agents = Agents::passing();
    agents.writer = FakeAgent::new(AgentType::Writer, |_, _, _| {
        AgentOutcome::success(json!({"headline": "Rust Traits"}), Usage::new(120, 80))
    });
    let h = harness(&agents);
    let job = h.submit("rust traits", JobSettings::default());

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("Malformed output"));
    assert_eq!(agents.writer.calls(), 1);

    let writer_steps = h.steps_for(&job, AgentType::Writer);
    assert_eq!(writer_steps.len(), 1);
    assert_eq!(writer_steps[0].status, StepStatus::Failed);
    assert_eq!(writer_steps[0].tokens_used, 0);

    assert_eq!(result.total_tokens, RESEARCH_TOKENS);
    assert_eq!(h.store.job(job.id).unwrap().total_tokens_used, RESEARCH_TOKENS);
}

#[tokio::test]
async fn test_finished_job_is_returned_as_is() {
    let agents = Agents::passing();
    let h = harness(&agents);
    let mut job = h.submit("rust traits", JobSettings::default());
    job.status = JobStatus::Completed;
    job.total_tokens_used = 42;

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.success);
    assert_eq!(result.total_tokens, 42);
    assert!(h.store.steps(job.id).is_empty());
}

#[tokio::test]
async fn test_auto_post_publishes_ready_article() {
    let agents = Agents::passing();
    let h = harness(&agents);
    let job = h.submit(
        "rust traits",
        JobSettings::default()
            .with_auto_post(true)
            .with_parent_page("blog"),
    );

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.success);
    let drafts = h.pages.drafts();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].slug, "rust-traits");
    assert_eq!(drafts[0].parent_id.as_deref(), Some("blog"));
    assert_eq!(
        h.store.job(job.id).unwrap().page_id.as_deref(),
        Some("page-rust-traits")
    );
}

#[tokio::test]
async fn test_publish_failure_does_not_fail_the_job() {
    let agents = Agents::passing();
    let h = harness_with(
        agents.registry(),
        RecordingPageService::failing("CMS unavailable"),
        Arc::new(UnusedLlm),
    );
    let mut events = h.orchestrator.subscribe();
    let job = h.submit("rust traits", JobSettings::default().with_auto_post(true));

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.success);
    assert!(result.job.page_id.is_none());
    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert!(kinds.contains(&EventKind::PublishFailed));
    assert_eq!(kinds.last(), Some(&EventKind::Completed));
}

#[tokio::test]
async fn test_missing_persona_is_a_configuration_failure() {
    let agents = Agents::passing();
    let registry = agents.registry();
    let store = Arc::new(InMemoryStore::new());
    store.insert_persona(Persona::new("R", AgentType::Research, "m"));
    let orchestrator = PipelineOrchestrator::new(
        PipelineDeps {
            jobs: store.clone(),
            steps: store.clone(),
            personas: store.clone(),
            pages: None,
            llm: Arc::new(UnusedLlm),
            registry: Arc::new(registry),
        },
        fast_config(),
    );
    let job = Job::new("rust traits", JobSettings::default());
    store.insert_job(job.clone());

    let result = orchestrator.execute(job.clone()).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("No default persona for writer"));
    // Resolution fails before a step exists, and is not retried.
    assert_eq!(agents.writer.calls(), 0);
    let steps = store.steps(job.id);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].agent_type, AgentType::Research);
}

#[tokio::test]
async fn test_unregistered_agent_fails_the_job() {
    let agents = Agents::passing();
    let mut registry = AgentRegistry::new();
    registry.register(agents.research.clone()).unwrap();
    registry.register(agents.writer.clone()).unwrap();
    let h = harness_with(registry, RecordingPageService::new(), Arc::new(UnusedLlm));
    let job = h.submit("rust traits", JobSettings::default());

    let result = h.orchestrator.execute(job).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("No agent registered for seo"));
    assert_eq!(agents.writer.calls(), 1);
}

#[tokio::test]
async fn test_persona_override_is_used_for_its_stage() {
    let agents = Agents::passing();
    let h = harness(&agents);
    let custom = Persona::new("Senior Writer", AgentType::Writer, "anthropic/claude").non_default();
    h.store.insert_persona(custom.clone());
    let job = h.submit(
        "rust traits",
        JobSettings::default().with_persona_override(AgentType::Writer, custom.id),
    );

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.success);
    let writer_steps = h.steps_for(&job, AgentType::Writer);
    assert_eq!(writer_steps[0].persona_id, Some(custom.id));
    let seo_steps = h.steps_for(&job, AgentType::Seo);
    assert_ne!(seo_steps[0].persona_id, Some(custom.id));
}

#[tokio::test]
async fn test_seo_optimized_content_replaces_body() {
    let mut agents = Agents::passing();
    agents.seo = FakeAgent::new(AgentType::Seo, |_, _, _| {
        let mut outcome = seo_ok();
        outcome.output.as_mut().unwrap()["optimized_content"] =
            json!("Rust traits, optimized and explained in depth.");
        outcome
    });
    let h = harness(&agents);
    let job = h.submit("rust traits", JobSettings::default());

    let result = h.orchestrator.execute(job).await;

    let final_article = result.job.final_output.unwrap();
    assert_eq!(final_article.content, "Rust traits, optimized and explained in depth.");
    assert_eq!(final_article.word_count, 7);
}

#[tokio::test]
async fn test_skipping_qa_runs_the_loop_once() {
    let agents = Agents::passing();
    let h = harness(&agents);
    let job = h.submit(
        "rust traits",
        JobSettings::default()
            .with_skip(AgentType::Qa)
            .with_max_iterations(3),
    );

    let result = h.orchestrator.execute(job).await;

    assert!(result.success);
    assert_eq!(result.iterations, 1);
    assert_eq!(agents.writer.calls(), 1);
    assert_eq!(agents.qa.calls(), 0);
    assert_eq!(result.job.final_output.unwrap().qa_passed, None);
}

#[tokio::test]
async fn test_skipping_writer_yields_not_ready_article() {
    let agents = Agents::passing();
    let h = harness(&agents);
    let job = h.submit(
        "rust traits",
        JobSettings::default().with_skip(AgentType::Writer),
    );

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.success);
    assert_eq!(agents.seo.calls(), 0);
    assert_eq!(agents.qa.calls(), 0);
    assert!(h.steps_for(&job, AgentType::ProjectManager).is_empty());
    let final_article = result.job.final_output.unwrap();
    assert!(!final_article.ready_for_publish);
    assert_eq!(final_article.title, "rust traits");
}

#[tokio::test]
async fn test_agent_logs_reach_the_step() {
    let mut agents = Agents::passing();
    agents.research = FakeAgent::new(AgentType::Research, |_, _, ctx| {
        ctx.log(LogLevel::Info, "looked things up", Some(json!({"sources": 3})));
        research_ok(None)
    });
    let h = harness(&agents);
    let job = h.submit("rust traits", JobSettings::default());

    h.orchestrator.execute(job.clone()).await;
    h.orchestrator.flush_logs().await;

    let research_step = &h.steps_for(&job, AgentType::Research)[0];
    assert!(research_step
        .logs
        .iter()
        .any(|entry| entry.message == "looked things up"));
    assert_eq!(h.orchestrator.dropped_log_entries(), 0);
}

#[tokio::test]
async fn test_builtin_agents_end_to_end() {
    let replies = vec![
        r#"{"summary": "Traits define shared behavior", "key_points": ["bounds"], "keywords": ["rust traits"], "questions": ["What is a trait object?"], "recommended_word_count": 300}"#,
        r##"{"title": "Understanding Rust Traits", "content": "# Traits\n\nTraits define shared behavior across types. They power generics, trait objects and operator overloading in everyday Rust code."}"##,
        r#"{"meta_title": "Rust Traits Explained", "meta_description": "What traits are and how to use them", "focus_keyword": "rust traits", "keywords": ["rust traits", "generics"], "slug": "Rust Traits Explained", "score": 0.7}"#,
        r#"{"passed": true, "score": 0.88, "issues": [], "feedback": ""}"#,
    ];
    let llm = Arc::new(QueueLlm {
        replies: Mutex::new(replies.into_iter().map(String::from).collect()),
    });
    let h = harness_with(
        AgentRegistry::with_builtin_agents(),
        RecordingPageService::new(),
        llm,
    );
    let job = h.submit(
        "rust traits",
        JobSettings::default().with_target_word_count(30),
    );

    let result = h.orchestrator.execute(job.clone()).await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.total_tokens, 4 * 100);

    let final_article = result.job.final_output.unwrap();
    assert_eq!(final_article.title, "Understanding Rust Traits");
    assert_eq!(final_article.slug, "rust-traits-explained");
    assert_eq!(final_article.meta_title, "Rust Traits Explained");
    assert!(final_article.ready_for_publish);
    assert_eq!(h.steps_for(&job, AgentType::ProjectManager)[0].tokens_used, 0);
}
