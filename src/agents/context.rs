//! Per-attempt execution context handed to agents.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use super::types::AgentType;
use crate::error::LlmError;
use crate::llm::{JsonRequest, JsonResponse, LlmProvider};
use crate::pipeline::events::{EventKind, PipelineEvent, ProgressHub};
use crate::pipeline::log_sink::LogSink;
use crate::storage::{LogLevel, Persona, StepLogEntry};

/// Everything an agent may touch while running one step.
#[derive(Clone)]
pub struct AgentContext {
    pub job_id: Uuid,
    pub step_id: Uuid,
    pub iteration: u32,
    pub agent_type: AgentType,
    pub persona: Persona,
    llm: Arc<dyn LlmProvider>,
    logs: LogSink,
    progress: ProgressHub,
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("job_id", &self.job_id)
            .field("step_id", &self.step_id)
            .field("iteration", &self.iteration)
            .field("agent_type", &self.agent_type)
            .field("persona", &self.persona.name)
            .finish_non_exhaustive()
    }
}

impl AgentContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: Uuid,
        step_id: Uuid,
        iteration: u32,
        agent_type: AgentType,
        persona: Persona,
        llm: Arc<dyn LlmProvider>,
        logs: LogSink,
        progress: ProgressHub,
    ) -> Self {
        Self {
            job_id,
            step_id,
            iteration,
            agent_type,
            persona,
            llm,
            logs,
            progress,
        }
    }

    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    /// Appends to the step's log and mirrors the entry to `tracing`.
    ///
    /// Returns immediately; persistence happens in the background.
    pub fn log(&self, level: LogLevel, message: impl Into<String>, data: Option<Value>) {
        let message = message.into();
        match level {
            LogLevel::Debug => {
                tracing::debug!(
                    job_id = %self.job_id,
                    step_id = %self.step_id,
                    agent = %self.agent_type,
                    "{}",
                    message
                )
            }
            LogLevel::Info => {
                tracing::info!(
                    job_id = %self.job_id,
                    step_id = %self.step_id,
                    agent = %self.agent_type,
                    "{}",
                    message
                )
            }
            LogLevel::Warn => {
                tracing::warn!(
                    job_id = %self.job_id,
                    step_id = %self.step_id,
                    agent = %self.agent_type,
                    "{}",
                    message
                )
            }
            LogLevel::Error => {
                tracing::error!(
                    job_id = %self.job_id,
                    step_id = %self.step_id,
                    agent = %self.agent_type,
                    "{}",
                    message
                )
            }
        }
        self.logs.append(self.step_id, StepLogEntry::new(level, message, data));
    }

    /// Forwards a progress note to pipeline subscribers. Not persisted.
    pub fn on_progress(&self, message: impl Into<String>, data: Option<Value>) {
        let mut event = PipelineEvent::new(self.job_id, EventKind::AgentProgress, message)
            .with_agent(self.agent_type);
        event.data = data;
        self.progress.emit(event);
    }

    /// Requests structured output using the persona's model settings.
    pub async fn generate_json(
        &self,
        prompt: impl Into<String>,
        schema: Value,
    ) -> Result<JsonResponse, LlmError> {
        let request = JsonRequest {
            prompt: prompt.into(),
            system_prompt: self.persona.system_prompt.clone(),
            model: self.persona.model.clone(),
            schema,
            temperature: self.persona.temperature,
            max_tokens: self.persona.max_tokens,
        };
        self.llm.generate_json(request).await
    }
}
