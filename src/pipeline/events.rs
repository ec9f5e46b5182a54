//! Progress events broadcast to pipeline subscribers.
//!
//! Delivery is best effort: events are dropped when nobody listens, and a
//! subscriber that falls behind loses the oldest ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::agents::AgentType;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StageStarted,
    StageCompleted,
    StageFailed,
    StageSkipped,
    /// Free-form progress reported by an agent.
    AgentProgress,
    IterationStarted,
    RetryScheduled,
    Published,
    PublishFailed,
    Completed,
    Failed,
    Cancelled,
}

/// One progress notification for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub job_id: Uuid,
    pub agent_type: Option<AgentType>,
    pub kind: EventKind,
    pub message: String,
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(job_id: Uuid, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            job_id,
            agent_type: None,
            kind,
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_agent(mut self, agent_type: AgentType) -> Self {
        self.agent_type = Some(agent_type);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Fan-out of [`PipelineEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct ProgressHub {
    tx: broadcast::Sender<PipelineEvent>,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event; never blocks and never fails.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(256)
    }
}
