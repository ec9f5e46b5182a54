//! Lookup table from [`AgentType`] to agent implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::RegistryError;
use super::types::AgentType;
use super::{Agent, ProjectManagerAgent, QaAgent, ResearchAgent, SeoAgent, WriterAgent};

/// Agents available to the orchestrator, keyed by stage.
///
/// Built once at startup and shared by reference; there is no
/// unregistration.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentType, Arc<dyn Agent>>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agent_types", &self.agent_types())
            .finish()
    }
}

impl AgentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the five built-in agents.
    pub fn with_builtin_agents() -> Self {
        let agents: [Arc<dyn Agent>; 5] = [
            Arc::new(ResearchAgent::new()),
            Arc::new(WriterAgent::new()),
            Arc::new(SeoAgent::new()),
            Arc::new(QaAgent::new()),
            Arc::new(ProjectManagerAgent::new()),
        ];

        let mut registry = Self::new();
        for agent in agents {
            registry.agents.insert(agent.agent_type(), agent);
        }
        registry
    }

    /// Adds `agent` under its own type.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Duplicate` if that type is already taken.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<(), RegistryError> {
        let agent_type = agent.agent_type();
        if self.agents.contains_key(&agent_type) {
            return Err(RegistryError::Duplicate(agent_type));
        }
        self.agents.insert(agent_type, agent);
        Ok(())
    }

    pub fn get(&self, agent_type: AgentType) -> Option<Arc<dyn Agent>> {
        self.agents.get(&agent_type).cloned()
    }

    /// Registered types in pipeline order.
    pub fn agent_types(&self) -> Vec<AgentType> {
        self.agents.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
