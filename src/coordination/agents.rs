//! Agent registry (§3 Agent record, §4.G lifecycle). The Coordination
//! Manager is the exclusive owner of this map; every other component
//! addresses agents by id only.

use crate::error::{KernelError, Result};
use crate::models::{AgentId, AgentType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    Idle,
    Working,
    Error,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub capabilities: Vec<String>,
    /// 0-100, unifies the separate "workload" and "current/max concurrent
    /// tasks" fields the distilled model listed side by side.
    pub workload: u32,
    pub max_concurrent_tasks: u32,
    pub current_concurrent_tasks: u32,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub current_task: Option<String>,
}

impl Agent {
    pub fn new(id: AgentId, name: String, agent_type: AgentType, capabilities: Vec<String>, max_concurrent_tasks: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            agent_type,
            status: AgentStatus::Idle,
            capabilities,
            workload: 0,
            max_concurrent_tasks,
            current_concurrent_tasks: 0,
            created_at: now,
            last_active_at: now,
            current_task: None,
        }
    }

    /// §3 invariant: `current <= max`, and an offline agent always reads
    /// zero regardless of what it was doing a moment ago.
    fn set_status(&mut self, status: AgentStatus) {
        self.status = status;
        if status == AgentStatus::Offline {
            self.current_concurrent_tasks = 0;
            self.workload = 0;
        }
    }
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentId, Agent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, agent: Agent) {
        self.agents.insert(agent.id.clone(), agent);
    }

    pub fn remove(&mut self, id: &AgentId) -> Option<Agent> {
        self.agents.remove(id)
    }

    pub fn get(&self, id: &AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn all(&self) -> Vec<Agent> {
        self.agents.values().cloned().collect()
    }

    pub fn of_type(&self, agent_type: AgentType) -> Vec<&Agent> {
        self.agents.values().filter(|a| a.agent_type == agent_type).collect()
    }

    pub fn update_status(&mut self, id: &AgentId, status: AgentStatus) -> Result<()> {
        let agent = self.agents.get_mut(id).ok_or_else(|| KernelError::not_found(format!("agent {id} not found")))?;
        agent.set_status(status);
        Ok(())
    }

    pub fn update_workload(&mut self, id: &AgentId, workload: u32, current_concurrent_tasks: u32, now: DateTime<Utc>) -> Result<()> {
        let agent = self.agents.get_mut(id).ok_or_else(|| KernelError::not_found(format!("agent {id} not found")))?;
        agent.workload = workload.min(100);
        agent.current_concurrent_tasks = current_concurrent_tasks.min(agent.max_concurrent_tasks);
        agent.last_active_at = now;
        Ok(())
    }

    pub fn set_current_task(&mut self, id: &AgentId, task: Option<String>) -> Result<()> {
        let agent = self.agents.get_mut(id).ok_or_else(|| KernelError::not_found(format!("agent {id} not found")))?;
        agent.current_task = task;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str) -> Agent {
        Agent::new(id.to_string(), "alice".to_string(), AgentType::Backend, vec!["rust".to_string()], 3, Utc::now())
    }

    #[test]
    fn offline_transition_zeroes_workload_and_concurrency() {
        let mut registry = AgentRegistry::new();
        registry.insert(agent("a1"));
        registry.update_workload(&"a1".to_string(), 80, 2, Utc::now()).unwrap();
        registry.update_status(&"a1".to_string(), AgentStatus::Offline).unwrap();

        let agent = registry.get(&"a1".to_string()).unwrap();
        assert_eq!(agent.workload, 0);
        assert_eq!(agent.current_concurrent_tasks, 0);
        assert_eq!(agent.status, AgentStatus::Offline);
    }

    #[test]
    fn current_concurrent_tasks_is_capped_at_max() {
        let mut registry = AgentRegistry::new();
        registry.insert(agent("a1"));
        registry.update_workload(&"a1".to_string(), 50, 9, Utc::now()).unwrap();
        assert_eq!(registry.get(&"a1".to_string()).unwrap().current_concurrent_tasks, 3);
    }

    #[test]
    fn unknown_agent_returns_not_found() {
        let mut registry = AgentRegistry::new();
        assert!(matches!(registry.update_status(&"ghost".to_string(), AgentStatus::Idle), Err(KernelError::NotFound(_))));
    }
}
