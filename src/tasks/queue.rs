//! Per-agent priority-ordered insertion queues (§4.C).

use crate::models::{AgentId, Priority, TaskId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct QueueEntry {
    task_id: TaskId,
    priority: Priority,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct AgentQueues {
    queues: HashMap<AgentId, Vec<QueueEntry>>,
}

impl AgentQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks until the first element with strictly lower priority; ties
    /// are resolved by creation order because walking only past entries
    /// with priority >= the new one preserves FIFO among equals.
    pub fn insert(&mut self, agent: &AgentId, task_id: TaskId, priority: Priority, created_at: DateTime<Utc>) {
        let entries = self.queues.entry(agent.clone()).or_default();
        let position = entries.iter().position(|e| e.priority < priority).unwrap_or(entries.len());
        entries.insert(position, QueueEntry { task_id, priority, created_at });
    }

    pub fn remove(&mut self, agent: &AgentId, task_id: &TaskId) {
        if let Some(entries) = self.queues.get_mut(agent) {
            entries.retain(|e| &e.task_id != task_id);
        }
    }

    /// Removes and reinserts at the position dictated by the new priority.
    pub fn reprioritize(&mut self, agent: &AgentId, task_id: &TaskId, new_priority: Priority, created_at: DateTime<Utc>) {
        self.remove(agent, task_id);
        self.insert(agent, task_id.clone(), new_priority, created_at);
    }

    pub fn remove_from_all(&mut self, task_id: &TaskId) {
        for entries in self.queues.values_mut() {
            entries.retain(|e| &e.task_id != task_id);
        }
    }

    /// Returns the highest-priority task in `agent`'s queue that satisfies
    /// `is_available`.
    pub fn next_matching(&self, agent: &AgentId, is_available: impl Fn(&TaskId) -> bool) -> Option<TaskId> {
        self.queues
            .get(agent)
            .and_then(|entries| entries.iter().find(|e| is_available(&e.task_id)))
            .map(|e| e.task_id.clone())
    }

    pub fn ids_for(&self, agent: &AgentId) -> Vec<TaskId> {
        self.queues.get(agent).map(|e| e.iter().map(|x| x.task_id.clone()).collect()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn higher_priority_jumps_ahead_of_lower() {
        let mut queues = AgentQueues::new();
        let now = Utc::now();
        queues.insert(&"a1".to_string(), "low".to_string(), Priority::Low, now);
        queues.insert(&"a1".to_string(), "high".to_string(), Priority::High, now + Duration::seconds(1));
        assert_eq!(queues.ids_for(&"a1".to_string()), vec!["high".to_string(), "low".to_string()]);
    }

    #[test]
    fn ties_preserve_fifo_order() {
        let mut queues = AgentQueues::new();
        let now = Utc::now();
        queues.insert(&"a1".to_string(), "first".to_string(), Priority::Medium, now);
        queues.insert(&"a1".to_string(), "second".to_string(), Priority::Medium, now + Duration::seconds(1));
        assert_eq!(queues.ids_for(&"a1".to_string()), vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn reprioritize_moves_entry() {
        let mut queues = AgentQueues::new();
        let now = Utc::now();
        queues.insert(&"a1".to_string(), "t1".to_string(), Priority::Low, now);
        queues.insert(&"a1".to_string(), "t2".to_string(), Priority::Medium, now);
        queues.reprioritize(&"a1".to_string(), &"t1".to_string(), Priority::Critical, now);
        assert_eq!(queues.ids_for(&"a1".to_string()), vec!["t1".to_string(), "t2".to_string()]);
    }

    #[test]
    fn next_matching_skips_unavailable() {
        let mut queues = AgentQueues::new();
        let now = Utc::now();
        queues.insert(&"a1".to_string(), "blocked".to_string(), Priority::High, now);
        queues.insert(&"a1".to_string(), "ready".to_string(), Priority::Low, now);
        let next = queues.next_matching(&"a1".to_string(), |id| id == "ready");
        assert_eq!(next, Some("ready".to_string()));
    }
}
