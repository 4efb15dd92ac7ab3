//! 4.C Task Manager: task CRUD, dependency graph, per-agent queues,
//! decomposition. Exclusively owns tasks and the dependency graph (§3).

pub mod decomposition;
pub mod graph;
pub mod queue;

pub use decomposition::DecomposedTask;
pub use graph::DependencyGraph;
pub use queue::AgentQueues;

use crate::bus::EventPublisher;
use crate::capabilities::IdGenerator;
use crate::error::{KernelError, Result};
use crate::models::{AgentId, Priority, TaskId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    Frontend,
    Backend,
    Testing,
    Documentation,
    CodeReview,
    DevOps,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Ready,
    InProgress,
    Blocked,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assigned_agent: Option<AgentId>,
    pub dependencies: Vec<TaskId>,
    pub estimated_duration: Duration,
    pub affected_paths: Vec<String>,
    pub requirements: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Computes the caller-omitted priority: sum of hints and bonuses mapped
/// to the enum by threshold (§4.C).
fn derive_priority(caller_hint: f64, dependents_count: usize, duration: Duration, file_count: usize) -> Priority {
    let mut score = caller_hint;
    score += (dependents_count as f64 * 0.5).min(2.0);
    let hours = duration.num_minutes() as f64 / 60.0;
    if hours <= 1.0 {
        score += 0.5;
    } else if hours <= 4.0 {
        score += 0.2;
    }
    if file_count > 5 {
        score += 0.3;
    }
    Priority::from_score(score)
}

struct TaskStore {
    tasks: HashMap<TaskId, Task>,
    graph: DependencyGraph,
    queues: AgentQueues,
}

pub struct TaskManager {
    store: Mutex<TaskStore>,
    id_gen: Arc<dyn IdGenerator>,
    events: Arc<dyn EventPublisher>,
}

impl TaskManager {
    pub fn new(id_gen: Arc<dyn IdGenerator>, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            store: Mutex::new(TaskStore {
                tasks: HashMap::new(),
                graph: DependencyGraph::new(),
                queues: AgentQueues::new(),
            }),
            id_gen,
            events,
        }
    }

    /// Runs the decomposition rules and materializes the resulting tasks,
    /// wiring testing tasks to depend on every sibling created in the same
    /// call (§4.C).
    pub async fn decompose(&self, requirement: &str) -> Result<Vec<Task>> {
        let decomposed = decomposition::decompose(requirement);
        let mut created = Vec::new();
        let mut non_testing_ids = Vec::new();
        let mut testing_entries = Vec::new();

        for entry in decomposed {
            let task = self
                .create(
                    &entry.title,
                    &entry.description,
                    entry.task_type,
                    None,
                    entry.estimated_duration,
                    entry.affected_paths.clone(),
                    entry.requirements.clone(),
                )
                .await?;
            if entry.depends_on_siblings {
                testing_entries.push(task.id.clone());
            } else {
                non_testing_ids.push(task.id.clone());
            }
            created.push(task);
        }

        for testing_id in &testing_entries {
            for dependency in &non_testing_ids {
                self.add_dependency(testing_id, dependency).await?;
            }
        }

        Ok(created)
    }

    pub async fn create(
        &self,
        title: &str,
        description: &str,
        task_type: TaskType,
        priority: Option<Priority>,
        estimated_duration: Duration,
        affected_paths: Vec<String>,
        requirements: Vec<String>,
    ) -> Result<Task> {
        if title.trim().is_empty() {
            return Err(KernelError::validation("task title must not be empty"));
        }
        let now = Utc::now();
        let priority = priority.unwrap_or_else(|| derive_priority(0.0, 0, estimated_duration, affected_paths.len()));

        let task = Task {
            id: self.id_gen.next_id(),
            title: title.to_string(),
            description: description.to_string(),
            task_type,
            status: TaskStatus::Pending,
            priority,
            assigned_agent: None,
            dependencies: Vec::new(),
            estimated_duration,
            affected_paths,
            requirements,
            created_at: now,
            started_at: None,
            completed_at: None,
        };

        {
            let mut store = self.store.lock().await;
            store.graph.register(&task.id);
            store.tasks.insert(task.id.clone(), task.clone());
        }

        let mut payload = HashMap::new();
        payload.insert("task_id".to_string(), serde_json::Value::String(task.id.clone()));
        payload.insert("title".to_string(), serde_json::Value::String(task.title.clone()));
        self.events.emit(crate::events::TASK_CREATED, payload, None).await;

        Ok(task)
    }

    pub async fn add_dependency(&self, task: &TaskId, dependency: &TaskId) -> Result<()> {
        let mut store = self.store.lock().await;
        if !store.tasks.contains_key(task) {
            return Err(KernelError::not_found(format!("task {task} not found")));
        }
        if !store.tasks.contains_key(dependency) {
            return Err(KernelError::not_found(format!("task {dependency} not found")));
        }
        store.graph.add_dependency(task, dependency).map_err(KernelError::validation)?;
        if let Some(t) = store.tasks.get_mut(task) {
            if !t.dependencies.contains(dependency) {
                t.dependencies.push(dependency.clone());
            }
        }
        self.recompute_blocked_status(&mut store, task);
        Ok(())
    }

    pub async fn remove_dependency(&self, task: &TaskId, dependency: &TaskId) -> Result<()> {
        let mut store = self.store.lock().await;
        store.graph.remove_dependency(task, dependency);
        if let Some(t) = store.tasks.get_mut(task) {
            t.dependencies.retain(|d| d != dependency);
        }
        self.recompute_blocked_status(&mut store, task);
        Ok(())
    }

    fn all_deps_completed(store: &TaskStore, task_id: &TaskId) -> bool {
        store
            .tasks
            .get(task_id)
            .map(|t| {
                t.dependencies
                    .iter()
                    .all(|dep| store.tasks.get(dep).map(|d| d.status == TaskStatus::Completed).unwrap_or(false))
            })
            .unwrap_or(false)
    }

    fn recompute_blocked_status(&self, store: &mut TaskStore, task_id: &TaskId) {
        let deps_done = Self::all_deps_completed(store, task_id);
        if let Some(task) = store.tasks.get_mut(task_id) {
            if task.status == TaskStatus::Blocked && deps_done {
                task.status = TaskStatus::Pending;
            } else if task.status == TaskStatus::Pending && !deps_done {
                task.status = TaskStatus::Blocked;
            }
        }
    }

    pub async fn update_status(&self, task_id: &TaskId, status: TaskStatus) -> Result<Task> {
        let mut store = self.store.lock().await;
        let now = Utc::now();

        let current_status = store
            .tasks
            .get(task_id)
            .map(|t| t.status)
            .ok_or_else(|| KernelError::not_found(format!("task {task_id} not found")))?;

        validate_transition(current_status, status)?;

        {
            let task = store.tasks.get_mut(task_id).unwrap();
            task.status = status;
            if status == TaskStatus::InProgress && task.started_at.is_none() {
                task.started_at = Some(now);
            }
            if matches!(status, TaskStatus::Completed | TaskStatus::Failed) {
                task.completed_at = Some(now);
            }
        }

        if status == TaskStatus::Completed {
            let dependents = store.graph.dependents_of(task_id);
            for dependent in dependents {
                self.recompute_blocked_status(&mut store, &dependent);
            }
        }

        let task = store.tasks.get(task_id).unwrap().clone();
        drop(store);

        let event = match status {
            TaskStatus::InProgress => Some(crate::events::TASK_STARTED),
            TaskStatus::Completed => Some(crate::events::TASK_COMPLETED),
            TaskStatus::Failed => Some(crate::events::TASK_FAILED),
            _ => None,
        };
        if let Some(event) = event {
            let mut payload = HashMap::new();
            payload.insert("task_id".to_string(), serde_json::Value::String(task.id.clone()));
            self.events.emit(event, payload, task.assigned_agent.clone()).await;
        }

        Ok(task)
    }

    pub async fn update_priority(&self, task_id: &TaskId, priority: Priority) -> Result<()> {
        let mut store = self.store.lock().await;
        let (agent, created_at) = {
            let task = store
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| KernelError::not_found(format!("task {task_id} not found")))?;
            task.priority = priority;
            (task.assigned_agent.clone(), task.created_at)
        };
        if let Some(agent) = agent {
            store.queues.reprioritize(&agent, task_id, priority, created_at);
        }
        Ok(())
    }

    pub async fn assign(&self, task_id: &TaskId, agent: &AgentId) -> Result<()> {
        let mut store = self.store.lock().await;
        let (priority, created_at) = {
            let task = store
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| KernelError::not_found(format!("task {task_id} not found")))?;
            task.assigned_agent = Some(agent.clone());
            (task.priority, task.created_at)
        };
        store.queues.insert(agent, task_id.clone(), priority, created_at);

        let mut payload = HashMap::new();
        payload.insert("task_id".to_string(), serde_json::Value::String(task_id.clone()));
        payload.insert("agent_id".to_string(), serde_json::Value::String(agent.clone()));
        drop(store);
        self.events.emit(crate::events::TASK_ASSIGNED, payload, Some(agent.clone())).await;
        info!("Assigned task {} to {}", task_id, agent);
        Ok(())
    }

    pub async fn unassign(&self, task_id: &TaskId) -> Result<()> {
        let mut store = self.store.lock().await;
        let previous_agent = {
            let task = store
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| KernelError::not_found(format!("task {task_id} not found")))?;
            task.assigned_agent.take()
        };
        if let Some(agent) = previous_agent {
            store.queues.remove(&agent, task_id);
        }
        Ok(())
    }

    pub async fn get(&self, task_id: &TaskId) -> Option<Task> {
        self.store.lock().await.tasks.get(task_id).cloned()
    }

    /// §3: "available iff status=pending ∧ assigned=none ∧ all-deps-completed".
    /// Used to find unassigned candidates for the Assignment Engine.
    fn is_unassigned_available(store: &TaskStore, task_id: &TaskId) -> bool {
        store
            .tasks
            .get(task_id)
            .map(|t| t.status == TaskStatus::Pending && t.assigned_agent.is_none() && Self::all_deps_completed(store, task_id))
            .unwrap_or(false)
    }

    /// A queue entry is pullable by its owning agent once it's pending
    /// (not yet started) and its dependencies have completed — it is
    /// already assigned to this agent by definition of being in the queue.
    fn is_pullable_by(store: &TaskStore, task_id: &TaskId, agent: &AgentId) -> bool {
        store
            .tasks
            .get(task_id)
            .map(|t| {
                t.status == TaskStatus::Pending
                    && t.assigned_agent.as_ref().map(|a| a == agent).unwrap_or(true)
                    && Self::all_deps_completed(store, task_id)
            })
            .unwrap_or(false)
    }

    pub async fn next_task(&self, agent: &AgentId) -> Option<Task> {
        let store = self.store.lock().await;
        let id = store.queues.next_matching(agent, |id| Self::is_pullable_by(&store, id, agent))?;
        store.tasks.get(&id).cloned()
    }

    pub async fn available_tasks(&self, task_type: Option<TaskType>) -> Vec<Task> {
        let store = self.store.lock().await;
        store
            .tasks
            .values()
            .filter(|t| Self::is_unassigned_available(&store, &t.id))
            .filter(|t| task_type.map(|want| want == t.task_type).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub async fn statistics(&self) -> TaskStatistics {
        let store = self.store.lock().await;
        let mut stats = TaskStatistics { total: 0, pending: 0, in_progress: 0, blocked: 0, completed: 0, failed: 0, cancelled: 0 };
        for task in store.tasks.values() {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending | TaskStatus::Ready => stats.pending += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Blocked => stats.blocked += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    pub async fn all_tasks(&self) -> Vec<Task> {
        self.store.lock().await.tasks.values().cloned().collect()
    }
}

fn validate_transition(from: TaskStatus, to: TaskStatus) -> Result<()> {
    use TaskStatus::*;
    let allowed = matches!(
        (from, to),
        (Pending, InProgress)
            | (Pending, Blocked)
            | (Pending, Cancelled)
            | (Blocked, Pending)
            | (Blocked, Cancelled)
            | (InProgress, Completed)
            | (InProgress, Failed)
            | (InProgress, Cancelled)
            | (Failed, Pending)
    );
    if allowed || from == to {
        Ok(())
    } else {
        Err(KernelError::validation(format!("invalid task transition {from:?} -> {to:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::UuidGenerator;
    use async_trait::async_trait;

    struct NullPublisher;
    #[async_trait]
    impl EventPublisher for NullPublisher {
        async fn emit(&self, _event_type: &str, _payload: HashMap<String, serde_json::Value>, _source: Option<AgentId>) {}
    }

    fn manager() -> TaskManager {
        TaskManager::new(Arc::new(UuidGenerator), Arc::new(NullPublisher))
    }

    #[tokio::test]
    async fn blocked_task_moves_to_pending_when_dependency_completes() {
        let manager = manager();
        let a = manager.create("a", "", TaskType::Backend, None, Duration::hours(1), vec![], vec![]).await.unwrap();
        let b = manager.create("b", "", TaskType::Testing, None, Duration::hours(1), vec![], vec![]).await.unwrap();
        manager.add_dependency(&b.id, &a.id).await.unwrap();

        let refreshed = manager.get(&b.id).await.unwrap();
        assert_eq!(refreshed.status, TaskStatus::Blocked);

        manager.update_status(&a.id, TaskStatus::InProgress).await.unwrap();
        manager.update_status(&a.id, TaskStatus::Completed).await.unwrap();

        let refreshed = manager.get(&b.id).await.unwrap();
        assert_eq!(refreshed.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn decompose_wires_testing_to_depend_on_siblings() {
        let manager = manager();
        let tasks = manager.decompose("build a frontend component with tests").await.unwrap();
        let testing = tasks.iter().find(|t| t.task_type == TaskType::Testing).unwrap();
        let refreshed = manager.get(&testing.id).await.unwrap();
        assert!(!refreshed.dependencies.is_empty());
        assert_eq!(refreshed.status, TaskStatus::Blocked);
    }

    #[tokio::test]
    async fn next_task_returns_highest_priority_pending_task() {
        let manager = manager();
        let low = manager.create("low", "", TaskType::General, Some(Priority::Low), Duration::hours(1), vec![], vec![]).await.unwrap();
        let high = manager.create("high", "", TaskType::General, Some(Priority::High), Duration::hours(1), vec![], vec![]).await.unwrap();
        manager.assign(&low.id, &"a1".to_string()).await.unwrap();
        manager.assign(&high.id, &"a1".to_string()).await.unwrap();

        let next = manager.next_task(&"a1".to_string()).await.unwrap();
        assert_eq!(next.id, high.id);
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let manager = manager();
        let task = manager.create("t", "", TaskType::General, None, Duration::hours(1), vec![], vec![]).await.unwrap();
        let result = manager.update_status(&task.id, TaskStatus::Completed).await;
        assert!(result.is_err());
    }
}
