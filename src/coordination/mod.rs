//! 4.G Coordination Manager: owns the agent registry, collaboration
//! sessions, and collaboration rules, and wires the Message Bus, File
//! Manager, Task Manager, Assignment Engine, Health Monitor, Workflow
//! Orchestrator, and Realtime Sync into one runtime. It is the only
//! component with visibility across A/B/C/G (§3 ownership), which is why
//! the narrow `AgentDirectory` and `SnapshotSource` seams the other
//! components depend on are implemented here.

pub mod agents;
pub mod rules;
pub mod sessions;

pub use agents::{Agent, AgentRegistry, AgentStatus};
pub use rules::{Decision, Effect, Rule, RulesEngine};
pub use sessions::{CollaborationSession, SessionStatus, SessionStore};

use crate::assignment::{AgentInfo, AssignmentEngine, ReassignReason, TaskSnapshot};
use crate::bus::{EventPublisher, MessageBus};
use crate::capabilities::{AgentFactory, AgentSpec, AgentWorker, Clock, FileStore, IdGenerator, WorkerStatus};
use crate::config::Config;
use crate::error::{KernelError, Result};
use crate::events;
use crate::files::FileManager;
use crate::health::HealthMonitor;
use crate::models::{AgentId, AgentType, SessionId};
use crate::sync::{RealtimeSync, SnapshotSource};
use crate::tasks::{TaskManager, TaskType};
use crate::workflow::{AgentDirectory, WorkflowOrchestrator};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

fn agent_type_for_task_type(task_type: TaskType) -> Option<AgentType> {
    match task_type {
        TaskType::Frontend => Some(AgentType::Frontend),
        TaskType::Backend => Some(AgentType::Backend),
        TaskType::Testing => Some(AgentType::Testing),
        TaskType::Documentation => Some(AgentType::Documentation),
        TaskType::CodeReview => Some(AgentType::CodeReview),
        TaskType::DevOps => Some(AgentType::DevOps),
        TaskType::General => None,
    }
}

fn task_type_key(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Frontend => "frontend",
        TaskType::Backend => "backend",
        TaskType::Testing => "testing",
        TaskType::Documentation => "documentation",
        TaskType::CodeReview => "code_review",
        TaskType::DevOps => "devops",
        TaskType::General => "general",
    }
}

#[derive(Debug, Clone)]
pub struct CoordinationStatistics {
    pub total_agents: usize,
    pub active_sessions: usize,
    pub tasks: crate::tasks::TaskStatistics,
    pub assignments: crate::assignment::AssignmentStatistics,
    pub health: crate::health::HealthStatistics,
}

pub struct CoordinationManager {
    config: Config,
    registry: Mutex<AgentRegistry>,
    sessions: Mutex<SessionStore>,
    rules: Mutex<RulesEngine>,
    workers: Mutex<HashMap<AgentId, Arc<dyn AgentWorker>>>,
    factory: Arc<dyn AgentFactory>,
    id_gen: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
    reassignment_handle: Mutex<Option<JoinHandle<()>>>,
    pub bus: Arc<MessageBus>,
    pub files: Arc<FileManager>,
    pub tasks: Arc<TaskManager>,
    pub assignment: Arc<AssignmentEngine>,
    pub health: Arc<HealthMonitor>,
    pub workflow: Arc<WorkflowOrchestrator>,
    pub sync: Arc<RealtimeSync>,
}

impl CoordinationManager {
    pub fn new(
        config: Config,
        factory: Arc<dyn AgentFactory>,
        id_gen: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        file_store: Arc<dyn FileStore>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<CoordinationManager>| {
            let bus = Arc::new(MessageBus::new(config.bus.clone(), config.fleet.agent_timeout, id_gen.clone()));
            let files = FileManager::new(file_store, id_gen.clone(), bus.clone(), config.files.max_locks_per_agent, config.files.lock_timeout);
            let tasks = Arc::new(TaskManager::new(id_gen.clone(), bus.clone()));
            let assignment = Arc::new(AssignmentEngine::new(config.assignment.clone(), id_gen.clone(), bus.clone()));
            let health = HealthMonitor::new(config.health.clone(), id_gen.clone(), clock.clone(), bus.clone());

            let directory: Arc<dyn AgentDirectory> = Arc::new(WeakDirectory(weak.clone()));
            let workflow = WorkflowOrchestrator::new(directory, tasks.clone(), assignment.clone(), bus.clone(), bus.clone(), id_gen.clone());

            let snapshot: Arc<dyn SnapshotSource> = Arc::new(WeakSnapshot(weak.clone()));
            let sync = RealtimeSync::new(bus.clone(), bus.clone(), snapshot, bus.clone(), clock.clone(), config.sync.clone());

            Self {
                config,
                registry: Mutex::new(AgentRegistry::new()),
                sessions: Mutex::new(SessionStore::new()),
                rules: Mutex::new(RulesEngine::new()),
                workers: Mutex::new(HashMap::new()),
                factory,
                id_gen,
                clock,
                events: bus.clone(),
                reassignment_handle: Mutex::new(None),
                bus,
                files,
                tasks,
                assignment,
                health,
                workflow,
                sync,
            }
        })
    }

    /// Starts every background worker: the bus sweeper, file lock expirer,
    /// health prober, sync drainer, and the reassignment checker loop
    /// this component hosts on the Assignment Engine's behalf (§5: each
    /// long-running loop is an independent logical worker).
    pub async fn start(self: &Arc<Self>) {
        self.bus.start().await;
        self.files.start(self.config.bus.sweep_interval).await;
        self.health.start().await;
        self.sync.start().await;
        self.start_reassignment_loop().await;
        self.events.emit(events::SYSTEM_STARTUP, HashMap::new(), None).await;
        info!("Coordination manager started");
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.reassignment_handle.lock().await.take() {
            handle.abort();
        }
        self.sync.shutdown().await;
        self.health.shutdown().await;
        self.files.shutdown().await;
        self.bus.shutdown().await;
        self.events.emit(events::SYSTEM_SHUTDOWN, HashMap::new(), None).await;
        info!("Coordination manager shut down");
    }

    async fn start_reassignment_loop(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let interval = self.config.fleet.agent_heartbeat_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.run_reassignment_check().await;
            }
        });
        *self.reassignment_handle.lock().await = Some(handle);
    }

    async fn run_reassignment_check(&self) {
        let heartbeat = chrono::Duration::from_std(self.config.fleet.agent_heartbeat_interval).unwrap_or(chrono::Duration::seconds(30));
        let flagged = self
            .assignment
            .check_for_reassignment(heartbeat, crate::constants::REASSIGNMENT_TIMEOUT_RATIO, crate::constants::REASSIGNMENT_HEARTBEAT_MULTIPLIER)
            .await;

        for (task_id, current_agent, reason) in flagged {
            self.reassign_task_away_from(&task_id, &current_agent, reason).await;
        }
    }

    /// Finds a new agent for `task_id`, excluding `current_agent`, and
    /// moves the task's assignment over if one is found. Shared by the
    /// periodic timeout/liveness sweep and `destroy_agent`'s immediate
    /// cascade.
    async fn reassign_task_away_from(&self, task_id: &crate::models::TaskId, current_agent: &AgentId, reason: ReassignReason) {
        let Some(task) = self.tasks.get(task_id).await else { return };
        let Some(agent_type) = agent_type_for_task_type(task.task_type) else { return };

        let candidates: Vec<AgentId> = {
            let registry = self.registry.lock().await;
            registry.of_type(agent_type).iter().map(|a| a.id.clone()).collect()
        };

        let snapshot = TaskSnapshot {
            task_id: &task.id,
            task_type_key: task_type_key(task.task_type),
            priority: task.priority,
            estimated_hours: task.estimated_duration.num_minutes() as f64 / 60.0,
            requirements: &task.requirements,
        };

        let result = self.assignment.reassign(&snapshot, current_agent, &candidates, task.estimated_duration).await;
        match result.agent.filter(|_| result.success) {
            Some(new_agent) => {
                let _ = self.tasks.unassign(&task.id).await;
                if self.tasks.assign(&task.id, &new_agent).await.is_ok() {
                    warn!("reassigned task {} from {} to {} ({:?})", task.id, current_agent, new_agent, reason);
                }
            }
            None => {
                warn!("no suitable agent to reassign task {} away from {} ({:?})", task.id, current_agent, reason);
            }
        }
    }

    /// Instantiates an agent through the agent factory, registers it with
    /// every component that needs to know about it, and returns its id
    /// (§4.G: `create(config)`).
    pub async fn create_agent(&self, spec: AgentSpec) -> Result<AgentId> {
        {
            let registry = self.registry.lock().await;
            if registry.len() >= self.config.fleet.max_agents {
                return Err(KernelError::capacity(format!("fleet already at its cap of {} agents", self.config.fleet.max_agents)));
            }
        }

        let id = self.id_gen.next_id();
        let worker = self.factory.build(&id, &spec).await?;
        let now = self.clock.now();
        let agent = Agent::new(id.clone(), spec.name.clone(), spec.agent_type, spec.capabilities.clone(), spec.max_concurrent_tasks, now);

        self.registry.lock().await.insert(agent);
        self.workers.lock().await.insert(id.clone(), worker.clone());
        self.health.register_agent(id.clone(), worker).await;
        self.assignment
            .update_agent_info(AgentInfo {
                agent_id: id.clone(),
                agent_type: spec.agent_type,
                capabilities: spec.capabilities,
                current_tasks: 0,
                max_tasks: spec.max_concurrent_tasks,
                last_heartbeat: now,
            })
            .await;
        self.sync.register_agent(id.clone()).await;

        let mut payload = HashMap::new();
        payload.insert("agent_type".to_string(), json!(spec.agent_type));
        payload.insert("name".to_string(), json!(spec.name));
        self.events.emit(events::AGENT_CREATED, payload, Some(id.clone())).await;

        Ok(id)
    }

    /// Tears an agent down: leaves its sessions, releases its file locks,
    /// unregisters it from health monitoring, reassigns any in-flight
    /// executions to another agent, signals the worker to shut down, and
    /// removes it from every registry (§4.G: `destroy(id)`).
    pub async fn destroy_agent(&self, id: &AgentId) -> Result<()> {
        {
            let registry = self.registry.lock().await;
            if registry.get(id).is_none() {
                return Err(KernelError::not_found(format!("agent {id} not found")));
            }
        }

        let sessions = self.sessions.lock().await.sessions_for_agent(id);
        for session_id in sessions {
            self.leave_session(&session_id, id).await.ok();
        }

        self.files.release_all_for_agent(id).await;
        self.health.unregister_agent(id).await;

        if let Some(worker) = self.workers.lock().await.remove(id) {
            worker.shutdown().await;
        }

        let in_flight: Vec<crate::models::TaskId> = self
            .assignment
            .get_active_executions()
            .await
            .into_iter()
            .filter(|execution| &execution.agent_id == id)
            .map(|execution| execution.task_id)
            .collect();
        for task_id in in_flight {
            self.reassign_task_away_from(&task_id, id, ReassignReason::AgentFailure).await;
        }

        self.registry.lock().await.remove(id);
        self.assignment.remove_agent_info(id).await;
        self.sync.unregister_agent(id).await;

        self.events.emit(events::AGENT_DESTROYED, HashMap::new(), Some(id.clone())).await;
        Ok(())
    }

    pub async fn get_agent(&self, id: &AgentId) -> Option<Agent> {
        self.registry.lock().await.get(id).cloned()
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        self.registry.lock().await.all()
    }

    /// Probes every live worker and refreshes the registry's status and
    /// workload rows (§4.G: "synchronize sweeps live agents and refreshes
    /// registry rows with current status and workload").
    pub async fn synchronize(&self) {
        let snapshot: Vec<(AgentId, Arc<dyn AgentWorker>)> = {
            let workers = self.workers.lock().await;
            workers.iter().map(|(id, worker)| (id.clone(), worker.clone())).collect()
        };

        for (id, worker) in snapshot {
            let status = match worker.status().await {
                WorkerStatus::Idle => AgentStatus::Idle,
                WorkerStatus::Working => AgentStatus::Working,
                WorkerStatus::Error => AgentStatus::Error,
                WorkerStatus::Offline => AgentStatus::Offline,
            };
            let workload = worker.workload().await;
            let current = self.assignment.current_task_count(&id).await;
            let now = self.clock.now();

            let mut registry = self.registry.lock().await;
            let _ = registry.update_status(&id, status);
            let _ = registry.update_workload(&id, workload, current, now);
        }
    }

    pub async fn start_session(&self, participants: Vec<AgentId>, shared_paths: Vec<String>, channel: String) -> Result<SessionId> {
        if self.sessions.lock().await.active_count() >= self.config.coordination.max_concurrent_sessions {
            return Err(KernelError::capacity("maximum concurrent collaboration sessions reached"));
        }

        {
            let registry = self.registry.lock().await;
            for agent in &participants {
                if registry.get(agent).is_none() {
                    return Err(KernelError::not_found(format!("agent {agent} not found")));
                }
            }
        }

        let id = self.id_gen.next_id();
        let now = self.clock.now();
        let session = self.sessions.lock().await.start(id.clone(), participants, shared_paths, channel, now);

        let mut payload = HashMap::new();
        payload.insert("session_id".to_string(), json!(session.id));
        self.events.emit(events::COLLABORATION_STARTED, payload, None).await;
        Ok(id)
    }

    pub async fn join_session(&self, session_id: &SessionId, agent: AgentId) -> Result<()> {
        {
            let registry = self.registry.lock().await;
            if registry.get(&agent).is_none() {
                return Err(KernelError::not_found(format!("agent {agent} not found")));
            }
        }
        self.sessions.lock().await.join(session_id, agent.clone())?;

        let mut payload = HashMap::new();
        payload.insert("session_id".to_string(), json!(session_id));
        self.events.emit(events::COLLABORATION_JOINED, payload, Some(agent)).await;
        Ok(())
    }

    pub async fn leave_session(&self, session_id: &SessionId, agent: &AgentId) -> Result<()> {
        let now = self.clock.now();
        let ended = self.sessions.lock().await.leave(session_id, agent, now)?;

        let mut payload = HashMap::new();
        payload.insert("session_id".to_string(), json!(session_id));
        self.events.emit(events::COLLABORATION_LEFT, payload, Some(agent.clone())).await;

        if ended {
            let mut payload = HashMap::new();
            payload.insert("session_id".to_string(), json!(session_id));
            self.events.emit(events::COLLABORATION_ENDED, payload, None).await;
        }
        Ok(())
    }

    pub async fn end_session(&self, session_id: &SessionId) -> Result<()> {
        let now = self.clock.now();
        self.sessions.lock().await.end(session_id, now)?;

        let mut payload = HashMap::new();
        payload.insert("session_id".to_string(), json!(session_id));
        self.events.emit(events::COLLABORATION_ENDED, payload, None).await;
        Ok(())
    }

    pub async fn list_sessions(&self) -> Vec<CollaborationSession> {
        self.sessions.lock().await.all()
    }

    pub async fn add_rule(&self, rule: Rule) {
        self.rules.lock().await.add_rule(rule);
    }

    pub async fn validate_agent_action(&self, agent: &AgentId, action: &str, context: HashMap<String, String>) -> Decision {
        let decision = self.rules.lock().await.validate_agent_action(action, &context);

        let mut payload = HashMap::new();
        payload.insert("action".to_string(), json!(action));
        payload.insert("allowed".to_string(), json!(decision.allowed));
        if let Some(rule) = &decision.matched_rule {
            payload.insert("rule".to_string(), json!(rule));
        }
        self.events.emit(events::RULE_EVALUATED, payload, Some(agent.clone())).await;

        decision
    }

    pub async fn statistics(&self) -> CoordinationStatistics {
        CoordinationStatistics {
            total_agents: self.registry.lock().await.len(),
            active_sessions: self.sessions.lock().await.active_count(),
            tasks: self.tasks.statistics().await,
            assignments: self.assignment.statistics().await,
            health: self.health.statistics().await,
        }
    }

    async fn agents_of_type(&self, agent_type: AgentType) -> Vec<(AgentId, u32)> {
        let registry = self.registry.lock().await;
        registry.of_type(agent_type).iter().map(|a| (a.id.clone(), a.workload)).collect()
    }

    async fn agents_snapshot_json(&self) -> Vec<serde_json::Value> {
        let registry = self.registry.lock().await;
        registry.all().into_iter().map(|a| serde_json::to_value(a).unwrap_or(serde_json::Value::Null)).collect()
    }

    async fn tasks_snapshot_json(&self) -> Vec<serde_json::Value> {
        self.tasks.all_tasks().await.into_iter().map(|t| serde_json::to_value(t).unwrap_or(serde_json::Value::Null)).collect()
    }

    async fn files_snapshot_json(&self) -> Vec<serde_json::Value> {
        self.files.all_locks().await.into_iter().map(|l| serde_json::to_value(l).unwrap_or(serde_json::Value::Null)).collect()
    }

    async fn collaborations_snapshot_json(&self) -> Vec<serde_json::Value> {
        let sessions = self.sessions.lock().await;
        sessions.all().into_iter().map(|s| serde_json::to_value(s).unwrap_or(serde_json::Value::Null)).collect()
    }
}

/// Breaks the construction cycle between the Coordination Manager and the
/// Workflow Orchestrator: the orchestrator needs an `AgentDirectory` at
/// construction time, before the manager's `Arc` exists.
struct WeakDirectory(Weak<CoordinationManager>);

#[async_trait]
impl AgentDirectory for WeakDirectory {
    async fn agents_of_type(&self, agent_type: AgentType) -> Vec<(AgentId, u32)> {
        match self.0.upgrade() {
            Some(manager) => manager.agents_of_type(agent_type).await,
            None => vec![],
        }
    }
}

/// Same cycle-breaking trick for Realtime Sync's `SnapshotSource`.
struct WeakSnapshot(Weak<CoordinationManager>);

#[async_trait]
impl SnapshotSource for WeakSnapshot {
    async fn agents_snapshot(&self) -> Vec<serde_json::Value> {
        match self.0.upgrade() {
            Some(manager) => manager.agents_snapshot_json().await,
            None => vec![],
        }
    }

    async fn tasks_snapshot(&self) -> Vec<serde_json::Value> {
        match self.0.upgrade() {
            Some(manager) => manager.tasks_snapshot_json().await,
            None => vec![],
        }
    }

    async fn files_snapshot(&self) -> Vec<serde_json::Value> {
        match self.0.upgrade() {
            Some(manager) => manager.files_snapshot_json().await,
            None => vec![],
        }
    }

    async fn collaborations_snapshot(&self) -> Vec<serde_json::Value> {
        match self.0.upgrade() {
            Some(manager) => manager.collaborations_snapshot_json().await,
            None => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{SystemClock, UuidGenerator, WorkerOutcome};
    use crate::tasks::Task;
    use std::collections::HashMap as StdHashMap;

    struct StubWorker {
        id: String,
    }

    #[async_trait]
    impl AgentWorker for StubWorker {
        fn id(&self) -> &str {
            &self.id
        }
        fn name(&self) -> &str {
            "stub"
        }
        async fn status(&self) -> WorkerStatus {
            WorkerStatus::Idle
        }
        async fn workload(&self) -> u32 {
            0
        }
        async fn shutdown(&self) {}
        async fn execute(&self, _task: Task, _context: StdHashMap<String, String>) -> Result<WorkerOutcome> {
            unimplemented!()
        }
    }

    struct StubFactory;
    #[async_trait]
    impl AgentFactory for StubFactory {
        async fn build(&self, agent_id: &str, _spec: &AgentSpec) -> Result<Arc<dyn AgentWorker>> {
            Ok(Arc::new(StubWorker { id: agent_id.to_string() }))
        }
    }

    struct InMemoryStore;
    #[async_trait]
    impl FileStore for InMemoryStore {
        async fn read(&self, _path: &str) -> Result<Vec<u8>> {
            Ok(vec![])
        }
        async fn write(&self, _path: &str, _content: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn stat(&self, _path: &str) -> Result<crate::capabilities::FileStat> {
            Ok(crate::capabilities::FileStat { size: 0, exists: false })
        }
        async fn delete(&self, _path: &str) -> Result<()> {
            Ok(())
        }
    }

    fn manager() -> Arc<CoordinationManager> {
        let mut config = Config::default();
        config.fleet.max_agents = 2;
        CoordinationManager::new(config, Arc::new(StubFactory), Arc::new(UuidGenerator), Arc::new(SystemClock), Arc::new(InMemoryStore))
    }

    fn spec(agent_type: AgentType) -> AgentSpec {
        AgentSpec { name: "worker".to_string(), agent_type, capabilities: vec!["rust".to_string()], max_concurrent_tasks: 3 }
    }

    #[tokio::test]
    async fn create_then_destroy_agent_round_trips() {
        let manager = manager();
        let id = manager.create_agent(spec(AgentType::Backend)).await.unwrap();
        assert!(manager.get_agent(&id).await.is_some());

        manager.destroy_agent(&id).await.unwrap();
        assert!(manager.get_agent(&id).await.is_none());
    }

    #[tokio::test]
    async fn create_agent_respects_fleet_cap() {
        let manager = manager();
        manager.create_agent(spec(AgentType::Backend)).await.unwrap();
        manager.create_agent(spec(AgentType::Frontend)).await.unwrap();
        let result = manager.create_agent(spec(AgentType::Testing)).await;
        assert!(matches!(result, Err(KernelError::Capacity(_))));
    }

    #[tokio::test]
    async fn destroying_an_agent_reassigns_its_in_flight_task() {
        let manager = manager();
        let doomed = manager.create_agent(spec(AgentType::Backend)).await.unwrap();
        let rescuer = manager.create_agent(spec(AgentType::Backend)).await.unwrap();

        let task = manager
            .tasks
            .create("ship it", "desc", TaskType::Backend, None, chrono::Duration::hours(1), vec![], vec![])
            .await
            .unwrap();
        manager.tasks.assign(&task.id, &doomed).await.unwrap();
        manager.assignment.start_execution(&task.id, &doomed, chrono::Duration::hours(1)).await.unwrap();

        manager.destroy_agent(&doomed).await.unwrap();

        let reassigned = manager.tasks.get(&task.id).await.unwrap();
        assert_eq!(reassigned.assigned_agent, Some(rescuer));
        assert!(manager.assignment.get_active_executions().await.iter().all(|e| e.agent_id != doomed));
    }

    #[tokio::test]
    async fn destroying_an_agent_ends_its_solo_session() {
        let manager = manager();
        let id = manager.create_agent(spec(AgentType::Backend)).await.unwrap();
        let session_id = manager.start_session(vec![id.clone()], vec![], "general".to_string()).await.unwrap();

        manager.destroy_agent(&id).await.unwrap();

        let sessions = manager.list_sessions().await;
        let session = sessions.iter().find(|s| s.id == session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn agent_directory_seam_reports_registered_agents() {
        let manager = manager();
        let id = manager.create_agent(spec(AgentType::Backend)).await.unwrap();
        let candidates = manager.agents_of_type(AgentType::Backend).await;
        assert_eq!(candidates, vec![(id, 0)]);
    }

    #[tokio::test]
    async fn snapshot_source_seam_reflects_registry_state() {
        let manager = manager();
        manager.create_agent(spec(AgentType::Backend)).await.unwrap();
        let agents = manager.agents_snapshot_json().await;
        assert_eq!(agents.len(), 1);
    }
}
