//! 4.F Workflow Orchestrator: ordered step lists with dependency gating,
//! retries, and a small execution state machine. Owns workflow executions
//! exclusively; agent selection and task dispatch happen through narrow
//! seams (`AgentDirectory`, `TaskManager`, `AssignmentEngine`) rather than
//! by reaching into the Coordination Manager's registry (§3).

pub mod state;
pub mod step;

pub use state::ExecutionStatus;
pub use step::{Step, StepAction, StepParams, StepStatus, SystemAction};

use crate::assignment::AssignmentEngine;
use crate::bus::{EventHandler, EventPublisher, EventSubscriber};
use crate::capabilities::IdGenerator;
use crate::error::{KernelError, Result};
use crate::events;
use crate::models::{AgentId, AgentType, WorkflowId};
use crate::tasks::{TaskManager, TaskStatus, TaskType};
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

/// Narrow read seam into the Coordination Manager's agent registry: "give
/// me the agents of this type and their current workload" is all a
/// workflow step needs to pick an executor.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn agents_of_type(&self, agent_type: AgentType) -> Vec<(AgentId, u32)>;
}

fn task_type_for(agent_type: AgentType) -> TaskType {
    match agent_type {
        AgentType::Frontend => TaskType::Frontend,
        AgentType::Backend => TaskType::Backend,
        AgentType::Testing => TaskType::Testing,
        AgentType::Documentation => TaskType::Documentation,
        AgentType::CodeReview => TaskType::CodeReview,
        AgentType::DevOps => TaskType::DevOps,
    }
}

fn task_type_key(agent_type: AgentType) -> &'static str {
    match agent_type {
        AgentType::Frontend => "frontend",
        AgentType::Backend => "backend",
        AgentType::Testing => "testing",
        AgentType::Documentation => "documentation",
        AgentType::CodeReview => "code_review",
        AgentType::DevOps => "devops",
    }
}

struct WorkflowExecution {
    steps: Vec<Step>,
    status: ExecutionStatus,
    current_index: usize,
}

struct TaskWaiter {
    target_task_id: String,
    sender: Mutex<Option<oneshot::Sender<bool>>>,
}

#[async_trait]
impl EventHandler for TaskWaiter {
    async fn handle(&self, event: &crate::bus::Event) -> anyhow::Result<()> {
        let matches = event.payload.get("task_id").and_then(|v| v.as_str()) == Some(self.target_task_id.as_str());
        if !matches {
            return Ok(());
        }
        let success = event.event_type == events::TASK_COMPLETED;
        if let Some(sender) = self.sender.lock().await.take() {
            let _ = sender.send(success);
        }
        Ok(())
    }
}

pub struct WorkflowOrchestrator {
    executions: Mutex<HashMap<WorkflowId, WorkflowExecution>>,
    handles: Mutex<HashMap<WorkflowId, JoinHandle<()>>>,
    directory: Arc<dyn AgentDirectory>,
    tasks: Arc<TaskManager>,
    assignment: Arc<AssignmentEngine>,
    subscriber: Arc<dyn EventSubscriber>,
    events: Arc<dyn EventPublisher>,
    id_gen: Arc<dyn IdGenerator>,
}

/// How long the execution loop waits between re-checking a step's
/// dependencies — a deliberately short cooperative-wait interval, not a
/// configured value, since it only governs internal polling granularity.
const DEPENDENCY_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

impl WorkflowOrchestrator {
    pub fn new(
        directory: Arc<dyn AgentDirectory>,
        tasks: Arc<TaskManager>,
        assignment: Arc<AssignmentEngine>,
        subscriber: Arc<dyn EventSubscriber>,
        events: Arc<dyn EventPublisher>,
        id_gen: Arc<dyn IdGenerator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            executions: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            directory,
            tasks,
            assignment,
            subscriber,
            events,
            id_gen,
        })
    }

    /// Validates and registers a step list, returning the new workflow id.
    pub async fn register(&self, steps: Vec<Step>) -> Result<WorkflowId> {
        let ids: Vec<String> = steps.iter().map(|s| s.id.clone()).collect();
        let depends_on: HashMap<String, Vec<String>> = steps.iter().map(|s| (s.id.clone(), s.depends_on.clone())).collect();
        state::validate_step_ids(&ids, &depends_on)?;

        let workflow_id = self.id_gen.next_id();
        let execution = WorkflowExecution { steps, status: ExecutionStatus::Pending, current_index: 0 };
        self.executions.lock().await.insert(workflow_id.clone(), execution);
        Ok(workflow_id)
    }

    pub async fn status(&self, workflow_id: &WorkflowId) -> Option<ExecutionStatus> {
        self.executions.lock().await.get(workflow_id).map(|e| e.status)
    }

    async fn transition(&self, workflow_id: &WorkflowId, to: ExecutionStatus) -> Result<()> {
        let mut executions = self.executions.lock().await;
        let execution = executions.get_mut(workflow_id).ok_or_else(|| KernelError::not_found(format!("workflow {workflow_id} not found")))?;
        state::validate_transition(execution.status, to)?;
        execution.status = to;
        Ok(())
    }

    pub async fn start(self: &Arc<Self>, workflow_id: &WorkflowId) -> Result<()> {
        self.transition(workflow_id, ExecutionStatus::Running).await?;

        let mut payload = HashMap::new();
        payload.insert("workflow_id".to_string(), json!(workflow_id));
        self.events.emit(events::WORKFLOW_STARTED, payload, None).await;

        let orchestrator = Arc::clone(self);
        let id = workflow_id.clone();
        let handle = tokio::spawn(async move { orchestrator.run(id).await });
        self.handles.lock().await.insert(workflow_id.clone(), handle);
        Ok(())
    }

    pub async fn pause(&self, workflow_id: &WorkflowId) -> Result<()> {
        self.transition(workflow_id, ExecutionStatus::Paused).await
    }

    pub async fn resume(&self, workflow_id: &WorkflowId) -> Result<()> {
        self.transition(workflow_id, ExecutionStatus::Running).await
    }

    pub async fn cancel(&self, workflow_id: &WorkflowId) -> Result<()> {
        self.transition(workflow_id, ExecutionStatus::Cancelled).await?;
        if let Some(handle) = self.handles.lock().await.remove(workflow_id) {
            handle.abort();
        }
        Ok(())
    }

    async fn run(self: Arc<Self>, workflow_id: WorkflowId) {
        loop {
            let status = self.status(&workflow_id).await;
            match status {
                Some(ExecutionStatus::Running) => {}
                Some(ExecutionStatus::Paused) => {
                    tokio::time::sleep(DEPENDENCY_POLL_INTERVAL).await;
                    continue;
                }
                _ => return,
            }

            let (step_id, deps) = {
                let executions = self.executions.lock().await;
                let execution = match executions.get(&workflow_id) {
                    Some(e) => e,
                    None => return,
                };
                if execution.current_index >= execution.steps.len() {
                    break;
                }
                let step = &execution.steps[execution.current_index];
                (step.id.clone(), step.depends_on.clone())
            };

            if !self.dependencies_satisfied(&workflow_id, &deps).await {
                tokio::time::sleep(DEPENDENCY_POLL_INTERVAL).await;
                continue;
            }

            let outcome = self.execute_current_step(&workflow_id).await;
            match outcome {
                StepOutcome::Advance => {
                    let mut executions = self.executions.lock().await;
                    if let Some(execution) = executions.get_mut(&workflow_id) {
                        execution.current_index += 1;
                    }
                    drop(executions);
                    let mut payload = HashMap::new();
                    payload.insert("workflow_id".to_string(), json!(workflow_id));
                    payload.insert("step_id".to_string(), json!(step_id));
                    self.events.emit(events::WORKFLOW_STEP_COMPLETED, payload, None).await;
                }
                StepOutcome::Retry => {
                    tokio::time::sleep(DEPENDENCY_POLL_INTERVAL).await;
                }
                StepOutcome::Failed => {
                    let _ = self.transition(&workflow_id, ExecutionStatus::Failed).await;
                    let mut payload = HashMap::new();
                    payload.insert("workflow_id".to_string(), json!(workflow_id));
                    payload.insert("step_id".to_string(), json!(step_id));
                    self.events.emit(events::WORKFLOW_FAILED, payload, None).await;
                    return;
                }
            }
        }

        let _ = self.transition(&workflow_id, ExecutionStatus::Completed).await;
        let mut payload = HashMap::new();
        payload.insert("workflow_id".to_string(), json!(workflow_id));
        self.events.emit(events::WORKFLOW_COMPLETED, payload, None).await;
    }

    async fn dependencies_satisfied(&self, workflow_id: &WorkflowId, deps: &[String]) -> bool {
        if deps.is_empty() {
            return true;
        }
        let executions = self.executions.lock().await;
        let Some(execution) = executions.get(workflow_id) else { return false };
        deps.iter().all(|dep| execution.steps.iter().any(|s| &s.id == dep && s.status == StepStatus::Completed))
    }

    async fn execute_current_step(&self, workflow_id: &WorkflowId) -> StepOutcome {
        let (action, max_retries, retry_delay, retry_count) = {
            let mut executions = self.executions.lock().await;
            let execution = match executions.get_mut(workflow_id) {
                Some(e) => e,
                None => return StepOutcome::Failed,
            };
            let step = &mut execution.steps[execution.current_index];
            step.status = StepStatus::Running;
            (step.action.clone(), step.params.max_retries, step.params.retry_delay, step.retry_count)
        };

        let result = match &action {
            StepAction::System(action) => action().await,
            StepAction::Agent(agent_type) => self.dispatch_to_agent(*agent_type).await,
        };

        let mut executions = self.executions.lock().await;
        let Some(execution) = executions.get_mut(workflow_id) else { return StepOutcome::Failed };
        let step = &mut execution.steps[execution.current_index];

        match result {
            Ok(()) => {
                step.status = StepStatus::Completed;
                StepOutcome::Advance
            }
            Err(e) => {
                warn!("workflow {} step {} failed: {}", workflow_id, step.id, e);
                if retry_count < max_retries {
                    step.retry_count += 1;
                    step.status = StepStatus::Waiting;
                    drop(executions);
                    tokio::time::sleep(retry_delay).await;
                    StepOutcome::Retry
                } else {
                    step.status = StepStatus::Failed;
                    StepOutcome::Failed
                }
            }
        }
    }

    /// Picks the candidate with minimum workload among agents of the
    /// step's type, submits a task for it, and waits on the Message Bus
    /// for that task's completion/failure event.
    async fn dispatch_to_agent(&self, agent_type: AgentType) -> Result<()> {
        let candidates = self.directory.agents_of_type(agent_type).await;
        let agent = candidates
            .into_iter()
            .min_by_key(|(_, workload)| *workload)
            .map(|(id, _)| id)
            .ok_or_else(|| KernelError::not_found(format!("no agents of type {agent_type} available")))?;

        let task = self
            .tasks
            .create(
                &format!("workflow step for {agent_type}"),
                "dispatched by workflow orchestrator",
                task_type_for(agent_type),
                None,
                ChronoDuration::hours(1),
                vec![],
                vec![],
            )
            .await?;

        self.tasks.assign(&task.id, &agent).await?;
        self.assignment
            .start_execution(&task.id, &agent, ChronoDuration::hours(1))
            .await?;
        self.tasks.update_status(&task.id, TaskStatus::InProgress).await?;

        let (tx, rx) = oneshot::channel();
        let waiter = Arc::new(TaskWaiter { target_task_id: task.id.clone(), sender: Mutex::new(Some(tx)) });
        let subscriber_id = format!("workflow-wait-{}", task.id);
        self.subscriber.subscribe(events::TASK_COMPLETED, subscriber_id.clone(), waiter.clone()).await;
        self.subscriber.subscribe(events::TASK_FAILED, subscriber_id.clone(), waiter).await;

        let success = rx.await.unwrap_or(false);

        self.subscriber.unsubscribe(events::TASK_COMPLETED, &subscriber_id).await;
        self.subscriber.unsubscribe(events::TASK_FAILED, &subscriber_id).await;

        if success {
            self.assignment.complete_execution(&task.id, true, None, task_type_key(agent_type)).await.ok();
            Ok(())
        } else {
            Err(KernelError::recoverable(format!("agent task for step failed: {}", task.id)))
        }
    }
}

enum StepOutcome {
    Advance,
    Retry,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::capabilities::UuidGenerator;
    use crate::config::{AssignmentConfig, BusConfig};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct EmptyDirectory;
    #[async_trait]
    impl AgentDirectory for EmptyDirectory {
        async fn agents_of_type(&self, _agent_type: AgentType) -> Vec<(AgentId, u32)> {
            vec![]
        }
    }

    fn assignment_config() -> AssignmentConfig {
        AssignmentConfig { weight_specialization: 0.3, weight_load: 0.25, weight_capability: 0.2, weight_priority: 0.1, weight_time: 0.1, weight_performance: 0.05 }
    }

    async fn orchestrator() -> Arc<WorkflowOrchestrator> {
        let bus = Arc::new(MessageBus::new(
            BusConfig { queue_size: 50, retry_attempts: 3, message_timeout: std::time::Duration::from_secs(5), sweep_interval: std::time::Duration::from_secs(5) },
            std::time::Duration::from_secs(90),
            Arc::new(UuidGenerator),
        ));
        let tasks = Arc::new(TaskManager::new(Arc::new(UuidGenerator), bus.clone()));
        let assignment = Arc::new(AssignmentEngine::new(assignment_config(), Arc::new(UuidGenerator), bus.clone()));
        WorkflowOrchestrator::new(Arc::new(EmptyDirectory), tasks, assignment, bus.clone(), bus, Arc::new(UuidGenerator))
    }

    #[tokio::test]
    async fn single_system_step_completes_the_workflow() {
        let orchestrator = orchestrator().await;
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let action: SystemAction = Arc::new(move || {
            let flag = flag.clone();
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
        });
        let step = Step::new("s1", "noop", StepAction::System(action), vec![], StepParams::default());
        let workflow_id = orchestrator.register(vec![step]).await.unwrap();
        orchestrator.start(&workflow_id).await.unwrap();

        for _ in 0..50 {
            if orchestrator.status(&workflow_id).await == Some(ExecutionStatus::Completed) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        assert_eq!(orchestrator.status(&workflow_id).await, Some(ExecutionStatus::Completed));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failing_step_exhausts_retries_then_fails_workflow() {
        let orchestrator = orchestrator().await;
        let action: SystemAction = Arc::new(|| Box::pin(async { Err(KernelError::recoverable("boom")) }));
        let step = Step::new("s1", "always-fails", StepAction::System(action), vec![], StepParams { max_retries: 1, retry_delay: std::time::Duration::from_millis(5) });
        let workflow_id = orchestrator.register(vec![step]).await.unwrap();
        orchestrator.start(&workflow_id).await.unwrap();

        for _ in 0..100 {
            if orchestrator.status(&workflow_id).await == Some(ExecutionStatus::Failed) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        assert_eq!(orchestrator.status(&workflow_id).await, Some(ExecutionStatus::Failed));
    }

    #[tokio::test]
    async fn registration_rejects_unknown_dependency() {
        let orchestrator = orchestrator().await;
        let action: SystemAction = Arc::new(|| Box::pin(async { Ok(()) }));
        let step = Step::new("s1", "noop", StepAction::System(action), vec!["ghost".to_string()], StepParams::default());
        assert!(orchestrator.register(vec![step]).await.is_err());
    }
}
