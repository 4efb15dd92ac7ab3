//! 4.D Assignment Engine: scores candidate agents, tracks executions, and
//! triggers reassignment on timeout or liveness failure.

pub mod execution;
pub mod performance;
pub mod scoring;

pub use execution::{Execution, ReassignReason};
pub use performance::AgentPerformance;
pub use scoring::{AgentInfo, ScoreBreakdown, TaskSnapshot};

use crate::bus::EventPublisher;
use crate::capabilities::IdGenerator;
use crate::config::AssignmentConfig;
use crate::error::{KernelError, Result};
use crate::models::{AgentId, ExecutionId, Priority, TaskId};
use chrono::{Duration, Utc};
use performance::PerformanceTracker;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AssignmentResult {
    pub success: bool,
    pub agent: Option<AgentId>,
    pub confidence: f64,
    pub reasoning: Vec<String>,
    pub alternatives: Vec<(AgentId, f64)>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AssignmentStatistics {
    pub active_executions: usize,
    pub tracked_agents: usize,
}

struct Store {
    agents: HashMap<AgentId, AgentInfo>,
    executions: HashMap<TaskId, Execution>,
    performance: PerformanceTracker,
}

pub struct AssignmentEngine {
    config: Mutex<AssignmentConfig>,
    store: Mutex<Store>,
    id_gen: Arc<dyn IdGenerator>,
    events: Arc<dyn EventPublisher>,
}

const TOP_N_ALTERNATIVES: usize = 3;

impl AssignmentEngine {
    pub fn new(config: AssignmentConfig, id_gen: Arc<dyn IdGenerator>, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            config: Mutex::new(config),
            store: Mutex::new(Store {
                agents: HashMap::new(),
                executions: HashMap::new(),
                performance: PerformanceTracker::new(),
            }),
            id_gen,
            events,
        }
    }

    pub async fn update_assignment_criteria(&self, config: AssignmentConfig) {
        *self.config.lock().await = config;
    }

    pub async fn update_agent_info(&self, info: AgentInfo) {
        self.store.lock().await.agents.insert(info.agent_id.clone(), info);
    }

    pub async fn remove_agent_info(&self, agent_id: &AgentId) {
        let mut store = self.store.lock().await;
        store.agents.remove(agent_id);
        store.performance.remove(agent_id);
    }

    pub async fn get_performance(&self, agent_id: &AgentId) -> Option<AgentPerformance> {
        self.store.lock().await.performance.get(agent_id).cloned()
    }

    pub async fn get_active_executions(&self) -> Vec<Execution> {
        self.store.lock().await.executions.values().cloned().collect()
    }

    pub async fn statistics(&self) -> AssignmentStatistics {
        let store = self.store.lock().await;
        AssignmentStatistics { active_executions: store.executions.len(), tracked_agents: store.agents.len() }
    }

    /// Current task count the Assignment Engine is tracking for an agent,
    /// for the Coordination Manager's registry sync.
    pub async fn current_task_count(&self, agent_id: &AgentId) -> u32 {
        self.store.lock().await.agents.get(agent_id).map(|info| info.current_tasks).unwrap_or(0)
    }

    async fn best_candidate(
        &self,
        task: &TaskSnapshot<'_>,
        candidates: &[AgentId],
    ) -> (Option<(AgentId, ScoreBreakdown)>, Vec<(AgentId, f64)>) {
        let config = self.config.lock().await.clone();
        let store = self.store.lock().await;

        let mut scored: Vec<(AgentId, ScoreBreakdown)> = candidates
            .iter()
            .filter_map(|id| store.agents.get(id).map(|info| (id, info)))
            .filter(|(_, info)| !info.is_at_capacity())
            .map(|(id, info)| {
                let perf = store.performance.get(id);
                let rates = perf.map(|p| p.specialization_rates.clone()).unwrap_or_default();
                let overall = perf.and_then(|p| p.overall_success_rate());
                let score = scoring::score_candidate(&config, task, info, &rates, overall);
                (id.clone(), score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total.partial_cmp(&a.1.total).unwrap_or(std::cmp::Ordering::Equal));

        let best = scored.first().cloned();
        let alternatives = scored.iter().skip(1).take(TOP_N_ALTERNATIVES).map(|(id, s)| (id.clone(), s.total)).collect();
        (best, alternatives)
    }

    pub async fn assign(&self, task: &TaskSnapshot<'_>, candidates: &[AgentId]) -> AssignmentResult {
        if candidates.is_empty() {
            return AssignmentResult {
                success: false,
                agent: None,
                confidence: 0.0,
                reasoning: vec!["No agents available".to_string()],
                alternatives: vec![],
            };
        }

        let (best, alternatives) = self.best_candidate(task, candidates).await;
        match best {
            Some((agent_id, score)) => AssignmentResult {
                success: true,
                agent: Some(agent_id.clone()),
                confidence: score.total,
                reasoning: vec![format!(
                    "selected {} with score {:.3} (spec {:.2}, load {:.2}, cap {:.2}, prio {:.2}, time {:.2}, perf {:.2})",
                    agent_id, score.total, score.specialization, score.load, score.capability, score.priority, score.time, score.performance
                )],
                alternatives,
            },
            None => AssignmentResult {
                success: false,
                agent: None,
                confidence: 0.0,
                reasoning: vec!["No suitable agents found".to_string()],
                alternatives: vec![],
            },
        }
    }

    pub async fn start_execution(&self, task_id: &TaskId, agent_id: &AgentId, estimated_duration: Duration) -> Result<ExecutionId> {
        let id = self.id_gen.next_id();
        let now = Utc::now();
        let execution = Execution::new(id.clone(), task_id.clone(), agent_id.clone(), now, estimated_duration);

        let mut store = self.store.lock().await;
        if let Some(info) = store.agents.get_mut(agent_id) {
            info.current_tasks += 1;
        }
        store.executions.insert(task_id.clone(), execution);
        Ok(id)
    }

    pub async fn update_progress(&self, task_id: &TaskId, progress: i32) -> Result<()> {
        let mut store = self.store.lock().await;
        let execution = store
            .executions
            .get_mut(task_id)
            .ok_or_else(|| KernelError::not_found(format!("no active execution for task {task_id}")))?;
        execution.update_progress(progress, Utc::now());
        Ok(())
    }

    pub async fn complete_execution(&self, task_id: &TaskId, success: bool, quality: Option<f64>, task_type_key: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        let execution = store
            .executions
            .remove(task_id)
            .ok_or_else(|| KernelError::not_found(format!("no active execution for task {task_id}")))?;

        if let Some(info) = store.agents.get_mut(&execution.agent_id) {
            info.current_tasks = info.current_tasks.saturating_sub(1);
        }

        let completion_minutes = Utc::now().signed_duration_since(execution.started_at).num_seconds() as f64 / 60.0;
        store.performance.record_completion(&execution.agent_id, task_type_key, success, completion_minutes, quality);

        Ok(())
    }

    /// Excludes the current agent, assigns from the remaining candidates,
    /// and starts a fresh execution if one is found.
    pub async fn reassign(&self, task: &TaskSnapshot<'_>, current_agent: &AgentId, candidates: &[AgentId], estimated_duration: Duration) -> AssignmentResult {
        let remaining: Vec<AgentId> = candidates.iter().filter(|id| *id != current_agent).cloned().collect();

        let task_id = task.task_id.to_string();
        self.store.lock().await.executions.remove(&task_id);

        let result = self.assign(task, &remaining).await;
        if result.success {
            if let Some(agent) = &result.agent {
                if let Err(e) = self.start_execution(&task_id, agent, estimated_duration).await {
                    warn!("Failed to start execution after reassignment: {}", e);
                }
            }
        }
        result
    }

    /// Scans active executions for timeout/liveness triggers and returns
    /// the task ids that need reassignment along with the reason.
    pub async fn check_for_reassignment(&self, heartbeat_interval: Duration, timeout_ratio: f64, heartbeat_multiplier: u64) -> Vec<(TaskId, AgentId, ReassignReason)> {
        let store = self.store.lock().await;
        let now = Utc::now();
        store
            .executions
            .values()
            .filter_map(|execution| {
                execution
                    .reassign_reason(now, timeout_ratio, heartbeat_interval, heartbeat_multiplier)
                    .map(|reason| (execution.task_id.clone(), execution.agent_id.clone(), reason))
            })
            .collect()
    }
}
