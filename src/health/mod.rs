//! 4.E Health Monitor: periodic liveness probing, health scoring, and the
//! recovery ladder. Actual restart/reset/replace is Coordination Manager's
//! job — the monitor only emits the intent as an event plus, on escalation,
//! a standing alert.

pub mod metrics;
pub mod recovery;

pub use metrics::AgentHealth;
pub use recovery::{Alert, AlertType, RecoveryAction};

use crate::bus::EventPublisher;
use crate::capabilities::{AgentWorker, Clock, IdGenerator, WorkerStatus};
use crate::config::HealthConfig;
use crate::events;
use crate::models::{AgentId, Severity};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatistics {
    pub tracked_agents: usize,
    pub healthy_agents: usize,
    pub open_alerts: usize,
}

struct Store {
    health: HashMap<AgentId, AgentHealth>,
    workers: HashMap<AgentId, Arc<dyn AgentWorker>>,
    alerts: Vec<Alert>,
}

pub struct HealthMonitor {
    config: Mutex<HealthConfig>,
    store: Mutex<Store>,
    id_gen: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, id_gen: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>, events: Arc<dyn EventPublisher>) -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(config),
            store: Mutex::new(Store { health: HashMap::new(), workers: HashMap::new(), alerts: Vec::new() }),
            id_gen,
            clock,
            events,
            loop_handle: Mutex::new(None),
        })
    }

    pub async fn register_agent(&self, agent_id: AgentId, worker: Arc<dyn AgentWorker>) {
        let now = self.clock.now();
        let mut store = self.store.lock().await;
        store.health.insert(agent_id.clone(), AgentHealth::new(agent_id.clone(), now));
        store.workers.insert(agent_id, worker);
    }

    pub async fn unregister_agent(&self, agent_id: &AgentId) {
        let mut store = self.store.lock().await;
        store.health.remove(agent_id);
        store.workers.remove(agent_id);
    }

    pub async fn get_health(&self, agent_id: &AgentId) -> Option<AgentHealth> {
        self.store.lock().await.health.get(agent_id).cloned()
    }

    pub async fn list_unhealthy(&self) -> Vec<AgentId> {
        self.store.lock().await.health.values().filter(|h| !h.healthy).map(|h| h.agent_id.clone()).collect()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.store.lock().await.alerts.clone()
    }

    pub async fn resolve_alert(&self, alert_id: &str) {
        let mut store = self.store.lock().await;
        if let Some(alert) = store.alerts.iter_mut().find(|a| a.id == alert_id) {
            alert.resolved = true;
        }
    }

    pub async fn statistics(&self) -> HealthStatistics {
        let store = self.store.lock().await;
        HealthStatistics {
            tracked_agents: store.health.len(),
            healthy_agents: store.health.values().filter(|h| h.healthy).count(),
            open_alerts: store.alerts.iter().filter(|a| !a.resolved).count(),
        }
    }

    /// Starts the periodic probe loop; cheap to call again after `shutdown`.
    pub async fn start(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        let interval = self.config.lock().await.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                monitor.check_all().await;
            }
        });
        *self.loop_handle.lock().await = Some(handle);
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.loop_handle.lock().await.take() {
            handle.abort();
        }
    }

    async fn check_all(&self) {
        let agent_ids: Vec<AgentId> = self.store.lock().await.health.keys().cloned().collect();
        for agent_id in agent_ids {
            self.check_agent(&agent_id).await;
        }
    }

    /// Probes one agent's worker status, racing it against the configured
    /// timeout, and runs the success/failure update plus recovery dispatch.
    pub async fn check_agent(&self, agent_id: &AgentId) {
        let (timeout, failure_threshold, recovery_threshold, retry_attempts, retry_delay) = {
            let config = self.config.lock().await;
            (config.timeout, config.failure_threshold, config.recovery_threshold, config.retry_attempts, config.retry_delay)
        };

        let worker = self.store.lock().await.workers.get(agent_id).cloned();
        let Some(worker) = worker else { return };

        let mut last_err = None;
        let mut outcome = None;
        for attempt in 0..=retry_attempts {
            if attempt > 0 {
                tokio::time::sleep(retry_delay).await;
            }
            let start = self.clock.monotonic_now();
            match tokio::time::timeout(timeout, worker.status()).await {
                Ok(WorkerStatus::Error) => last_err = Some("worker reported error status".to_string()),
                Ok(WorkerStatus::Offline) => last_err = Some("worker is offline".to_string()),
                Ok(status) => {
                    outcome = Some((status, start.elapsed().as_millis() as u64));
                    break;
                }
                Err(_) => last_err = Some(format!("health probe timed out after {timeout:?}")),
            }
        }

        self.events.emit(events::SYSTEM_HEALTH_CHECK, HashMap::new(), Some(agent_id.clone())).await;

        let now = self.clock.now();
        match outcome {
            Some((_, response_ms)) => self.on_success(agent_id, response_ms, now, recovery_threshold).await,
            None => {
                let error = last_err.unwrap_or_else(|| "unknown probe failure".to_string());
                self.on_failure(agent_id, error, now, failure_threshold).await;
            }
        }
    }

    async fn on_success(&self, agent_id: &AgentId, response_ms: u64, now: chrono::DateTime<chrono::Utc>, recovery_threshold: u32) {
        let recovered = {
            let mut store = self.store.lock().await;
            match store.health.get_mut(agent_id) {
                Some(health) => health.record_success(response_ms, now, recovery_threshold),
                None => false,
            }
        };
        if recovered {
            info!("agent {} recovered", agent_id);
            let mut payload = HashMap::new();
            payload.insert("status".to_string(), json!("healthy"));
            self.events.emit(events::AGENT_STATUS_CHANGED, payload, Some(agent_id.clone())).await;
        }
    }

    async fn on_failure(&self, agent_id: &AgentId, error: String, now: chrono::DateTime<chrono::Utc>, failure_threshold: u32) {
        let (needs_recovery, consecutive_failures, health_score) = {
            let mut store = self.store.lock().await;
            match store.health.get_mut(agent_id) {
                Some(health) => {
                    let needs = health.record_failure(error.clone(), now, failure_threshold);
                    (needs, health.consecutive_failures, health.health_score)
                }
                None => return,
            }
        };

        let mut payload = HashMap::new();
        payload.insert("error".to_string(), json!(error));
        self.events.emit(events::AGENT_ERROR, payload, Some(agent_id.clone())).await;

        if !needs_recovery {
            return;
        }

        let action = recovery::choose_recovery_action(consecutive_failures, health_score);
        warn!("agent {} failing ({} consecutive), recovery action: {:?}", agent_id, consecutive_failures, action);

        let mut payload = HashMap::new();
        payload.insert("action".to_string(), json!(format!("{action:?}").to_lowercase()));
        self.events.emit(events::AGENT_RECOVERY_STARTED, payload, Some(agent_id.clone())).await;

        if action == RecoveryAction::Escalate {
            self.raise_alert(agent_id.clone(), Severity::Critical, AlertType::RecoveryFailed, format!("agent {agent_id} exhausted recovery ladder after {consecutive_failures} consecutive failures"), now)
                .await;
        }
    }

    async fn raise_alert(&self, agent_id: AgentId, severity: Severity, alert_type: AlertType, message: String, now: chrono::DateTime<chrono::Utc>) {
        let alert = Alert { id: self.id_gen.next_id(), agent_id: agent_id.clone(), severity, alert_type, message, created_at: now, resolved: false };
        self.store.lock().await.alerts.push(alert);
        let mut payload = HashMap::new();
        payload.insert("severity".to_string(), json!(format!("{severity:?}").to_lowercase()));
        self.events.emit(events::AGENT_ALERT_RAISED, payload, Some(agent_id)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{SystemClock, UuidGenerator, WorkerOutcome};
    use crate::error::Result;
    use crate::tasks::Task;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NullPublisher;
    #[async_trait]
    impl EventPublisher for NullPublisher {
        async fn emit(&self, _event_type: &str, _payload: HashMap<String, serde_json::Value>, _source: Option<AgentId>) {}
    }

    struct FlakyWorker {
        fail_count: AtomicU32,
        fails_for: u32,
    }

    #[async_trait]
    impl AgentWorker for FlakyWorker {
        fn id(&self) -> &str {
            "w1"
        }
        fn name(&self) -> &str {
            "flaky"
        }
        async fn status(&self) -> WorkerStatus {
            let n = self.fail_count.fetch_add(1, Ordering::SeqCst);
            if n < self.fails_for {
                WorkerStatus::Error
            } else {
                WorkerStatus::Idle
            }
        }
        async fn workload(&self) -> u32 {
            0
        }
        async fn shutdown(&self) {}
        async fn execute(&self, _task: Task, _context: HashMap<String, String>) -> Result<WorkerOutcome> {
            unimplemented!()
        }
    }

    fn config() -> HealthConfig {
        HealthConfig {
            interval: std::time::Duration::from_secs(30),
            timeout: std::time::Duration::from_secs(5),
            retry_attempts: 0,
            retry_delay: std::time::Duration::from_secs(1),
            failure_threshold: 2,
            recovery_threshold: 1,
        }
    }

    #[tokio::test]
    async fn repeated_failures_cross_threshold_and_emit_recovery() {
        let monitor = HealthMonitor::new(config(), Arc::new(UuidGenerator), Arc::new(SystemClock), Arc::new(NullPublisher));
        let worker: Arc<dyn AgentWorker> = Arc::new(FlakyWorker { fail_count: AtomicU32::new(0), fails_for: 10 });
        monitor.register_agent("a1".to_string(), worker).await;

        monitor.check_agent(&"a1".to_string()).await;
        monitor.check_agent(&"a1".to_string()).await;

        let health = monitor.get_health(&"a1".to_string()).await.unwrap();
        assert!(!health.healthy);
        assert_eq!(health.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn probe_retries_after_delay_and_recovers() {
        let mut cfg = config();
        cfg.retry_attempts = 2;
        cfg.retry_delay = std::time::Duration::from_millis(5);
        let monitor = HealthMonitor::new(cfg, Arc::new(UuidGenerator), Arc::new(SystemClock), Arc::new(NullPublisher));
        // Fails the first probe, succeeds on the first retry.
        let worker: Arc<dyn AgentWorker> = Arc::new(FlakyWorker { fail_count: AtomicU32::new(0), fails_for: 1 });
        monitor.register_agent("a1".to_string(), worker).await;

        let start = std::time::Instant::now();
        monitor.check_agent(&"a1".to_string()).await;
        assert!(start.elapsed() >= std::time::Duration::from_millis(5));

        let health = monitor.get_health(&"a1".to_string()).await.unwrap();
        assert!(health.healthy);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn escalation_raises_a_critical_alert() {
        let mut cfg = config();
        cfg.failure_threshold = 1;
        let monitor = HealthMonitor::new(cfg, Arc::new(UuidGenerator), Arc::new(SystemClock), Arc::new(NullPublisher));
        let worker: Arc<dyn AgentWorker> = Arc::new(FlakyWorker { fail_count: AtomicU32::new(0), fails_for: 1000 });
        monitor.register_agent("a1".to_string(), worker).await;

        for _ in 0..12 {
            monitor.check_agent(&"a1".to_string()).await;
        }

        let alerts = monitor.alerts().await;
        assert!(alerts.iter().any(|a| matches!(a.alert_type, AlertType::RecoveryFailed) && matches!(a.severity, Severity::Critical)));
    }

    #[tokio::test]
    async fn recovery_after_failure_emits_status_change() {
        let monitor = HealthMonitor::new(config(), Arc::new(UuidGenerator), Arc::new(SystemClock), Arc::new(NullPublisher));
        let worker: Arc<dyn AgentWorker> = Arc::new(FlakyWorker { fail_count: AtomicU32::new(0), fails_for: 2 });
        monitor.register_agent("a1".to_string(), worker).await;

        monitor.check_agent(&"a1".to_string()).await;
        monitor.check_agent(&"a1".to_string()).await;
        assert!(!monitor.get_health(&"a1".to_string()).await.unwrap().healthy);

        monitor.check_agent(&"a1".to_string()).await;
        assert!(monitor.get_health(&"a1".to_string()).await.unwrap().healthy);
    }
}
