//! External capabilities the kernel consumes but never implements.
//!
//! §6 of the design lists these as contracts, not core: the on-disk file
//! store, the agent worker that carries out a task's domain work, an id
//! generator, a clock, and a log sink. The kernel takes trait objects for
//! each at construction time (design notes: "passed in as a capability
//! struct ... no process-wide mutable state") rather than reaching for
//! globals the way a UI-embedded runtime might.

use crate::error::Result;
use crate::models::AgentType;
use crate::tasks::Task;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Minimal file I/O surface the File Manager drives.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    async fn stat(&self, path: &str) -> Result<FileStat>;
    async fn delete(&self, path: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileStat {
    pub size: u64,
    pub exists: bool,
}

/// The domain-work executor for a task, kept explicitly out of kernel
/// scope; the kernel only ever calls `execute` and reads the other
/// accessors to score and monitor it.
#[async_trait]
pub trait AgentWorker: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    async fn status(&self) -> WorkerStatus;
    async fn workload(&self) -> u32;
    async fn shutdown(&self);
    async fn execute(&self, task: Task, context: HashMap<String, String>) -> Result<WorkerOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Working,
    Error,
    Offline,
}

#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub success: bool,
    pub output: String,
    pub quality: Option<f64>,
}

/// Builds the domain-work executor for a newly created agent. The
/// Coordination Manager calls this once per `create_agent`; what the
/// factory does with `spec` (spawn a process, hand back an in-memory
/// stub, whatever) is entirely outside kernel scope.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn build(&self, agent_id: &str, spec: &AgentSpec) -> Result<Arc<dyn AgentWorker>>;
}

#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: String,
    pub agent_type: AgentType,
    pub capabilities: Vec<String>,
    pub max_concurrent_tasks: u32,
}

/// `FileStore` backed by the real filesystem, rooted at a configured
/// directory. The File Manager only ever sees relative paths; this is
/// where they're resolved against disk.
#[derive(Debug, Clone)]
pub struct DiskFileStore {
    root: std::path::PathBuf,
}

impl DiskFileStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> std::path::PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

#[async_trait]
impl FileStore for DiskFileStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.resolve(path)).await.map_err(|e| crate::error::KernelError::Internal(e.into()))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.resolve(path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| crate::error::KernelError::Internal(e.into()))?;
        }
        tokio::fs::write(full_path, content).await.map_err(|e| crate::error::KernelError::Internal(e.into()))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(metadata) => Ok(FileStat { size: metadata.len(), exists: true }),
            Err(_) => Ok(FileStat { size: 0, exists: false }),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(crate::error::KernelError::Internal(e.into())),
        }
    }
}

/// `AgentWorker` that reports itself idle and succeeds every task
/// trivially. The actual domain-work executor is external capability the
/// kernel never implements (§6); this is only a usable default so the
/// binary can run the kernel standalone.
#[derive(Debug, Clone)]
pub struct NoopAgentWorker {
    id: String,
    name: String,
}

#[async_trait]
impl AgentWorker for NoopAgentWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> WorkerStatus {
        WorkerStatus::Idle
    }

    async fn workload(&self) -> u32 {
        0
    }

    async fn shutdown(&self) {}

    async fn execute(&self, task: Task, _context: HashMap<String, String>) -> Result<WorkerOutcome> {
        Ok(WorkerOutcome { success: true, output: format!("no-op completion of {}", task.id), quality: None })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAgentFactory;

#[async_trait]
impl AgentFactory for NoopAgentFactory {
    async fn build(&self, agent_id: &str, spec: &AgentSpec) -> Result<Arc<dyn AgentWorker>> {
        Ok(Arc::new(NoopAgentWorker { id: agent_id.to_string(), name: spec.name.clone() }))
    }
}

/// Collision-free id generation for tasks, agents, sessions, messages,
/// executions, and alerts.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Default generator backed by `uuid` v4, used for every entity id.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Monotonic-for-durations, wall-clock-for-timestamps time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn monotonic_now(&self) -> std::time::Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }
}

/// Structured event emission sink. The kernel always logs through
/// `tracing` internally (see each subsystem's module); this trait exists
/// for callers that want to additionally mirror events into an external
/// sink (e.g. an audit log) without the kernel depending on its shape.
pub trait LogSink: Send + Sync {
    fn emit(&self, level: LogLevel, message: &str, context: &HashMap<String, String>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A `LogSink` that forwards to `tracing`, used when no external sink is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn emit(&self, level: LogLevel, message: &str, context: &HashMap<String, String>) {
        match level {
            LogLevel::Debug => tracing::debug!(?context, "{message}"),
            LogLevel::Info => tracing::info!(?context, "{message}"),
            LogLevel::Warn => tracing::warn!(?context, "{message}"),
            LogLevel::Error => tracing::error!(?context, "{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disk_file_store_round_trips_through_real_fs() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskFileStore::new(dir.path());

        let stat = store.stat("notes/todo.md").await.unwrap();
        assert!(!stat.exists);

        store.write("notes/todo.md", b"hello").await.unwrap();
        let stat = store.stat("notes/todo.md").await.unwrap();
        assert!(stat.exists);
        assert_eq!(stat.size, 5);

        let content = store.read("notes/todo.md").await.unwrap();
        assert_eq!(content, b"hello");

        store.delete("notes/todo.md").await.unwrap();
        assert!(!store.stat("notes/todo.md").await.unwrap().exists);
    }

    #[tokio::test]
    async fn disk_file_store_delete_of_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskFileStore::new(dir.path());
        assert!(store.delete("never/written.txt").await.is_ok());
    }

    #[tokio::test]
    async fn noop_agent_worker_reports_idle_and_succeeds_tasks() {
        let factory = NoopAgentFactory;
        let spec = AgentSpec {
            name: "worker-1".to_string(),
            agent_type: AgentType::Backend,
            capabilities: vec![],
            max_concurrent_tasks: 1,
        };
        let worker = factory.build("agent-1", &spec).await.unwrap();
        assert_eq!(worker.status().await, WorkerStatus::Idle);
        assert_eq!(worker.workload().await, 0);
    }
}
