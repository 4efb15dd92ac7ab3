//! 4.B File Manager: lock arbitration, change history, snapshots, conflict
//! detection and resolution. Owns locks, change records, snapshots, and
//! conflicts exclusively (§3 ownership); everything else is addressed by id.

pub mod conflict;
pub mod history;
pub mod lock;

pub use conflict::{Conflict, ConflictKind, ConflictTracker, Resolution};
pub use history::{ChangeAnalysis, ChangeHistory, ChangeKind, ChangeRecord, FileSnapshot};
pub use lock::{FileLock, LockMode, LockTable};

use crate::bus::EventPublisher;
use crate::capabilities::{FileStore, IdGenerator};
use crate::error::{KernelError, Result};
use crate::models::{AgentId, ConflictId, LockId};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

/// Notified whenever a watched path records a change.
#[async_trait]
pub trait FileWatchHandler: Send + Sync {
    async fn on_change(&self, record: &ChangeRecord);
}

struct Watchers {
    by_path: tokio::sync::RwLock<HashMap<String, Vec<Arc<dyn FileWatchHandler>>>>,
}

pub struct FileManager {
    store: Arc<dyn FileStore>,
    id_gen: Arc<dyn IdGenerator>,
    events: Arc<dyn EventPublisher>,
    locks: LockTable,
    history: ChangeHistory,
    conflicts: ConflictTracker,
    watchers: Watchers,
    backups: Mutex<HashMap<String, Vec<u8>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl FileManager {
    pub fn new(
        store: Arc<dyn FileStore>,
        id_gen: Arc<dyn IdGenerator>,
        events: Arc<dyn EventPublisher>,
        max_locks_per_agent: usize,
        lock_timeout: std::time::Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            id_gen,
            events,
            locks: LockTable::new(max_locks_per_agent, lock_timeout),
            history: ChangeHistory::default(),
            conflicts: ConflictTracker::new(),
            watchers: Watchers {
                by_path: tokio::sync::RwLock::new(HashMap::new()),
            },
            backups: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
        })
    }

    /// Starts the background lock expirer (§4.B: "a background sweeper
    /// releases expired locks and records a lock_timeout conflict naming
    /// the last holder").
    pub async fn start(self: &Arc<Self>, interval: std::time::Duration) {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.sweep_expired_locks().await;
            }
        });
        *self.sweeper.lock().await = Some(handle);
        info!("File manager lock expirer started");
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.abort();
        }
    }

    async fn sweep_expired_locks(&self) {
        let expired = self.locks.sweep_expired(Utc::now()).await;
        for lock in expired {
            let conflict = self
                .conflicts
                .record_lock_timeout(self.id_gen.as_ref(), &lock.path, &lock.last_holder, Utc::now())
                .await;
            let mut payload = HashMap::new();
            payload.insert("path".to_string(), serde_json::Value::String(conflict.path.clone()));
            payload.insert(
                "conflict_id".to_string(),
                serde_json::Value::String(conflict.id.clone()),
            );
            self.events
                .emit(crate::events::FILE_CONFLICT, payload, Some(lock.last_holder))
                .await;
        }
    }

    pub async fn request_lock(&self, path: &str, agent: &AgentId, mode: LockMode) -> Result<FileLock> {
        let lock = self
            .locks
            .request_lock(path, agent, mode, self.id_gen.as_ref(), Utc::now())
            .await?;
        let mut payload = HashMap::new();
        payload.insert("path".to_string(), serde_json::Value::String(path.to_string()));
        payload.insert("mode".to_string(), serde_json::json!(mode));
        self.events
            .emit(crate::events::FILE_LOCKED, payload, Some(agent.clone()))
            .await;
        Ok(lock)
    }

    pub async fn release_lock(&self, id: &LockId) -> Result<()> {
        let lock = self.locks.release_lock(id).await?;
        let mut payload = HashMap::new();
        payload.insert("path".to_string(), serde_json::Value::String(lock.path.clone()));
        self.events
            .emit(crate::events::FILE_UNLOCKED, payload, Some(lock.holder))
            .await;
        Ok(())
    }

    pub async fn is_locked(&self, path: &str) -> bool {
        self.locks.is_locked(path).await
    }

    pub async fn read(&self, path: &str, _agent: &AgentId) -> Result<Vec<u8>> {
        self.store.read(path).await
    }

    pub async fn write(&self, path: &str, content: &[u8], agent: &AgentId) -> Result<()> {
        for holder in self.locks.holders(path).await {
            if holder.holder != *agent && holder.mode != LockMode::Read {
                return Err(KernelError::busy(format!(
                    "{path} is locked by {}",
                    holder.holder
                )));
            }
        }

        let existed = self.store.stat(path).await.map(|s| s.exists).unwrap_or(false);
        self.store.write(path, content).await?;

        let kind = if existed { ChangeKind::Modified } else { ChangeKind::Created };
        self.record_and_notify(path, agent.clone(), kind, Some(content)).await;
        Ok(())
    }

    pub async fn delete(&self, path: &str, agent: &AgentId) -> Result<()> {
        for holder in self.locks.holders(path).await {
            if holder.holder != *agent {
                return Err(KernelError::busy(format!(
                    "{path} is locked by {}",
                    holder.holder
                )));
            }
        }
        self.store.delete(path).await?;
        self.record_and_notify(path, agent.clone(), ChangeKind::Deleted, None).await;
        Ok(())
    }

    pub async fn mkdir(&self, path: &str, agent: &AgentId) -> Result<()> {
        self.store.write(path, b"").await?;
        self.record_and_notify(path, agent.clone(), ChangeKind::Created, Some(b"")).await;
        Ok(())
    }

    pub async fn move_file(&self, src: &str, dst: &str, agent: &AgentId) -> Result<()> {
        let content = self.store.read(src).await?;
        self.store.write(dst, &content).await?;
        self.store.delete(src).await?;
        self.record_and_notify(src, agent.clone(), ChangeKind::Renamed, None).await;
        self.record_and_notify(dst, agent.clone(), ChangeKind::Created, Some(&content)).await;
        Ok(())
    }

    pub async fn watch(&self, path: &str, handler: Arc<dyn FileWatchHandler>) {
        let mut by_path = self.watchers.by_path.write().await;
        by_path.entry(path.to_string()).or_default().push(handler);
    }

    pub async fn backup(&self, path: &str) -> Result<()> {
        let content = self.store.read(path).await?;
        self.backups.lock().await.insert(path.to_string(), content);
        Ok(())
    }

    pub async fn restore(&self, path: &str, agent: &AgentId) -> Result<()> {
        let content = self
            .backups
            .lock()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| KernelError::not_found(format!("no backup for {path}")))?;
        self.write(path, &content, agent).await
    }

    pub async fn history(&self, path: &str) -> Vec<ChangeRecord> {
        self.history.history(path).await
    }

    pub async fn detect_conflicts(&self, path: &str) -> Vec<Conflict> {
        self.conflicts.list_for_path(path).await
    }

    pub async fn resolve_conflict(&self, id: &ConflictId, resolution: &str, resolved_by: AgentId) -> Result<Conflict> {
        self.conflicts.resolve(id, resolution, resolved_by, Utc::now()).await
    }

    pub async fn release_all_for_agent(&self, agent: &AgentId) -> Vec<FileLock> {
        self.locks.release_all_for_agent(agent).await
    }

    /// Every currently-held lock, for the Realtime Sync full-state snapshot.
    pub async fn all_locks(&self) -> Vec<FileLock> {
        self.locks.all_locks().await
    }

    async fn record_and_notify(&self, path: &str, agent: AgentId, kind: ChangeKind, content: Option<&[u8]>) {
        let now = Utc::now();
        let record = self
            .history
            .record_change(self.id_gen.next_id(), path, agent.clone(), kind, content, now)
            .await;

        if kind == ChangeKind::Modified || kind == ChangeKind::Created {
            if let Some(conflict) = self
                .conflicts
                .detect(self.id_gen.as_ref(), &self.history, path, &agent, now)
                .await
            {
                let mut payload = HashMap::new();
                payload.insert("path".to_string(), serde_json::Value::String(path.to_string()));
                payload.insert(
                    "conflict_id".to_string(),
                    serde_json::Value::String(conflict.id.clone()),
                );
                self.events.emit(crate::events::FILE_CONFLICT, payload, Some(agent.clone())).await;
            }
        }

        let mut payload = HashMap::new();
        payload.insert("path".to_string(), serde_json::Value::String(path.to_string()));
        self.events.emit(crate::events::FILE_MODIFIED, payload, Some(agent)).await;

        let handlers: Vec<Arc<dyn FileWatchHandler>> = {
            let by_path = self.watchers.by_path.read().await;
            by_path.get(path).cloned().unwrap_or_default()
        };
        if !handlers.is_empty() {
            info!("Notified {} watcher(s) for {}", handlers.len(), path);
            for handler in handlers {
                handler.on_change(&record).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{FileStat, UuidGenerator};
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::RwLock;

    struct InMemoryStore {
        files: RwLock<StdHashMap<String, Vec<u8>>>,
    }

    impl InMemoryStore {
        fn new() -> Self {
            Self { files: RwLock::new(StdHashMap::new()) }
        }
    }

    #[async_trait]
    impl FileStore for InMemoryStore {
        async fn read(&self, path: &str) -> Result<Vec<u8>> {
            self.files
                .read()
                .await
                .get(path)
                .cloned()
                .ok_or_else(|| KernelError::not_found(format!("{path} not found")))
        }
        async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
            self.files.write().await.insert(path.to_string(), content.to_vec());
            Ok(())
        }
        async fn stat(&self, path: &str) -> Result<FileStat> {
            let files = self.files.read().await;
            Ok(match files.get(path) {
                Some(content) => FileStat { size: content.len() as u64, exists: true },
                None => FileStat { size: 0, exists: false },
            })
        }
        async fn delete(&self, path: &str) -> Result<()> {
            self.files.write().await.remove(path);
            Ok(())
        }
    }

    struct NullPublisher;
    #[async_trait]
    impl EventPublisher for NullPublisher {
        async fn emit(&self, _event_type: &str, _payload: HashMap<String, serde_json::Value>, _source: Option<AgentId>) {}
    }

    fn manager() -> Arc<FileManager> {
        FileManager::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(UuidGenerator),
            Arc::new(NullPublisher),
            5,
            std::time::Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let manager = manager();
        manager.write("f.rs", b"hello", &"a1".to_string()).await.unwrap();
        let content = manager.read("f.rs", &"a1".to_string()).await.unwrap();
        assert_eq!(content, b"hello");
        assert_eq!(manager.history("f.rs").await.len(), 1);
    }

    #[tokio::test]
    async fn write_blocked_by_other_agents_write_lock() {
        let manager = manager();
        manager.request_lock("f.rs", &"a1".to_string(), LockMode::Write).await.unwrap();
        let result = manager.write("f.rs", b"x", &"a2".to_string()).await;
        assert!(matches!(result, Err(KernelError::Busy(_))));
    }

    #[tokio::test]
    async fn backup_and_restore_roundtrip() {
        let manager = manager();
        manager.write("f.rs", b"v1", &"a1".to_string()).await.unwrap();
        manager.backup("f.rs").await.unwrap();
        manager.write("f.rs", b"v2", &"a1".to_string()).await.unwrap();
        manager.restore("f.rs", &"a1".to_string()).await.unwrap();
        assert_eq!(manager.read("f.rs", &"a1".to_string()).await.unwrap(), b"v1");
    }

    #[tokio::test]
    async fn concurrent_writes_from_other_agents_raise_a_conflict() {
        let manager = manager();
        manager.write("f.rs", b"v1", &"other".to_string()).await.unwrap();
        manager.write("f.rs", b"v2", &"me".to_string()).await.unwrap();
        let conflicts = manager.detect_conflicts("f.rs").await;
        assert!(!conflicts.is_empty());
    }
}
