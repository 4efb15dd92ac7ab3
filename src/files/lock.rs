//! Lock arbitration: at most one writer/exclusive holder per path, readers
//! may coexist only among themselves (§4.B).

use crate::error::{KernelError, Result};
use crate::models::{AgentId, LockId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockMode {
    Read,
    Write,
    Exclusive,
}

impl LockMode {
    fn compatible_with(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Read, LockMode::Read))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLock {
    pub id: LockId,
    pub path: String,
    pub holder: AgentId,
    pub mode: LockMode,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FileLock {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Per-path lock table plus per-agent held-lock counts, kept under one lock
/// (design notes: "single per-component lock").
pub struct LockTable {
    locks: RwLock<HashMap<String, Vec<FileLock>>>,
    max_per_agent: usize,
    default_ttl: chrono::Duration,
}

/// A timed-out lock's last holder, surfaced to the conflict detector.
pub struct ExpiredLock {
    pub path: String,
    pub last_holder: AgentId,
}

impl LockTable {
    pub fn new(max_per_agent: usize, default_ttl: std::time::Duration) -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
            max_per_agent,
            default_ttl: chrono::Duration::from_std(default_ttl).unwrap_or(chrono::Duration::seconds(300)),
        }
    }

    pub async fn request_lock(
        &self,
        path: &str,
        agent: &AgentId,
        mode: LockMode,
        id_gen: &dyn crate::capabilities::IdGenerator,
        now: DateTime<Utc>,
    ) -> Result<FileLock> {
        let mut locks = self.locks.write().await;

        let held_by_agent: usize = locks
            .values()
            .flatten()
            .filter(|l| &l.holder == agent)
            .count();
        if held_by_agent >= self.max_per_agent {
            return Err(KernelError::capacity(format!(
                "agent {agent} already holds the maximum of {} locks",
                self.max_per_agent
            )));
        }

        let holders = locks.entry(path.to_string()).or_default();
        holders.retain(|l| !l.is_expired(now));

        for existing in holders.iter() {
            if !mode.compatible_with(existing.mode) || !existing.mode.compatible_with(mode) {
                return Err(KernelError::busy(format!(
                    "{path} is locked ({:?}) by {}",
                    existing.mode, existing.holder
                )));
            }
        }

        let lock = FileLock {
            id: id_gen.next_id(),
            path: path.to_string(),
            holder: agent.clone(),
            mode,
            acquired_at: now,
            expires_at: now + self.default_ttl,
        };
        holders.push(lock.clone());
        info!("{} acquired {:?} lock on {}", agent, mode, path);
        Ok(lock)
    }

    pub async fn release_lock(&self, id: &LockId) -> Result<FileLock> {
        let mut locks = self.locks.write().await;
        for holders in locks.values_mut() {
            if let Some(pos) = holders.iter().position(|l| &l.id == id) {
                let released = holders.remove(pos);
                return Ok(released);
            }
        }
        Err(KernelError::not_found(format!("lock {id} not found")))
    }

    pub async fn release_all_for_agent(&self, agent: &AgentId) -> Vec<FileLock> {
        let mut locks = self.locks.write().await;
        let mut released = Vec::new();
        for holders in locks.values_mut() {
            let (kept, removed): (Vec<_>, Vec<_>) =
                holders.drain(..).partition(|l| &l.holder != agent);
            *holders = kept;
            released.extend(removed);
        }
        released
    }

    pub async fn is_locked(&self, path: &str) -> bool {
        let locks = self.locks.read().await;
        locks.get(path).is_some_and(|h| !h.is_empty())
    }

    pub async fn holders(&self, path: &str) -> Vec<FileLock> {
        let locks = self.locks.read().await;
        locks.get(path).cloned().unwrap_or_default()
    }

    /// Every currently-held lock across all paths, for sync snapshots.
    pub async fn all_locks(&self) -> Vec<FileLock> {
        let locks = self.locks.read().await;
        locks.values().flatten().cloned().collect()
    }

    /// Releases every lock past its expiry and returns the paths affected,
    /// each with the last holder so the caller can record a conflict.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<ExpiredLock> {
        let mut locks = self.locks.write().await;
        let mut expired = Vec::new();
        for (path, holders) in locks.iter_mut() {
            let (kept, removed): (Vec<_>, Vec<_>) =
                holders.drain(..).partition(|l| !l.is_expired(now));
            *holders = kept;
            for lock in removed {
                warn!("Lock {} on {} expired, releasing", lock.id, path);
                expired.push(ExpiredLock {
                    path: path.clone(),
                    last_holder: lock.holder,
                });
            }
        }
        expired
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new(5, std::time::Duration::from_secs(300))
    }
}

pub type SharedLockTable = Arc<LockTable>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::UuidGenerator;

    #[tokio::test]
    async fn read_locks_coexist() {
        let table = LockTable::new(5, std::time::Duration::from_secs(300));
        let id_gen = UuidGenerator;
        let now = Utc::now();
        table
            .request_lock("f.rs", &"a1".to_string(), LockMode::Read, &id_gen, now)
            .await
            .unwrap();
        let second = table
            .request_lock("f.rs", &"a2".to_string(), LockMode::Read, &id_gen, now)
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn write_lock_excludes_others() {
        let table = LockTable::new(5, std::time::Duration::from_secs(300));
        let id_gen = UuidGenerator;
        let now = Utc::now();
        table
            .request_lock("f.rs", &"a1".to_string(), LockMode::Write, &id_gen, now)
            .await
            .unwrap();
        let second = table
            .request_lock("f.rs", &"a2".to_string(), LockMode::Read, &id_gen, now)
            .await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn per_agent_cap_enforced() {
        let table = LockTable::new(1, std::time::Duration::from_secs(300));
        let id_gen = UuidGenerator;
        let now = Utc::now();
        table
            .request_lock("a.rs", &"a1".to_string(), LockMode::Write, &id_gen, now)
            .await
            .unwrap();
        let second = table
            .request_lock("b.rs", &"a1".to_string(), LockMode::Write, &id_gen, now)
            .await;
        assert!(matches!(second, Err(KernelError::Capacity(_))));
    }

    #[tokio::test]
    async fn expired_lock_is_swept_and_released() {
        let table = LockTable::new(5, std::time::Duration::from_secs(0));
        let id_gen = UuidGenerator;
        let now = Utc::now();
        table
            .request_lock("f.rs", &"a1".to_string(), LockMode::Write, &id_gen, now)
            .await
            .unwrap();
        let expired = table.sweep_expired(now + chrono::Duration::seconds(1)).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].last_holder, "a1");
        assert!(!table.is_locked("f.rs").await);
    }
}
