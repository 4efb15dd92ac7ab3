//! Conflict detection and resolution (§4.B priority table).

use super::history::{ChangeHistory, ChangeKind, ChangeRecord};
use crate::error::{KernelError, Result};
use crate::models::{AgentId, ConflictId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    ConcurrentModification,
    LockTimeout,
    MergeConflict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub strategy: String,
    pub resolved_by: AgentId,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    pub path: String,
    pub kind: ConflictKind,
    pub involved_agents: Vec<AgentId>,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolution: Option<Resolution>,
}

struct Rule {
    kind: ConflictKind,
    priority: u32,
}

/// Evaluates the three built-in rules against a path's recent change
/// history, in priority order, returning the first that fires.
fn evaluate_rules(changes: &[ChangeRecord], acting_agent: &AgentId, now: DateTime<Utc>) -> Option<(ConflictKind, String, Vec<AgentId>)> {
    let rules = [
        Rule { kind: ConflictKind::LockTimeout, priority: 100 },
        Rule { kind: ConflictKind::MergeConflict, priority: 90 },
        Rule { kind: ConflictKind::ConcurrentModification, priority: 70 },
    ];

    let other_agent_changes = |window: chrono::Duration| -> Vec<&ChangeRecord> {
        changes
            .iter()
            .filter(|c| &c.agent != acting_agent)
            .filter(|c| now.signed_duration_since(c.timestamp) <= window)
            .collect()
    };

    for rule in &rules {
        match rule.kind {
            ConflictKind::LockTimeout => {
                let window = other_agent_changes(chrono::Duration::seconds(
                    crate::constants::CONFLICT_LOCK_TIMEOUT_WINDOW_SECS,
                ));
                if window.len() >= crate::constants::CONFLICT_LOCK_TIMEOUT_MIN_CHANGES {
                    let agents: Vec<AgentId> = window.iter().map(|c| c.agent.clone()).collect();
                    return Some((
                        rule.kind,
                        format!("{} changes by other agents within 1s", window.len()),
                        agents,
                    ));
                }
            }
            ConflictKind::MergeConflict => {
                let merge_window = chrono::Duration::seconds(crate::constants::CONFLICT_MERGE_WINDOW_SECS);
                let min_gap = chrono::Duration::seconds(crate::constants::CONFLICT_MERGE_MIN_GAP_SECS);
                let hit = changes.iter().find(|c| {
                    &c.agent != acting_agent
                        && c.kind == ChangeKind::Modified
                        && now.signed_duration_since(c.timestamp) <= merge_window
                        && now.signed_duration_since(c.timestamp) > min_gap
                });
                if let Some(change) = hit {
                    return Some((
                        rule.kind,
                        "another agent's modification within the merge window".to_string(),
                        vec![change.agent.clone()],
                    ));
                }
            }
            ConflictKind::ConcurrentModification => {
                let window = chrono::Duration::seconds(crate::constants::CONFLICT_CONCURRENT_WINDOW_SECS);
                let hits: Vec<&ChangeRecord> = changes
                    .iter()
                    .filter(|c| {
                        &c.agent != acting_agent
                            && c.kind == ChangeKind::Modified
                            && now.signed_duration_since(c.timestamp) <= window
                    })
                    .collect();
                if (1..=2).contains(&hits.len()) {
                    let agents: Vec<AgentId> = hits.iter().map(|c| c.agent.clone()).collect();
                    return Some((
                        rule.kind,
                        format!("{} concurrent modification(s) within 5s", hits.len()),
                        agents,
                    ));
                }
            }
        }
    }
    None
}

pub struct ConflictTracker {
    conflicts: Mutex<HashMap<ConflictId, Conflict>>,
}

impl ConflictTracker {
    pub fn new() -> Self {
        Self {
            conflicts: Mutex::new(HashMap::new()),
        }
    }

    /// Runs the rule set against `path`'s recent history on every new
    /// change, recording a conflict if one fires.
    pub async fn detect(
        &self,
        id_gen: &dyn crate::capabilities::IdGenerator,
        history: &ChangeHistory,
        path: &str,
        acting_agent: &AgentId,
        now: DateTime<Utc>,
    ) -> Option<Conflict> {
        let recent = history
            .recent_changes(path, chrono::Duration::seconds(crate::constants::CONFLICT_MERGE_WINDOW_SECS), now)
            .await;
        let (kind, description, mut involved) = evaluate_rules(&recent, acting_agent, now)?;
        involved.push(acting_agent.clone());
        involved.sort();
        involved.dedup();

        let conflict = Conflict {
            id: id_gen.next_id(),
            path: path.to_string(),
            kind,
            involved_agents: involved,
            description,
            created_at: now,
            resolved: false,
            resolution: None,
        };
        self.conflicts.lock().await.insert(conflict.id.clone(), conflict.clone());
        info!("Detected {:?} conflict on {}: {}", conflict.kind, path, conflict.description);
        Some(conflict)
    }

    pub async fn record_lock_timeout(
        &self,
        id_gen: &dyn crate::capabilities::IdGenerator,
        path: &str,
        last_holder: &AgentId,
        now: DateTime<Utc>,
    ) -> Conflict {
        let conflict = Conflict {
            id: id_gen.next_id(),
            path: path.to_string(),
            kind: ConflictKind::LockTimeout,
            involved_agents: vec![last_holder.clone()],
            description: format!("lock held by {last_holder} expired"),
            created_at: now,
            resolved: false,
            resolution: None,
        };
        self.conflicts.lock().await.insert(conflict.id.clone(), conflict.clone());
        conflict
    }

    pub async fn get(&self, id: &ConflictId) -> Option<Conflict> {
        self.conflicts.lock().await.get(id).cloned()
    }

    pub async fn list_for_path(&self, path: &str) -> Vec<Conflict> {
        self.conflicts
            .lock()
            .await
            .values()
            .filter(|c| c.path == path)
            .cloned()
            .collect()
    }

    /// Applies a named resolution strategy. `auto_merge` and `overwrite`
    /// both accept the latest change as canonical; `manual` just marks the
    /// conflict pending-human without flipping `resolved`.
    pub async fn resolve(&self, id: &ConflictId, strategy: &str, resolved_by: AgentId, now: DateTime<Utc>) -> Result<Conflict> {
        let mut conflicts = self.conflicts.lock().await;
        let conflict = conflicts
            .get_mut(id)
            .ok_or_else(|| KernelError::not_found(format!("conflict {id} not found")))?;

        let action = match strategy {
            "auto_merge" => {
                if !matches!(conflict.kind, ConflictKind::ConcurrentModification | ConflictKind::MergeConflict) {
                    return Err(KernelError::validation(format!(
                        "auto_merge is not applicable to {:?}",
                        conflict.kind
                    )));
                }
                conflict.resolved = true;
                "accepted latest change".to_string()
            }
            "overwrite" => {
                if conflict.kind != ConflictKind::LockTimeout {
                    return Err(KernelError::validation("overwrite is only valid for lock_timeout conflicts"));
                }
                conflict.resolved = true;
                "overwrote stale lock holder's state".to_string()
            }
            "manual" => "flagged for manual resolution".to_string(),
            other => {
                return Err(KernelError::validation(format!("unknown resolution strategy: {other}")));
            }
        };

        conflict.resolution = Some(Resolution {
            strategy: strategy.to_string(),
            resolved_by,
            action,
            timestamp: now,
        });
        Ok(conflict.clone())
    }
}

impl Default for ConflictTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedConflictTracker = Arc<ConflictTracker>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::UuidGenerator;
    use crate::files::history::ChangeHistory;

    #[tokio::test]
    async fn concurrent_modification_detected() {
        let history = ChangeHistory::new(100, 10);
        let id_gen = UuidGenerator;
        let now = Utc::now();
        history
            .record_change("c0".to_string(), "f.rs", "other".to_string(), ChangeKind::Modified, None, now)
            .await;

        let tracker = ConflictTracker::new();
        let conflict = tracker
            .detect(&id_gen, &history, "f.rs", &"me".to_string(), now)
            .await;
        assert!(conflict.is_some());
        assert_eq!(conflict.unwrap().kind, ConflictKind::ConcurrentModification);
    }

    #[tokio::test]
    async fn no_conflict_with_only_own_changes() {
        let history = ChangeHistory::new(100, 10);
        let id_gen = UuidGenerator;
        let now = Utc::now();
        history
            .record_change("c0".to_string(), "f.rs", "me".to_string(), ChangeKind::Modified, None, now)
            .await;
        let tracker = ConflictTracker::new();
        let conflict = tracker.detect(&id_gen, &history, "f.rs", &"me".to_string(), now).await;
        assert!(conflict.is_none());
    }

    #[tokio::test]
    async fn overwrite_rejected_for_wrong_kind() {
        let history = ChangeHistory::new(100, 10);
        let id_gen = UuidGenerator;
        let now = Utc::now();
        history
            .record_change("c0".to_string(), "f.rs", "other".to_string(), ChangeKind::Modified, None, now)
            .await;
        let tracker = ConflictTracker::new();
        let conflict = tracker
            .detect(&id_gen, &history, "f.rs", &"me".to_string(), now)
            .await
            .unwrap();
        let result = tracker.resolve(&conflict.id, "overwrite", "me".to_string(), now).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn auto_merge_resolves_concurrent_modification() {
        let history = ChangeHistory::new(100, 10);
        let id_gen = UuidGenerator;
        let now = Utc::now();
        history
            .record_change("c0".to_string(), "f.rs", "other".to_string(), ChangeKind::Modified, None, now)
            .await;
        let tracker = ConflictTracker::new();
        let conflict = tracker
            .detect(&id_gen, &history, "f.rs", &"me".to_string(), now)
            .await
            .unwrap();
        let resolved = tracker
            .resolve(&conflict.id, "auto_merge", "me".to_string(), now)
            .await
            .unwrap();
        assert!(resolved.resolved);
    }
}
