//! Change history: per-path ring of change records, change analysis
//! (line diff + Jaccard similarity), and content-hashed snapshots (§4.B).

use crate::models::{AgentId, ChangeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeAnalysis {
    pub lines_added: usize,
    pub lines_removed: usize,
    pub lines_modified: usize,
    pub regions: Vec<(usize, usize)>,
    pub jaccard_similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: ChangeId,
    pub path: String,
    pub agent: AgentId,
    pub kind: ChangeKind,
    pub timestamp: DateTime<Utc>,
    pub analysis: Option<ChangeAnalysis>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub id: String,
    pub path: String,
    pub content: Vec<u8>,
    pub content_hash: String,
    pub size: u64,
    pub agent: AgentId,
    pub timestamp: DateTime<Utc>,
}

fn content_hash(bytes: &[u8]) -> String {
    // FNV-1a: cheap, dependency-free, sufficient for dedup/snapshot identity.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}

fn lines_of(content: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(content)
        .lines()
        .map(|l| l.to_string())
        .collect()
}

/// Line-diff producing add/remove/modify counts, contiguous change regions,
/// and the Jaccard similarity of the two files' line sets.
fn analyze_change(previous: &[u8], current: &[u8]) -> ChangeAnalysis {
    let prev_lines = lines_of(previous);
    let curr_lines = lines_of(current);

    let prev_set: HashSet<&String> = prev_lines.iter().collect();
    let curr_set: HashSet<&String> = curr_lines.iter().collect();
    let intersection = prev_set.intersection(&curr_set).count();
    let union = prev_set.union(&curr_set).count();
    let jaccard_similarity = if union == 0 { 1.0 } else { intersection as f64 / union as f64 };

    let max_len = prev_lines.len().max(curr_lines.len());
    let mut added = 0;
    let mut removed = 0;
    let mut modified = 0;
    let mut regions = Vec::new();
    let mut region_start: Option<usize> = None;

    for i in 0..max_len {
        let prev_line = prev_lines.get(i);
        let curr_line = curr_lines.get(i);
        let changed = prev_line != curr_line;
        match (prev_line, curr_line) {
            (Some(_), None) => removed += 1,
            (None, Some(_)) => added += 1,
            (Some(_), Some(_)) if changed => modified += 1,
            _ => {}
        }
        if changed {
            region_start.get_or_insert(i);
        } else if let Some(start) = region_start.take() {
            regions.push((start, i - 1));
        }
    }
    if let Some(start) = region_start {
        regions.push((start, max_len.saturating_sub(1)));
    }

    ChangeAnalysis {
        lines_added: added,
        lines_removed: removed,
        lines_modified: modified,
        regions,
        jaccard_similarity,
    }
}

struct PathHistory {
    changes: VecDeque<ChangeRecord>,
    snapshots: VecDeque<FileSnapshot>,
}

impl Default for PathHistory {
    fn default() -> Self {
        Self {
            changes: VecDeque::new(),
            snapshots: VecDeque::new(),
        }
    }
}

pub struct ChangeHistory {
    by_path: Mutex<HashMap<String, PathHistory>>,
    change_cap: usize,
    snapshot_cap: usize,
}

impl ChangeHistory {
    pub fn new(change_cap: usize, snapshot_cap: usize) -> Self {
        Self {
            by_path: Mutex::new(HashMap::new()),
            change_cap,
            snapshot_cap,
        }
    }

    /// Records a change, running change analysis against the latest
    /// snapshot if one exists, then takes a new content-hashed snapshot.
    pub async fn record_change(
        &self,
        id: ChangeId,
        path: &str,
        agent: AgentId,
        kind: ChangeKind,
        content: Option<&[u8]>,
        timestamp: DateTime<Utc>,
    ) -> ChangeRecord {
        let mut by_path = self.by_path.lock().await;
        let entry = by_path.entry(path.to_string()).or_default();

        let analysis = match (kind, content, entry.snapshots.back()) {
            (ChangeKind::Modified, Some(current), Some(previous)) => {
                Some(analyze_change(&previous.content, current))
            }
            _ => None,
        };

        let record = ChangeRecord {
            id,
            path: path.to_string(),
            agent: agent.clone(),
            kind,
            timestamp,
            analysis,
        };

        if entry.changes.len() >= self.change_cap {
            entry.changes.pop_front();
        }
        entry.changes.push_back(record.clone());

        if let Some(content) = content {
            let snapshot = FileSnapshot {
                id: format!("{path}:{}", entry.snapshots.len()),
                path: path.to_string(),
                content: content.to_vec(),
                content_hash: content_hash(content),
                size: content.len() as u64,
                agent,
                timestamp,
            };
            if entry.snapshots.len() >= self.snapshot_cap {
                entry.snapshots.pop_front();
            }
            entry.snapshots.push_back(snapshot);
        }

        record
    }

    pub async fn history(&self, path: &str) -> Vec<ChangeRecord> {
        let by_path = self.by_path.lock().await;
        by_path
            .get(path)
            .map(|h| h.changes.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn recent_changes(&self, path: &str, within: chrono::Duration, now: DateTime<Utc>) -> Vec<ChangeRecord> {
        self.history(path)
            .await
            .into_iter()
            .filter(|c| now.signed_duration_since(c.timestamp) <= within)
            .collect()
    }

    pub async fn latest_snapshot(&self, path: &str) -> Option<FileSnapshot> {
        let by_path = self.by_path.lock().await;
        by_path.get(path).and_then(|h| h.snapshots.back().cloned())
    }
}

impl Default for ChangeHistory {
    fn default() -> Self {
        Self::new(100, 10)
    }
}

pub type SharedChangeHistory = Arc<ChangeHistory>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn change_ring_drops_oldest_beyond_cap() {
        let history = ChangeHistory::new(2, 10);
        for i in 0..3 {
            history
                .record_change(
                    format!("c{i}"),
                    "f.rs",
                    "a1".to_string(),
                    ChangeKind::Modified,
                    None,
                    Utc::now(),
                )
                .await;
        }
        let records = history.history("f.rs").await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "c1");
    }

    #[tokio::test]
    async fn analysis_runs_against_previous_snapshot() {
        let history = ChangeHistory::new(100, 10);
        history
            .record_change(
                "c0".to_string(),
                "f.rs",
                "a1".to_string(),
                ChangeKind::Created,
                Some(b"line1\nline2\n"),
                Utc::now(),
            )
            .await;
        let record = history
            .record_change(
                "c1".to_string(),
                "f.rs",
                "a1".to_string(),
                ChangeKind::Modified,
                Some(b"line1\nline2 changed\nline3\n"),
                Utc::now(),
            )
            .await;
        let analysis = record.analysis.expect("expected analysis on modified change");
        assert_eq!(analysis.lines_added, 1);
        assert!(analysis.jaccard_similarity < 1.0);
    }

    #[test]
    fn hashes_are_stable() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
        assert_ne!(content_hash(b"hello"), content_hash(b"world"));
    }
}
