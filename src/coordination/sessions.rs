//! Collaboration sessions (§3, §4.G): a set of agents sharing a channel
//! and a set of file paths. A session ends on its own once its last
//! participant leaves.

use crate::error::{KernelError, Result};
use crate::models::{AgentId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationSession {
    pub id: SessionId,
    pub participants: Vec<AgentId>,
    pub shared_paths: Vec<String>,
    pub channel: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: HashMap<SessionId, CollaborationSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| s.status == SessionStatus::Active).count()
    }

    pub fn start(&mut self, id: SessionId, participants: Vec<AgentId>, shared_paths: Vec<String>, channel: String, now: DateTime<Utc>) -> CollaborationSession {
        let session = CollaborationSession {
            id: id.clone(),
            participants,
            shared_paths,
            channel,
            status: SessionStatus::Active,
            started_at: now,
            ended_at: None,
        };
        self.sessions.insert(id, session.clone());
        session
    }

    pub fn get(&self, id: &SessionId) -> Result<&CollaborationSession> {
        self.sessions.get(id).ok_or_else(|| KernelError::not_found(format!("session {id} not found")))
    }

    pub fn join(&mut self, id: &SessionId, agent: AgentId) -> Result<()> {
        let session = self.sessions.get_mut(id).ok_or_else(|| KernelError::not_found(format!("session {id} not found")))?;
        if !session.participants.contains(&agent) {
            session.participants.push(agent);
        }
        Ok(())
    }

    /// Removes `agent` from the session; ends it if participants become
    /// empty. Returns whether the session ended as a result.
    pub fn leave(&mut self, id: &SessionId, agent: &AgentId, now: DateTime<Utc>) -> Result<bool> {
        let session = self.sessions.get_mut(id).ok_or_else(|| KernelError::not_found(format!("session {id} not found")))?;
        session.participants.retain(|p| p != agent);
        let ended = session.participants.is_empty() && session.status == SessionStatus::Active;
        if ended {
            session.status = SessionStatus::Completed;
            session.ended_at = Some(now);
        }
        Ok(ended)
    }

    pub fn end(&mut self, id: &SessionId, now: DateTime<Utc>) -> Result<()> {
        let session = self.sessions.get_mut(id).ok_or_else(|| KernelError::not_found(format!("session {id} not found")))?;
        session.status = SessionStatus::Completed;
        session.ended_at = Some(now);
        Ok(())
    }

    pub fn all(&self) -> Vec<CollaborationSession> {
        self.sessions.values().cloned().collect()
    }

    /// Active sessions `agent` currently participates in, for agent
    /// teardown during `destroy_agent`.
    pub fn sessions_for_agent(&self, agent: &AgentId) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active && s.participants.contains(agent))
            .map(|s| s.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ends_when_last_participant_leaves() {
        let mut store = SessionStore::new();
        let id = "s1".to_string();
        store.start(id.clone(), vec!["a1".to_string()], vec![], "general".to_string(), Utc::now());

        let ended = store.leave(&id, &"a1".to_string(), Utc::now()).unwrap();
        assert!(ended);
        assert_eq!(store.get(&id).unwrap().status, SessionStatus::Completed);
    }

    #[test]
    fn session_survives_partial_departure() {
        let mut store = SessionStore::new();
        let id = "s1".to_string();
        store.start(id.clone(), vec!["a1".to_string(), "a2".to_string()], vec![], "general".to_string(), Utc::now());

        let ended = store.leave(&id, &"a1".to_string(), Utc::now()).unwrap();
        assert!(!ended);
        assert_eq!(store.get(&id).unwrap().status, SessionStatus::Active);
    }

    #[test]
    fn join_is_idempotent() {
        let mut store = SessionStore::new();
        let id = "s1".to_string();
        store.start(id.clone(), vec!["a1".to_string()], vec![], "general".to_string(), Utc::now());
        store.join(&id, "a1".to_string()).unwrap();
        assert_eq!(store.get(&id).unwrap().participants.len(), 1);
    }
}
