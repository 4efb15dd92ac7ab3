//! Per-agent health metrics and the success/failure scoring update (§4.E).

use crate::constants::{HEALTH_SCORE_FAILURE_DELTA, HEALTH_SCORE_MAX, HEALTH_SCORE_MIN, HEALTH_SCORE_SUCCESS_DELTA};
use crate::models::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent_id: AgentId,
    pub healthy: bool,
    pub last_check: DateTime<Utc>,
    pub last_response_ms: u64,
    pub error_count: u32,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub uptime_secs: i64,
    pub health_score: i32,
    pub last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl AgentHealth {
    pub fn new(agent_id: AgentId, now: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            healthy: true,
            last_check: now,
            last_response_ms: 0,
            error_count: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            uptime_secs: 0,
            health_score: HEALTH_SCORE_MAX,
            last_error: None,
            created_at: now,
        }
    }

    /// Returns true if this check's success transitioned the agent from
    /// unhealthy back to healthy (caller should resolve open alerts).
    pub fn record_success(&mut self, response_ms: u64, now: DateTime<Utc>, recovery_threshold: u32) -> bool {
        self.last_check = now;
        self.last_response_ms = response_ms;
        self.uptime_secs = (now - self.created_at).num_seconds();
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
        self.health_score = (self.health_score + HEALTH_SCORE_SUCCESS_DELTA).min(HEALTH_SCORE_MAX);

        let was_unhealthy = !self.healthy;
        if was_unhealthy && self.consecutive_successes >= recovery_threshold {
            self.healthy = true;
            return true;
        }
        false
    }

    /// Returns true once failures reach `failure_threshold` — every such
    /// probe invokes recovery, since the ladder's chosen action depends on
    /// the current (still climbing) consecutive-failure count.
    pub fn record_failure(&mut self, error: impl Into<String>, now: DateTime<Utc>, failure_threshold: u32) -> bool {
        self.last_check = now;
        self.error_count += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
        self.health_score = (self.health_score - HEALTH_SCORE_FAILURE_DELTA).max(HEALTH_SCORE_MIN);
        self.last_error = Some(error.into());
        self.healthy = self.healthy && self.consecutive_failures < failure_threshold;

        self.consecutive_failures >= failure_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_threshold_transitions_to_unhealthy() {
        let now = Utc::now();
        let mut health = AgentHealth::new("a1".to_string(), now);
        assert!(!health.record_failure("e", now, 3));
        assert!(!health.record_failure("e", now, 3));
        assert!(health.record_failure("e", now, 3));
        assert!(!health.healthy);
    }

    #[test]
    fn recovery_threshold_transitions_back_to_healthy() {
        let now = Utc::now();
        let mut health = AgentHealth::new("a1".to_string(), now);
        health.record_failure("e", now, 1);
        assert!(!health.healthy);
        assert!(!health.record_success(5, now, 2));
        assert!(health.record_success(5, now, 2));
        assert!(health.healthy);
    }

    #[test]
    fn score_is_clamped_to_bounds() {
        let now = Utc::now();
        let mut health = AgentHealth::new("a1".to_string(), now);
        for _ in 0..20 {
            health.record_failure("e", now, 100);
        }
        assert_eq!(health.health_score, HEALTH_SCORE_MIN);
    }
}
