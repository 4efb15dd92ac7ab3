//! Execution tracking and reassignment triggers (§4.D).

use crate::models::{AgentId, ExecutionId, TaskId};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
pub struct Execution {
    pub id: ExecutionId,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub started_at: DateTime<Utc>,
    pub expected_end: DateTime<Utc>,
    pub progress: u8,
    pub last_heartbeat: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassignReason {
    Timeout,
    AgentFailure,
}

impl Execution {
    pub fn new(id: ExecutionId, task_id: TaskId, agent_id: AgentId, started_at: DateTime<Utc>, estimated_duration: Duration) -> Self {
        Self {
            id,
            task_id,
            agent_id,
            started_at,
            expected_end: started_at + estimated_duration,
            progress: 0,
            last_heartbeat: started_at,
        }
    }

    pub fn update_progress(&mut self, progress: i32, now: DateTime<Utc>) {
        self.progress = progress.clamp(0, 100) as u8;
        self.last_heartbeat = now;
    }

    /// §4.D timeout trigger: elapsed/estimated > 1.5.
    fn is_timed_out(&self, now: DateTime<Utc>, timeout_ratio: f64) -> bool {
        let estimated = (self.expected_end - self.started_at).num_seconds().max(1) as f64;
        let elapsed = (now - self.started_at).num_seconds() as f64;
        elapsed / estimated > timeout_ratio
    }

    /// §4.D liveness trigger: now - last_heartbeat > N * heartbeat interval.
    fn has_failed_liveness(&self, now: DateTime<Utc>, heartbeat_interval: Duration, multiplier: u64) -> bool {
        now - self.last_heartbeat > heartbeat_interval * multiplier as i32
    }

    pub fn reassign_reason(&self, now: DateTime<Utc>, timeout_ratio: f64, heartbeat_interval: Duration, multiplier: u64) -> Option<ReassignReason> {
        if self.has_failed_liveness(now, heartbeat_interval, multiplier) {
            Some(ReassignReason::AgentFailure)
        } else if self.is_timed_out(now, timeout_ratio) {
            Some(ReassignReason::Timeout)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_fires_past_ratio() {
        let start = Utc::now();
        let execution = Execution::new("e1".to_string(), "t1".to_string(), "a1".to_string(), start, Duration::hours(1));
        let later = start + Duration::minutes(91); // 1.5h into a 1h estimate
        assert_eq!(execution.reassign_reason(later, 1.5, Duration::seconds(30), 3), Some(ReassignReason::Timeout));
    }

    #[test]
    fn liveness_failure_takes_priority_over_timeout() {
        let start = Utc::now();
        let mut execution = Execution::new("e1".to_string(), "t1".to_string(), "a1".to_string(), start, Duration::hours(1));
        execution.last_heartbeat = start;
        let later = start + Duration::minutes(91);
        // heartbeat silent for the whole 91 minutes, interval 30s x3 = 90s
        assert_eq!(
            execution.reassign_reason(later, 1.5, Duration::seconds(30), 3),
            Some(ReassignReason::AgentFailure)
        );
    }

    #[test]
    fn progress_clamps_to_100() {
        let mut execution = Execution::new("e1".to_string(), "t1".to_string(), "a1".to_string(), Utc::now(), Duration::hours(1));
        execution.update_progress(150, Utc::now());
        assert_eq!(execution.progress, 100);
    }

    #[test]
    fn progress_clamps_negative_to_zero() {
        let mut execution = Execution::new("e1".to_string(), "t1".to_string(), "a1".to_string(), Utc::now(), Duration::hours(1));
        execution.update_progress(-10, Utc::now());
        assert_eq!(execution.progress, 0);
    }
}
