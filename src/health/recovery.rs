//! Recovery strategy ladder and alerts (§4.E).

use crate::constants::{HEALTH_SCORE_REPLACE_THRESHOLD, RECOVERY_RESET_FAILURE_CEILING, RECOVERY_RESTART_FAILURE_CEILING};
use crate::models::{AgentId, AlertId, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryAction {
    Restart,
    Reset,
    Replace,
    Escalate,
}

/// Chooses the ladder rung by current consecutive-failure count and
/// health score (§4.E table).
pub fn choose_recovery_action(consecutive_failures: u32, health_score: i32) -> RecoveryAction {
    if consecutive_failures < RECOVERY_RESTART_FAILURE_CEILING {
        RecoveryAction::Restart
    } else if consecutive_failures < RECOVERY_RESET_FAILURE_CEILING {
        RecoveryAction::Reset
    } else if health_score < HEALTH_SCORE_REPLACE_THRESHOLD {
        RecoveryAction::Replace
    } else {
        RecoveryAction::Escalate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    HealthDegraded,
    AgentUnresponsive,
    HighErrorRate,
    PerformanceDegraded,
    RecoveryFailed,
    AgentOffline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub agent_id: AgentId,
    pub severity: Severity,
    pub alert_type: AlertType,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_escalates_with_failure_count() {
        assert_eq!(choose_recovery_action(2, 80), RecoveryAction::Restart);
        assert_eq!(choose_recovery_action(7, 80), RecoveryAction::Reset);
        assert_eq!(choose_recovery_action(12, 10), RecoveryAction::Replace);
        assert_eq!(choose_recovery_action(12, 80), RecoveryAction::Escalate);
    }
}
