//! Cross-cutting types shared by every subsystem.
//!
//! Per the ownership rules, each subsystem owns its own record types
//! (`Task` lives in [`crate::tasks`], `Message` in [`crate::bus`], and so
//! on). This module holds only the handful of enums and id aliases that
//! genuinely cross component boundaries.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Opaque identifiers. All cross-component references are by id.
pub type AgentId = String;
pub type TaskId = String;
pub type SessionId = String;
pub type MessageId = String;
pub type ExecutionId = String;
pub type AlertId = String;
pub type LockId = String;
pub type ConflictId = String;
pub type ChangeId = String;
pub type WorkflowId = String;

/// Specialized agent roles the kernel can route work to.
///
/// `CodeReview` and `DevOps` round out the set the design notes flag as
/// present in decomposition but missing from the original scoring table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentType {
    Frontend,
    Backend,
    Testing,
    Documentation,
    CodeReview,
    DevOps,
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "frontend" => Ok(AgentType::Frontend),
            "backend" => Ok(AgentType::Backend),
            "testing" => Ok(AgentType::Testing),
            "documentation" => Ok(AgentType::Documentation),
            "code_review" | "codereview" => Ok(AgentType::CodeReview),
            "devops" => Ok(AgentType::DevOps),
            _ => Err(format!("unknown agent type: {s}")),
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentType::Frontend => "frontend",
            AgentType::Backend => "backend",
            AgentType::Testing => "testing",
            AgentType::Documentation => "documentation",
            AgentType::CodeReview => "code_review",
            AgentType::DevOps => "devops",
        };
        write!(f, "{s}")
    }
}

/// Task priority; ordinal value doubles as the scoring scale (§4.D: `task.priority / CRITICAL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Priority {
    pub fn as_f64(self) -> f64 {
        self as u8 as f64
    }

    /// Maps an accumulated priority score onto the enum per the thresholds
    /// in §4.C ("≥4 critical, ≥3 high, ≥2 medium, else low").
    pub fn from_score(score: f64) -> Self {
        if score >= 4.0 {
            Priority::Critical
        } else if score >= 3.0 {
            Priority::High
        } else if score >= 2.0 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

/// Alert severity used by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}
