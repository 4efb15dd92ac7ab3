//! Workflow step declarations and the per-step retry bookkeeping (§4.F).

use crate::error::Result;
use crate::models::AgentType;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// An in-process closure for system-typed steps. Boxed so a workflow can
/// carry a heterogeneous list of steps without a generic parameter leaking
/// into every caller.
pub type SystemAction = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone)]
pub enum StepAction {
    System(SystemAction),
    Agent(AgentType),
}

impl std::fmt::Debug for StepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepAction::System(_) => write!(f, "StepAction::System(..)"),
            StepAction::Agent(t) => write!(f, "StepAction::Agent({t:?})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Waiting,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StepParams {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

pub struct Step {
    pub id: String,
    pub name: String,
    pub action: StepAction,
    pub agent_type: Option<AgentType>,
    pub depends_on: Vec<String>,
    pub params: StepParams,
    pub status: StepStatus,
    pub retry_count: u32,
}

impl Step {
    pub fn new(id: impl Into<String>, name: impl Into<String>, action: StepAction, depends_on: Vec<String>, params: StepParams) -> Self {
        let agent_type = match &action {
            StepAction::Agent(t) => Some(*t),
            StepAction::System(_) => None,
        };
        Self { id: id.into(), name: name.into(), action, agent_type, depends_on, params, status: StepStatus::Waiting, retry_count: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_step_derives_its_agent_type() {
        let step = Step::new("s1", "review", StepAction::Agent(AgentType::CodeReview), vec![], StepParams::default());
        assert_eq!(step.agent_type, Some(AgentType::CodeReview));
    }

    #[test]
    fn system_step_has_no_agent_type() {
        let action: SystemAction = Arc::new(|| Box::pin(async { Ok(()) }));
        let step = Step::new("s1", "noop", StepAction::System(action), vec![], StepParams::default());
        assert_eq!(step.agent_type, None);
    }
}
