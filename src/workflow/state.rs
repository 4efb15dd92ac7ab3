//! Execution state machine and step-list registration validation (§4.F).

use crate::error::{KernelError, Result};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// Allowed transitions: `pending→{running,cancelled}`,
/// `running→{paused,completed,failed,cancelled}`, `paused→{running,cancelled}`.
pub fn validate_transition(from: ExecutionStatus, to: ExecutionStatus) -> Result<()> {
    use ExecutionStatus::*;
    let allowed = match from {
        Pending => matches!(to, Running | Cancelled),
        Running => matches!(to, Paused | Completed | Failed | Cancelled),
        Paused => matches!(to, Running | Cancelled),
        Completed | Failed | Cancelled => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(KernelError::validation(format!("illegal workflow transition {from:?} -> {to:?}")))
    }
}

/// Validates a declared step list: non-empty, every dependency id resolves
/// to a declared step, and the dependency graph contains no cycle.
pub fn validate_step_ids(ids: &[String], depends_on: &HashMap<String, Vec<String>>) -> Result<()> {
    if ids.is_empty() {
        return Err(KernelError::validation("workflow must declare at least one step"));
    }
    let known: HashSet<&String> = ids.iter().collect();
    for (id, deps) in depends_on {
        for dep in deps {
            if !known.contains(dep) {
                return Err(KernelError::validation(format!("step {id} depends on unknown step {dep}")));
            }
        }
    }

    let mut visiting = HashSet::new();
    let mut done = HashSet::new();
    for id in ids {
        detect_cycle(id, depends_on, &mut visiting, &mut done)?;
    }
    Ok(())
}

fn detect_cycle<'a>(id: &'a str, depends_on: &'a HashMap<String, Vec<String>>, visiting: &mut HashSet<&'a str>, done: &mut HashSet<&'a str>) -> Result<()> {
    if done.contains(id) {
        return Ok(());
    }
    if !visiting.insert(id) {
        return Err(KernelError::validation(format!("workflow step dependency cycle at {id}")));
    }
    if let Some(deps) = depends_on.get(id) {
        for dep in deps {
            detect_cycle(dep, depends_on, visiting, done)?;
        }
    }
    visiting.remove(id);
    done.insert(id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_only_run_or_cancel() {
        assert!(validate_transition(ExecutionStatus::Pending, ExecutionStatus::Running).is_ok());
        assert!(validate_transition(ExecutionStatus::Pending, ExecutionStatus::Completed).is_err());
    }

    #[test]
    fn terminal_states_reject_everything() {
        assert!(validate_transition(ExecutionStatus::Completed, ExecutionStatus::Running).is_err());
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let ids = vec!["a".to_string()];
        let mut deps = HashMap::new();
        deps.insert("a".to_string(), vec!["ghost".to_string()]);
        assert!(validate_step_ids(&ids, &deps).is_err());
    }

    #[test]
    fn cycle_is_rejected() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let mut deps = HashMap::new();
        deps.insert("a".to_string(), vec!["b".to_string()]);
        deps.insert("b".to_string(), vec!["a".to_string()]);
        assert!(validate_step_ids(&ids, &deps).is_err());
    }

    #[test]
    fn empty_step_list_is_rejected() {
        assert!(validate_step_ids(&[], &HashMap::new()).is_err());
    }
}
