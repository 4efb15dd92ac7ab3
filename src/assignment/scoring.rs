//! Candidate scoring formula (§4.D). The Assignment Engine keeps its own
//! lightweight snapshot of each agent rather than reaching into the
//! Coordination Manager's agent map (§3 ownership).

use crate::config::AssignmentConfig;
use crate::models::{AgentId, AgentType, Priority};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub agent_id: AgentId,
    pub agent_type: AgentType,
    pub capabilities: Vec<String>,
    pub current_tasks: u32,
    pub max_tasks: u32,
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentInfo {
    pub fn is_at_capacity(&self) -> bool {
        self.current_tasks >= self.max_tasks
    }

    fn load_fraction(&self) -> f64 {
        if self.max_tasks == 0 {
            1.0
        } else {
            self.current_tasks as f64 / self.max_tasks as f64
        }
    }
}

/// What the scoring function needs to know about the candidate task;
/// deliberately a snapshot, not a reference into the Task Manager's map.
pub struct TaskSnapshot<'a> {
    pub task_id: &'a str,
    pub task_type_key: &'a str,
    pub priority: Priority,
    pub estimated_hours: f64,
    pub requirements: &'a [String],
}

#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    pub total: f64,
    pub specialization: f64,
    pub load: f64,
    pub capability: f64,
    pub priority: f64,
    pub time: f64,
    pub performance: f64,
}

/// Returns 1.0 if the task type's mapped agent-type set contains this
/// agent's type, else 0.3. `code_review`/`devops` are included per the
/// design's resolved scoring gap.
pub fn specialization_score(task_type_key: &str, agent_type: AgentType) -> f64 {
    let matches = match task_type_key {
        "frontend" => agent_type == AgentType::Frontend,
        "backend" => agent_type == AgentType::Backend,
        "testing" => agent_type == AgentType::Testing,
        "documentation" => agent_type == AgentType::Documentation,
        "code_review" => agent_type == AgentType::CodeReview,
        "devops" => agent_type == AgentType::DevOps,
        _ => false,
    };
    if matches {
        1.0
    } else {
        0.3
    }
}

/// Fraction of task requirement strings that appear as a substring of, or
/// contain, any agent capability. No requirements defaults to 0.5.
pub fn capability_match(requirements: &[String], capabilities: &[String]) -> f64 {
    if requirements.is_empty() {
        return 0.5;
    }
    let matched = requirements
        .iter()
        .filter(|req| {
            let req = req.to_lowercase();
            capabilities.iter().any(|cap| {
                let cap = cap.to_lowercase();
                cap.contains(&req) || req.contains(&cap)
            })
        })
        .count();
    matched as f64 / requirements.len() as f64
}

pub fn time_score(estimated_hours: f64, current_tasks: u32) -> f64 {
    let duration_component = (1.0 - estimated_hours / 8.0).max(0.0);
    let load_component = (1.0 - current_tasks as f64 * 0.2).max(0.1);
    duration_component * load_component
}

/// 0.7 * task-type-specific success rate + 0.3 * overall success rate,
/// defaulting both to 0.5 when absent.
pub fn historical_score(task_type_key: &str, specialization_rates: &HashMap<String, f64>, overall_rate: Option<f64>) -> f64 {
    let specific = specialization_rates.get(task_type_key).copied().unwrap_or(0.5);
    let overall = overall_rate.unwrap_or(0.5);
    0.7 * specific + 0.3 * overall
}

#[allow(clippy::too_many_arguments)]
pub fn score_candidate(
    config: &AssignmentConfig,
    task: &TaskSnapshot,
    agent: &AgentInfo,
    specialization_rates: &HashMap<String, f64>,
    overall_rate: Option<f64>,
) -> ScoreBreakdown {
    let specialization = specialization_score(task.task_type_key, agent.agent_type);
    let load = 1.0 - agent.load_fraction();
    let capability = capability_match(task.requirements, &agent.capabilities);
    let priority = task.priority.as_f64() / Priority::Critical.as_f64();
    let time = time_score(task.estimated_hours, agent.current_tasks);
    let performance = historical_score(task.task_type_key, specialization_rates, overall_rate);

    let total = config.weight_specialization * specialization
        + config.weight_load * load
        + config.weight_capability * capability
        + config.weight_priority * priority
        + config.weight_time * time
        + config.weight_performance * performance;

    ScoreBreakdown { total, specialization, load, capability, priority, time, performance }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specialization_rewards_matching_agent_type() {
        assert_eq!(specialization_score("frontend", AgentType::Frontend), 1.0);
        assert_eq!(specialization_score("frontend", AgentType::Backend), 0.3);
    }

    #[test]
    fn capability_match_defaults_to_half_with_no_requirements() {
        assert_eq!(capability_match(&[], &["rust".to_string()]), 0.5);
    }

    #[test]
    fn capability_match_finds_substring_overlap() {
        let reqs = vec!["rust".to_string()];
        let caps = vec!["rust-backend".to_string()];
        assert_eq!(capability_match(&reqs, &caps), 1.0);
    }

    #[test]
    fn time_score_penalizes_long_tasks_and_busy_agents() {
        let short_idle = time_score(1.0, 0);
        let long_busy = time_score(7.0, 4);
        assert!(short_idle > long_busy);
    }

    #[test]
    fn historical_score_defaults_to_half_when_absent() {
        let rates = HashMap::new();
        assert_eq!(historical_score("frontend", &rates, None), 0.5);
    }
}
