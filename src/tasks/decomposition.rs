//! Rule-driven decomposition: requirement text -> a small seed DAG
//! (§4.C). Deterministic and pluggable — swapping this module for a
//! learned one is explicitly out of scope (spec non-goals).

use super::TaskType;
use crate::models::Priority;
use chrono::Duration;

#[derive(Debug, Clone)]
pub struct DecomposedTask {
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub estimated_duration: Duration,
    pub affected_paths: Vec<String>,
    pub requirements: Vec<String>,
    /// Testing tasks depend on every non-testing task emitted in the same
    /// decomposition call; the caller wires the edges once ids exist.
    pub depends_on_siblings: bool,
}

struct Archetype {
    keywords: &'static [&'static str],
    task_type: TaskType,
    title: &'static str,
    priority: Priority,
    duration_hours: i64,
    default_paths: &'static [&'static str],
    depends_on_siblings: bool,
}

const ARCHETYPES: &[Archetype] = &[
    Archetype {
        keywords: &["frontend", "ui", "component", "screen", "page"],
        task_type: TaskType::Frontend,
        title: "Implement frontend changes",
        priority: Priority::High,
        duration_hours: 2,
        default_paths: &["src/components/"],
        depends_on_siblings: false,
    },
    Archetype {
        keywords: &["backend", "api", "server", "endpoint", "database"],
        task_type: TaskType::Backend,
        title: "Implement backend changes",
        priority: Priority::High,
        duration_hours: 3,
        default_paths: &["src/api/"],
        depends_on_siblings: false,
    },
    Archetype {
        keywords: &["review", "code review", "pr review"],
        task_type: TaskType::CodeReview,
        title: "Review changes",
        priority: Priority::Medium,
        duration_hours: 1,
        default_paths: &[],
        depends_on_siblings: false,
    },
    Archetype {
        keywords: &["deploy", "devops", "infra", "pipeline", "ci/cd"],
        task_type: TaskType::DevOps,
        title: "Handle deployment/infrastructure changes",
        priority: Priority::High,
        duration_hours: 2,
        default_paths: &[".github/workflows/"],
        depends_on_siblings: false,
    },
    Archetype {
        keywords: &["document", "docs", "readme"],
        task_type: TaskType::Documentation,
        title: "Write documentation",
        priority: Priority::Low,
        duration_hours: 1,
        default_paths: &["docs/"],
        depends_on_siblings: false,
    },
    Archetype {
        keywords: &["test", "testing", "spec", "coverage"],
        task_type: TaskType::Testing,
        title: "Write tests",
        priority: Priority::Medium,
        duration_hours: 0, // overridden below (1.5h doesn't divide evenly)
        default_paths: &["tests/"],
        depends_on_siblings: true,
    },
];

pub fn decompose(requirement: &str) -> Vec<DecomposedTask> {
    let lower = requirement.to_lowercase();
    let mut tasks = Vec::new();

    for archetype in ARCHETYPES {
        if archetype.keywords.iter().any(|kw| lower.contains(kw)) {
            let duration = if archetype.task_type == TaskType::Testing {
                Duration::minutes(90)
            } else {
                Duration::hours(archetype.duration_hours)
            };
            tasks.push(DecomposedTask {
                title: archetype.title.to_string(),
                description: requirement.to_string(),
                task_type: archetype.task_type,
                priority: archetype.priority,
                estimated_duration: duration,
                affected_paths: archetype.default_paths.iter().map(|s| s.to_string()).collect(),
                requirements: vec![requirement.to_string()],
                depends_on_siblings: archetype.depends_on_siblings,
            });
        }
    }

    if tasks.is_empty() {
        tasks.push(DecomposedTask {
            title: "Address requirement".to_string(),
            description: requirement.to_string(),
            task_type: TaskType::General,
            priority: Priority::Medium,
            estimated_duration: Duration::hours(2),
            affected_paths: Vec::new(),
            requirements: vec![requirement.to_string()],
            depends_on_siblings: false,
        });
    }

    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_requirement_emits_general_task() {
        let tasks = decompose("do something vague");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_type, TaskType::General);
    }

    #[test]
    fn frontend_and_backend_keywords_emit_both_archetypes() {
        let tasks = decompose("build a frontend component and a backend API endpoint");
        let types: Vec<TaskType> = tasks.iter().map(|t| t.task_type).collect();
        assert!(types.contains(&TaskType::Frontend));
        assert!(types.contains(&TaskType::Backend));
    }

    #[test]
    fn testing_archetype_is_flagged_to_depend_on_siblings() {
        let tasks = decompose("add frontend UI and tests for it");
        let testing = tasks.iter().find(|t| t.task_type == TaskType::Testing).unwrap();
        assert!(testing.depends_on_siblings);
    }

    #[test]
    fn decomposition_is_deterministic() {
        let first = decompose("frontend and backend work");
        let second = decompose("frontend and backend work");
        assert_eq!(first.len(), second.len());
    }
}
