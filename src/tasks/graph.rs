//! Dependency graph: mirrored forward/reverse relations with cycle
//! prevention on edge insertion (§3 Task data model invariant i).

use crate::models::TaskId;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
pub struct DependencyGraph {
    /// task -> its dependencies
    forward: HashMap<TaskId, HashSet<TaskId>>,
    /// task -> tasks that depend on it
    reverse: HashMap<TaskId, HashSet<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task: &TaskId) {
        self.forward.entry(task.clone()).or_default();
        self.reverse.entry(task.clone()).or_default();
    }

    /// True if `target` can already reach `source` — adding `source ->
    /// target` would close a cycle.
    fn reaches(&self, from: &TaskId, to: &TaskId) -> bool {
        let mut stack = vec![from.clone()];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if &current == to {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(deps) = self.forward.get(&current) {
                stack.extend(deps.iter().cloned());
            }
        }
        false
    }

    /// Adds `task` depends-on `dependency`. Rejected if `dependency`
    /// transitively depends on `task` already (would close a cycle).
    pub fn add_dependency(&mut self, task: &TaskId, dependency: &TaskId) -> Result<(), String> {
        if task == dependency {
            return Err("a task cannot depend on itself".to_string());
        }
        if self.reaches(dependency, task) {
            return Err(format!(
                "adding dependency {dependency} -> {task} would close a cycle"
            ));
        }
        self.forward.entry(task.clone()).or_default().insert(dependency.clone());
        self.reverse.entry(dependency.clone()).or_default().insert(task.clone());
        self.forward.entry(dependency.clone()).or_default();
        self.reverse.entry(task.clone()).or_default();
        Ok(())
    }

    pub fn remove_dependency(&mut self, task: &TaskId, dependency: &TaskId) {
        if let Some(deps) = self.forward.get_mut(task) {
            deps.remove(dependency);
        }
        if let Some(dependents) = self.reverse.get_mut(dependency) {
            dependents.remove(task);
        }
    }

    pub fn dependencies_of(&self, task: &TaskId) -> Vec<TaskId> {
        self.forward.get(task).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn dependents_of(&self, task: &TaskId) -> Vec<TaskId> {
        self.reverse.get(task).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn remove_task(&mut self, task: &TaskId) {
        if let Some(deps) = self.forward.remove(task) {
            for dep in deps {
                if let Some(dependents) = self.reverse.get_mut(&dep) {
                    dependents.remove(task);
                }
            }
        }
        if let Some(dependents) = self.reverse.remove(task) {
            for dependent in dependents {
                if let Some(deps) = self.forward.get_mut(&dependent) {
                    deps.remove(task);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_edge_that_closes_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&"b".to_string(), &"a".to_string()).unwrap(); // b depends on a
        let result = graph.add_dependency(&"a".to_string(), &"b".to_string()); // a depends on b -> cycle
        assert!(result.is_err());
    }

    #[test]
    fn forward_and_reverse_mirror_each_other() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&"b".to_string(), &"a".to_string()).unwrap();
        assert_eq!(graph.dependencies_of(&"b".to_string()), vec!["a".to_string()]);
        assert_eq!(graph.dependents_of(&"a".to_string()), vec!["b".to_string()]);

        graph.remove_dependency(&"b".to_string(), &"a".to_string());
        assert!(graph.dependencies_of(&"b".to_string()).is_empty());
        assert!(graph.dependents_of(&"a".to_string()).is_empty());
    }

    #[test]
    fn transitive_cycle_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(&"b".to_string(), &"a".to_string()).unwrap();
        graph.add_dependency(&"c".to_string(), &"b".to_string()).unwrap();
        // a -> c would close a -> c -> b -> a
        let result = graph.add_dependency(&"a".to_string(), &"c".to_string());
        assert!(result.is_err());
    }
}
