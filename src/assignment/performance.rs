//! Historical performance tracking: rolling completion-time/quality
//! averages and per-task-type specialization success rates (§4.D).

use crate::models::AgentId;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct AgentPerformance {
    pub completed: u32,
    pub successful: u32,
    pub avg_completion_minutes: f64,
    pub avg_quality: f64,
    /// task-type key -> success rate
    pub specialization_rates: HashMap<String, f64>,
}

impl AgentPerformance {
    pub fn overall_success_rate(&self) -> Option<f64> {
        if self.completed == 0 {
            None
        } else {
            Some(self.successful as f64 / self.completed as f64)
        }
    }

    /// Folds in one more completed execution. `completion_minutes` and
    /// `quality` (0-1) are rolling-averaged over all completions so far.
    fn record(&mut self, task_type_key: &str, success: bool, completion_minutes: f64, quality: Option<f64>) {
        let n = self.completed as f64;
        self.avg_completion_minutes = (self.avg_completion_minutes * n + completion_minutes) / (n + 1.0);
        if let Some(quality) = quality {
            self.avg_quality = (self.avg_quality * n + quality) / (n + 1.0);
        }
        self.completed += 1;
        if success {
            self.successful += 1;
        }

        let entry = self.specialization_rates.entry(task_type_key.to_string()).or_insert(0.5);
        let type_completions = *entry;
        // Blend toward the observed outcome; a fresh 0.5 prior converges
        // quickly without needing a separate per-type completion counter.
        *entry = (type_completions * 4.0 + if success { 1.0 } else { 0.0 }) / 5.0;
    }
}

#[derive(Default)]
pub struct PerformanceTracker {
    by_agent: HashMap<AgentId, AgentPerformance>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completion(&mut self, agent: &AgentId, task_type_key: &str, success: bool, completion_minutes: f64, quality: Option<f64>) {
        self.by_agent.entry(agent.clone()).or_default().record(task_type_key, success, completion_minutes, quality);
    }

    pub fn get(&self, agent: &AgentId) -> Option<&AgentPerformance> {
        self.by_agent.get(agent)
    }

    pub fn remove(&mut self, agent: &AgentId) {
        self.by_agent.remove(agent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_average_updates_with_each_completion() {
        let mut tracker = PerformanceTracker::new();
        tracker.record_completion(&"a1".to_string(), "backend", true, 30.0, Some(0.9));
        tracker.record_completion(&"a1".to_string(), "backend", true, 60.0, Some(0.7));
        let perf = tracker.get(&"a1".to_string()).unwrap();
        assert_eq!(perf.completed, 2);
        assert!((perf.avg_completion_minutes - 45.0).abs() < 0.01);
    }

    #[test]
    fn overall_success_rate_is_none_before_any_completion() {
        let tracker = PerformanceTracker::new();
        assert!(tracker.get(&"a1".to_string()).is_none());
    }
}
