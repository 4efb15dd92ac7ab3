//! Collaboration rules engine (§4.G): validates whether an agent is
//! allowed to take an action in a given context. First matching deny
//! rule blocks it; otherwise the action is allowed.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

/// Matches an action name (exact, or `prefix*` wildcard) and, optionally,
/// one context key/value pair the call must also carry.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub action_pattern: String,
    pub context_key: Option<(String, String)>,
    pub effect: Effect,
}

impl Rule {
    pub fn deny(name: impl Into<String>, action_pattern: impl Into<String>) -> Self {
        Self { name: name.into(), action_pattern: action_pattern.into(), context_key: None, effect: Effect::Deny }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_key = Some((key.into(), value.into()));
        self
    }

    fn matches_action(&self, action: &str) -> bool {
        match self.action_pattern.strip_suffix('*') {
            Some(prefix) => action.starts_with(prefix),
            None => self.action_pattern == action,
        }
    }

    fn matches_context(&self, context: &HashMap<String, String>) -> bool {
        match &self.context_key {
            Some((key, value)) => context.get(key).map(|v| v == value).unwrap_or(false),
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub matched_rule: Option<String>,
}

#[derive(Default)]
pub struct RulesEngine {
    rules: Vec<Rule>,
}

impl RulesEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn validate_agent_action(&self, action: &str, context: &HashMap<String, String>) -> Decision {
        for rule in &self.rules {
            if rule.effect == Effect::Deny && rule.matches_action(action) && rule.matches_context(context) {
                return Decision { allowed: false, matched_rule: Some(rule.name.clone()) };
            }
        }
        Decision { allowed: true, matched_rule: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_deny_blocks_matching_actions() {
        let mut engine = RulesEngine::new();
        engine.add_rule(Rule::deny("no-deletes", "file:delete*"));

        let decision = engine.validate_agent_action("file:delete", &HashMap::new());
        assert!(!decision.allowed);
        assert_eq!(decision.matched_rule, Some("no-deletes".to_string()));
    }

    #[test]
    fn unmatched_action_is_allowed() {
        let mut engine = RulesEngine::new();
        engine.add_rule(Rule::deny("no-deletes", "file:delete*"));

        let decision = engine.validate_agent_action("file:write", &HashMap::new());
        assert!(decision.allowed);
    }

    #[test]
    fn context_scoped_rule_only_matches_its_key() {
        let mut engine = RulesEngine::new();
        engine.add_rule(Rule::deny("no-prod-writes", "file:write").with_context("env", "prod"));

        let mut prod = HashMap::new();
        prod.insert("env".to_string(), "prod".to_string());
        assert!(!engine.validate_agent_action("file:write", &prod).allowed);

        let mut dev = HashMap::new();
        dev.insert("env".to_string(), "dev".to_string());
        assert!(engine.validate_agent_action("file:write", &dev).allowed);
    }
}
