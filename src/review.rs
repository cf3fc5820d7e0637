//! Autopilot review policy: decides whether a `review` signal is handled
//! automatically or escalated to the user (spec.md §3 ReviewPolicy, §4.7
//! "Autopilot on review").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewOutcome {
    Auto,
    Review,
}

/// One row of the policy table: a task-type glob-ish pattern (`*` matches
/// anything) and a priority predicate (`*` matches anything, otherwise an
/// exact match against the task's priority string).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReviewPolicyRule {
    pub task_type: String,
    pub priority: String,
    pub outcome: ReviewOutcome,
}

fn matches(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern == value
}

/// Ordered table consulted on every `review` signal; first match wins
/// (spec.md §4.7 step 2). A rule with `task_type = "*"` and `priority = "*"`
/// acts as the default/catch-all and should be placed last.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReviewPolicy {
    pub rules: Vec<ReviewPolicyRule>,
}

impl ReviewPolicy {
    /// Scenario C from spec.md §8: `[{chore, *, auto}, default=review]`.
    pub fn default_policy() -> Self {
        Self {
            rules: vec![
                ReviewPolicyRule {
                    task_type: "chore".to_string(),
                    priority: "*".to_string(),
                    outcome: ReviewOutcome::Auto,
                },
                ReviewPolicyRule {
                    task_type: "*".to_string(),
                    priority: "*".to_string(),
                    outcome: ReviewOutcome::Review,
                },
            ],
        }
    }

    pub fn decide(&self, task_type: &str, priority: &str) -> ReviewOutcome {
        self.rules
            .iter()
            .find(|r| matches(&r.task_type, task_type) && matches(&r.priority, priority))
            .map(|r| r.outcome)
            .unwrap_or(ReviewOutcome::Review)
    }
}

/// What the user picked when presented a review decision block
/// (spec.md §4.7 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Complete,
    CompleteAndKill,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_c_chore_auto_completes() {
        let policy = ReviewPolicy::default_policy();
        assert_eq!(policy.decide("chore", "low"), ReviewOutcome::Auto);
    }

    #[test]
    fn scenario_c_default_falls_back_to_review() {
        let policy = ReviewPolicy::default_policy();
        assert_eq!(policy.decide("feature", "high"), ReviewOutcome::Review);
    }

    #[test]
    fn first_match_wins() {
        let policy = ReviewPolicy {
            rules: vec![
                ReviewPolicyRule { task_type: "bug".to_string(), priority: "critical".to_string(), outcome: ReviewOutcome::Review },
                ReviewPolicyRule { task_type: "bug".to_string(), priority: "*".to_string(), outcome: ReviewOutcome::Auto },
            ],
        };
        assert_eq!(policy.decide("bug", "critical"), ReviewOutcome::Review);
        assert_eq!(policy.decide("bug", "low"), ReviewOutcome::Auto);
    }

    #[test]
    fn empty_policy_defaults_to_review() {
        let policy = ReviewPolicy::default();
        assert_eq!(policy.decide("anything", "anything"), ReviewOutcome::Review);
    }

    #[test]
    fn policy_round_trips_through_json() {
        let policy = ReviewPolicy::default_policy();
        let json = serde_json::to_string(&policy).unwrap();
        let back: ReviewPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rules.len(), 2);
    }
}
