//! Automation Rule Engine: ordered pattern→action rules with cooldowns,
//! trigger caps, and session-state filters (spec.md §3, §4.5).

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classifier::ClassifiedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleCategory {
    Recovery,
    Prompt,
    Stall,
    Notification,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    Regex,
    Literal,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Pattern {
    pub mode: PatternMode,
    #[serde(default)]
    pub case_sensitive: bool,
    pub text: String,
}

/// A match against one pattern, carrying capture groups for template
/// expansion (spec.md §9: "capture groups from the matched pattern").
struct PatternMatch {
    full: String,
    groups: Vec<String>,
}

impl Pattern {
    fn try_match(&self, haystack: &str) -> Option<PatternMatch> {
        match self.mode {
            PatternMode::Regex => {
                let re = if self.case_sensitive {
                    Regex::new(&self.text)
                } else {
                    Regex::new(&format!("(?i){}", self.text))
                }
                .ok()?;
                let caps = re.captures(haystack)?;
                let groups = (1..caps.len())
                    .map(|i| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect();
                Some(PatternMatch {
                    full: caps.get(0).unwrap().as_str().to_string(),
                    groups,
                })
            }
            PatternMode::Literal => {
                let found = if self.case_sensitive {
                    haystack.contains(self.text.as_str())
                } else {
                    haystack.to_lowercase().contains(&self.text.to_lowercase())
                };
                found.then(|| PatternMatch {
                    full: self.text.clone(),
                    groups: Vec::new(),
                })
            }
        }
    }

    /// Validate the pattern compiles (regex mode only); called at rule load
    /// time (spec.md §4.5 "Failure semantics").
    pub fn validate(&self) -> Result<(), String> {
        if self.mode == PatternMode::Regex {
            Regex::new(&self.text).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    SendText,
    SendKeys,
    TmuxCommand,
    Signal,
    NotifyOnly,
    ShowQuestionUi,
    RunCommand,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Action {
    pub kind: ActionKind,
    pub payload: String,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub question_ui_config: Option<crate::question::QuestionTemplate>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub category: RuleCategory,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub priority: i32,
    pub patterns: Vec<Pattern>,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub cooldown_seconds: u64,
    #[serde(default)]
    pub max_triggers_per_session: u32,
    #[serde(default)]
    pub session_state_filter: Vec<String>,
    #[serde(default)]
    pub preset_id: Option<String>,
    #[serde(default)]
    pub is_preset: bool,
    /// Set at load time if a pattern failed to compile (spec.md §4.5:
    /// "mark that rule disabled with a validation error").
    #[serde(default)]
    pub validation_error: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Rule {
    /// Validate all patterns, disabling the rule (without discarding it —
    /// it must still round-trip through export/import per the testable
    /// properties) if any fail to compile, or if there are zero patterns.
    pub fn validate(&mut self) {
        if self.patterns.is_empty() {
            self.enabled = false;
            self.validation_error = Some("rule has zero patterns".to_string());
            return;
        }
        for pattern in &self.patterns {
            if let Err(e) = pattern.validate() {
                self.enabled = false;
                self.validation_error = Some(format!("invalid pattern: {e}"));
                return;
            }
        }
    }

    fn applies_to_state(&self, state: &str) -> bool {
        self.session_state_filter.is_empty()
            || self.session_state_filter.iter().any(|s| s == state)
    }

    fn first_match(&self, haystack: &str) -> Option<PatternMatch> {
        self.patterns.iter().find_map(|p| p.try_match(haystack))
    }
}

/// Per (rule, session) trigger bookkeeping (spec.md §3 RuleRuntimeState).
#[derive(Debug, Default, Clone)]
struct RuntimeState {
    last_trigger: Option<SystemTime>,
    trigger_count: u32,
}

/// Owns all [`RuntimeState`], partitioned by session (spec.md §5: "within a
/// session, accesses are serialized" — enforced here by a single lock).
#[derive(Default)]
pub struct RuleRuntime {
    state: HashMap<(String, String), RuntimeState>,
}

impl RuleRuntime {
    pub fn reset_session(&mut self, session_id: &str) {
        self.state.retain(|(_, sid), _| sid != session_id);
    }
}

/// A scheduled action produced by a rule fire, ready for the orchestrator to
/// dispatch (after its `delay_ms`) through the Terminal Bus / Question
/// Surface / Signal Intake.
#[derive(Debug, Clone)]
pub struct ScheduledAction {
    pub rule_id: String,
    pub session_id: String,
    pub action: Action,
    pub expanded_payload: String,
}

/// Expand template variables over a matched pattern (spec.md §4.2, §4.5).
fn expand_template(
    template: &str,
    session: &str,
    agent: &str,
    timestamp: &str,
    m: Option<&PatternMatch>,
) -> String {
    let mut out = template
        .replace("{session}", session)
        .replace("{agent}", agent)
        .replace("{timestamp}", timestamp);

    if let Some(m) = m {
        out = out.replace("{match}", &m.full).replace("{$0}", &m.full);
        for (i, group) in m.groups.iter().enumerate() {
            out = out.replace(&format!("{{${}}}", i + 1), group);
        }
    }
    out
}

/// Evaluate every enabled, state-eligible rule (priority desc, id tiebreak)
/// against one session's delta, producing the actions to schedule
/// (spec.md §4.5). Non-short-circuiting: every eligible rule is evaluated
/// regardless of whether an earlier rule fired.
pub fn evaluate(
    rules: &[Rule],
    runtime: &mut RuleRuntime,
    session_id: &str,
    agent_name: &str,
    session_state: &str,
    delta: &str,
    now: SystemTime,
) -> Vec<ScheduledAction> {
    let mut ordered: Vec<&Rule> = rules
        .iter()
        .filter(|r| r.enabled && r.applies_to_state(session_state))
        .collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

    let mut scheduled = Vec::new();
    let timestamp = chrono::DateTime::<chrono::Utc>::from(now).to_rfc3339();

    for rule in ordered {
        let Some(matched) = rule.first_match(delta) else {
            continue;
        };

        let key = (rule.id.clone(), session_id.to_string());
        let state = runtime.state.entry(key.clone()).or_default();

        if let Some(last) = state.last_trigger {
            if let Ok(elapsed) = now.duration_since(last) {
                if elapsed < Duration::from_secs(rule.cooldown_seconds) {
                    debug!(rule = %rule.id, session = session_id, "rule skipped: cooldown");
                    continue;
                }
            }
        }
        if rule.max_triggers_per_session > 0 && state.trigger_count >= rule.max_triggers_per_session {
            debug!(rule = %rule.id, session = session_id, "rule skipped: trigger cap reached");
            continue;
        }

        for action in &rule.actions {
            let expanded = expand_template(
                &action.payload,
                session_id,
                agent_name,
                &timestamp,
                Some(&matched),
            );
            scheduled.push(ScheduledAction {
                rule_id: rule.id.clone(),
                session_id: session_id.to_string(),
                action: action.clone(),
                expanded_payload: expanded,
            });
        }

        let state = runtime.state.entry(key).or_default();
        state.last_trigger = Some(now);
        state.trigger_count += 1;
    }

    scheduled
}

/// A rules store snapshot on disk (spec.md §6.4 export/import format).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RulesFile {
    pub version: u32,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Merge,
    Replace,
}

pub fn import(existing: Vec<Rule>, incoming: Vec<Rule>, mode: ImportMode) -> Vec<Rule> {
    match mode {
        ImportMode::Replace => incoming,
        ImportMode::Merge => {
            let mut by_id: HashMap<String, Rule> =
                existing.into_iter().map(|r| (r.id.clone(), r)).collect();
            for rule in incoming {
                by_id.insert(rule.id.clone(), rule);
            }
            let mut rules: Vec<Rule> = by_id.into_values().collect();
            rules.sort_by(|a, b| a.id.cmp(&b.id));
            rules
        }
    }
}

pub fn load_store(path: &std::path::Path) -> anyhow::Result<Vec<Rule>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(path)?;
    let file: RulesFile = serde_json::from_str(&contents)?;
    let mut rules = file.rules;
    for rule in &mut rules {
        rule.validate();
    }
    Ok(rules)
}

pub fn save_store(path: &std::path::Path, rules: &[Rule]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = RulesFile {
        version: 1,
        rules: rules.to_vec(),
    };
    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[allow(dead_code)]
fn state_name(state: ClassifiedState) -> &'static str {
    match state {
        ClassifiedState::Starting => "starting",
        ClassifiedState::Working => "working",
        ClassifiedState::Idle => "idle",
        ClassifiedState::NeedsInput => "needs-input",
        ClassifiedState::ReadyForReview => "ready-for-review",
        ClassifiedState::Completing => "completing",
        ClassifiedState::Completed => "completed",
        ClassifiedState::Compacting => "compacting",
    }
}
