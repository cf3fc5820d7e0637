//! Question Surface: renders pending agent→user questions and relays
//! answers back as keystrokes (spec.md §3 Question, §4.6, §6.2).

use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Choice,
    Confirm,
    Input,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuestionOption {
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// On-disk question record (spec.md §6.2). Written to two paths so either
/// lookup key (session-id or display-name) resolves it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuestionRecord {
    pub session_id: String,
    pub display_name: String,
    pub question_id: String,
    pub kind: QuestionKind,
    pub question: String,
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    pub created_at: String,
}

/// A `show_question_ui` rule action's payload — the shape a rule author
/// configures, turned into a synthetic [`QuestionRecord`] at fire time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuestionTemplate {
    pub kind: QuestionKind,
    pub question: String,
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// The user's answer to a live question.
#[derive(Debug, Clone)]
pub enum Answer {
    /// 1-based option index for `choice`.
    Choice(usize),
    Confirm(bool),
    Input(String),
    Cancelled,
}

/// Translate an answer into the keystrokes injected into the session
/// (spec.md §4.6 consumption path).
pub fn answer_to_keystrokes(answer: &Answer) -> Option<String> {
    match answer {
        Answer::Choice(n) => Some(n.to_string()),
        Answer::Confirm(true) => Some("y".to_string()),
        Answer::Confirm(false) => Some("n".to_string()),
        Answer::Input(text) => Some(text.clone()),
        Answer::Cancelled => None, // handled separately: injects Escape, no text
    }
}

/// Reads/writes the dual-path on-disk question files for one session
/// (spec.md §6.2).
pub struct QuestionStore {
    tmp_dir: std::path::PathBuf,
}

impl QuestionStore {
    pub fn new(tmp_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            tmp_dir: tmp_dir.into(),
        }
    }

    fn paths(&self, session_id: &str, display_name: &str) -> (std::path::PathBuf, std::path::PathBuf) {
        crate::paths::question_paths(&self.tmp_dir, session_id, display_name)
    }

    pub fn write(&self, record: &QuestionRecord) -> anyhow::Result<()> {
        let (by_id, by_name) = self.paths(&record.session_id, &record.display_name);
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&by_id, &json)?;
        std::fs::write(&by_name, &json)?;
        Ok(())
    }

    pub fn read(&self, session_id: &str, display_name: &str) -> Option<QuestionRecord> {
        let (by_id, by_name) = self.paths(session_id, display_name);
        let contents = std::fs::read_to_string(&by_id)
            .or_else(|_| std::fs::read_to_string(&by_name))
            .ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Delete both on-disk paths for a question (spec.md §4.6 step 4).
    pub fn delete(&self, session_id: &str, display_name: &str) {
        let (by_id, by_name) = self.paths(session_id, display_name);
        let _ = std::fs::remove_file(by_id);
        let _ = std::fs::remove_file(by_name);
    }
}

/// Guards against the fallback extractor (or a stale poll) re-reading a
/// just-answered question during the suppression window (spec.md §4.6:
/// "prevents the next poll cycle from re-reading stale state for ≥ 2 s").
pub struct SuppressionGuard {
    window: Duration,
    suppressed_until: std::collections::HashMap<String, Instant>,
}

impl SuppressionGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            suppressed_until: std::collections::HashMap::new(),
        }
    }

    pub fn suppress(&mut self, session_id: &str, now: Instant) {
        self.suppressed_until.insert(session_id.to_string(), now + self.window);
    }

    pub fn is_suppressed(&self, session_id: &str, now: Instant) -> bool {
        self.suppressed_until
            .get(session_id)
            .is_some_and(|until| now < *until)
    }
}

/// Fallback extractor: detects the classic `❯ 1. … 2. …` choice prompt in a
/// capture delta (spec.md §4.6, gated per spec.md §9 design note: only
/// fires absent a hook-deposited question, and must not re-fire for the
/// same visible prompt — dedup on a fingerprint of the matched text).
pub struct FallbackExtractor {
    re: regex::Regex,
    last_fingerprint: std::collections::HashMap<String, u64>,
}

impl Default for FallbackExtractor {
    fn default() -> Self {
        Self {
            re: regex::Regex::new(r"(?s)❯\s*1\.\s*(.+?)\n\s*2\.\s*(.+?)(?:\n|$)").unwrap(),
            last_fingerprint: std::collections::HashMap::new(),
        }
    }
}

impl FallbackExtractor {
    fn fingerprint(text: &str) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }

    /// Returns a synthesized choice template if a new (not-yet-seen) prompt
    /// is found in `pane_text`.
    pub fn extract(&mut self, session_id: &str, pane_text: &str) -> Option<QuestionTemplate> {
        let caps = self.re.captures(pane_text)?;
        let fingerprint = Self::fingerprint(caps.get(0).unwrap().as_str());
        if self.last_fingerprint.get(session_id) == Some(&fingerprint) {
            return None;
        }
        self.last_fingerprint.insert(session_id.to_string(), fingerprint);

        Some(QuestionTemplate {
            kind: QuestionKind::Choice,
            question: "(extracted from pane output)".to_string(),
            options: vec![
                QuestionOption {
                    label: caps.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
                    value: "1".to_string(),
                    description: None,
                },
                QuestionOption {
                    label: caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
                    value: "2".to_string(),
                    description: None,
                },
            ],
            timeout_seconds: None,
        })
    }

    pub fn clear_session(&mut self, session_id: &str) {
        self.last_fingerprint.remove(session_id);
    }
}

#[allow(dead_code)]
fn tmp_dir() -> &'static Path {
    Path::new("/tmp")
}
