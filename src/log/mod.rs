//! Structured execution log — JSON lines per run.
//!
//! The orchestrator writes a `.jsonl` log file capturing every observability
//! event: session spawns, signal acknowledgements, classifier state
//! transitions, rule triggers, and question lifecycle events. Each line is a
//! self-contained JSON object with a timestamp, making logs easy to grep,
//! stream, and post-process. This is also the feed the HTTP/SSE surface
//! broadcasts from (see `crate::http`).

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

/// A structured event in the execution log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// ISO-8601 timestamp.
    pub timestamp: String,
    /// The event type and its data.
    #[serde(flatten)]
    pub event: LogEvent,
}

/// All event types that can appear in the execution log and on the SSE
/// stream (spec.md §4.7 "Per-session SSE stream emitting state changes,
/// capture deltas, question births/deaths, rule trigger events").
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    /// A session was spawned (`spec.md` §4.7 "Spawning").
    SessionSpawned {
        session_id: String,
        display_name: String,
        task_id: Option<u32>,
    },
    /// The agent registered its chosen display name.
    SessionRenamed {
        session_id: String,
        old_name: String,
        new_name: String,
    },
    /// A session's lifecycle state changed (classifier or signal driven).
    StateChanged {
        session_id: String,
        from: String,
        to: String,
    },
    /// A session was killed or detected dead.
    SessionEnded { session_id: String, reason: String },
    /// A signal was consumed from the intake.
    SignalAcked {
        session: String,
        kind: String,
        timestamp: String,
    },
    /// A malformed signal file was quarantined.
    SignalPoisoned { path: String, reason: String },
    /// A capture delta was published.
    CaptureDelta {
        session_id: String,
        new_lines: usize,
    },
    /// A rule matched and fired.
    RuleTriggered {
        rule_id: String,
        session_id: String,
        actions: usize,
    },
    /// A single rule action executed (or failed).
    ActionExecuted {
        rule_id: String,
        session_id: String,
        action_kind: String,
        ok: bool,
    },
    /// A question was created.
    QuestionCreated {
        question_id: String,
        session_id: String,
        kind: String,
    },
    /// A question was answered, cancelled, or expired with its session.
    QuestionResolved { question_id: String, outcome: String },
    /// A `review` signal triggered the autopilot policy.
    AutopilotDecision {
        session_id: String,
        outcome: String,
    },
}

/// Writer for JSON lines execution logs.
pub struct ExecutionLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl ExecutionLog {
    /// Create a new execution log, writing to the given path.
    ///
    /// Creates the file (and parent directories) if they don't exist.
    /// Appends to an existing file.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Log an event.
    pub fn log(&self, event: LogEvent) -> Result<()> {
        let entry = LogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize log entry")?;

        debug!(event = %json, "execution log");

        let mut writer = self.writer.lock().unwrap();
        writeln!(writer, "{json}").context("failed to write log entry")?;
        writer.flush().context("failed to flush log")?;

        Ok(())
    }

    /// Get the path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_to_json() {
        let entry = LogEntry {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            event: LogEvent::SessionSpawned {
                session_id: "s1".to_string(),
                display_name: "jat-pending-1".to_string(),
                task_id: Some(7),
            },
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"event\":\"session_spawned\""));
        assert!(json.contains("\"task_id\":7"));
    }

    #[test]
    fn all_event_types_serialize() {
        let events = vec![
            LogEvent::SessionSpawned {
                session_id: "s1".into(),
                display_name: "jat-pending-1".into(),
                task_id: None,
            },
            LogEvent::SessionRenamed {
                session_id: "s1".into(),
                old_name: "jat-pending-1".into(),
                new_name: "jat-FairBay".into(),
            },
            LogEvent::StateChanged {
                session_id: "s1".into(),
                from: "pending".into(),
                to: "working".into(),
            },
            LogEvent::SessionEnded {
                session_id: "s1".into(),
                reason: "killed".into(),
            },
            LogEvent::SignalAcked {
                session: "jat-FairBay".into(),
                kind: "working".into(),
                timestamp: "2026-01-01T00:00:00Z".into(),
            },
            LogEvent::SignalPoisoned {
                path: "/tmp/x.json".into(),
                reason: "invalid json".into(),
            },
            LogEvent::CaptureDelta {
                session_id: "s1".into(),
                new_lines: 3,
            },
            LogEvent::RuleTriggered {
                rule_id: "npm-eresolve".into(),
                session_id: "s1".into(),
                actions: 1,
            },
            LogEvent::ActionExecuted {
                rule_id: "npm-eresolve".into(),
                session_id: "s1".into(),
                action_kind: "send_text".into(),
                ok: true,
            },
            LogEvent::QuestionCreated {
                question_id: "q1".into(),
                session_id: "s1".into(),
                kind: "choice".into(),
            },
            LogEvent::QuestionResolved {
                question_id: "q1".into(),
                outcome: "answered".into(),
            },
            LogEvent::AutopilotDecision {
                session_id: "s1".into(),
                outcome: "auto".into(),
            },
        ];

        for event in events {
            let entry = LogEntry {
                timestamp: "0".to_string(),
                event,
            };
            let json = serde_json::to_string(&entry);
            assert!(json.is_ok(), "failed to serialize: {entry:?}");
            let s = json.unwrap();
            assert!(s.contains("\"event\":"), "missing event tag in: {s}");
        }
    }

    #[test]
    fn write_and_read_log_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("test.jsonl");

        let log = ExecutionLog::new(&log_path).unwrap();

        log.log(LogEvent::SessionSpawned {
            session_id: "s1".into(),
            display_name: "jat-pending-1".into(),
            task_id: None,
        })
        .unwrap();
        log.log(LogEvent::SessionEnded {
            session_id: "s1".into(),
            reason: "completed".into(),
        })
        .unwrap();

        let content = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        for line in &lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed.get("event").is_some());
            assert!(parsed.get("timestamp").is_some());
        }
        assert!(lines[0].contains("\"event\":\"session_spawned\""));
        assert!(lines[1].contains("\"event\":\"session_ended\""));
    }

    #[test]
    fn creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("deep").join("nested").join("run.jsonl");

        let log = ExecutionLog::new(&log_path).unwrap();
        log.log(LogEvent::SessionEnded {
            session_id: "s1".into(),
            reason: "ok".into(),
        })
        .unwrap();

        assert!(log_path.exists());
    }

    #[test]
    fn appends_to_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("append.jsonl");

        {
            let log = ExecutionLog::new(&log_path).unwrap();
            log.log(LogEvent::SessionSpawned {
                session_id: "s1".into(),
                display_name: "jat-pending-1".into(),
                task_id: None,
            })
            .unwrap();
        }
        {
            let log = ExecutionLog::new(&log_path).unwrap();
            log.log(LogEvent::SessionEnded {
                session_id: "s1".into(),
                reason: "ok".into(),
            })
            .unwrap();
        }

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn log_path_accessor() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("test.jsonl");

        let log = ExecutionLog::new(&log_path).unwrap();
        assert_eq!(log.path(), log_path);
    }
}
