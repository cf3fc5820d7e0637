//! Signal Intake: a filesystem-backed inbox where in-terminal hooks deposit
//! structured lifecycle events (spec.md §4.2, §6.1).
//!
//! Watched with `notify` plus a periodic scan backstop (design note in
//! spec.md §9: "watchers miss events on some filesystems"). Each file is a
//! single JSON line; parsed, validated, published to subscribers, then
//! archived. Subscribers must be idempotent on `(session, kind, timestamp)`
//! since a crash before archival replays the event on restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// The eight signal kinds a hook may emit (spec.md §3, §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Starting,
    Working,
    Idle,
    NeedsInput,
    Review,
    Completing,
    Completed,
    Compacting,
}

/// A signal envelope as deposited by a hook (spec.md §6.1).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub session: String,
    pub timestamp: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Signal {
    /// The idempotency key subscribers must dedup on (spec.md §4.2 step 3).
    pub fn dedup_key(&self) -> (String, SignalKind, String) {
        (self.session.clone(), self.kind, self.timestamp.clone())
    }
}

/// Parse and validate a single deposited signal file's contents.
///
/// Unknown `kind` values fail deserialization (serde rejects them), which
/// the caller treats the same as malformed JSON: quarantine, don't retry.
fn parse_signal(contents: &str) -> Result<Signal> {
    let signal: Signal =
        serde_json::from_str(contents.trim()).context("signal envelope failed to parse")?;
    Ok(signal)
}

/// Parses a bare signal-kind token (e.g. a rule action payload expanded to
/// `needs_input`) the same way the envelope's `kind` field would.
pub fn kind_from_str(s: &str) -> Option<SignalKind> {
    serde_json::from_str(&format!("\"{}\"", s.trim())).ok()
}

/// Bookkeeping for a signal awaiting subscriber acknowledgement before its
/// source file is removed (spec.md §4.2 step 3).
struct PendingAck {
    path: PathBuf,
    required: usize,
    acked: usize,
}

/// Watches a signal inbox directory and fans out parsed [`Signal`]s to
/// subscribers via a broadcast channel. Malformed files are moved to a
/// poison subdirectory rather than retried.
pub struct SignalIntake {
    inbox_dir: PathBuf,
    poison_dir: PathBuf,
    tx: broadcast::Sender<Signal>,
    pending: Mutex<HashMap<(String, SignalKind, String), PendingAck>>,
}

impl SignalIntake {
    pub fn new(project_root: &Path) -> Result<Self> {
        let inbox_dir = crate::paths::signal_inbox_dir(project_root);
        let poison_dir = crate::paths::signal_poison_dir(project_root);
        std::fs::create_dir_all(&inbox_dir)
            .with_context(|| format!("failed to create {}", inbox_dir.display()))?;
        std::fs::create_dir_all(&poison_dir)
            .with_context(|| format!("failed to create {}", poison_dir.display()))?;
        let (tx, _rx) = broadcast::channel(256);
        Ok(Self {
            inbox_dir,
            poison_dir,
            tx,
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.tx.subscribe()
    }

    /// Process every file currently sitting in the inbox: parse, publish,
    /// archive/quarantine. Called by both the `notify` event handler and the
    /// periodic scan backstop, so it must be safe to call repeatedly on an
    /// empty or partially-drained inbox.
    pub fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        let entries = match std::fs::read_dir(&self.inbox_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("failed to read signal inbox"),
        };

        for entry in entries {
            let entry = entry.context("failed to read inbox entry")?;
            let path = entry.path();
            if path.is_dir() {
                continue; // skip the poison/ subdirectory itself
            }
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            self.process_one(&path)?;
            processed += 1;
        }
        Ok(processed)
    }

    fn process_one(&self, path: &Path) -> Result<()> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read signal file");
                return Ok(());
            }
        };

        match parse_signal(&contents) {
            Ok(signal) => {
                let key = signal.dedup_key();
                let required = self.tx.receiver_count();
                debug!(session = %signal.session, kind = ?signal.kind, required, "signal intake published");
                let _ = self.tx.send(signal);

                if required == 0 {
                    // No subscriber to lose the event for — nothing to replay on
                    // restart, so archive immediately.
                    std::fs::remove_file(path)
                        .with_context(|| format!("failed to remove consumed signal {}", path.display()))?;
                } else {
                    self.pending
                        .lock()
                        .unwrap()
                        .insert(key, PendingAck { path: path.to_path_buf(), required, acked: 0 });
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "quarantining malformed signal");
                self.quarantine(path)?;
            }
        }
        Ok(())
    }

    /// Acknowledge that a subscriber finished applying a signal. Once every
    /// subscriber counted at publish time has acknowledged, the source file
    /// is removed — a crash before that leaves the file in place to be
    /// redelivered on restart (spec.md §4.2 step 3).
    pub fn ack(&self, key: (String, SignalKind, String)) {
        let mut pending = self.pending.lock().unwrap();
        let done = if let Some(entry) = pending.get_mut(&key) {
            entry.acked += 1;
            entry.acked >= entry.required
        } else {
            false
        };
        if done {
            if let Some(entry) = pending.remove(&key) {
                let _ = std::fs::remove_file(&entry.path);
            }
        }
    }

    fn quarantine(&self, path: &Path) -> Result<()> {
        let filename = path
            .file_name()
            .context("signal path had no filename")?;
        let dest = self.poison_dir.join(filename);
        std::fs::rename(path, &dest)
            .with_context(|| format!("failed to quarantine {}", path.display()))?;
        Ok(())
    }

    pub fn inbox_dir(&self) -> &Path {
        &self.inbox_dir
    }
}

/// Run the `notify`-driven watch loop plus the 1s periodic scan backstop
/// (spec.md §9 design note) until the process shuts down. Spawned as a
/// `tokio` task by `main.rs`.
pub async fn run(intake: std::sync::Arc<SignalIntake>) {
    use notify::{RecursiveMode, Watcher};

    let (notify_tx, mut notify_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut watcher = match notify::recommended_watcher(move |res| {
        let _ = notify_tx.send(res);
    }) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to start signal inbox watcher, relying on periodic scan only");
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                if let Err(e) = intake.drain() {
                    warn!(error = %e, "signal inbox scan failed");
                }
            }
        }
    };

    if let Err(e) = watcher.watch(intake.inbox_dir(), RecursiveMode::NonRecursive) {
        warn!(error = %e, "failed to watch signal inbox directory");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            event = notify_rx.recv() => {
                if event.is_none() {
                    break;
                }
                if let Err(e) = intake.drain() {
                    warn!(error = %e, "signal inbox drain failed after notify event");
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = intake.drain() {
                    warn!(error = %e, "signal inbox periodic scan failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_signal(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn parses_well_formed_envelope() {
        let json = r#"{"kind":"working","session":"jat-FairBay","timestamp":"2026-01-01T00:00:00Z","payload":{"taskId":"3"}}"#;
        let signal = parse_signal(json).unwrap();
        assert_eq!(signal.kind, SignalKind::Working);
        assert_eq!(signal.session, "jat-FairBay");
    }

    #[test]
    fn rejects_unknown_kind() {
        let json = r#"{"kind":"banana","session":"s","timestamp":"t"}"#;
        assert!(parse_signal(json).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_signal("{not json").is_err());
    }

    #[test]
    fn dedup_key_identifies_replay() {
        let json = r#"{"kind":"idle","session":"s1","timestamp":"t1"}"#;
        let a = parse_signal(json).unwrap();
        let b = parse_signal(json).unwrap();
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn drain_publishes_and_removes_valid_file() {
        let tmp = tempfile::tempdir().unwrap();
        let intake = SignalIntake::new(tmp.path()).unwrap();

        write_signal(
            intake.inbox_dir(),
            "sig1.json",
            r#"{"kind":"review","session":"jat-FairBay","timestamp":"2026-01-01T00:00:00Z"}"#,
        );

        // No subscriber registered — nothing to wait on, so the file is
        // archived immediately.
        let processed = intake.drain().unwrap();
        assert_eq!(processed, 1);
        assert!(!intake.inbox_dir().join("sig1.json").exists());
    }

    #[test]
    fn drain_withholds_delete_until_subscriber_acknowledges() {
        let tmp = tempfile::tempdir().unwrap();
        let intake = SignalIntake::new(tmp.path()).unwrap();
        let mut rx = intake.subscribe();

        write_signal(
            intake.inbox_dir(),
            "sig1.json",
            r#"{"kind":"review","session":"jat-FairBay","timestamp":"2026-01-01T00:00:00Z"}"#,
        );

        intake.drain().unwrap();
        // A subscriber is live, so the file must survive until it acks.
        assert!(intake.inbox_dir().join("sig1.json").exists());

        let signal = rx.try_recv().unwrap();
        assert_eq!(signal.kind, SignalKind::Review);

        intake.ack(signal.dedup_key());
        assert!(!intake.inbox_dir().join("sig1.json").exists());
    }

    #[test]
    fn drain_waits_for_every_subscriber_to_ack() {
        let tmp = tempfile::tempdir().unwrap();
        let intake = SignalIntake::new(tmp.path()).unwrap();
        let rx1 = intake.subscribe();
        let rx2 = intake.subscribe();
        drop(rx2); // still counted in receiver_count() until the next send

        write_signal(
            intake.inbox_dir(),
            "sig1.json",
            r#"{"kind":"idle","session":"jat-FairBay","timestamp":"2026-01-01T00:00:00Z"}"#,
        );
        intake.drain().unwrap();

        let key = ("jat-FairBay".to_string(), SignalKind::Idle, "2026-01-01T00:00:00Z".to_string());
        intake.ack(key.clone());
        // Only one of the two counted subscribers acked — file must remain.
        assert!(intake.inbox_dir().join("sig1.json").exists());

        intake.ack(key);
        assert!(!intake.inbox_dir().join("sig1.json").exists());
        drop(rx1);
    }

    #[test]
    fn drain_quarantines_malformed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let intake = SignalIntake::new(tmp.path()).unwrap();

        write_signal(intake.inbox_dir(), "bad.json", "{not valid json");

        intake.drain().unwrap();
        assert!(!intake.inbox_dir().join("bad.json").exists());
        assert!(
            crate::paths::signal_poison_dir(tmp.path())
                .join("bad.json")
                .exists()
        );
    }

    #[test]
    fn drain_on_empty_inbox_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let intake = SignalIntake::new(tmp.path()).unwrap();
        assert_eq!(intake.drain().unwrap(), 0);
    }

    #[test]
    fn drain_ignores_non_json_files() {
        let tmp = tempfile::tempdir().unwrap();
        let intake = SignalIntake::new(tmp.path()).unwrap();
        write_signal(intake.inbox_dir(), "readme.txt", "not a signal");
        assert_eq!(intake.drain().unwrap(), 0);
        assert!(intake.inbox_dir().join("readme.txt").exists());
    }
}
