//! Terminal Bus: the only component that talks to tmux directly.
//!
//! Every other component — Capture Engine, Question Surface, Orchestrator —
//! reaches tmux exclusively through [`Tmux`]. Session lifecycle (create,
//! rename, kill), input injection (send-keys), and output capture all funnel
//! through here, so tmux's CLI-shaped quirks (target syntax, exit codes,
//! pane ids) stay contained to one file.
//!
//! Subprocess execution is abstracted behind [`CommandRunner`] so the rest of
//! the crate can test against a fake tmux without spawning a real one — the
//! same seam the orchestrator used to isolate shell execution.

use std::path::Path;
use std::process::{Command, Output};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::prompt::strip_ansi;

/// Abstracts running a command and collecting its output, so [`Tmux`] can be
/// driven by a fake in tests instead of a real tmux binary.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> Result<Output>;
}

/// Runs commands via `std::process::Command`.
pub struct ShellCommandRunner;

impl CommandRunner for ShellCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<Output> {
        Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to spawn '{program}'"))
    }
}

/// The Terminal Bus. Wraps a [`CommandRunner`] (defaulting to a real `tmux`
/// binary) behind the operations the rest of the crate needs.
pub struct Tmux {
    runner: Box<dyn CommandRunner>,
}

impl Default for Tmux {
    fn default() -> Self {
        Self::new(Box::new(ShellCommandRunner))
    }
}

impl Tmux {
    pub fn new(runner: Box<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn tmux(&self, args: &[&str]) -> Result<Output> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.runner.run("tmux", &args)
    }

    /// Retry a fallible tmux call up to 3 times with exponential backoff,
    /// bounded by a 5s hard wall-clock budget (spec.md §5). Used for calls
    /// whose failure is expected to be transient (tmux server momentarily
    /// busy) rather than structural (target gone).
    fn with_retry<T>(&self, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let budget = Duration::from_secs(5);
        let started = std::time::Instant::now();
        let mut attempt = 0u32;
        let mut delay = Duration::from_millis(100);
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    if attempt >= 3 || started.elapsed() + delay > budget {
                        return Err(e);
                    }
                    warn!(attempt, error = %e, "tmux call failed, retrying");
                    std::thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }

    /// Check that tmux is installed and reachable.
    pub fn check_available(&self) -> Result<String> {
        let output = self.tmux(&["-V"]).context(
            "tmux not found — install tmux (e.g., `apt install tmux` or `brew install tmux`)",
        )?;
        if !output.status.success() {
            bail!("tmux -V failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(version = %version, "tmux found");
        Ok(version)
    }

    /// Check if a tmux session exists.
    pub fn session_exists(&self, session: &str) -> bool {
        self.tmux(&["has-session", "-t", session])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Create a detached tmux session running the given program.
    pub fn create_session(
        &self,
        session: &str,
        program: &str,
        args: &[String],
        work_dir: &str,
    ) -> Result<()> {
        if self.session_exists(session) {
            bail!("tmux session '{session}' already exists");
        }

        let mut cmd_args: Vec<String> = vec![
            "new-session".into(),
            "-d".into(),
            "-s".into(),
            session.into(),
            "-c".into(),
            work_dir.into(),
            "-x".into(),
            "220".into(),
            "-y".into(),
            "50".into(),
            program.into(),
        ];
        cmd_args.extend(args.iter().cloned());

        let output = self
            .runner
            .run("tmux", &cmd_args)
            .with_context(|| format!("failed to create tmux session '{session}'"))?;

        if !output.status.success() {
            bail!(
                "tmux new-session failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        info!(session = session, "tmux session created");
        Ok(())
    }

    /// Rename a tmux session (spec.md §4.7 "SessionRenamed").
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        if !self.session_exists(old) {
            bail!("tmux session '{old}' not found, cannot rename");
        }
        if self.session_exists(new) {
            bail!("tmux session '{new}' already exists, cannot rename '{old}' onto it");
        }
        let output = self
            .tmux(&["rename-session", "-t", old, new])
            .with_context(|| format!("failed to rename session '{old}' to '{new}'"))?;
        if !output.status.success() {
            bail!(
                "tmux rename-session failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        info!(old, new, "tmux session renamed");
        Ok(())
    }

    /// List live tmux sessions whose name starts with `prefix` (used by the
    /// orchestrator at startup to rediscover sessions from a prior run).
    pub fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let output = self.tmux(&["list-sessions", "-F", "#{session_name}"]);
        let output = match output {
            Ok(o) => o,
            Err(_) => return Ok(Vec::new()),
        };
        if !output.status.success() {
            // No server running yet is not an error — just no sessions.
            return Ok(Vec::new());
        }
        let names = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|n| n.starts_with(prefix))
            .map(|s| s.to_string())
            .collect();
        Ok(names)
    }

    /// Send keys to a tmux target (session or pane), retried on transient
    /// failure.
    pub fn send_keys(&self, target: &str, keys: &str, press_enter: bool) -> Result<()> {
        self.with_retry(|| {
            let mut args = vec!["send-keys".to_string(), "-t".to_string(), target.to_string(), keys.to_string()];
            if press_enter {
                args.push("Enter".to_string());
            }
            let output = self
                .runner
                .run("tmux", &args)
                .with_context(|| format!("failed to send keys to target '{target}'"))?;
            if !output.status.success() {
                bail!(
                    "tmux send-keys failed: {}",
                    String::from_utf8_lossy(&output.stderr)
                );
            }
            debug!(target, keys, "sent keys");
            Ok(())
        })
    }

    /// Kill a tmux session. Idempotent: killing an already-gone session is
    /// `Ok(())`.
    pub fn kill_session(&self, session: &str) -> Result<()> {
        if !self.session_exists(session) {
            return Ok(());
        }
        let output = self
            .tmux(&["kill-session", "-t", session])
            .with_context(|| format!("failed to kill tmux session '{session}'"))?;
        if !output.status.success() {
            bail!(
                "tmux kill-session failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        info!(session, "tmux session killed");
        Ok(())
    }

    /// Capture the current visible content of a tmux target, with the full
    /// scrollback history requested so the Capture Engine can compute a
    /// delta against its ring buffer (spec.md §4.3).
    ///
    /// ANSI escapes are stripped before the text leaves the Terminal Bus —
    /// no downstream component ever sees raw escape sequences.
    pub fn capture(&self, target: &str) -> Result<String> {
        self.with_retry(|| {
            let output = self
                .tmux(&["capture-pane", "-t", target, "-p", "-S", "-"])
                .with_context(|| format!("failed to capture pane for target '{target}'"))?;
            if !output.status.success() {
                bail!(
                    "tmux capture-pane failed: {}",
                    String::from_utf8_lossy(&output.stderr)
                );
            }
            Ok(strip_ansi(&String::from_utf8_lossy(&output.stdout)))
        })
    }

    /// Run an arbitrary tmux subcommand (used by the Automation Rule Engine's
    /// `tmux_command` action kind), retried the same as other mutating calls.
    pub fn run_raw(&self, args: &[&str]) -> Result<String> {
        self.with_retry(|| {
            let output = self
                .tmux(args)
                .with_context(|| format!("failed to run tmux {args:?}"))?;
            if !output.status.success() {
                bail!("tmux command failed: {}", String::from_utf8_lossy(&output.stderr));
            }
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        })
    }

    /// Set up pipe-pane to additionally stream raw output to a log file, for
    /// operators who want a tail -f of a session's PTY.
    pub fn setup_pipe_pane(&self, target: &str, log_path: &Path) -> Result<()> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }
        let pipe_cmd = format!("cat >> {}", log_path.display());
        let output = self
            .tmux(&["pipe-pane", "-t", target, &pipe_cmd])
            .with_context(|| format!("failed to set up pipe-pane for target '{target}'"))?;
        if !output.status.success() {
            bail!(
                "tmux pipe-pane failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        info!(target, log = %log_path.display(), "pipe-pane configured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    fn ok_output(stdout: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(0),
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }

    fn err_output(stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(1 << 8),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    /// A scripted runner: returns queued responses in order, recording every
    /// call it received.
    struct MockRunner {
        responses: Mutex<Vec<Result<Output, String>>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl MockRunner {
        fn new(responses: Vec<Result<Output, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for MockRunner {
        fn run(&self, _program: &str, args: &[String]) -> Result<Output> {
            self.calls.lock().unwrap().push(args.to_vec());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                bail!("mock runner exhausted");
            }
            match responses.remove(0) {
                Ok(o) => Ok(o),
                Err(e) => bail!(e),
            }
        }
    }

    #[test]
    fn session_exists_true_on_success() {
        let runner = MockRunner::new(vec![Ok(ok_output(""))]);
        let tmux = Tmux::new(Box::new(runner));
        assert!(tmux.session_exists("jat-FairBay"));
    }

    #[test]
    fn session_exists_false_on_failure() {
        let runner = MockRunner::new(vec![Ok(err_output("session not found"))]);
        let tmux = Tmux::new(Box::new(runner));
        assert!(!tmux.session_exists("jat-Nope"));
    }

    #[test]
    fn create_session_rejects_duplicate() {
        let runner = MockRunner::new(vec![Ok(ok_output(""))]);
        let tmux = Tmux::new(Box::new(runner));
        let result = tmux.create_session("jat-FairBay", "claude", &[], "/work");
        assert!(result.unwrap_err().to_string().contains("already exists"));
    }

    #[test]
    fn create_session_succeeds_when_absent() {
        let runner = MockRunner::new(vec![Ok(err_output("not found")), Ok(ok_output(""))]);
        let tmux = Tmux::new(Box::new(runner));
        tmux.create_session("jat-FairBay", "claude", &[], "/work")
            .unwrap();
    }

    #[test]
    fn rename_requires_source_session() {
        let runner = MockRunner::new(vec![Ok(err_output("not found"))]);
        let tmux = Tmux::new(Box::new(runner));
        let result = tmux.rename("jat-Old", "jat-New");
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn rename_rejects_existing_target() {
        let runner = MockRunner::new(vec![Ok(ok_output("")), Ok(ok_output(""))]);
        let tmux = Tmux::new(Box::new(runner));
        let result = tmux.rename("jat-Old", "jat-New");
        assert!(result.unwrap_err().to_string().contains("already exists"));
    }

    #[test]
    fn rename_succeeds() {
        let runner = MockRunner::new(vec![
            Ok(ok_output("")),
            Ok(err_output("not found")),
            Ok(ok_output("")),
        ]);
        let tmux = Tmux::new(Box::new(runner));
        tmux.rename("jat-Old", "jat-New").unwrap();
    }

    #[test]
    fn list_filters_by_prefix() {
        let runner = MockRunner::new(vec![Ok(ok_output(
            "jat-FairBay\njat-Loon\nother-session\n",
        ))]);
        let tmux = Tmux::new(Box::new(runner));
        let sessions = tmux.list("jat-").unwrap();
        assert_eq!(sessions, vec!["jat-FairBay", "jat-Loon"]);
    }

    #[test]
    fn list_returns_empty_when_no_server() {
        let runner = MockRunner::new(vec![Err("no server running".to_string())]);
        let tmux = Tmux::new(Box::new(runner));
        assert_eq!(tmux.list("jat-").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn capture_strips_ansi() {
        let runner = MockRunner::new(vec![Ok(ok_output("\x1b[31mERROR\x1b[0m: boom"))]);
        let tmux = Tmux::new(Box::new(runner));
        let captured = tmux.capture("jat-FairBay").unwrap();
        assert_eq!(captured, "ERROR: boom");
    }

    #[test]
    fn kill_session_is_idempotent() {
        let runner = MockRunner::new(vec![Ok(err_output("not found"))]);
        let tmux = Tmux::new(Box::new(runner));
        tmux.kill_session("jat-Gone").unwrap();
    }

    #[test]
    fn send_keys_retries_on_transient_failure() {
        let runner = MockRunner::new(vec![
            Ok(err_output("server busy")),
            Ok(ok_output("")),
        ]);
        let tmux = Tmux::new(Box::new(runner));
        tmux.send_keys("jat-FairBay", "hello", true).unwrap();
    }

    #[test]
    fn run_raw_returns_stdout() {
        let runner = MockRunner::new(vec![Ok(ok_output("pane-0\n"))]);
        let tmux = Tmux::new(Box::new(runner));
        let out = tmux.run_raw(&["list-panes", "-t", "jat-FairBay", "-F", "#{pane_id}"]).unwrap();
        assert_eq!(out, "pane-0\n");
    }

    #[test]
    fn send_keys_gives_up_after_three_attempts() {
        let runner = MockRunner::new(vec![
            Ok(err_output("server busy")),
            Ok(err_output("server busy")),
            Ok(err_output("server busy")),
        ]);
        let tmux = Tmux::new(Box::new(runner));
        assert!(tmux.send_keys("jat-FairBay", "hello", true).is_err());
    }
}
