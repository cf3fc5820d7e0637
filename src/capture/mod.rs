//! Capture Engine: periodic pane snapshots, ring buffers, and delta
//! computation (spec.md §4.3).
//!
//! One [`CaptureBuffer`] per live session, mutated exclusively by this
//! module (spec.md §3 Ownership). Other components read immutable
//! [`CaptureDelta`] snapshots published after each tick.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use regex::Regex;
use tracing::debug;

/// A snapshot of what changed since the previous capture, handed to the
/// Classifier and Rule Engine.
#[derive(Debug, Clone)]
pub struct CaptureDelta {
    pub session_id: String,
    pub delta_text: String,
    pub snapshot_tail: Vec<String>,
}

/// Per-session ring buffer of plain-text lines plus delta-computation
/// watermark (spec.md §3 CaptureBuffer).
pub struct CaptureBuffer {
    lines: VecDeque<String>,
    max_lines: usize,
    last_capture: Option<String>,
}

impl CaptureBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(max_lines),
            max_lines,
            last_capture: None,
        }
    }

    /// Ingest a fresh pane capture (already ANSI-stripped by the Terminal
    /// Bus) and compute the delta against the prior capture.
    ///
    /// Uses a simple but correct diffing strategy: if the new capture starts
    /// with the previous capture as a prefix, the delta is the suffix. If
    /// the pane scrolled past what we'd previously captured (the old text is
    /// no longer a prefix — hysteresis bound exceeded), the Terminal Bus
    /// history window no longer overlaps and the whole new capture is
    /// treated as delta (spec.md §4.3: "On overflow, the entire new ring is
    /// treated as delta").
    pub fn ingest(&mut self, captured: &str) -> String {
        let delta = match &self.last_capture {
            Some(prev) if captured.starts_with(prev.as_str()) => {
                captured[prev.len()..].to_string()
            }
            Some(prev) => {
                // Look for the longest suffix of `prev` that is a prefix of
                // `captured` — handles the pane having scrolled by less than
                // a full screen since the last capture.
                find_overlap_delta(prev, captured)
            }
            None => captured.to_string(),
        };

        for line in delta.lines() {
            if self.lines.len() >= self.max_lines {
                self.lines.pop_front();
            }
            self.lines.push_back(line.to_string());
        }

        self.last_capture = Some(captured.to_string());
        delta
    }

    pub fn snapshot_tail(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn recent_lines(&self, n: usize) -> Vec<String> {
        let len = self.lines.len();
        let start = len.saturating_sub(n);
        self.lines.iter().skip(start).cloned().collect()
    }
}

/// Find the suffix of `captured` not already covered by `prev`, by locating
/// the longest prefix of `captured` that matches a suffix of `prev`.
fn find_overlap_delta(prev: &str, captured: &str) -> String {
    let prev_lines: Vec<&str> = prev.lines().collect();
    let captured_lines: Vec<&str> = captured.lines().collect();

    for overlap in (1..=prev_lines.len().min(captured_lines.len())).rev() {
        if prev_lines[prev_lines.len() - overlap..] == captured_lines[..overlap] {
            return captured_lines[overlap..].join("\n");
        }
    }
    // No overlap found at all — pane scrolled past our entire window.
    captured.to_string()
}

/// Thread-safe handle shared between the capture ticker and readers.
#[derive(Clone)]
pub struct SharedCaptureBuffer {
    inner: Arc<Mutex<CaptureBuffer>>,
}

impl SharedCaptureBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CaptureBuffer::new(max_lines))),
        }
    }

    pub fn ingest(&self, session_id: &str, captured: &str) -> CaptureDelta {
        let mut buf = self.inner.lock().unwrap();
        let delta_text = buf.ingest(captured);
        CaptureDelta {
            session_id: session_id.to_string(),
            delta_text,
            snapshot_tail: buf.snapshot_tail(),
        }
    }

    pub fn recent_lines(&self, n: usize) -> Vec<String> {
        self.inner.lock().unwrap().recent_lines(n)
    }
}

/// Scans recent output of `server-*` sessions for a localhost URL and
/// records the detected port (spec.md §4.3 "server-session port detector").
pub struct PortDetector {
    re: Regex,
}

impl Default for PortDetector {
    fn default() -> Self {
        Self {
            re: Regex::new(r"https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0):(\d{2,5})\b").unwrap(),
        }
    }
}

impl PortDetector {
    pub fn detect(&self, text: &str) -> Option<u16> {
        self.re
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

/// Run one capture tick for a session: ask the Terminal Bus for the pane,
/// feed it into the buffer, log the resulting delta size.
pub fn tick(tmux: &crate::tmux::Tmux, target: &str, buffer: &SharedCaptureBuffer) -> anyhow::Result<CaptureDelta> {
    let captured = tmux.capture(target)?;
    let delta = buffer.ingest(target, &captured);
    if !delta.delta_text.is_empty() {
        debug!(session = target, bytes = delta.delta_text.len(), "capture delta");
    }
    Ok(delta)
}
