//! Error taxonomy for the orchestrator.
//!
//! `anyhow::Result` remains the vocabulary type for leaf functions throughout
//! the crate (grep the corpus: every module does this). `JatError` exists at
//! the handful of boundaries that must *branch* on error kind: HTTP handlers
//! (validation → 400), the Rule Engine's per-action failure handling
//! (transient → retry, structural → silent fail + session death), the Signal
//! Intake (poison → quarantine), and `main.rs`'s exit-code selection (fatal →
//! non-zero exit).

use std::fmt;

/// The five-way error taxonomy from the error handling design.
#[derive(Debug, thiserror::Error)]
pub enum JatError {
    /// Caller-facing input error: invalid regex on rule save, duplicate
    /// display-name on rename. Surfaced synchronously (HTTP 400); never
    /// crashes the process.
    #[error("validation error: {0}")]
    Validation(String),

    /// A call that is expected to eventually succeed failed this time:
    /// Terminal Bus call failed, intake file unreadable. Retried with
    /// backoff by the caller; surfaced as an observability event if retries
    /// are exhausted.
    #[error("transient error: {0}")]
    Transient(String),

    /// The world changed out from under us: session disappeared mid-action.
    /// The action fails silently; the session transitions to `killed`.
    #[error("structural error: {0}")]
    Structural(String),

    /// Malformed input that can be safely discarded: a signal file that
    /// doesn't parse. Quarantined, not retried.
    #[error("poison input: {0}")]
    Poison(String),

    /// Cannot open persistent stores at startup. The process exits non-zero.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl JatError {
    /// Process exit code per spec.md §6.6: 0 clean, 64 config validation
    /// failure, 70 terminal-bus unavailable at startup. Only meaningful for
    /// startup-time `Fatal`/`Validation` errors; other kinds never reach
    /// `main`'s top level.
    pub fn exit_code(&self) -> i32 {
        match self {
            JatError::Validation(_) => 64,
            JatError::Fatal(_) => 70,
            _ => 1,
        }
    }

    pub fn validation(msg: impl fmt::Display) -> Self {
        JatError::Validation(msg.to_string())
    }

    pub fn transient(msg: impl fmt::Display) -> Self {
        JatError::Transient(msg.to_string())
    }

    pub fn structural(msg: impl fmt::Display) -> Self {
        JatError::Structural(msg.to_string())
    }

    pub fn poison(msg: impl fmt::Display) -> Self {
        JatError::Poison(msg.to_string())
    }

    pub fn fatal(msg: impl fmt::Display) -> Self {
        JatError::Fatal(msg.to_string())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, JatError::Transient(_))
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, JatError::Structural(_))
    }
}

impl axum::response::IntoResponse for JatError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let status = match self {
            JatError::Validation(_) => StatusCode::BAD_REQUEST,
            JatError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            JatError::Structural(_) => StatusCode::CONFLICT,
            JatError::Poison(_) => StatusCode::UNPROCESSABLE_ENTITY,
            JatError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(JatError::validation("bad").exit_code(), 64);
        assert_eq!(JatError::fatal("no store").exit_code(), 70);
        assert_eq!(JatError::transient("timeout").exit_code(), 1);
    }

    #[test]
    fn kind_predicates() {
        assert!(JatError::transient("x").is_transient());
        assert!(!JatError::transient("x").is_structural());
        assert!(JatError::structural("x").is_structural());
    }
}
