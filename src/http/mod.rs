//! HTTP/SSE surface (spec.md §6.6). A thin `axum` layer: handlers validate
//! input, translate it into a [`SupervisorHandle`] call, and never touch the
//! session table directly (spec.md §5).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Path as AxumPath, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::JatError;
use crate::orchestrator::{EpicContext, SessionState, SupervisorHandle, SupervisorEvent};
use crate::question::{Answer, QuestionStore, SuppressionGuard};
use crate::rules::{self, ImportMode, Rule, RulesFile};

#[derive(Clone)]
pub struct AppState {
    pub supervisor: SupervisorHandle,
    pub rules: Arc<Mutex<Vec<Rule>>>,
    pub rules_store_path: PathBuf,
    pub questions: Arc<QuestionStore>,
    pub suppression: Arc<Mutex<SuppressionGuard>>,
    pub max_sessions: u32,
    pub agent_stagger: u32,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/stream", get(stream_sessions))
        .route("/api/sessions/spawn", post(spawn_session))
        .route("/api/sessions/spawn_batch", post(spawn_batch))
        .route("/api/sessions/:name/kill", post(kill_session))
        .route("/api/sessions/:name/rename", post(rename_session))
        .route("/api/sessions/:name/send-keys", post(send_keys))
        .route("/api/sessions/:name/answer", post(answer_question))
        .route("/api/rules", get(list_rules).post(create_rule))
        .route("/api/rules/:id", put(update_rule).delete(delete_rule))
        .route("/api/rules/reorder", post(reorder_rules))
        .route("/api/rules/export", get(export_rules))
        .route("/api/rules/import", post(import_rules))
        .route("/api/servers/:name", get(server_status))
        .route("/api/servers/:name/restart", post(restart_server))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<crate::orchestrator::SessionSnapshot>> {
    Json(state.supervisor.snapshot().await)
}

fn event_to_sse(event: SupervisorEvent) -> Result<Event, std::convert::Infallible> {
    Ok(Event::default().json_data(event).unwrap_or_else(|_| Event::default().data("{}")))
}

async fn stream_sessions(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.supervisor.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| item.ok().map(event_to_sse));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct SpawnRequest {
    task_id: Option<String>,
    project_key: String,
    #[serde(default)]
    epic: Option<EpicRequest>,
}

#[derive(Debug, Deserialize)]
struct EpicRequest {
    child_task_ids: Vec<String>,
    #[serde(default)]
    kill_on_complete: bool,
}

#[derive(Debug, Serialize)]
struct SpawnResponse {
    session_id: String,
}

async fn spawn_session(
    State(state): State<AppState>,
    Json(req): Json<SpawnRequest>,
) -> Result<Json<SpawnResponse>, JatError> {
    let current = state.supervisor.snapshot().await;
    if current.len() as u32 >= state.max_sessions {
        return Err(JatError::validation("session cap reached"));
    }

    let epic = req.epic.map(|e| EpicContext {
        child_task_ids: e.child_task_ids,
        current_index: 0,
        kill_on_complete: e.kill_on_complete,
    });

    let session_id = state
        .supervisor
        .spawn_session(req.task_id, req.project_key, epic)
        .await
        .map_err(JatError::transient)?;

    Ok(Json(SpawnResponse { session_id }))
}

#[derive(Debug, Deserialize)]
struct BatchSpawnRequest {
    task_ids: Vec<String>,
    project_key: String,
}

#[derive(Debug, Serialize)]
struct BatchSpawnResponse {
    session_ids: Vec<String>,
}

/// Spawns a chain of sessions, one per task id, staggering each create by
/// `agent_stagger` seconds the same way epic auto-advance does (spec.md
/// §4.7 "Autopilot on review" step 3 / §6.5 `agent_stagger`).
async fn spawn_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchSpawnRequest>,
) -> Result<Json<BatchSpawnResponse>, JatError> {
    let mut session_ids = Vec::with_capacity(req.task_ids.len());
    for (i, task_id) in req.task_ids.into_iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_secs(state.agent_stagger as u64)).await;
        }
        let current = state.supervisor.snapshot().await;
        if current.len() as u32 >= state.max_sessions {
            return Err(JatError::validation("session cap reached"));
        }
        let session_id = state
            .supervisor
            .spawn_session(Some(task_id), req.project_key.clone(), None)
            .await
            .map_err(JatError::transient)?;
        session_ids.push(session_id);
    }
    Ok(Json(BatchSpawnResponse { session_ids }))
}

async fn kill_session(State(state): State<AppState>, AxumPath(name): AxumPath<String>) -> Result<(), JatError> {
    state.supervisor.kill(name).await.map_err(JatError::structural)
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    new_name: String,
}

async fn rename_session(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
    Json(req): Json<RenameRequest>,
) -> Result<(), JatError> {
    state
        .supervisor
        .rename(name, req.new_name)
        .await
        .map_err(JatError::validation)
}

#[derive(Debug, Deserialize)]
struct SendKeysRequest {
    keys: String,
    #[serde(default = "default_true")]
    press_enter: bool,
}

fn default_true() -> bool {
    true
}

async fn send_keys(
    AxumPath(name): AxumPath<String>,
    Json(req): Json<SendKeysRequest>,
) -> Result<(), JatError> {
    // Sent directly through the Terminal Bus rather than the supervisor —
    // free-form keystrokes carry no state-machine meaning (spec.md §6.6).
    let tmux = crate::tmux::Tmux::default();
    tmux.send_keys(&name, &req.keys, req.press_enter)
        .map_err(|e| JatError::transient(e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum AnswerRequest {
    Choice { index: usize },
    Confirm { value: bool },
    Input { text: String },
    Cancel,
}

async fn answer_question(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
    Json(req): Json<AnswerRequest>,
) -> Result<(), JatError> {
    let answer = match req {
        AnswerRequest::Choice { index } => Answer::Choice(index),
        AnswerRequest::Confirm { value } => Answer::Confirm(value),
        AnswerRequest::Input { text } => Answer::Input(text),
        AnswerRequest::Cancel => Answer::Cancelled,
    };

    let tmux = crate::tmux::Tmux::default();
    if let Some(keys) = crate::question::answer_to_keystrokes(&answer) {
        tmux.send_keys(&name, &keys, true)
            .map_err(|e| JatError::transient(e.to_string()))?;
    } else {
        tmux.send_keys(&name, "\x1b", false)
            .map_err(|e| JatError::transient(e.to_string()))?;
    }

    state.questions.delete(&name, &name);

    // Suppress the fallback extractor re-reading the same prompt for the
    // configured window before the session's next capture tick lands
    // (spec.md §4.6 step 4).
    if let Some(session) = state.supervisor.snapshot().await.into_iter().find(|s| s.display_name == name) {
        state.suppression.lock().unwrap().suppress(&session.session_id, Instant::now());
        state.supervisor.set_pending_question(session.session_id, None).await;
    }
    Ok(())
}

async fn list_rules(State(state): State<AppState>) -> Json<Vec<Rule>> {
    Json(state.rules.lock().unwrap().clone())
}

async fn create_rule(State(state): State<AppState>, Json(mut rule): Json<Rule>) -> Result<(), JatError> {
    rule.validate();
    let mut rules = state.rules.lock().unwrap();
    rules.push(rule);
    rules::save_store(&state.rules_store_path, &rules).map_err(|e| JatError::fatal(e.to_string()))
}

async fn update_rule(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(mut updated): Json<Rule>,
) -> Result<(), JatError> {
    updated.validate();
    let mut rules = state.rules.lock().unwrap();
    let Some(slot) = rules.iter_mut().find(|r| r.id == id) else {
        return Err(JatError::validation(format!("unknown rule: {id}")));
    };
    *slot = updated;
    rules::save_store(&state.rules_store_path, &rules).map_err(|e| JatError::fatal(e.to_string()))
}

async fn delete_rule(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> Result<(), JatError> {
    let mut rules = state.rules.lock().unwrap();
    rules.retain(|r| r.id != id);
    rules::save_store(&state.rules_store_path, &rules).map_err(|e| JatError::fatal(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ReorderRequest {
    ordered_ids: Vec<String>,
}

async fn reorder_rules(
    State(state): State<AppState>,
    Json(req): Json<ReorderRequest>,
) -> Result<(), JatError> {
    let mut rules = state.rules.lock().unwrap();
    for (idx, id) in req.ordered_ids.iter().enumerate() {
        if let Some(rule) = rules.iter_mut().find(|r| &r.id == id) {
            rule.priority = (req.ordered_ids.len() - idx) as i32;
        }
    }
    rules::save_store(&state.rules_store_path, &rules).map_err(|e| JatError::fatal(e.to_string()))
}

async fn export_rules(State(state): State<AppState>) -> Json<RulesFile> {
    let rules = state.rules.lock().unwrap();
    Json(RulesFile { version: 1, rules: rules.clone() })
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    file: RulesFile,
    #[serde(default)]
    mode: ImportModeWire,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ImportModeWire {
    #[default]
    Merge,
    Replace,
}

async fn import_rules(
    State(state): State<AppState>,
    Json(req): Json<ImportRequest>,
) -> Result<(), JatError> {
    let mode = match req.mode {
        ImportModeWire::Merge => ImportMode::Merge,
        ImportModeWire::Replace => ImportMode::Replace,
    };
    let mut rules = state.rules.lock().unwrap();
    let existing = std::mem::take(&mut *rules);
    *rules = rules::import(existing, req.file.rules, mode);
    rules::save_store(&state.rules_store_path, &rules).map_err(|e| JatError::fatal(e.to_string()))
}

#[derive(Debug, Serialize)]
struct ServerStatus {
    name: String,
    port: Option<u16>,
    reachable: bool,
}

/// Scans the session's mirrored capture tail for a localhost URL (spec.md
/// §4.3 "server-session port detector").
async fn server_status(State(state): State<AppState>, AxumPath(name): AxumPath<String>) -> Json<ServerStatus> {
    let sessions = state.supervisor.snapshot().await;
    let Some(session) = sessions.into_iter().find(|s| s.display_name == name) else {
        return Json(ServerStatus { name, port: None, reachable: false });
    };
    let tail = session.capture_tail.join("\n");
    let port = crate::capture::PortDetector::default().detect(&tail);
    let reachable = port.is_some() && !matches!(session.state, SessionState::Killed | SessionState::Dead);
    Json(ServerStatus { name, port, reachable })
}

/// Kills and recreates the session's tmux process; the restarted session's
/// own capture ticker re-detects the port from scratch once it starts
/// producing output (spec.md §4.3, §4.7).
async fn restart_server(State(state): State<AppState>, AxumPath(name): AxumPath<String>) -> Result<(), JatError> {
    let sessions = state.supervisor.snapshot().await;
    let Some(existing) = sessions.into_iter().find(|s| s.display_name == name) else {
        return Err(JatError::validation(format!("unknown session: {name}")));
    };

    state.supervisor.kill(name).await.map_err(JatError::structural)?;
    state
        .supervisor
        .spawn_session(existing.task_id, existing.project_key, None)
        .await
        .map_err(JatError::transient)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Supervisor;
    use crate::review::ReviewPolicy;
    use crate::tmux::{CommandRunner, Tmux};
    use std::os::unix::process::ExitStatusExt;
    use std::process::{ExitStatus, Output};
    use std::time::Duration;

    struct AlwaysOkRunner;
    impl CommandRunner for AlwaysOkRunner {
        fn run(&self, _program: &str, args: &[String]) -> anyhow::Result<Output> {
            if args.first().map(|s| s.as_str()) == Some("has-session") {
                return Ok(Output { status: ExitStatus::from_raw(1 << 8), stdout: Vec::new(), stderr: Vec::new() });
            }
            Ok(Output { status: ExitStatus::from_raw(0), stdout: Vec::new(), stderr: Vec::new() })
        }
    }

    fn test_state() -> AppState {
        let tmp = tempfile::tempdir().unwrap();
        AppState {
            supervisor: Supervisor::spawn_actor(Tmux::new(Box::new(AlwaysOkRunner)), ReviewPolicy::default_policy(), Duration::from_secs(20)),
            rules: Arc::new(Mutex::new(Vec::new())),
            rules_store_path: tmp.path().join("rules.json"),
            questions: Arc::new(QuestionStore::new(tmp.path())),
            suppression: Arc::new(Mutex::new(SuppressionGuard::new(Duration::from_secs(2)))),
            max_sessions: 10,
            agent_stagger: 1,
        }
    }

    #[tokio::test]
    async fn spawn_then_list_reflects_new_session() {
        let state = test_state();
        let resp = spawn_session(
            State(state.clone()),
            Json(SpawnRequest { task_id: Some("t1".into()), project_key: "/work".into(), epic: None }),
        )
        .await
        .unwrap();
        let sessions = list_sessions(State(state)).await;
        assert_eq!(sessions.0.len(), 1);
        assert_eq!(sessions.0[0].session_id, resp.0.session_id);
    }

    #[tokio::test]
    async fn spawn_rejected_past_session_cap() {
        let mut state = test_state();
        state.max_sessions = 0;
        let err = spawn_session(
            State(state),
            Json(SpawnRequest { task_id: None, project_key: "/work".into(), epic: None }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, JatError::Validation(_)));
    }

    #[tokio::test]
    async fn create_and_export_rule_round_trips() {
        let state = test_state();
        let rule = Rule {
            id: "r1".into(),
            name: "test".into(),
            category: rules::RuleCategory::Custom,
            enabled: true,
            priority: 0,
            patterns: vec![rules::Pattern { mode: rules::PatternMode::Literal, case_sensitive: false, text: "hi".into() }],
            actions: vec![],
            cooldown_seconds: 0,
            max_triggers_per_session: 0,
            session_state_filter: vec![],
            preset_id: None,
            is_preset: false,
            validation_error: None,
        };
        create_rule(State(state.clone()), Json(rule)).await.unwrap();
        let exported = export_rules(State(state)).await;
        assert_eq!(exported.0.rules.len(), 1);
    }
}
