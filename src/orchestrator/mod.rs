//! Orchestrator: the top-level supervisor. Owns the per-session state
//! machine, owns the session table exclusively (spec.md §3 Ownership),
//! and drives spawning, renaming, killing, the watchdog, and the autopilot
//! review policy (spec.md §4.7).
//!
//! Modeled as a single actor holding the authoritative session map, reached
//! only through message passing (spec.md §9 design note: "Global mutable
//! state … supervisor with message passing"). HTTP handlers and background
//! tickers talk to it exclusively through [`SupervisorHandle`] — never
//! touching the map directly (spec.md §5).

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use crate::classifier::ClassifiedState;
use crate::review::{ReviewOutcome, ReviewPolicy};
use crate::signal::SignalKind;

/// The full per-session state machine (spec.md §4.7 diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Pending,
    Named,
    Working,
    Idle,
    NeedsInput,
    ReadyForReview,
    Completing,
    Completed,
    Killed,
    Dead,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Killed | SessionState::Dead)
    }

    /// The kebab-case name used as the Automation Rule Engine's
    /// `session_state_filter` vocabulary (spec.md §4.5) — matches this
    /// enum's `Serialize` rendering.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Named => "named",
            SessionState::Working => "working",
            SessionState::Idle => "idle",
            SessionState::NeedsInput => "needs-input",
            SessionState::ReadyForReview => "ready-for-review",
            SessionState::Completing => "completing",
            SessionState::Completed => "completed",
            SessionState::Killed => "killed",
            SessionState::Dead => "dead",
        }
    }
}

impl From<SignalKind> for SessionState {
    fn from(kind: SignalKind) -> Self {
        match kind {
            SignalKind::Starting => SessionState::Named,
            SignalKind::Working => SessionState::Working,
            SignalKind::Idle => SessionState::Idle,
            SignalKind::NeedsInput => SessionState::NeedsInput,
            SignalKind::Review => SessionState::ReadyForReview,
            SignalKind::Completing => SessionState::Completing,
            SignalKind::Completed => SessionState::Completed,
            SignalKind::Compacting => SessionState::Working,
        }
    }
}

impl From<ClassifiedState> for SessionState {
    fn from(state: ClassifiedState) -> Self {
        match state {
            ClassifiedState::Starting => SessionState::Named,
            ClassifiedState::Working => SessionState::Working,
            ClassifiedState::Idle => SessionState::Idle,
            ClassifiedState::NeedsInput => SessionState::NeedsInput,
            ClassifiedState::ReadyForReview => SessionState::ReadyForReview,
            ClassifiedState::Completing => SessionState::Completing,
            ClassifiedState::Completed => SessionState::Completed,
            ClassifiedState::Compacting => SessionState::Working,
        }
    }
}

/// An ordered chain of tasks spawned one-at-a-time (spec.md §3 EpicContext).
#[derive(Debug, Clone, Serialize)]
pub struct EpicContext {
    pub child_task_ids: Vec<String>,
    pub current_index: usize,
    pub kill_on_complete: bool,
}

impl EpicContext {
    pub fn next_task_id(&self) -> Option<&str> {
        self.child_task_ids.get(self.current_index).map(|s| s.as_str())
    }

    pub fn advanced(&self) -> Self {
        Self {
            child_task_ids: self.child_task_ids.clone(),
            current_index: self.current_index + 1,
            kill_on_complete: self.kill_on_complete,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub display_name: String,
    pub task_id: Option<String>,
    pub project_key: String,
    pub spawn_time: SystemTime,
    pub last_activity: SystemTime,
    pub state: SessionState,
    pub attached: bool,
    pub epic_context: Option<EpicContext>,
    pub kill_on_next_completed: bool,
    /// Tail of the Capture Engine's ring buffer, mirrored here so readers
    /// (HTTP snapshot, SSE) don't need a second round-trip into the capture
    /// layer (spec.md §4.7 HTTP/SSE surface: "capture tail").
    pub capture_tail: Vec<String>,
    /// The currently live question's id, if any (spec.md §4.7: "pending
    /// question").
    pub pending_question: Option<String>,
    /// Per-rule fire counts for this session (spec.md §4.7: "trigger
    /// counts").
    pub trigger_counts: HashMap<String, u32>,
    pub last_signal_kind: Option<SignalKind>,
    pub last_signal_at: Option<SystemTime>,
}

/// Everything the per-session capture/classify/rule loop needs that isn't
/// part of the public [`SessionSnapshot`] contract (it carries a
/// `SystemTime`, which the JSON/SSE surface has no business exposing).
#[derive(Debug, Clone)]
pub struct SessionRuntimeInfo {
    pub display_name: String,
    pub project_key: String,
    pub attached: bool,
    pub state: SessionState,
    pub last_signal: Option<(SignalKind, SystemTime)>,
}

/// Immutable snapshot handed to readers (HTTP surface, SSE) — never the
/// live map itself (spec.md §5 "Reads take a shared lock and copy out
/// immutable snapshots").
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub display_name: String,
    pub task_id: Option<String>,
    pub project_key: String,
    pub state: SessionState,
    pub attached: bool,
    pub capture_tail: Vec<String>,
    pub pending_question: Option<String>,
    pub trigger_counts: HashMap<String, u32>,
}

impl From<&Session> for SessionSnapshot {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.session_id.clone(),
            display_name: s.display_name.clone(),
            task_id: s.task_id.clone(),
            project_key: s.project_key.clone(),
            state: s.state,
            attached: s.attached,
            capture_tail: s.capture_tail.clone(),
            pending_question: s.pending_question.clone(),
            trigger_counts: s.trigger_counts.clone(),
        }
    }
}

impl From<&Session> for SessionRuntimeInfo {
    fn from(s: &Session) -> Self {
        Self {
            display_name: s.display_name.clone(),
            project_key: s.project_key.clone(),
            attached: s.attached,
            state: s.state,
            last_signal: s.last_signal_kind.zip(s.last_signal_at),
        }
    }
}

/// Events broadcast on the per-session / global SSE fan-out.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
    StateChanged { session_id: String, from: SessionState, to: SessionState },
    SessionSpawned { session_id: String, display_name: String },
    SessionRenamed { session_id: String, old_name: String, new_name: String },
    SessionEnded { session_id: String, reason: String },
    /// A non-empty capture delta was ingested (spec.md §4.7 SSE surface:
    /// "capture deltas").
    CaptureDelta { session_id: String, delta_text: String },
    /// A question was written for the session (spec.md §4.7: "question
    /// births").
    QuestionCreated { session_id: String, question_id: String },
    /// The session's pending question was cleared (spec.md §4.7: "question
    /// … deaths").
    QuestionResolved { session_id: String },
    /// A rule matched and scheduled at least one action (spec.md §4.7: "rule
    /// trigger events").
    RuleTriggered { session_id: String, rule_id: String },
    /// An epic-chained session just killed itself on completion and has a
    /// next task queued; the caller spawns it after `agent_stagger` seconds
    /// (spec.md §4.7 "Autopilot on review" step 3).
    EpicAdvanceReady { project_key: String, next_task_id: String, epic: EpicContext },
}

enum Message {
    Spawn {
        task_id: Option<String>,
        project_key: String,
        epic: Option<EpicContext>,
        reply: oneshot::Sender<Result<String, String>>,
    },
    Register {
        session_id: String,
        chosen_name: String,
        reply: oneshot::Sender<Result<String, String>>,
    },
    ApplySignal {
        session_id: String,
        kind: SignalKind,
        reply: oneshot::Sender<Result<(), String>>,
    },
    ApplyClassified {
        session_id: String,
        state: ClassifiedState,
        reply: oneshot::Sender<()>,
    },
    Kill {
        display_name: String,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Rename {
        display_name: String,
        new_name: String,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<SessionSnapshot>>,
    },
    Get {
        session_id: String,
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
    GetRuntimeInfo {
        session_id: String,
        reply: oneshot::Sender<Option<SessionRuntimeInfo>>,
    },
    UpdateCapture {
        session_id: String,
        tail: Vec<String>,
        delta_text: String,
    },
    SetPendingQuestion {
        session_id: String,
        question_id: Option<String>,
    },
    RecordTrigger {
        session_id: String,
        rule_id: String,
    },
    Watchdog,
}

/// Handle used by HTTP handlers and background tasks — the only entry point
/// into the supervisor actor.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<Message>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl SupervisorHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    pub async fn spawn_session(
        &self,
        task_id: Option<String>,
        project_key: String,
        epic: Option<EpicContext>,
    ) -> Result<String, String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Spawn { task_id, project_key, epic, reply })
            .await
            .map_err(|_| "supervisor stopped".to_string())?;
        rx.await.map_err(|_| "supervisor dropped reply".to_string())?
    }

    pub async fn register_name(&self, session_id: String, chosen_name: String) -> Result<String, String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Register { session_id, chosen_name, reply })
            .await
            .map_err(|_| "supervisor stopped".to_string())?;
        rx.await.map_err(|_| "supervisor dropped reply".to_string())?
    }

    pub async fn apply_signal(&self, session_id: String, kind: SignalKind) -> Result<(), String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::ApplySignal { session_id, kind, reply })
            .await
            .map_err(|_| "supervisor stopped".to_string())?;
        rx.await.map_err(|_| "supervisor dropped reply".to_string())?
    }

    pub async fn apply_classified(&self, session_id: String, state: ClassifiedState) {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Message::ApplyClassified { session_id, state, reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub async fn kill(&self, display_name: String) -> Result<(), String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Kill { display_name, reply })
            .await
            .map_err(|_| "supervisor stopped".to_string())?;
        rx.await.map_err(|_| "supervisor dropped reply".to_string())?
    }

    pub async fn rename(&self, display_name: String, new_name: String) -> Result<(), String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Rename { display_name, new_name, reply })
            .await
            .map_err(|_| "supervisor stopped".to_string())?;
        rx.await.map_err(|_| "supervisor dropped reply".to_string())?
    }

    pub async fn snapshot(&self) -> Vec<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Message::Snapshot { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn watchdog_tick(&self) {
        let _ = self.tx.send(Message::Watchdog).await;
    }

    pub async fn get_session(&self, session_id: &str) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Message::Get { session_id: session_id.to_string(), reply })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn get_runtime_info(&self, session_id: &str) -> Option<SessionRuntimeInfo> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Message::GetRuntimeInfo { session_id: session_id.to_string(), reply })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn update_capture(&self, session_id: String, tail: Vec<String>, delta_text: String) {
        let _ = self.tx.send(Message::UpdateCapture { session_id, tail, delta_text }).await;
    }

    pub async fn set_pending_question(&self, session_id: String, question_id: Option<String>) {
        let _ = self.tx.send(Message::SetPendingQuestion { session_id, question_id }).await;
    }

    pub async fn record_trigger(&self, session_id: String, rule_id: String) {
        let _ = self.tx.send(Message::RecordTrigger { session_id, rule_id }).await;
    }
}

/// Owns the session table. Runs as a single `tokio` task; all mutation goes
/// through `Message`s received on `rx`.
pub struct Supervisor {
    sessions: HashMap<String, Session>,
    tmux: crate::tmux::Tmux,
    review_policy: ReviewPolicy,
    startup_timeout: Duration,
    events: broadcast::Sender<SupervisorEvent>,
    rx: mpsc::Receiver<Message>,
}

impl Supervisor {
    pub fn spawn_actor(
        tmux: crate::tmux::Tmux,
        review_policy: ReviewPolicy,
        startup_timeout: Duration,
    ) -> SupervisorHandle {
        let (tx, rx) = mpsc::channel(256);
        let (events, _) = broadcast::channel(256);
        let handle = SupervisorHandle { tx, events: events.clone() };

        let supervisor = Supervisor {
            sessions: HashMap::new(),
            tmux,
            review_policy,
            startup_timeout,
            events,
            rx,
        };
        tokio::spawn(supervisor.run());
        handle
    }

    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            self.handle(msg);
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        let _ = self.events.send(event);
    }

    fn handle(&mut self, msg: Message) {
        match msg {
            Message::Spawn { task_id, project_key, epic, reply } => {
                let _ = reply.send(self.do_spawn(task_id, project_key, epic));
            }
            Message::Register { session_id, chosen_name, reply } => {
                let _ = reply.send(self.do_register(&session_id, &chosen_name));
            }
            Message::ApplySignal { session_id, kind, reply } => {
                let _ = reply.send(self.do_apply_signal(&session_id, kind));
            }
            Message::ApplyClassified { session_id, state, reply } => {
                self.do_apply_classified(&session_id, state);
                let _ = reply.send(());
            }
            Message::Kill { display_name, reply } => {
                let _ = reply.send(self.do_kill(&display_name));
            }
            Message::Rename { display_name, new_name, reply } => {
                let _ = reply.send(self.do_rename(&display_name, &new_name));
            }
            Message::Snapshot { reply } => {
                let snapshot = self.sessions.values().map(SessionSnapshot::from).collect();
                let _ = reply.send(snapshot);
            }
            Message::Get { session_id, reply } => {
                let _ = reply.send(self.sessions.get(&session_id).map(SessionSnapshot::from));
            }
            Message::GetRuntimeInfo { session_id, reply } => {
                let _ = reply.send(self.sessions.get(&session_id).map(SessionRuntimeInfo::from));
            }
            Message::UpdateCapture { session_id, tail, delta_text } => {
                self.do_update_capture(&session_id, tail, delta_text);
            }
            Message::SetPendingQuestion { session_id, question_id } => {
                self.do_set_pending_question(&session_id, question_id);
            }
            Message::RecordTrigger { session_id, rule_id } => {
                self.do_record_trigger(&session_id, &rule_id);
            }
            Message::Watchdog => self.do_watchdog(),
        }
    }

    fn do_spawn(
        &mut self,
        task_id: Option<String>,
        project_key: String,
        epic: Option<EpicContext>,
    ) -> Result<String, String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let display_name = format!("jat-pending-{}", now_nanos());

        self.tmux
            .create_session(&display_name, "claude", &[], &project_key)
            .map_err(|e| e.to_string())?;

        let now = SystemTime::now();
        self.sessions.insert(
            session_id.clone(),
            Session {
                session_id: session_id.clone(),
                display_name: display_name.clone(),
                task_id,
                project_key,
                spawn_time: now,
                last_activity: now,
                state: SessionState::Pending,
                attached: false,
                epic_context: epic,
                kill_on_next_completed: false,
                capture_tail: Vec::new(),
                pending_question: None,
                trigger_counts: HashMap::new(),
                last_signal_kind: None,
                last_signal_at: None,
            },
        );

        self.emit(SupervisorEvent::SessionSpawned { session_id: session_id.clone(), display_name });
        Ok(session_id)
    }

    /// Handles the agent-identity-file rename trigger (spec.md §4.7
    /// "Spawning" step 5, and Scenario F's collision retry).
    fn do_register(&mut self, session_id: &str, chosen_name: &str) -> Result<String, String> {
        let old_name = self
            .sessions
            .get(session_id)
            .map(|s| s.display_name.clone())
            .ok_or_else(|| "unknown session".to_string())?;

        let mut candidate = format!("jat-{chosen_name}");
        let mut suffix = 2u32;
        while self.name_in_use(&candidate, session_id) {
            candidate = format!("jat-{chosen_name}-{suffix}");
            suffix += 1;
        }

        self.tmux.rename(&old_name, &candidate).map_err(|e| e.to_string())?;

        if let Some(session) = self.sessions.get_mut(session_id) {
            session.display_name = candidate.clone();
            session.state = SessionState::Named;
        }
        self.emit(SupervisorEvent::SessionRenamed {
            session_id: session_id.to_string(),
            old_name,
            new_name: candidate.clone(),
        });
        Ok(candidate)
    }

    fn name_in_use(&self, name: &str, excluding: &str) -> bool {
        self.sessions
            .values()
            .any(|s| s.session_id != excluding && s.display_name == name)
    }

    fn do_apply_signal(&mut self, session_id: &str, kind: SignalKind) -> Result<(), String> {
        let new_state = SessionState::from(kind);
        self.transition(session_id, new_state);
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.last_signal_kind = Some(kind);
            session.last_signal_at = Some(SystemTime::now());
        }

        if kind == SignalKind::Review {
            self.run_autopilot(session_id);
        }
        if kind == SignalKind::Completed {
            self.maybe_kill_and_advance_epic(session_id);
        }
        Ok(())
    }

    fn do_apply_classified(&mut self, session_id: &str, state: ClassifiedState) {
        self.transition(session_id, SessionState::from(state));
    }

    fn transition(&mut self, session_id: &str, new_state: SessionState) {
        let Some(session) = self.sessions.get_mut(session_id) else { return };
        if session.state == new_state || session.state.is_terminal() {
            return;
        }
        let from = session.state;
        session.state = new_state;
        session.last_activity = SystemTime::now();
        self.emit(SupervisorEvent::StateChanged { session_id: session_id.to_string(), from, to: new_state });
    }

    /// Autopilot on review (spec.md §4.7 "Autopilot on review").
    fn run_autopilot(&mut self, session_id: &str) {
        let Some(session) = self.sessions.get(session_id) else { return };
        // Task type/priority would normally come from the external task
        // store; defaulted here since that integration is out of scope.
        let outcome = self.review_policy.decide("task", "normal");
        let display_name = session.display_name.clone();

        match outcome {
            ReviewOutcome::Auto => {
                if let Err(e) = self.tmux.send_keys(&display_name, "/jat:complete", true) {
                    warn!(session = %display_name, error = %e, "autopilot send_keys failed");
                    self.transition(session_id, SessionState::Killed);
                    return;
                }
                if let Some(session) = self.sessions.get_mut(session_id) {
                    session.kill_on_next_completed = session.epic_context.is_some();
                }
            }
            ReviewOutcome::Review => {
                // Surfaced to the user via the HTTP/SSE layer; the decision
                // itself (Complete vs Complete & Kill) arrives later through
                // a dedicated API call that also sends `/jat:complete`.
                info!(session = %display_name, "review surfaced to user");
            }
        }
    }

    fn maybe_kill_and_advance_epic(&mut self, session_id: &str) {
        let Some(session) = self.sessions.get(session_id) else { return };
        if !session.kill_on_next_completed {
            return;
        }
        let epic = session.epic_context.clone();
        let display_name = session.display_name.clone();
        let project_key = session.project_key.clone();

        if let Err(e) = self.tmux.kill_session(&display_name) {
            warn!(session = %display_name, error = %e, "failed to kill session on epic advance");
        }
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.state = SessionState::Killed;
        }
        self.emit(SupervisorEvent::SessionEnded { session_id: session_id.to_string(), reason: "epic-advance".to_string() });

        if let Some(epic) = epic {
            let advanced = epic.advanced();
            if let Some(next_task_id) = advanced.next_task_id().map(str::to_string) {
                // The caller spawns the next task (with the advanced
                // EpicContext) after waiting out the configured
                // `agent_stagger` — the supervisor only decides *that* a
                // next spawn is due, not when.
                self.emit(SupervisorEvent::EpicAdvanceReady { project_key, next_task_id, epic: advanced });
            }
        }
    }

    fn do_update_capture(&mut self, session_id: &str, tail: Vec<String>, delta_text: String) {
        if self.sessions.get_mut(session_id).map(|s| s.capture_tail = tail).is_none() {
            return;
        }
        if !delta_text.is_empty() {
            self.emit(SupervisorEvent::CaptureDelta { session_id: session_id.to_string(), delta_text });
        }
    }

    fn do_set_pending_question(&mut self, session_id: &str, question_id: Option<String>) {
        let Some(session) = self.sessions.get_mut(session_id) else { return };
        let born = question_id.is_some() && session.pending_question.is_none();
        let died = question_id.is_none() && session.pending_question.is_some();
        session.pending_question = question_id.clone();
        if born {
            self.emit(SupervisorEvent::QuestionCreated {
                session_id: session_id.to_string(),
                question_id: question_id.expect("born implies Some"),
            });
        } else if died {
            self.emit(SupervisorEvent::QuestionResolved { session_id: session_id.to_string() });
        }
    }

    fn do_record_trigger(&mut self, session_id: &str, rule_id: &str) {
        let Some(session) = self.sessions.get_mut(session_id) else { return };
        *session.trigger_counts.entry(rule_id.to_string()).or_insert(0) += 1;
        self.emit(SupervisorEvent::RuleTriggered {
            session_id: session_id.to_string(),
            rule_id: rule_id.to_string(),
        });
    }

    fn do_kill(&mut self, display_name: &str) -> Result<(), String> {
        self.tmux.kill_session(display_name).map_err(|e| e.to_string())?;
        if let Some((id, session)) = self
            .sessions
            .iter_mut()
            .find(|(_, s)| s.display_name == display_name)
        {
            session.state = SessionState::Killed;
            self.emit(SupervisorEvent::SessionEnded { session_id: id.clone(), reason: "killed".to_string() });
        }
        Ok(())
    }

    fn do_rename(&mut self, display_name: &str, new_name: &str) -> Result<(), String> {
        if self.name_in_use(new_name, "") {
            return Err(format!("duplicate display-name: {new_name}"));
        }
        self.tmux.rename(display_name, new_name).map_err(|e| e.to_string())?;
        if let Some((id, session)) = self
            .sessions
            .iter_mut()
            .find(|(_, s)| s.display_name == display_name)
        {
            session.display_name = new_name.to_string();
            self.emit(SupervisorEvent::SessionRenamed {
                session_id: id.clone(),
                old_name: display_name.to_string(),
                new_name: new_name.to_string(),
            });
        }
        Ok(())
    }

    /// Pings the Terminal Bus for every non-terminal session; marks it
    /// `killed` on disappearance, and `pending` sessions past the startup
    /// timeout `dead` (spec.md §4.7, §5 watchdog).
    fn do_watchdog(&mut self) {
        let now = SystemTime::now();
        let mut to_kill = Vec::new();
        let mut to_deaden = Vec::new();

        for (id, session) in &self.sessions {
            if session.state.is_terminal() {
                continue;
            }
            if session.state == SessionState::Pending {
                if let Ok(age) = now.duration_since(session.spawn_time) {
                    if age > self.startup_timeout {
                        to_deaden.push(id.clone());
                        continue;
                    }
                }
            }
            if !self.tmux.session_exists(&session.display_name) {
                to_kill.push(id.clone());
            }
        }

        for id in to_kill {
            self.transition(&id, SessionState::Killed);
        }
        for id in to_deaden {
            self.transition(&id, SessionState::Dead);
        }
    }
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}
