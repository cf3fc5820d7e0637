//! Session supervision loop: the glue that actually drives the Capture
//! Engine, Classifier, and Automation Rule Engine against live sessions.
//!
//! One background task owns a per-session ticker, started on
//! [`SupervisorEvent::SessionSpawned`] and torn down on
//! [`SupervisorEvent::SessionEnded`] (spec.md §4.3: "one capture ticker task
//! running on the capture cadence" per live session). Each ticker captures
//! the pane, classifies it, evaluates the rule set, and dispatches whatever
//! actions fall out — this module is the only thing that calls
//! [`capture::tick`], constructs a [`Classifier`], or drains
//! [`rules::evaluate`] outside their own unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};

use crate::capture::{self, SharedCaptureBuffer};
use crate::classifier::{Classifier, IndicatorTable, LastSignal, StateCache};
use crate::config::{CaptureSettings, ClassifierSettings};
use crate::orchestrator::{SupervisorEvent, SupervisorHandle};
use crate::question::{FallbackExtractor, QuestionRecord, QuestionStore, QuestionTemplate, SuppressionGuard};
use crate::rules::{self, ActionKind, Rule, RuleRuntime, ScheduledAction};
use crate::signal;
use crate::tmux::Tmux;

/// Shared, read-mostly dependencies every session ticker needs. Wrapped in
/// an `Arc` by [`spawn`] and cloned cheaply per ticker task.
pub struct RuntimeDeps {
    pub tmux: Tmux,
    pub supervisor: SupervisorHandle,
    pub rules: Arc<Mutex<Vec<Rule>>>,
    pub rule_runtime: Arc<Mutex<RuleRuntime>>,
    pub questions: Arc<QuestionStore>,
    pub suppression: Arc<Mutex<SuppressionGuard>>,
    pub capture: CaptureSettings,
    pub classifier: ClassifierSettings,
}

/// Starts the supervision loop as a background task. Returns immediately;
/// the returned task runs for the lifetime of the process.
pub fn spawn(deps: RuntimeDeps) {
    tokio::spawn(supervise(Arc::new(deps)));
}

async fn supervise(deps: Arc<RuntimeDeps>) {
    let mut events = deps.supervisor.subscribe();
    let mut tickers: HashMap<String, tokio::task::JoinHandle<()>> = HashMap::new();

    while let Ok(event) = events.recv().await {
        match event {
            SupervisorEvent::SessionSpawned { session_id, .. } => {
                let deps = deps.clone();
                let sid = session_id.clone();
                let handle = tokio::spawn(async move { session_ticker(deps, sid).await });
                tickers.insert(session_id, handle);
            }
            SupervisorEvent::SessionEnded { session_id, .. } => {
                if let Some(handle) = tickers.remove(&session_id) {
                    handle.abort();
                }
            }
            _ => {}
        }
    }
}

/// Per-session mutable state carried between ticks: the ring buffer, the
/// classifier's sticky last-state, and the fallback extractor's dedup
/// fingerprint. Bundled so the tick function itself only takes the
/// identifying args plus this cursor.
struct SessionCursor {
    buffer: SharedCaptureBuffer,
    classifier: Classifier,
    state_cache: StateCache,
    fallback: FallbackExtractor,
}

impl SessionCursor {
    fn new(deps: &RuntimeDeps) -> Self {
        Self {
            buffer: SharedCaptureBuffer::new(deps.capture.window_lines),
            classifier: Classifier::new(IndicatorTable::default(), deps.classifier.decay_window()),
            state_cache: StateCache::default(),
            fallback: FallbackExtractor::default(),
        }
    }
}

/// Drives one session: capture → classify → evaluate rules → dispatch,
/// forever, at the cadence its current attachment state calls for (spec.md
/// §4.3, §9 "Capture-cadence focus signal source").
async fn session_ticker(deps: Arc<RuntimeDeps>, session_id: String) {
    let mut cursor = SessionCursor::new(&deps);

    loop {
        let Some(info) = deps.supervisor.get_runtime_info(&session_id).await else {
            break;
        };
        if info.state.is_terminal() {
            break;
        }

        let cadence = if info.attached {
            deps.capture.focused_cadence()
        } else {
            deps.capture.background_cadence()
        };

        if let Err(e) = tick_once(&deps, &session_id, &info, &mut cursor) {
            warn!(session = %info.display_name, error = %e, "capture tick failed");
        }

        tokio::time::sleep(cadence).await;
    }
}

fn tick_once(
    deps: &Arc<RuntimeDeps>,
    session_id: &str,
    info: &crate::orchestrator::SessionRuntimeInfo,
    cursor: &mut SessionCursor,
) -> anyhow::Result<()> {
    let display_name = info.display_name.as_str();
    let delta = capture::tick(&deps.tmux, display_name, &cursor.buffer)?;

    let tail = cursor.buffer.recent_lines(deps.classifier.scan_lines.max(1));
    let trimmed_tail: Vec<String> = tail.iter().rev().take(50).rev().cloned().collect();
    futures_spawn(deps.supervisor.update_capture(session_id.to_string(), trimmed_tail, delta.delta_text.clone()));

    if delta.delta_text.is_empty() {
        return Ok(());
    }
    debug!(session = %display_name, bytes = delta.delta_text.len(), "capture tick produced delta");

    let last_signal = info.last_signal.map(|(kind, received_at)| LastSignal { kind, received_at });
    let classified = cursor.classifier.classify(last_signal.as_ref(), &delta.delta_text, &tail, SystemTime::now());
    if let Some(new_state) = cursor.state_cache.apply(session_id, classified) {
        futures_spawn(deps.supervisor.apply_classified(session_id.to_string(), new_state));
    }

    let scheduled = {
        let rules = deps.rules.lock().unwrap().clone();
        let mut runtime = deps.rule_runtime.lock().unwrap();
        rules::evaluate(&rules, &mut runtime, session_id, display_name, info.state.as_str(), &delta.delta_text, SystemTime::now())
    };

    for action in scheduled {
        let deps = deps.clone();
        let session_id = session_id.to_string();
        let display_name = display_name.to_string();
        tokio::spawn(async move {
            deps.supervisor.record_trigger(session_id.clone(), action.rule_id.clone()).await;
            if action.action.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(action.action.delay_ms)).await;
            }
            dispatch_action(&deps, &session_id, &display_name, action).await;
        });
    }

    if !deps.suppression.lock().unwrap().is_suppressed(session_id, Instant::now()) {
        if let Some(template) = cursor.fallback.extract(session_id, &delta.snapshot_tail.join("\n")) {
            let deps = deps.clone();
            let session_id = session_id.to_string();
            let display_name = display_name.to_string();
            tokio::spawn(async move {
                create_question(&deps, &session_id, &display_name, template).await;
            });
        }
    }

    Ok(())
}

/// Fire a supervisor-notifying future without blocking the synchronous tick
/// path on it; the supervisor actor serializes these in arrival order
/// regardless.
fn futures_spawn(fut: impl std::future::Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

/// Executes one scheduled rule action against the Terminal Bus, Signal
/// Intake, or Question Surface (spec.md §4.5 action dispatch table).
async fn dispatch_action(deps: &RuntimeDeps, session_id: &str, display_name: &str, scheduled: ScheduledAction) {
    match scheduled.action.kind {
        ActionKind::SendText => {
            if let Err(e) = deps.tmux.send_keys(display_name, &scheduled.expanded_payload, false) {
                warn!(session = %display_name, rule = %scheduled.rule_id, error = %e, "send_text action failed");
            }
        }
        ActionKind::SendKeys => {
            if let Err(e) = deps.tmux.send_keys(display_name, &scheduled.expanded_payload, true) {
                warn!(session = %display_name, rule = %scheduled.rule_id, error = %e, "send_keys action failed");
            }
        }
        ActionKind::TmuxCommand => {
            let args: Vec<&str> = scheduled.expanded_payload.split_whitespace().collect();
            if args.is_empty() {
                warn!(rule = %scheduled.rule_id, "tmux_command action had an empty payload");
            } else if let Err(e) = deps.tmux.run_raw(&args) {
                warn!(session = %display_name, rule = %scheduled.rule_id, error = %e, "tmux_command action failed");
            }
        }
        ActionKind::Signal => match signal::kind_from_str(&scheduled.expanded_payload) {
            Some(kind) => {
                let _ = deps.supervisor.apply_signal(session_id.to_string(), kind).await;
            }
            None => warn!(rule = %scheduled.rule_id, payload = %scheduled.expanded_payload, "signal action payload is not a known signal kind"),
        },
        ActionKind::NotifyOnly => {
            info!(session = %display_name, rule = %scheduled.rule_id, message = %scheduled.expanded_payload, "rule notification");
        }
        ActionKind::ShowQuestionUi => {
            if let Some(template) = scheduled.action.question_ui_config.clone() {
                create_question(deps, session_id, display_name, template).await;
            } else {
                warn!(rule = %scheduled.rule_id, "show_question_ui action missing question_ui_config");
            }
        }
        ActionKind::RunCommand => match tokio::process::Command::new("sh").arg("-c").arg(&scheduled.expanded_payload).output().await {
            Ok(output) if !output.status.success() => {
                warn!(rule = %scheduled.rule_id, stderr = %String::from_utf8_lossy(&output.stderr), "run_command action exited non-zero");
            }
            Err(e) => warn!(rule = %scheduled.rule_id, error = %e, "run_command action failed to spawn"),
            Ok(_) => {}
        },
    }
}

async fn create_question(deps: &RuntimeDeps, session_id: &str, display_name: &str, template: QuestionTemplate) {
    let question_id = uuid::Uuid::new_v4().to_string();
    let record = QuestionRecord {
        session_id: session_id.to_string(),
        display_name: display_name.to_string(),
        question_id: question_id.clone(),
        kind: template.kind,
        question: template.question,
        options: template.options,
        timeout_seconds: template.timeout_seconds,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    if let Err(e) = deps.questions.write(&record) {
        warn!(session = %display_name, error = %e, "failed to write question record");
        return;
    }
    deps.supervisor.set_pending_question(session_id.to_string(), Some(question_id)).await;
}
