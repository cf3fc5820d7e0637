mod capture;
mod cli;
mod classifier;
mod config;
mod error;
mod http;
mod log;
mod orchestrator;
mod paths;
mod prompt;
mod question;
mod review;
mod rules;
mod runtime;
mod signal;
mod tmux;

use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use cli::{Cli, Command, RulesAction, SessionsAction};
use config::defaults::Defaults;
use config::ProjectConfig;
use error::JatError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "jat=info",
        1 => "jat=debug",
        _ => "jat=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "jat exited with an error");
            let code = e.downcast_ref::<JatError>().map(JatError::exit_code).unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let (project_config, config_path) = ProjectConfig::load(&cwd)?;
    match config_path {
        Some(ref p) => info!("loaded project config from {}", p.display()),
        None => info!("no .jat/config.toml found, using defaults"),
    }

    let (defaults, _) = Defaults::load()?;
    defaults
        .validate()
        .map_err(|e| JatError::validation(e.to_string()))?;

    match cli.command {
        Command::Serve { listen, project } => serve(listen, project, project_config, defaults).await,
        Command::Sessions { action } => run_sessions_action(action).await,
        Command::Rules { action } => run_rules_action(action, &cwd),
    }
}

async fn serve(
    listen: String,
    project: Option<String>,
    project_config: ProjectConfig,
    defaults: Defaults,
) -> anyhow::Result<()> {
    let project_root = project
        .map(std::path::PathBuf::from)
        .unwrap_or(std::env::current_dir()?);

    let tmux_bus = tmux::Tmux::default();
    tmux_bus
        .check_available()
        .map_err(|e| JatError::fatal(format!("terminal bus unavailable: {e}")))?;

    let supervisor = orchestrator::Supervisor::spawn_actor(
        tmux::Tmux::default(),
        review::ReviewPolicy::default_policy(),
        Duration::from_secs(defaults.claude_startup_timeout as u64),
    );

    let intake = Arc::new(signal::SignalIntake::new(&project_root)?);
    {
        // Subscribe before the watch loop starts draining the inbox, so the
        // very first signals published still have a live receiver counted
        // at publish time (spec.md §4.2 step 3).
        let mut rx = intake.subscribe();
        let supervisor = supervisor.clone();
        let intake = intake.clone();
        tokio::spawn(async move {
            while let Ok(sig) = rx.recv().await {
                let key = sig.dedup_key();
                let _ = supervisor.apply_signal(sig.session, sig.kind).await;
                intake.ack(key);
            }
        });
    }
    {
        let intake = intake.clone();
        tokio::spawn(signal::run(intake));
    }

    watchdog_loop(supervisor.clone());

    let rules_path = paths::rules_store_file(&project_root);
    let loaded_rules = rules::load_store(&rules_path)?;
    let rules = Arc::new(Mutex::new(loaded_rules));
    let questions = Arc::new(question::QuestionStore::new(std::env::temp_dir()));
    let suppression = Arc::new(Mutex::new(question::SuppressionGuard::new(Duration::from_millis(
        project_config.rules.question_suppress_ms,
    ))));

    runtime::spawn(runtime::RuntimeDeps {
        tmux: tmux::Tmux::default(),
        supervisor: supervisor.clone(),
        rules: rules.clone(),
        rule_runtime: Arc::new(Mutex::new(rules::RuleRuntime::default())),
        questions: questions.clone(),
        suppression: suppression.clone(),
        capture: project_config.capture,
        classifier: project_config.classifier,
    });

    epic_advance_loop(supervisor.clone(), defaults.agent_stagger);

    let state = http::AppState {
        supervisor,
        rules,
        rules_store_path: rules_path,
        questions,
        suppression,
        max_sessions: defaults.max_sessions,
        agent_stagger: defaults.agent_stagger,
    };

    let app = http::router(state);
    let addr: std::net::SocketAddr = listen
        .parse()
        .map_err(|e| JatError::validation(format!("invalid --listen address: {e}")))?;

    info!(addr = %addr, "jat listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| JatError::fatal(format!("failed to bind {addr}: {e}")))?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn watchdog_loop(supervisor: orchestrator::SupervisorHandle) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            supervisor.watchdog_tick().await;
        }
    });
}

/// Spawns the next task in an epic chain `agent_stagger` seconds after the
/// previous one killed itself on completion (spec.md §4.7 "Autopilot on
/// review" step 3).
fn epic_advance_loop(supervisor: orchestrator::SupervisorHandle, agent_stagger: u32) {
    tokio::spawn(async move {
        let mut events = supervisor.subscribe();
        while let Ok(event) = events.recv().await {
            if let orchestrator::SupervisorEvent::EpicAdvanceReady { project_key, next_task_id, epic } = event {
                let supervisor = supervisor.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(agent_stagger as u64)).await;
                    if let Err(e) = supervisor.spawn_session(Some(next_task_id), project_key, Some(epic)).await {
                        error!(error = %e, "failed to spawn next epic task");
                    }
                });
            }
        }
    });
}

async fn run_sessions_action(action: SessionsAction) -> anyhow::Result<()> {
    match action {
        SessionsAction::List => {
            println!("jat sessions list requires a running `jat serve` instance; query GET /api/sessions instead.");
        }
        SessionsAction::Kill { name } => {
            let tmux_bus = tmux::Tmux::default();
            tmux_bus.kill_session(&name)?;
            println!("killed {name}");
        }
        SessionsAction::Rename { name, new_name } => {
            let tmux_bus = tmux::Tmux::default();
            tmux_bus.rename(&name, &new_name)?;
            println!("renamed {name} -> {new_name}");
        }
    }
    Ok(())
}

fn run_rules_action(action: RulesAction, project_root: &std::path::Path) -> anyhow::Result<()> {
    let store_path = paths::rules_store_file(project_root);
    match action {
        RulesAction::Export { out } => {
            let loaded = rules::load_store(&store_path)?;
            let file = rules::RulesFile { version: 1, rules: loaded };
            std::fs::write(&out, serde_json::to_string_pretty(&file)?)?;
            println!("exported {} rules to {out}", file.rules.len());
        }
        RulesAction::Import { file, replace } => {
            let contents = std::fs::read_to_string(&file)?;
            let incoming: rules::RulesFile = serde_json::from_str(&contents)?;
            let existing = rules::load_store(&store_path)?;
            let mode = if replace { rules::ImportMode::Replace } else { rules::ImportMode::Merge };
            let merged = rules::import(existing, incoming.rules, mode);
            rules::save_store(&store_path, &merged)?;
            println!("imported; store now has {} rules", merged.len());
        }
    }
    Ok(())
}
