use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "jat",
    about = "Orchestrates AI coding agents running inside tmux sessions",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the orchestrator: Signal Intake, capture loop, watchdog, and
    /// the HTTP/SSE surface.
    Serve {
        /// Bind address for the HTTP/SSE surface.
        #[arg(long, default_value = "127.0.0.1:4590")]
        listen: String,

        /// Project root to watch (defaults to the current directory).
        #[arg(long)]
        project: Option<String>,
    },

    /// List known sessions as JSON.
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Manage automation rules.
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionsAction {
    /// List all known sessions.
    List,
    /// Kill a session by display name.
    Kill { name: String },
    /// Rename a session, retrying with a numeric suffix on collision.
    Rename { name: String, new_name: String },
}

#[derive(Subcommand, Debug)]
pub enum RulesAction {
    /// Write the rules store to a file as JSON.
    Export {
        #[arg(long, default_value = "rules-export.json")]
        out: String,
    },
    /// Load rules from a file, merging or replacing the existing store.
    Import {
        file: String,
        #[arg(long, default_value_t = false)]
        replace: bool,
    },
}
