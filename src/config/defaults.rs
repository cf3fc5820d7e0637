//! Global cross-project Defaults file (spec.md §6.5):
//! `~/.config/jat/projects.json`.
//!
//! JSON, not TOML — the spec names the exact path and extension. Loading
//! follows the same "missing file → built-in default" fallback
//! `ProjectConfig::load` uses for the project-local TOML file, just with
//! `serde_json` as the parser.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Opus,
    Sonnet,
    Haiku,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_model")]
    pub model: Model,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,
    #[serde(default = "default_agent_count")]
    pub default_agent_count: u32,
    #[serde(default = "default_agent_stagger")]
    pub agent_stagger: u32,
    #[serde(default = "default_startup_timeout")]
    pub claude_startup_timeout: u32,
    #[serde(default)]
    pub terminal: Option<String>,
    #[serde(default)]
    pub editor: Option<String>,
    #[serde(default)]
    pub tools_path: Option<String>,
    #[serde(default)]
    pub claude_flags: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_sessions: default_max_sessions(),
            default_agent_count: default_agent_count(),
            agent_stagger: default_agent_stagger(),
            claude_startup_timeout: default_startup_timeout(),
            terminal: None,
            editor: None,
            tools_path: None,
            claude_flags: None,
        }
    }
}

fn default_model() -> Model {
    Model::Sonnet
}

fn default_max_sessions() -> u32 {
    10
}

fn default_agent_count() -> u32 {
    1
}

fn default_agent_stagger() -> u32 {
    5
}

fn default_startup_timeout() -> u32 {
    20
}

/// Validation error returned when a loaded Defaults file violates one of
/// the documented ranges (spec.md §6.5 table). `main.rs` maps this to
/// [`crate::error::JatError::Validation`] and exit code 64.
#[derive(Debug, thiserror::Error)]
pub enum DefaultsValidationError {
    #[error("max_sessions must be in 1..=20, got {0}")]
    MaxSessions(u32),
    #[error("default_agent_count must be in 1..=max_sessions ({1}), got {0}")]
    DefaultAgentCount(u32, u32),
    #[error("agent_stagger must be in 1..=120, got {0}")]
    AgentStagger(u32),
    #[error("claude_startup_timeout must be in 5..=120, got {0}")]
    StartupTimeout(u32),
}

impl Defaults {
    pub fn validate(&self) -> Result<(), DefaultsValidationError> {
        if !(1..=20).contains(&self.max_sessions) {
            return Err(DefaultsValidationError::MaxSessions(self.max_sessions));
        }
        if self.default_agent_count < 1 || self.default_agent_count > self.max_sessions {
            return Err(DefaultsValidationError::DefaultAgentCount(
                self.default_agent_count,
                self.max_sessions,
            ));
        }
        if !(1..=120).contains(&self.agent_stagger) {
            return Err(DefaultsValidationError::AgentStagger(self.agent_stagger));
        }
        if !(5..=120).contains(&self.claude_startup_timeout) {
            return Err(DefaultsValidationError::StartupTimeout(
                self.claude_startup_timeout,
            ));
        }
        Ok(())
    }

    /// Load `~/.config/jat/projects.json`, or built-in defaults if absent.
    pub fn load() -> Result<(Self, Option<PathBuf>)> {
        Self::load_from(&crate::paths::global_defaults_file())
    }

    pub fn load_from(path: &std::path::Path) -> Result<(Self, Option<PathBuf>)> {
        if !path.is_file() {
            return Ok((Defaults::default(), None));
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let root: DefaultsFile = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        root.defaults
            .validate()
            .with_context(|| format!("invalid defaults in {}", path.display()))?;
        Ok((root.defaults, Some(path.to_path_buf())))
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let root = DefaultsFile {
            defaults: self.clone(),
        };
        let json = serde_json::to_string_pretty(&root).context("failed to serialize defaults")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct DefaultsFile {
    defaults: Defaults,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_sane_built_ins() {
        let d = Defaults::default();
        assert!(d.validate().is_ok());
        assert_eq!(d.model, Model::Sonnet);
        assert_eq!(d.max_sessions, 10);
    }

    #[test]
    fn rejects_out_of_range_max_sessions() {
        let mut d = Defaults::default();
        d.max_sessions = 21;
        assert!(matches!(
            d.validate(),
            Err(DefaultsValidationError::MaxSessions(21))
        ));
    }

    #[test]
    fn rejects_agent_count_above_max_sessions() {
        let mut d = Defaults::default();
        d.max_sessions = 3;
        d.default_agent_count = 4;
        assert!(matches!(
            d.validate(),
            Err(DefaultsValidationError::DefaultAgentCount(4, 3))
        ));
    }

    #[test]
    fn load_missing_file_returns_default() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("projects.json");
        let (d, loaded_path) = Defaults::load_from(&path).unwrap();
        assert!(loaded_path.is_none());
        assert_eq!(d.max_sessions, 10);
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("jat").join("projects.json");

        let mut d = Defaults::default();
        d.model = Model::Opus;
        d.max_sessions = 5;
        d.save_to(&path).unwrap();

        let (loaded, loaded_path) = Defaults::load_from(&path).unwrap();
        assert!(loaded_path.is_some());
        assert_eq!(loaded.model, Model::Opus);
        assert_eq!(loaded.max_sessions, 5);
    }

    #[test]
    fn rejects_invalid_file_on_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("projects.json");
        std::fs::write(
            &path,
            r#"{"defaults":{"max_sessions":99}}"#,
        )
        .unwrap();
        assert!(Defaults::load_from(&path).is_err());
    }
}
