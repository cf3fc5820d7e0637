//! Config Facade: project-local rule/capture tuning plus the global
//! cross-project Defaults file (spec.md §6.5).
//!
//! Two layers, both following the teacher's `#[serde(default = "fn")]`-per-
//! field idiom so every option has a sane built-in value and partial config
//! files round-trip cleanly:
//!
//! - [`ProjectConfig`] — `.jat/config.toml`, found by walking up from the
//!   current directory (see [`crate::paths::find_project_config`]).
//! - [`defaults::Defaults`] — `~/.config/jat/projects.json`.

pub mod defaults;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub classifier: ClassifierSettings,
    #[serde(default)]
    pub rules: RuleEngineSettings,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            classifier: ClassifierSettings::default(),
            rules: RuleEngineSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CaptureSettings {
    /// Capture cadence for the in-focus session (spec.md §4.3).
    #[serde(default = "default_focused_cadence_ms")]
    pub focused_cadence_ms: u64,
    /// Capture cadence for background sessions.
    #[serde(default = "default_background_cadence_ms")]
    pub background_cadence_ms: u64,
    /// Ring buffer window, in lines (spec.md §4.3: "~500").
    #[serde(default = "default_window_lines")]
    pub window_lines: usize,
}

impl CaptureSettings {
    pub fn focused_cadence(&self) -> Duration {
        Duration::from_millis(self.focused_cadence_ms)
    }

    pub fn background_cadence(&self) -> Duration {
        Duration::from_millis(self.background_cadence_ms)
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            focused_cadence_ms: default_focused_cadence_ms(),
            background_cadence_ms: default_background_cadence_ms(),
            window_lines: default_window_lines(),
        }
    }
}

fn default_focused_cadence_ms() -> u64 {
    500
}

fn default_background_cadence_ms() -> u64 {
    2000
}

fn default_window_lines() -> usize {
    500
}

#[derive(Debug, Deserialize)]
pub struct ClassifierSettings {
    /// How long a signal remains authoritative before the classifier falls
    /// back to regex scoring (spec.md §4.4: "default 60 s").
    #[serde(default = "default_decay_secs")]
    pub decay_secs: u64,
    /// How many of the most recent lines the regex scoring pass considers
    /// (spec.md §4.4: "most recent 100 lines").
    #[serde(default = "default_scan_lines")]
    pub scan_lines: usize,
}

impl ClassifierSettings {
    pub fn decay_window(&self) -> Duration {
        Duration::from_secs(self.decay_secs)
    }
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            decay_secs: default_decay_secs(),
            scan_lines: default_scan_lines(),
        }
    }
}

fn default_decay_secs() -> u64 {
    60
}

fn default_scan_lines() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct RuleEngineSettings {
    /// Fallback cooldown (seconds) applied to a rule that omits one.
    #[serde(default = "default_rule_cooldown_secs")]
    pub default_cooldown_secs: u64,
    /// Question-suppression window after inject+delete (spec.md §4.6: "≥ 2 s").
    #[serde(default = "default_question_suppress_ms")]
    pub question_suppress_ms: u64,
}

impl Default for RuleEngineSettings {
    fn default() -> Self {
        Self {
            default_cooldown_secs: default_rule_cooldown_secs(),
            question_suppress_ms: default_question_suppress_ms(),
        }
    }
}

fn default_rule_cooldown_secs() -> u64 {
    0
}

fn default_question_suppress_ms() -> u64 {
    2000
}

impl ProjectConfig {
    /// Search upward from `start` for a `.jat/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = crate::paths::find_project_config(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: ProjectConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = ProjectConfig::default();
        assert_eq!(config.capture.focused_cadence_ms, 500);
        assert_eq!(config.capture.background_cadence_ms, 2000);
        assert_eq!(config.capture.window_lines, 500);
        assert_eq!(config.classifier.decay_secs, 60);
        assert_eq!(config.classifier.scan_lines, 100);
        assert_eq!(config.rules.question_suppress_ms, 2000);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[capture]
focused_cadence_ms = 250
"#;
        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.capture.focused_cadence_ms, 250);
        assert_eq!(config.capture.background_cadence_ms, 2000);
        assert_eq!(config.classifier.decay_secs, 60);
    }

    #[test]
    fn load_from_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let jat_dir = tmp.path().join(".jat");
        std::fs::create_dir_all(&jat_dir).unwrap();
        std::fs::write(
            jat_dir.join("config.toml"),
            "[classifier]\ndecay_secs = 30\n",
        )
        .unwrap();

        let (config, path) = ProjectConfig::load(tmp.path()).unwrap();
        assert!(path.is_some());
        assert_eq!(config.classifier.decay_secs, 30);
    }

    #[test]
    fn load_returns_default_when_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, path) = ProjectConfig::load(tmp.path()).unwrap();
        assert!(path.is_none());
        assert_eq!(config.capture.focused_cadence_ms, 500);
    }
}
