//! Well-known filesystem locations (spec.md §6.2, §6.3, §6.5).

use std::path::{Path, PathBuf};

/// Directory the Signal Intake watches for deposited JSON signal files
/// (spec.md §4.2). Configurable per project; this is the default.
pub fn signal_inbox_dir(project_root: &Path) -> PathBuf {
    project_root.join(".jat").join("signals")
}

/// Subdirectory malformed signal files are quarantined into.
pub fn signal_poison_dir(project_root: &Path) -> PathBuf {
    signal_inbox_dir(project_root).join("poison")
}

/// The two question-file paths written per question (spec.md §6.2) so
/// either lookup key works.
pub fn question_paths(tmp_dir: &Path, session_id: &str, display_name: &str) -> (PathBuf, PathBuf) {
    (
        tmp_dir.join(format!("claude-question-{session_id}.json")),
        tmp_dir.join(format!("claude-question-tmux-{display_name}.json")),
    )
}

/// Agent identity file watched for rename triggers (spec.md §6.3).
pub fn agent_identity_file(project_root: &Path, session_id: &str) -> PathBuf {
    project_root
        .join(".claude")
        .join("sessions")
        .join(format!("agent-{session_id}.txt"))
}

/// Project-local rule/capture/decay tuning file (SPEC_FULL.md §6).
pub fn project_config_file(project_root: &Path) -> PathBuf {
    project_root.join(".jat").join("config.toml")
}

/// Global cross-project defaults file (spec.md §6.5), fixed path under the
/// user's config home.
pub fn global_defaults_file() -> PathBuf {
    let config_home = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| dirs_home().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from(".config"));
    config_home.join("jat").join("projects.json")
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Rule export/import store path (spec.md §6.4).
pub fn rules_store_file(project_root: &Path) -> PathBuf {
    project_root.join(".jat").join("rules.json")
}

/// Search upward from `start` for a `.jat/config.toml` file.
pub fn find_project_config(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = project_config_file(&dir);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_inbox_under_dot_jat() {
        let root = Path::new("/work/project");
        assert_eq!(
            signal_inbox_dir(root),
            Path::new("/work/project/.jat/signals")
        );
        assert_eq!(
            signal_poison_dir(root),
            Path::new("/work/project/.jat/signals/poison")
        );
    }

    #[test]
    fn question_paths_use_both_keys() {
        let (by_id, by_name) = question_paths(Path::new("/tmp"), "abc123", "jat-FairBay");
        assert_eq!(by_id, Path::new("/tmp/claude-question-abc123.json"));
        assert_eq!(
            by_name,
            Path::new("/tmp/claude-question-tmux-jat-FairBay.json")
        );
    }

    #[test]
    fn finds_config_walking_up_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let jat_dir = tmp.path().join(".jat");
        std::fs::create_dir_all(&jat_dir).unwrap();
        std::fs::write(jat_dir.join("config.toml"), "").unwrap();

        let nested = tmp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_project_config(&nested).unwrap();
        assert_eq!(found, jat_dir.join("config.toml"));
    }

    #[test]
    fn no_config_found_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(find_project_config(tmp.path()).is_none());
    }
}
