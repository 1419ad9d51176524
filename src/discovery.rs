//! Producer family identification from filesystem paths.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Producer {
    Claude,
    Kimi,
    Codex,
    Copilot,
    Gemini,
}

impl Producer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Producer::Claude => "claude",
            Producer::Kimi => "kimi",
            Producer::Codex => "codex",
            Producer::Copilot => "copilot",
            Producer::Gemini => "gemini",
        }
    }
}

impl std::str::FromStr for Producer {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Ok(Producer::Claude),
            "kimi" => Ok(Producer::Kimi),
            "codex" => Ok(Producer::Codex),
            "copilot" => Ok(Producer::Copilot),
            "gemini" => Ok(Producer::Gemini),
            other => Err(anyhow::anyhow!("unknown producer: {other}")),
        }
    }
}

/// One entry of the `watch_dirs[]` configuration option: a root directory
/// paired with the producer family that owns it.
#[derive(Debug, Clone)]
pub struct WatchDir {
    pub root: PathBuf,
    pub producer: Producer,
}

/// Resolves which configured root a path falls under, after resolving
/// symlinks, by prefix match against each root.
pub fn producer_for_path(path: &Path, watch_dirs: &[WatchDir]) -> Option<Producer> {
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    watch_dirs
        .iter()
        .find(|w| resolved.starts_with(&w.root))
        .map(|w| w.producer)
}

/// Resolves the Claude base directory, honoring `CLAUDE_CONFIG_DIR` the same
/// way the Claude CLI itself does, falling back to `~/.claude`.
fn claude_dir(home: &Path) -> PathBuf {
    std::env::var_os("CLAUDE_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| home.join(".claude"))
}

/// Candidate default roots, filtered to those that exist on disk.
pub fn default_watch_dirs() -> Vec<WatchDir> {
    let Some(home) = std::env::var_os("HOME").map(PathBuf::from) else {
        return Vec::new();
    };

    let candidates = [
        (claude_dir(&home).join("projects"), Producer::Claude),
        (home.join(".codex").join("sessions"), Producer::Codex),
        (home.join(".gemini").join("tmp"), Producer::Gemini),
    ];

    candidates
        .into_iter()
        .filter(|(root, _)| root.exists())
        .map(|(root, producer)| WatchDir { root, producer })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_matches_nested_path_under_root() {
        let dirs = vec![WatchDir {
            root: PathBuf::from("/tmp/thinkt-test-claude"),
            producer: Producer::Claude,
        }];
        assert_eq!(
            producer_for_path(Path::new("/tmp/thinkt-test-claude/proj/session.jsonl"), &dirs),
            Some(Producer::Claude)
        );
    }

    #[test]
    fn producer_is_none_outside_any_root() {
        let dirs = vec![WatchDir {
            root: PathBuf::from("/tmp/thinkt-test-claude"),
            producer: Producer::Claude,
        }];
        assert_eq!(
            producer_for_path(Path::new("/tmp/elsewhere/session.jsonl"), &dirs),
            None
        );
    }

    #[test]
    fn from_str_round_trips_with_as_str() {
        for p in [
            Producer::Claude,
            Producer::Kimi,
            Producer::Codex,
            Producer::Copilot,
            Producer::Gemini,
        ] {
            assert_eq!(p.as_str().parse::<Producer>().unwrap(), p);
        }
    }
}
