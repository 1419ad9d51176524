//! Exporter configuration and collector-endpoint discovery.
//!
//! Collector resolution walks explicit config, then an environment
//! variable, then a project-local config file, then a well-known URL,
//! falling back to buffer-only mode. Project-file and environment
//! settings are layered under CLI overrides, which always win.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::discovery::{self, WatchDir};

const DEFAULT_MAX_BUFFER_MB: u64 = 100;
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;
const DEFAULT_DEBOUNCE_WINDOW_SECS: u64 = 2;
const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 5 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
const DEFAULT_SHIP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_BACKOFF_SECS: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorOrigin {
    Explicit,
    Env,
    ProjectFile,
    WellKnown,
    None,
}

#[derive(Debug, Clone)]
pub struct CollectorEndpoint {
    pub url: Option<String>,
    pub origin: CollectorOrigin,
}

#[derive(Debug, Deserialize)]
struct ProjectConfigFile {
    collector_url: Option<String>,
}

pub struct Config {
    pub collector: CollectorEndpoint,
    pub api_key: Option<String>,
    pub buffer_dir: PathBuf,
    pub watch_dirs: Vec<WatchDir>,
    pub max_buffer_mb: u64,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub quiet: bool,
    pub version: String,
    /// If true, a client-fatal (4xx non-429) ship response still spills
    /// the payload to disk instead of dropping it. Defaults to false.
    pub buffer_on_client_fatal: bool,
    /// Per-path debounce window in the file watcher.
    pub debounce_window: Duration,
    /// Session-idle threshold before the activity sweep emits `end`.
    pub idle_threshold: Duration,
    /// Period of the activity sweep task.
    pub sweep_interval: Duration,
    /// Per-attempt HTTP timeout in the shipper.
    pub ship_timeout: Duration,
    /// Ship retry budget, excluding the initial attempt.
    pub max_retries: u32,
    /// Initial exponential backoff between ship attempts.
    pub base_backoff: Duration,
}

impl Config {
    pub fn default_buffer_dir() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".thinkt").join("export-buffer")
    }

    /// Stage (1) explicit config/CLI url, (2) env vars, (3) project-local
    /// `.thinkt/collector.json`, (4) well-known domain-derived URL (stubbed,
    /// per the open design question this resolves to `None`), (5) buffer-only.
    pub fn discover(explicit_url: Option<&str>, project_dir: &Path) -> CollectorEndpoint {
        if let Some(url) = explicit_url {
            if !url.is_empty() {
                return CollectorEndpoint { url: Some(url.to_string()), origin: CollectorOrigin::Explicit };
            }
        }

        if let Ok(url) = std::env::var("THINKT_COLLECTOR_URL") {
            if !url.is_empty() {
                return CollectorEndpoint { url: Some(url), origin: CollectorOrigin::Env };
            }
        }

        let project_file = project_dir.join(".thinkt").join("collector.json");
        if let Ok(contents) = std::fs::read_to_string(&project_file) {
            if let Ok(parsed) = serde_json::from_str::<ProjectConfigFile>(&contents) {
                if let Some(url) = parsed.collector_url.filter(|u| !u.is_empty()) {
                    return CollectorEndpoint { url: Some(url), origin: CollectorOrigin::ProjectFile };
                }
            }
        }

        match well_known_collector_url() {
            Some(url) => CollectorEndpoint { url: Some(url), origin: CollectorOrigin::WellKnown },
            None => CollectorEndpoint { url: None, origin: CollectorOrigin::None },
        }
    }

    /// Reads the project-local config file, then env vars, then applies
    /// CLI overrides last.
    pub fn load(
        project_dir: &Path,
        cli_collector_url: Option<&str>,
        cli_buffer_dir: Option<&Path>,
        cli_quiet: bool,
    ) -> Result<Self> {
        let collector = Self::discover(cli_collector_url, project_dir);

        let api_key = std::env::var("THINKT_API_KEY").ok().filter(|k| !k.is_empty());

        let watch_dirs = discovery::default_watch_dirs();
        if watch_dirs.is_empty() {
            anyhow::bail!("no watch_dirs configured and no default producer directories found");
        }

        let buffer_dir = cli_buffer_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_buffer_dir);

        Ok(Self {
            collector,
            api_key,
            buffer_dir,
            watch_dirs,
            max_buffer_mb: DEFAULT_MAX_BUFFER_MB,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            quiet: cli_quiet,
            version: "dev".to_string(),
            buffer_on_client_fatal: false,
            debounce_window: Duration::from_secs(DEFAULT_DEBOUNCE_WINDOW_SECS),
            idle_threshold: Duration::from_secs(DEFAULT_IDLE_THRESHOLD_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            ship_timeout: Duration::from_secs(DEFAULT_SHIP_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: Duration::from_secs(DEFAULT_BASE_BACKOFF_SECS),
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        self.buffer_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_buffer_dir)
            .join("logs")
    }
}

/// Stubbed per the open design question: the source names no concrete
/// well-known domain, so this stage never resolves one.
fn well_known_collector_url() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_url_wins_over_everything() {
        let dir = tempdir().unwrap();
        let endpoint = Config::discover(Some("https://explicit.example/v1/traces"), dir.path());
        assert_eq!(endpoint.origin, CollectorOrigin::Explicit);
        assert_eq!(endpoint.url.as_deref(), Some("https://explicit.example/v1/traces"));
    }

    #[test]
    fn project_file_is_used_when_present_and_no_override() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".thinkt")).unwrap();
        std::fs::write(
            dir.path().join(".thinkt").join("collector.json"),
            r#"{"collector_url":"https://project.example/v1/traces"}"#,
        )
        .unwrap();

        std::env::remove_var("THINKT_COLLECTOR_URL");
        let endpoint = Config::discover(None, dir.path());
        assert_eq!(endpoint.origin, CollectorOrigin::ProjectFile);
        assert_eq!(endpoint.url.as_deref(), Some("https://project.example/v1/traces"));
    }

    #[test]
    fn no_sources_falls_through_to_none() {
        let dir = tempdir().unwrap();
        std::env::remove_var("THINKT_COLLECTOR_URL");
        let endpoint = Config::discover(None, dir.path());
        assert_eq!(endpoint.origin, CollectorOrigin::None);
        assert!(endpoint.url.is_none());
    }
}
