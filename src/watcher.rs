//! Filesystem watcher for session files using the `notify` crate.
//!
//! Wraps `notify::recommended_watcher` (FSEvents on macOS, inotify on
//! Linux) with a tokio mpsc channel. Each qualifying event restarts a
//! per-path timer; only the check that still matches that path's most
//! recent touch actually fires, so rapid writes collapse into a single
//! event once the path has gone quiet for the debounce window.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const LOG_EXTENSION: &str = "jsonl";
const CHANNEL_CAPACITY: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
}

/// The producer tag is resolved by the supervisor against `watch_dirs[]`
/// at debounce-fire time instead of being carried here, since the watcher
/// itself only knows roots, not the producer each one maps to.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

fn is_log_file(path: &Path) -> bool {
    path.extension().map(|e| e == LOG_EXTENSION).unwrap_or(false)
}

/// True if any path component strictly below `root` is a dot-directory.
/// The root itself is never treated as hidden.
fn under_hidden_dir(path: &Path, root: &Path) -> bool {
    let Ok(rel) = path.strip_prefix(root) else { return false };
    rel.parent()
        .into_iter()
        .flat_map(|p| p.components())
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

pub struct SessionWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<WatchEvent>,
}

impl SessionWatcher {
    pub fn start(roots: &[PathBuf], debounce_window: Duration, cancel: CancellationToken) -> Result<Self> {
        let (out_tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<(PathBuf, ChangeKind)>();

        let watched_roots: Vec<PathBuf> = roots.to_vec();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "watcher error");
                    return;
                }
            };
            let kind = match event.kind {
                EventKind::Create(_) => ChangeKind::Created,
                EventKind::Modify(_) => ChangeKind::Modified,
                _ => return,
            };
            for path in event.paths {
                if !is_log_file(&path) {
                    continue;
                }
                let hidden = watched_roots
                    .iter()
                    .find(|root| path.starts_with(root))
                    .map(|root| under_hidden_dir(&path, root))
                    .unwrap_or(false);
                if hidden {
                    continue;
                }
                let _ = raw_tx.send((path, kind));
            }
        })?;

        for root in roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .with_context(|| format!("watching {}", root.display()))?;
        }

        // Per-path debounce: on each raw event, (re)start that path's timer
        // by spawning a fresh delayed check carrying its own touch instant.
        // Only the check whose instant still matches the table's last-touch
        // (i.e. no later event arrived for that path) actually emits.
        let last_touch: Arc<Mutex<HashMap<PathBuf, Instant>>> = Arc::new(Mutex::new(HashMap::new()));
        let debounce_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = debounce_cancel.cancelled() => break,
                    maybe = raw_rx.recv() => {
                        let Some((path, kind)) = maybe else { break };
                        let now = Instant::now();
                        last_touch.lock().unwrap().insert(path.clone(), now);

                        let touch = Arc::clone(&last_touch);
                        let tx = out_tx.clone();
                        let task_cancel = debounce_cancel.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = task_cancel.cancelled() => return,
                                _ = tokio::time::sleep(debounce_window) => {}
                            }
                            let should_fire = {
                                let guard = touch.lock().unwrap();
                                matches!(guard.get(&path), Some(t) if *t == now)
                            };
                            if should_fire {
                                touch.lock().unwrap().remove(&path);
                                let _ = tx.send(WatchEvent { path, kind }).await;
                            }
                        });
                    }
                }
            }
        });

        Ok(Self { _watcher: watcher, rx })
    }

    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }

    /// Idempotent: closing an already-closed channel is a no-op.
    pub fn stop(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use tokio::time::timeout;

    #[test]
    fn is_log_file_matches_only_jsonl() {
        assert!(is_log_file(Path::new("/a/b.jsonl")));
        assert!(!is_log_file(Path::new("/a/b.json")));
        assert!(!is_log_file(Path::new("/a/b.txt")));
        assert!(!is_log_file(Path::new("/a/b")));
    }

    #[test]
    fn under_hidden_dir_ignores_the_root_itself() {
        let root = Path::new("/home/u/.claude/projects");
        assert!(!under_hidden_dir(&root.join("proj/session.jsonl"), root));
        assert!(under_hidden_dir(&root.join(".git/session.jsonl"), root));
        assert!(under_hidden_dir(&root.join("proj/.cache/session.jsonl"), root));
    }

    #[tokio::test]
    async fn rapid_writes_within_window_collapse_to_one_event() {
        let dir = tempdir().unwrap();
        let cancel = CancellationToken::new();
        let mut watcher = SessionWatcher::start(
            std::slice::from_ref(&dir.path().to_path_buf()),
            Duration::from_millis(150),
            cancel.clone(),
        )
        .unwrap();

        let file_path = dir.path().join("session.jsonl");
        for i in 0..3 {
            let mut f = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file_path)
                .unwrap();
            writeln!(f, "line {i}").unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let first = timeout(Duration::from_secs(2), watcher.next_event()).await;
        assert!(first.is_ok(), "expected exactly one debounced event to arrive");

        // No second event should arrive within the window following the
        // last write, since all three writes collapsed into one.
        let second = timeout(Duration::from_millis(100), watcher.next_event()).await;
        assert!(second.is_err(), "did not expect a second event so soon");

        cancel.cancel();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let dir = tempdir().unwrap();
        let cancel = CancellationToken::new();
        let mut watcher = SessionWatcher::start(
            std::slice::from_ref(&dir.path().to_path_buf()),
            Duration::from_millis(50),
            cancel.clone(),
        )
        .unwrap();
        watcher.stop();
        watcher.stop();
        cancel.cancel();
    }
}
