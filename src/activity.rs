//! Session lifecycle signal derivation from file-write cadence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::discovery::Producer;
use crate::wire::LifecycleKind;

pub struct ActivityTracker {
    inner: Mutex<HashMap<PathBuf, (Producer, Instant)>>,
    idle_threshold: Duration,
}

impl ActivityTracker {
    pub fn new(idle_threshold: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            idle_threshold,
        }
    }

    /// Records a write to `path`. Returns `Start` on first observation,
    /// `Active` on every subsequent one.
    pub fn observe(&self, path: &Path, producer: Producer) -> LifecycleKind {
        let mut guard = self.inner.lock().unwrap();
        match guard.get_mut(path) {
            Some((_, last)) => {
                *last = Instant::now();
                LifecycleKind::Active
            }
            None => {
                guard.insert(path.to_path_buf(), (producer, Instant::now()));
                LifecycleKind::Start
            }
        }
    }

    /// Captures the set of paths idle past the threshold under the lock,
    /// removes them, then returns the set for the caller to emit `end`
    /// against outside the lock.
    pub fn sweep(&self) -> Vec<(PathBuf, Producer)> {
        let now = Instant::now();
        let mut guard = self.inner.lock().unwrap();
        let idle: Vec<PathBuf> = guard
            .iter()
            .filter(|(_, (_, last))| now.duration_since(*last) >= self.idle_threshold)
            .map(|(path, _)| path.clone())
            .collect();

        let mut ended = Vec::with_capacity(idle.len());
        for path in idle {
            if let Some((producer, _)) = guard.remove(&path) {
                ended.push((path, producer));
            }
        }
        ended
    }
}
