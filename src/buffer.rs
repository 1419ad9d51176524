//! Size-capped, order-preserving, durable overflow queue for outbound
//! payloads.
//!
//! Each payload is one file in a flat directory; lexicographic filename
//! order is the queue order, so a directory listing recovers the queue
//! with no separate index. Writes stage into a temp file and rename into
//! place so a concurrent drain never observes a partial write. A payload
//! is deleted from disk only once its ship attempt succeeds.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("buffer full: {used_bytes} bytes used, cap is {cap_bytes}")]
    Full { used_bytes: u64, cap_bytes: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

pub struct DrainOutcome {
    pub drained: usize,
    pub cancelled: bool,
}

pub struct DiskSpillBuffer {
    dir: PathBuf,
    cap_bytes: u64,
}

impl DiskSpillBuffer {
    pub fn new(dir: impl Into<PathBuf>, cap_bytes: u64) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating spill buffer directory {}", dir.display()))?;
        Ok(Self { dir, cap_bytes })
    }

    /// Serializes `payload` and writes it as one file named so lexicographic
    /// order equals enqueue order. The write stages into a temp file in the
    /// same directory, then renames into place, so a concurrent drain never
    /// observes a partially written payload.
    pub fn enqueue<T: Serialize>(&self, session_id: &str, payload: &T) -> Result<(), BufferError> {
        let used = self.size()?;
        if used >= self.cap_bytes {
            return Err(BufferError::Full {
                used_bytes: used,
                cap_bytes: self.cap_bytes,
            });
        }

        let bytes = serde_json::to_vec(payload)?;
        let filename = format!("{:020}_{}.json", now_nanos(), sanitize(session_id));
        let final_path = self.dir.join(&filename);
        let tmp_path = self.dir.join(format!(".{filename}.tmp"));

        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Drains buffered payloads in enqueue order, invoking `ship` for each.
    /// Stops (without surfacing an error) on the first ship failure,
    /// returning the count successfully drained so far. Honors cancellation
    /// between files.
    pub async fn drain<T, F, Fut>(&self, cancel: &CancellationToken, mut ship: F) -> DrainOutcome
    where
        T: DeserializeOwned,
        F: FnMut(T) -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let files = match self.list_sorted() {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "failed to list spill buffer directory");
                return DrainOutcome { drained: 0, cancelled: false };
            }
        };

        let mut drained = 0usize;
        for path in files {
            if cancel.is_cancelled() {
                return DrainOutcome { drained, cancelled: true };
            }

            let bytes = match fs::read(&path) {
                Ok(b) => b,
                Err(_) => continue, // disappeared between listing and read
            };

            let payload: T = match serde_json::from_slice(&bytes) {
                Ok(p) => p,
                Err(_) => {
                    warn!(path = %path.display(), "deleting corrupt buffered payload");
                    let _ = fs::remove_file(&path);
                    continue;
                }
            };

            if ship(payload).await {
                let _ = fs::remove_file(&path);
                drained += 1;
            } else {
                break;
            }
        }

        DrainOutcome { drained, cancelled: false }
    }

    pub fn count(&self) -> usize {
        self.list_sorted().map(|v| v.len()).unwrap_or(0)
    }

    /// Aggregate byte count; best-effort, since files may disappear between
    /// listing and stat.
    pub fn size(&self) -> Result<u64, BufferError> {
        let mut total = 0u64;
        for entry in fs::read_dir(&self.dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if is_payload_file(&entry.file_name()) {
                if let Ok(meta) = entry.metadata() {
                    total += meta.len();
                }
            }
        }
        Ok(total)
    }

    fn list_sorted(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if is_payload_file(&entry.file_name()) {
                out.push(entry.path());
            }
        }
        out.sort();
        Ok(out)
    }
}

fn is_payload_file(name: &std::ffi::OsStr) -> bool {
    let s = name.to_string_lossy();
    s.ends_with(".json") && !s.starts_with('.')
}

fn sanitize(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn now_nanos() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}
