//! The exporter supervisor: the one loop tying the watcher, tailer,
//! shipper, disk buffer, and activity sweep together under a single
//! cancellation token.
//!
//! The main loop is a biased `tokio::select!` over cancellation, watcher
//! events, drain ticks, and sweep ticks, in that priority order, so
//! shutdown always wins a ready race and maintenance work never starves
//! the event path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::DiskSpillBuffer;
use crate::config::Config;
use crate::discovery::{self, Producer};
use crate::offset::OffsetTable;
use crate::shipping::client::{ShipResult, ShipperClient};
use crate::stats::Stats;
use crate::tailer;
use crate::watcher::{ChangeKind, SessionWatcher, WatchEvent};
use crate::wire::{AgentRegistration, LifecycleEvent, LifecycleKind, WirePayload};
use crate::activity::ActivityTracker;

pub struct Supervisor {
    config: Config,
    client: Option<ShipperClient>,
    buffer: DiskSpillBuffer,
    offsets: OffsetTable,
    activity: Arc<ActivityTracker>,
    stats: Arc<Stats>,
    instance_id: String,
}

impl Supervisor {
    pub fn new(config: Config) -> Result<Self> {
        let buffer = DiskSpillBuffer::new(&config.buffer_dir, config.max_buffer_mb * 1024 * 1024)?;
        let client = match &config.collector.url {
            Some(url) => Some(ShipperClient::new(
                url,
                config.api_key.clone(),
                config.ship_timeout,
                config.max_retries,
                config.base_backoff,
            )?),
            None => None,
        };
        let activity = Arc::new(ActivityTracker::new(config.idle_threshold));

        Ok(Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            config,
            client,
            buffer,
            offsets: OffsetTable::new(),
            activity,
            stats: Arc::new(Stats::new()),
        })
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    pub fn buffer(&self) -> &DiskSpillBuffer {
        &self.buffer
    }

    async fn register_agent(&self) {
        let Some(client) = &self.client else { return };
        let registration = AgentRegistration {
            instance_id: self.instance_id.clone(),
            platform: std::env::consts::OS.to_string(),
            hostname: hostname(),
            version: Some(self.config.version.clone()),
            machine_id: None,
            started_at: chrono::Utc::now(),
            metadata: None,
        };
        if let Err(e) = client.register_agent(&registration).await {
            warn!(error = %e, "agent registration failed");
        }
    }

    /// Main daemon loop. Runs until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.register_agent().await;

        let roots: Vec<PathBuf> = self.config.watch_dirs.iter().map(|w| w.root.clone()).collect();
        let mut watcher = SessionWatcher::start(&roots, self.config.debounce_window, cancel.clone())?;

        let mut drain_timer = tokio::time::interval(self.config.flush_interval);
        drain_timer.tick().await;

        let mut sweep_timer = tokio::time::interval(self.config.sweep_interval);
        sweep_timer.tick().await;

        info!("supervisor ready, watching {} root(s)", roots.len());

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("cancellation received, shutting down");
                    break;
                }

                event = watcher.next_event() => {
                    match event {
                        Some(event) => self.handle_event(&cancel, event).await,
                        None => {
                            warn!("watcher channel closed unexpectedly");
                            break;
                        }
                    }
                }

                _ = drain_timer.tick() => {
                    self.drain_once(&cancel).await;
                }

                _ = sweep_timer.tick() => {
                    self.sweep_activity().await;
                }
            }
        }

        watcher.stop();
        Ok(())
    }

    /// One-shot mode: scan every watched root's existing files once, ship
    /// or buffer, drain once, return.
    pub async fn run_once(&self, cancel: CancellationToken) -> Result<()> {
        self.register_agent().await;

        for watch_dir in &self.config.watch_dirs {
            for path in walkdir::WalkDir::new(&watch_dir.root)
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.into_path())
                .filter(|p| p.extension().map(|e| e == "jsonl").unwrap_or(false))
            {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                self.handle_event(
                    &cancel,
                    WatchEvent { path, kind: ChangeKind::Modified },
                )
                .await;
            }
        }

        self.drain_once(&cancel).await;
        Ok(())
    }

    async fn handle_event(&self, cancel: &CancellationToken, event: WatchEvent) {
        let path = event.path;
        let Some(producer) = discovery::producer_for_path(&path, &self.config.watch_dirs) else {
            debug!(path = %path.display(), "file outside known watch_dirs, skipping");
            return;
        };

        let lifecycle = self.activity.observe(&path, producer);
        self.emit_lifecycle(&path, producer, lifecycle).await;

        let tail = match tailer::tail_file(
            &path,
            producer,
            &self.offsets,
            self.config.batch_size,
            Some(&self.instance_id),
            None,
        ) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to tail file, will retry on next event");
                return;
            }
        };

        if tail.malformed_lines > 0 {
            self.stats.record_malformed(tail.malformed_lines);
        }

        for payload in tail.batches {
            self.ship_or_buffer(cancel, payload).await;
        }
    }

    async fn emit_lifecycle(&self, path: &Path, producer: Producer, kind: LifecycleKind) {
        let Some(client) = &self.client else { return };
        let event = LifecycleEvent {
            producer,
            session_id: tailer::session_id_of(path),
            event: kind,
            timestamp: chrono::Utc::now(),
        };
        if let Err(e) = client.ship_activity(&event).await {
            debug!(error = %e, "lifecycle event send failed");
        }
    }

    async fn sweep_activity(&self) {
        for (path, producer) in self.activity.sweep() {
            self.emit_lifecycle(&path, producer, LifecycleKind::End).await;
        }
    }

    /// Ships directly if a collector is configured; otherwise, or if the
    /// ship attempt fails in a retryable way, spills to the disk buffer.
    async fn ship_or_buffer(&self, cancel: &CancellationToken, payload: WirePayload) {
        let entries = payload.entries.len() as u64;

        let Some(client) = &self.client else {
            self.spill(&payload, entries);
            return;
        };

        let (result, outcome) = client.ship(cancel, &payload).await;
        match result {
            ShipResult::Success => {
                self.stats.record_shipped(entries);
            }
            ShipResult::ClientFatal => {
                warn!(status = ?outcome.http_status, "client-fatal response, dropping payload");
                self.stats.record_failed(entries);
                if self.config.buffer_on_client_fatal {
                    self.spill(&payload, entries);
                }
            }
            ShipResult::ExhaustedFail => {
                warn!(error = ?outcome.error, "ship retries exhausted, spilling to buffer");
                self.spill(&payload, entries);
            }
            ShipResult::Cancelled => {}
        }
    }

    fn spill(&self, payload: &WirePayload, entries: u64) {
        if let Err(e) = self.buffer.enqueue(&payload.session_id, payload) {
            warn!(error = %e, "buffer enqueue failed, payload dropped");
            self.stats.record_failed(entries);
        }
    }

    async fn drain_once(&self, cancel: &CancellationToken) {
        let Some(client) = &self.client else { return };
        let stats = &self.stats;
        let outcome = self
            .buffer
            .drain::<WirePayload, _, _>(cancel, |payload| {
                let entries = payload.entries.len() as u64;
                async move {
                    let (result, _) = client.ship(cancel, &payload).await;
                    if result == ShipResult::Success {
                        stats.record_shipped(entries);
                        true
                    } else {
                        false
                    }
                }
            })
            .await;

        if outcome.drained > 0 {
            info!(drained = outcome.drained, "drained buffered payloads");
        }
    }
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME").ok().or_else(|| {
        std::process::Command::new("hostname")
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
    })
}
