//! HTTP delivery to the collector with bounded retries.
//!
//! A ship call walks `Init -> Attempt -> (2xx: Done-Success | 4xx-non-429:
//! Done-ClientFail | other: Backoff) -> ...`, retrying 429 and 5xx/transport
//! errors up to a fixed budget before giving up. The activity and
//! registration endpoints are derived from the traces URL by replacing its
//! trailing path segment.

use std::time::Duration;

use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::wire::{AgentRegistration, LifecycleEvent, WirePayload};

#[derive(Debug, Clone)]
pub struct ShipOutcome {
    pub entries_count: usize,
    pub http_status: Option<u16>,
    pub duration: Duration,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipResult {
    Success,
    /// 4xx other than 429: stop immediately, do not retry.
    ClientFatal,
    /// Retry budget exhausted on 429 / 5xx / transport errors.
    ExhaustedFail,
    Cancelled,
}

pub struct ShipperClient {
    http: Client,
    traces_url: String,
    activity_url: String,
    register_url: String,
    api_key: Option<String>,
    max_retries: u32,
    base_backoff: Duration,
}

impl ShipperClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        max_retries: u32,
        base_backoff: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        let traces_url = base_url.trim_end_matches('/').to_string();
        let activity_url = replace_suffix(&traces_url, "/traces", "/sessions/activity");
        let register_url = replace_suffix(&traces_url, "/traces", "/agents/register");
        Ok(Self {
            http,
            traces_url,
            activity_url,
            register_url,
            api_key,
            max_retries,
            base_backoff,
        })
    }

    /// Attempts up to `1 + max_retries` times total, sleeping a cancellable
    /// exponential backoff between attempts.
    pub async fn ship(&self, cancel: &CancellationToken, payload: &WirePayload) -> (ShipResult, ShipOutcome) {
        let start = std::time::Instant::now();
        let entries_count = payload.entries.len();
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return (
                    ShipResult::Cancelled,
                    ShipOutcome { entries_count, http_status: None, duration: start.elapsed(), error: Some("cancelled".into()) },
                );
            }

            match self.post_json(&self.traces_url, payload).await {
                Ok(status) if status.is_success() => {
                    return (
                        ShipResult::Success,
                        ShipOutcome { entries_count, http_status: Some(status.as_u16()), duration: start.elapsed(), error: None },
                    );
                }
                Ok(status) if is_retryable_status(status) => {
                    if attempt >= self.max_retries {
                        return (
                            ShipResult::ExhaustedFail,
                            ShipOutcome {
                                entries_count,
                                http_status: Some(status.as_u16()),
                                duration: start.elapsed(),
                                error: Some(format!("exhausted after {} retries, last status {status}", self.max_retries)),
                            },
                        );
                    }
                    if !self.backoff_sleep(cancel, attempt).await {
                        return (
                            ShipResult::Cancelled,
                            ShipOutcome { entries_count, http_status: Some(status.as_u16()), duration: start.elapsed(), error: Some("cancelled during backoff".into()) },
                        );
                    }
                    attempt += 1;
                }
                Ok(status) => {
                    return (
                        ShipResult::ClientFatal,
                        ShipOutcome { entries_count, http_status: Some(status.as_u16()), duration: start.elapsed(), error: Some(format!("client error {status}")) },
                    );
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return (
                            ShipResult::ExhaustedFail,
                            ShipOutcome { entries_count, http_status: None, duration: start.elapsed(), error: Some(e.to_string()) },
                        );
                    }
                    if !self.backoff_sleep(cancel, attempt).await {
                        return (
                            ShipResult::Cancelled,
                            ShipOutcome { entries_count, http_status: None, duration: start.elapsed(), error: Some("cancelled during backoff".into()) },
                        );
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Cancellable exponential backoff (1s -> 2s -> 4s with default base of
    /// 1s), with +/-15% jitter. Returns false if cancelled mid-sleep.
    async fn backoff_sleep(&self, cancel: &CancellationToken, attempt: u32) -> bool {
        let multiplier = 1u64 << attempt.min(16);
        let base = self.base_backoff.as_secs_f64() * multiplier as f64;
        let jitter = 0.85 + rand::thread_rng().gen::<f64>() * 0.3;
        let backoff = Duration::from_secs_f64(base * jitter);

        tokio::select! {
            _ = tokio::time::sleep(backoff) => true,
            _ = cancel.cancelled() => false,
        }
    }

    async fn post_json<T: Serialize>(&self, url: &str, body: &T) -> Result<StatusCode, reqwest::Error> {
        let mut req = self.http.post(url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        Ok(resp.status())
    }

    pub async fn ship_activity(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        let status = self.post_json(&self.activity_url, event).await?;
        debug!(%status, "lifecycle event posted");
        Ok(())
    }

    pub async fn register_agent(&self, registration: &AgentRegistration) -> anyhow::Result<()> {
        let status = self.post_json(&self.register_url, registration).await?;
        debug!(%status, "agent registration posted");
        Ok(())
    }

    /// Reachability probe: GET against the traces endpoint. Anything short
    /// of a server error counts as "reachable" for offline-detection
    /// purposes.
    pub async fn ping(&self) -> bool {
        match self.http.get(&self.traces_url).send().await {
            Ok(resp) => !resp.status().is_server_error(),
            Err(_) => false,
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn replace_suffix(base: &str, suffix: &str, replacement: &str) -> String {
    match base.strip_suffix(suffix) {
        Some(stripped) => format!("{stripped}{replacement}"),
        None => format!("{base}{replacement}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_suffix_swaps_trailing_traces_path() {
        assert_eq!(
            replace_suffix("https://collector.example/v1/traces", "/traces", "/sessions/activity"),
            "https://collector.example/v1/sessions/activity"
        );
        assert_eq!(
            replace_suffix("https://collector.example/v1/traces", "/traces", "/agents/register"),
            "https://collector.example/v1/agents/register"
        );
    }

    #[test]
    fn is_retryable_status_covers_429_and_5xx_only() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::OK));
    }

    #[tokio::test]
    async fn ship_against_unreachable_host_exhausts_retries_and_is_cancellable() {
        let client = ShipperClient::new(
            "http://127.0.0.1:1/v1/traces",
            None,
            Duration::from_millis(200),
            1,
            Duration::from_millis(5),
        )
        .unwrap();
        let cancel = CancellationToken::new();
        let payload = WirePayload {
            producer: crate::discovery::Producer::Claude,
            session_id: "s1".to_string(),
            project_path: None,
            instance_id: None,
            machine_id: None,
            metadata: None,
            entries: vec![],
        };
        let (result, outcome) = client.ship(&cancel, &payload).await;
        assert_eq!(result, ShipResult::ExhaustedFail);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn ship_honors_pre_set_cancellation() {
        let client = ShipperClient::new(
            "http://127.0.0.1:1/v1/traces",
            None,
            Duration::from_secs(5),
            3,
            Duration::from_millis(5),
        )
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let payload = WirePayload {
            producer: crate::discovery::Producer::Claude,
            session_id: "s1".to_string(),
            project_path: None,
            instance_id: None,
            machine_id: None,
            metadata: None,
            entries: vec![],
        };
        let (result, _outcome) = client.ship(&cancel, &payload).await;
        assert_eq!(result, ShipResult::Cancelled);
    }
}
