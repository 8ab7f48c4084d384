//! Rate-limited JSON fetcher for the game API.
//!
//! Every request takes a slot from a shared [`RateGate`]. A slot stays
//! taken while the request is in flight and for the rest of the rate-limit
//! window after it started, so at most `calls_per_period` requests begin in
//! any window across all poll loops combined. The gate is a counting gate:
//! slots have no owner, so loops competing for them cannot deadlock.
//!
//! `429 Too Many Requests` is not an error: the caller sleeps for the
//! `Retry-After` the server asked for and tries again, indefinitely.
//! Anything else that goes wrong is logged and surfaces as an empty JSON
//! object from [`HttpFetcher::fetch_json`].

use crate::config::ApiConfig;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
}

/// Shared counting gate: `calls` slots per `period`.
#[derive(Clone)]
pub struct RateGate {
    slots: Arc<Semaphore>,
    period: Duration,
}

/// A taken gate slot. Returned to the gate one `period` after it was taken
/// (or on drop, whichever is later).
pub struct GateSlot {
    permit: Option<OwnedSemaphorePermit>,
    taken_at: Instant,
    period: Duration,
}

impl RateGate {
    pub fn new(calls: usize, period: Duration) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(calls.max(1))),
            period,
        }
    }

    pub async fn acquire(&self) -> GateSlot {
        // The semaphore is never closed, so acquisition only fails if that
        // invariant is broken; run ungated rather than stall every loop.
        let permit = match self.slots.clone().acquire_owned().await {
            Ok(p) => Some(p),
            Err(_) => {
                warn!("rate gate closed, proceeding without a slot");
                None
            }
        };
        GateSlot {
            permit,
            taken_at: Instant::now(),
            period: self.period,
        }
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

impl Drop for GateSlot {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let release_at = self.taken_at + self.period;
        if release_at <= Instant::now() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep_until(release_at).await;
                    drop(permit);
                });
            }
            Err(_) => drop(permit),
        }
    }
}

/// The empty-object sentinel returned when a fetch yields no data.
pub fn empty_payload() -> Value {
    Value::Object(Map::new())
}

/// True for `{}`, `null` and anything else that is not a non-empty object.
pub fn is_empty_payload(value: &Value) -> bool {
    value.as_object().map(|m| m.is_empty()).unwrap_or(true)
}

/// HTTP GET client gated by a [`RateGate`].
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    gate: RateGate,
    default_retry_after: Duration,
}

impl HttpFetcher {
    pub fn new(config: &ApiConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            gate: RateGate::new(config.calls_per_period, config.period()),
            default_retry_after: config.default_retry_after(),
        })
    }

    /// Fetch `url` as JSON. Never fails: transport errors, non-2xx statuses
    /// and undecodable bodies are logged and turned into `{}`.
    pub async fn fetch_json(&self, url: &str) -> Value {
        match self.try_fetch_json(url).await {
            Ok(value) => value,
            Err(e) => {
                warn!(url = %url, error = %e, "fetch failed");
                empty_payload()
            }
        }
    }

    /// Like [`fetch_json`](Self::fetch_json) but reports the failure.
    pub async fn try_fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let slot = self.gate.acquire().await;
            let resp = self.client.get(url).send().await?;
            let status = resp.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after(resp.headers()).unwrap_or(self.default_retry_after);
                drop(slot);
                debug!(
                    url = %url,
                    attempts = attempts,
                    wait_secs = wait.as_secs(),
                    "rate limited, backing off"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            let value = resp.json::<Value>().await?;
            drop(slot);
            return Ok(value);
        }
    }
}

/// Seconds from a `Retry-After` header. HTTP-date values are not used by
/// the game API and fall back to the configured default.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
