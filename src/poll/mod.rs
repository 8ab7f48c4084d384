//! Keyed poll-loop manager.
//!
//! Each loop is a tokio task running a [`PollJob`] cycle after cycle. The
//! manager owns the key → loop map and guarantees at most one registered
//! loop per key.
//!
//! Lifecycle per key: absent → running → [stopping →] (cancelled | completed | failed) → absent.
//!
//! Cancellation is cooperative. `stop` flips the loop's [`CancelToken`]; the
//! loop sees it at the inter-cycle sleep, and jobs check it between
//! entities. Tasks are never aborted, so a store rewrite that has started
//! always runs to completion.
//!
//! A stopped loop stays registered, marked stopping, until its task has
//! actually exited. Until then the key cannot be started again.

use crate::notify::{deliver, Notifier};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Error, Debug, PartialEq)]
pub enum PollError {
    #[error("a loop is already running for `{0}`")]
    AlreadyRunning(String),
    #[error("no loop is running for `{0}`")]
    NotRunning(String),
}

/// Sending half of a cancellation signal.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

/// Receiving half, checked by loops at their yield points.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelSource, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelSource { tx }, CancelToken { rx })
}

impl CancelSource {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled, or once the source is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// What a job tells the loop after a cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleFlow {
    Continue,
    /// Stop looping even though an interval was given.
    Finish,
}

/// Per-cycle context handed to the job.
pub struct CycleContext {
    pub key: String,
    /// 1-based cycle number.
    pub cycle: u64,
    /// True when the loop runs a single cycle.
    pub one_shot: bool,
    pub cancel: CancelToken,
    pub notifier: Arc<dyn Notifier>,
}

/// One kind of polling work. Errors returned from a cycle are loop-fatal;
/// per-entity failures must be handled inside the cycle.
pub trait PollJob: Send + 'static {
    fn run_cycle<'a>(&'a mut self, ctx: &'a CycleContext)
        -> BoxFuture<'a, anyhow::Result<CycleFlow>>;
}

/// How a loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    Completed,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveLoop {
    pub key: String,
    pub started_at: DateTime<Utc>,
    pub interval: Option<Duration>,
    /// Stop was requested; the task is finishing its current cycle.
    pub stopping: bool,
}

struct LoopEntry {
    generation: u64,
    started_at: DateTime<Utc>,
    interval: Option<Duration>,
    cancel: CancelSource,
    stopping: bool,
}

/// Registry of running loops. Cheap to clone; clones share the registry.
#[derive(Clone, Default)]
pub struct PollManager {
    loops: Arc<DashMap<String, LoopEntry>>,
    next_generation: Arc<AtomicU64>,
}

impl PollManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and spawn a loop for `key`. The first cycle runs right away.
    /// With no `interval` the loop runs one cycle and deregisters itself.
    /// Fails while a loop for `key` is running or still stopping.
    pub fn start<J: PollJob>(
        &self,
        key: &str,
        interval: Option<Duration>,
        job: J,
        notifier: Arc<dyn Notifier>,
    ) -> Result<JoinHandle<LoopExit>, PollError> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (source, token) = cancel_pair();

        match self.loops.entry(key.to_string()) {
            Entry::Occupied(_) => return Err(PollError::AlreadyRunning(key.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(LoopEntry {
                    generation,
                    started_at: Utc::now(),
                    interval,
                    cancel: source,
                    stopping: false,
                });
            }
        }

        info!(
            key = %key,
            interval_secs = interval.map(|d| d.as_secs()),
            "poll loop started"
        );

        let runner = LoopRunner {
            loops: self.loops.clone(),
            key: key.to_string(),
            generation,
            interval,
            cancel: token,
            notifier,
        };
        Ok(tokio::spawn(runner.run(job)))
    }

    /// Signal the loop for `key` to stop. It deregisters itself once its
    /// task exits. A loop already stopping counts as not running.
    pub fn stop(&self, key: &str) -> Result<(), PollError> {
        match self.loops.get_mut(key) {
            Some(mut entry) if !entry.stopping => {
                entry.stopping = true;
                entry.cancel.cancel();
            }
            _ => return Err(PollError::NotRunning(key.to_string())),
        }
        info!(key = %key, "poll loop stop requested");
        Ok(())
    }

    /// Stop every loop. Returns how many were running.
    pub fn stop_all(&self) -> usize {
        let keys: Vec<String> = self.loops.iter().map(|e| e.key().clone()).collect();
        keys.iter().filter(|k| self.stop(k).is_ok()).count()
    }

    /// Whether a task for `key` is alive, stopping or not.
    pub fn is_running(&self, key: &str) -> bool {
        self.loops.contains_key(key)
    }

    /// Live loops, oldest first, including those still stopping.
    pub fn list_active(&self) -> Vec<ActiveLoop> {
        let mut active: Vec<ActiveLoop> = self
            .loops
            .iter()
            .map(|e| ActiveLoop {
                key: e.key().clone(),
                started_at: e.started_at,
                interval: e.interval,
                stopping: e.stopping,
            })
            .collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.key.cmp(&b.key)));
        active
    }
}

/// Wait up to `grace` for loop tasks to exit, in order. `None` when the
/// grace period ran out first; the tasks keep running.
pub async fn await_loops(
    handles: Vec<JoinHandle<LoopExit>>,
    grace: Duration,
) -> Option<Vec<LoopExit>> {
    let joined = tokio::time::timeout(grace, futures::future::join_all(handles))
        .await
        .ok()?;
    Some(
        joined
            .into_iter()
            .map(|r| r.unwrap_or_else(|e| LoopExit::Failed(e.to_string())))
            .collect(),
    )
}

struct LoopRunner {
    loops: Arc<DashMap<String, LoopEntry>>,
    key: String,
    generation: u64,
    interval: Option<Duration>,
    cancel: CancelToken,
    notifier: Arc<dyn Notifier>,
}

impl LoopRunner {
    async fn run<J: PollJob>(self, mut job: J) -> LoopExit {
        let mut cycle = 0u64;

        let exit = loop {
            if self.cancel.is_cancelled() {
                break LoopExit::Cancelled;
            }
            cycle += 1;
            let ctx = CycleContext {
                key: self.key.clone(),
                cycle,
                one_shot: self.interval.is_none(),
                cancel: self.cancel.clone(),
                notifier: self.notifier.clone(),
            };

            let result = AssertUnwindSafe(job.run_cycle(&ctx)).catch_unwind().await;
            let failure = match result {
                Ok(Ok(CycleFlow::Continue)) => None,
                Ok(Ok(CycleFlow::Finish)) => break LoopExit::Completed,
                Ok(Err(e)) => Some(format!("{:#}", e)),
                Err(_) => Some("cycle panicked".to_string()),
            };
            if let Some(reason) = failure {
                error!(key = %self.key, cycle = cycle, error = %reason, "poll loop failed");
                deliver(
                    self.notifier.as_ref(),
                    &format!(
                        "⚠️ Loop `{}` encountered an error and stopped: `{}`",
                        self.key, reason
                    ),
                )
                .await;
                break LoopExit::Failed(reason);
            }

            tokio::task::yield_now().await;

            let Some(period) = self.interval else {
                break LoopExit::Completed;
            };
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = self.cancel.cancelled() => break LoopExit::Cancelled,
            }
        };

        // Only ever remove the entry this task registered.
        self.loops
            .remove_if(&self.key, |_, entry| entry.generation == self.generation);

        info!(key = %self.key, cycles = cycle, exit = ?exit, "poll loop ended");
        exit
    }
}
