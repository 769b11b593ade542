//! # Stream Controller
//!
//! Start/stop lifecycle around a background reconnect loop.
//!
//! ## Lifecycle:
//!
//! 1.  **Idle → Running**: `start()` spawns one tokio task with a fresh
//!     `CancellationToken`. Calling it again while the task is alive is a no-op.
//! 2.  **Reconnect Loop**: the task runs one `StreamSession` after another. After any
//!     outcome other than `Cancelled` it sleeps the reconnect delay (exponential
//!     backoff, reset after a session that delivered events) and reconnects.
//! 3.  **Running → Idle**: `stop()` cancels the token and awaits the task before
//!     returning, so no dispatch happens after it resolves.
//!
//! Both transitions run under one `tokio::sync::Mutex`; concurrent `start`/`stop`
//! calls are serialized.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::dispatcher::Dispatcher;
use crate::ingestors::session::{
    SessionOutcome, SharedMetrics, StreamMetrics, StreamSession, DEFAULT_MAX_LINE_BYTES,
};
use crate::ingestors::transport::StreamTransport;

/// # Reconnect Policy
///
/// Delay before reconnecting after `n` consecutive sessions without events:
/// `base_delay * 2^n`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let factor = 1u32 << consecutive_failures.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

struct ActiveIngestion {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// # Stream Controller
///
/// Owns at most one ingestion task at a time.
pub struct StreamController {
    transport: Arc<dyn StreamTransport>,
    dispatcher: Arc<Dispatcher>,
    policy: ReconnectPolicy,
    max_line_bytes: usize,
    metrics: SharedMetrics,
    state: Mutex<Option<ActiveIngestion>>,
    running: Arc<AtomicBool>,
}

impl StreamController {
    pub fn new(transport: Arc<dyn StreamTransport>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            transport,
            dispatcher,
            policy: ReconnectPolicy::default(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            metrics: SharedMetrics::default(),
            state: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// # Start
    ///
    /// Spawns the ingestion task unless one is already active.
    ///
    /// # Returns
    /// `true` when a new task was spawned.
    pub async fn start(&self) -> bool {
        let mut state = self.state.lock().await;

        if let Some(active) = state.as_mut() {
            if !active.cancel.is_cancelled() && !active.handle.is_finished() {
                log::debug!("Stream ingestion already running, start ignored.");
                return false;
            }
            // Reap a task that exited on its own or whose stop was interrupted.
            active.cancel.cancel();
            if let Err(e) = (&mut active.handle).await {
                log::error!("Previous ingestion task ended abnormally: {}", e);
            }
        }
        state.take();

        let cancel = CancellationToken::new();
        let worker = IngestionLoop {
            transport: Arc::clone(&self.transport),
            dispatcher: Arc::clone(&self.dispatcher),
            policy: self.policy,
            max_line_bytes: self.max_line_bytes,
            metrics: Arc::clone(&self.metrics),
            cancel: cancel.clone(),
        };
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            let _running = RunningFlag(running);
            worker.run().await;
        });

        *state = Some(ActiveIngestion { cancel, handle });
        log::info!("Stream ingestion started.");
        true
    }

    /// # Stop
    ///
    /// Cancels the active task and waits for it to exit.
    ///
    /// # Returns
    /// `true` when a task was stopped, `false` when already idle.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(active) = state.as_mut() else {
            log::debug!("Stream ingestion not running, stop ignored.");
            return false;
        };

        // The entry stays in place until the join completes, so a dropped `stop`
        // leaves the task tracked.
        active.cancel.cancel();
        if let Err(e) = (&mut active.handle).await {
            log::error!("Ingestion task ended abnormally: {}", e);
        }
        state.take();
        self.running.store(false, Ordering::SeqCst);
        log::info!("Stream ingestion stopped.");
        true
    }

    /// Non-blocking view of the lifecycle state.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the ingestion counters.
    pub fn metrics(&self) -> StreamMetrics {
        self.metrics.lock().expect("Metrics lock poisoned").clone()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }
}

/// Clears the running flag when the task ends, including by panic.
struct RunningFlag(Arc<AtomicBool>);

impl Drop for RunningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Everything the background task owns.
struct IngestionLoop {
    transport: Arc<dyn StreamTransport>,
    dispatcher: Arc<Dispatcher>,
    policy: ReconnectPolicy,
    max_line_bytes: usize,
    metrics: SharedMetrics,
    cancel: CancellationToken,
}

impl IngestionLoop {
    async fn run(self) {
        let mut consecutive_failures: u32 = 0;
        let mut first = true;

        while !self.cancel.is_cancelled() {
            let events_before = {
                let mut metrics = self.metrics.lock().expect("Metrics lock poisoned");
                metrics.sessions += 1;
                if !first {
                    metrics.reconnections += 1;
                }
                metrics.events_dispatched
            };
            first = false;

            let outcome = StreamSession::new(
                Arc::clone(&self.transport),
                Arc::clone(&self.dispatcher),
                self.cancel.clone(),
            )
            .with_metrics(Arc::clone(&self.metrics))
            .with_max_line_bytes(self.max_line_bytes)
            .run()
            .await;

            let delivered = {
                let mut metrics = self.metrics.lock().expect("Metrics lock poisoned");
                if matches!(outcome, SessionOutcome::RecoverableFailure(_)) {
                    metrics.failures += 1;
                }
                metrics.events_dispatched > events_before
            };

            match outcome {
                SessionOutcome::Cancelled => break,
                SessionOutcome::Completed => {
                    log::info!("Stream session ended, reconnecting.");
                }
                SessionOutcome::RecoverableFailure(e) => {
                    log::warn!("Stream session failed: {}", e);
                }
            }

            if delivered {
                consecutive_failures = 0;
            }
            let delay = self.policy.delay_for(consecutive_failures);
            consecutive_failures = consecutive_failures.saturating_add(1);

            log::debug!("Reconnecting in {:?}.", delay);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        log::info!("Ingestion loop exited.");
    }
}
