// Per-transfer status reporting: 500 ms debounce after activity, 1 Hz heartbeat otherwise

use crate::engine::TransferEngine;
use crate::models::event::OutboundEvent;
use crate::models::transfer::Fingerprint;
use crate::status::bus::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTiming {
    /// Delay between a trigger and the emission it causes
    pub debounce: Duration,
    /// Steady-state interval between emissions
    pub heartbeat: Duration,
}

impl Default for StatusTiming {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            heartbeat: Duration::from_secs(1),
        }
    }
}

/// Handle to one transfer's reporting task.
///
/// Dropping the handle cancels the task.
pub struct StatusReporter {
    trigger: Arc<Notify>,
    cancel: CancellationToken,
}

impl StatusReporter {
    pub fn spawn<E: TransferEngine>(
        fingerprint: Fingerprint,
        engine: Arc<E>,
        bus: EventBus,
        timing: StatusTiming,
        parent: &CancellationToken,
    ) -> Self {
        let trigger = Arc::new(Notify::new());
        let cancel = parent.child_token();

        tokio::spawn(report_loop(
            fingerprint,
            engine,
            bus,
            timing,
            Arc::clone(&trigger),
            cancel.clone(),
        ));

        Self { trigger, cancel }
    }

    /// Mark the transfer dirty; coalesces with any pending emission
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn report_loop<E: TransferEngine>(
    fingerprint: Fingerprint,
    engine: Arc<E>,
    bus: EventBus,
    timing: StatusTiming,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
) {
    // Creation counts as a trigger
    let mut pending = Some(Instant::now() + timing.debounce);
    let mut heartbeat: Option<Instant> = None;

    loop {
        let next = match (pending, heartbeat) {
            (Some(p), Some(h)) => Some(p.min(h)),
            (p, h) => p.or(h),
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                trace!(fingerprint = %fingerprint, "Status reporter cancelled");
                return;
            }
            _ = trigger.notified() => {
                if pending.is_none() {
                    pending = Some(Instant::now() + timing.debounce);
                }
            }
            _ = wait_until(next) => {
                let now = Instant::now();
                if pending.is_some_and(|deadline| deadline <= now) {
                    pending = None;
                }

                let Some(snapshot) = engine.get(&fingerprint) else {
                    debug!(fingerprint = %fingerprint, "Transfer gone, stopping status reporter");
                    return;
                };
                bus.emit(OutboundEvent::status(&snapshot));
                heartbeat = Some(now + timing.heartbeat);
            }
        }
    }
}

/// Live reporters keyed by fingerprint; at most one per transfer
pub struct StatusReporters<E> {
    engine: Arc<E>,
    bus: EventBus,
    timing: StatusTiming,
    cancel: CancellationToken,
    reporters: HashMap<Fingerprint, StatusReporter>,
}

impl<E: TransferEngine> StatusReporters<E> {
    pub fn new(engine: Arc<E>, bus: EventBus, timing: StatusTiming, cancel: CancellationToken) -> Self {
        Self {
            engine,
            bus,
            timing,
            cancel,
            reporters: HashMap::new(),
        }
    }

    /// Start reporting for a transfer, replacing any previous reporter
    pub fn start(&mut self, fingerprint: Fingerprint) {
        let reporter = StatusReporter::spawn(
            fingerprint,
            Arc::clone(&self.engine),
            self.bus.clone(),
            self.timing,
            &self.cancel,
        );
        self.reporters.insert(fingerprint, reporter);
    }

    /// Returns false if the transfer has no reporter
    pub fn trigger(&self, fingerprint: &Fingerprint) -> bool {
        match self.reporters.get(fingerprint) {
            Some(reporter) => {
                reporter.trigger();
                true
            }
            None => false,
        }
    }

    pub fn stop(&mut self, fingerprint: &Fingerprint) -> bool {
        self.reporters.remove(fingerprint).is_some()
    }

    pub fn stop_all(&mut self) {
        self.reporters.clear();
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.reporters.contains_key(fingerprint)
    }

    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.reporters.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}
