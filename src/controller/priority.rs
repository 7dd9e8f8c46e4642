// Admission control: pause competing transfers for a stream, resume them later

use crate::controller::session::Controller;
use crate::core::config::PriorityConfig;
use crate::core::error::ControllerError;
use crate::engine::{EngineError, TransferEngine};
use crate::models::command::RequestId;
use crate::models::event::OutboundEvent;
use crate::models::transfer::{Descriptor, Fingerprint, TransferSnapshot};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct PrioritySettings {
    pub prioritize_below: f64,
    pub keep_above: f64,
    pub release_above: f64,
    pub critical_divisor: u32,
    pub rollback_on_allocation_failure: bool,
}

impl Default for PrioritySettings {
    fn default() -> Self {
        Self::from(&PriorityConfig::default())
    }
}

impl From<&PriorityConfig> for PrioritySettings {
    fn from(config: &PriorityConfig) -> Self {
        Self {
            prioritize_below: config.prioritize_below,
            keep_above: config.keep_above,
            release_above: config.release_above,
            critical_divisor: config.critical_divisor.max(1),
            rollback_on_allocation_failure: config.rollback_on_allocation_failure,
        }
    }
}

/// Descriptors of transfers removed from the engine to free bandwidth
#[derive(Debug, Default)]
pub struct PausedSet {
    descriptors: VecDeque<Descriptor>,
}

impl PausedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the fingerprint was already paused
    pub fn push(&mut self, descriptor: Descriptor) -> bool {
        if self.contains(&descriptor.fingerprint) {
            return false;
        }
        self.descriptors.push_back(descriptor);
        true
    }

    pub fn take(&mut self, fingerprint: &Fingerprint) -> Option<Descriptor> {
        let index = self
            .descriptors
            .iter()
            .position(|d| d.fingerprint == *fingerprint)?;
        self.descriptors.remove(index)
    }

    /// Empty the set, oldest pause first
    pub fn drain(&mut self) -> Vec<Descriptor> {
        self.descriptors.drain(..).collect()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.descriptors.iter().any(|d| d.fingerprint == *fingerprint)
    }

    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.descriptors.iter().map(|d| d.fingerprint).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Transfers whose progress may trigger an automatic resume
#[derive(Debug, Default)]
pub struct PriorityWatch {
    targets: HashSet<Fingerprint>,
}

impl PriorityWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, fingerprint: Fingerprint) {
        self.targets.insert(fingerprint);
    }

    pub fn disarm(&mut self, fingerprint: &Fingerprint) -> bool {
        self.targets.remove(fingerprint)
    }

    /// Drop every watcher; returns how many were live
    pub fn cancel_all(&mut self) -> usize {
        let count = self.targets.len();
        self.targets.clear();
        count
    }

    pub fn is_armed_for(&self, fingerprint: &Fingerprint) -> bool {
        self.targets.contains(fingerprint)
    }

    /// Whether a progress report for `fingerprint` crosses `threshold`
    pub fn fires(&self, fingerprint: &Fingerprint, progress: f64, threshold: f64) -> bool {
        self.is_armed_for(fingerprint) && progress > threshold
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Proof that watchers were cancelled and paused transfers resumed.
///
/// Only `Controller::unprioritize` creates one, and admitting a stream
/// target consumes one.
#[must_use]
#[derive(Debug)]
pub struct Unprioritized {
    _private: (),
}

impl<E: TransferEngine> Controller<E> {
    /// Cancel all priority watchers, then optionally resume every paused
    /// transfer. Returns once all re-adds have completed.
    pub async fn unprioritize(&mut self, restart: bool) -> Unprioritized {
        let cancelled = self.watch.cancel_all();
        if cancelled > 0 {
            debug!(watchers = cancelled, "Priority watchers cancelled");
        }

        if restart && !self.paused.is_empty() {
            let descriptors = self.paused.drain();
            info!(count = descriptors.len(), "Resuming paused transfers");

            let mut readds = JoinSet::new();
            for descriptor in descriptors {
                let engine = Arc::clone(&self.engine);
                let options = self.add_options(&descriptor.fingerprint);
                readds.spawn(async move {
                    let fingerprint = descriptor.fingerprint;
                    (fingerprint, engine.add(descriptor, options).await)
                });
            }

            while let Some(joined) = readds.join_next().await {
                match joined {
                    Ok((fingerprint, Ok(_))) => {
                        debug!(fingerprint = %fingerprint, "Paused transfer resumed");
                    }
                    Ok((fingerprint, Err(e))) => {
                        warn!(fingerprint = %fingerprint, error = %e, "Failed to resume paused transfer, dropping it");
                    }
                    Err(e) => {
                        error!(error = %e, "Resume task failed");
                    }
                }
            }
        }

        Unprioritized { _private: () }
    }

    /// Resolve a stream target, adding it if it is not active yet
    pub async fn admit(
        &mut self,
        _unprioritized: Unprioritized,
        transfer_id: &str,
    ) -> Result<TransferSnapshot, ControllerError> {
        self.resolve(transfer_id).await
    }

    /// Give `fingerprint` first claim on bandwidth.
    ///
    /// Its leading pieces are fetched first. A target below
    /// `prioritize_below` also pauses every other transfer under
    /// `keep_above` and arms the auto-resume watcher.
    pub async fn prioritize(&mut self, fingerprint: Fingerprint) -> Result<(), ControllerError> {
        let target = self
            .engine
            .get(&fingerprint)
            .ok_or(EngineError::NotFound(fingerprint))?;

        let critical = target.piece_count / self.settings.priority.critical_divisor;
        self.engine.mark_critical(&fingerprint, 0..critical)?;
        debug!(fingerprint = %fingerprint, pieces = critical, "Leading pieces marked critical");

        if target.progress >= self.settings.priority.prioritize_below {
            return Ok(());
        }

        let keep_above = self.settings.priority.keep_above;
        let competing: Vec<TransferSnapshot> = self
            .engine
            .transfers()
            .into_iter()
            .filter(|t| t.fingerprint != fingerprint && t.progress < keep_above)
            .collect();

        for transfer in competing {
            self.pause(transfer).await;
        }

        self.watch.arm(fingerprint);
        info!(
            fingerprint = %fingerprint,
            progress = target.progress,
            paused = self.paused.len(),
            "Transfer prioritized"
        );

        Ok(())
    }

    /// Remove a transfer from the engine and remember it for resumption.
    ///
    /// A failed removal leaves the transfer running and out of the paused set.
    pub async fn pause(&mut self, transfer: TransferSnapshot) {
        let fingerprint = transfer.fingerprint;

        if let Err(e) = self.engine.remove(&fingerprint).await {
            warn!(fingerprint = %fingerprint, error = %e, "Failed to pause transfer, leaving it running");
            return;
        }

        self.paused.push(transfer.descriptor);
        self.reporters.stop(&fingerprint);
        self.bus.emit(OutboundEvent::paused(fingerprint));
        info!(fingerprint = %fingerprint, progress = transfer.progress, "Transfer paused");
    }

    /// Serve a transfer for playback and return its URL.
    ///
    /// The server lives until `release-stream` is sent for `id` or the
    /// controller shuts down.
    pub async fn request_stream(
        &mut self,
        id: RequestId,
        transfer_id: &str,
    ) -> Result<String, ControllerError> {
        let unprioritized = self.unprioritize(true).await;
        let target = self.admit(unprioritized, transfer_id).await?;
        let fingerprint = target.fingerprint;
        self.prioritize(fingerprint).await?;

        let port = match self.serve_stream(&id, &fingerprint).await {
            Ok(port) => port,
            Err(e) => {
                if self.settings.priority.rollback_on_allocation_failure {
                    warn!(fingerprint = %fingerprint, error = %e, "Stream allocation failed, resuming paused transfers");
                    let _ = self.unprioritize(true).await;
                }
                return Err(e);
            }
        };

        info!(request_id = %id, fingerprint = %fingerprint, port, "Stream server started");
        Ok(format!("http://localhost:{}/0", port))
    }

    async fn serve_stream(
        &mut self,
        id: &RequestId,
        fingerprint: &Fingerprint,
    ) -> Result<u16, ControllerError> {
        let router = self.engine.stream_router(fingerprint)?;

        let listener = TcpListener::bind((self.settings.stream_host, 0))
            .await
            .map_err(ControllerError::Allocation)?;
        let port = listener
            .local_addr()
            .map_err(ControllerError::Allocation)?
            .port();

        let shutdown = self.cancel.child_token();
        let signal = shutdown.clone();
        let fingerprint = *fingerprint;
        tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            match result {
                Ok(()) => debug!(fingerprint = %fingerprint, port, "Stream server stopped"),
                Err(e) => warn!(fingerprint = %fingerprint, error = %e, "Stream server failed"),
            }
        });

        self.releases
            .register(id.clone(), Box::new(move || shutdown.cancel()));

        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::session::tests::controller;
    use crate::engine::mock::{fp, EngineCall, MockEngine};
    use tempfile::TempDir;

    fn assert_exclusive(controller: &Controller<MockEngine>) {
        for paused in controller.paused.fingerprints() {
            assert!(
                !controller.engine.is_active(&paused),
                "{paused} is both paused and active"
            );
        }
    }

    #[test]
    fn test_paused_set() {
        let mut paused = PausedSet::new();
        assert!(paused.push(Descriptor::from_fingerprint(fp(1))));
        assert!(paused.push(Descriptor::from_fingerprint(fp(2))));
        assert!(!paused.push(Descriptor::from_fingerprint(fp(1))));
        assert_eq!(paused.len(), 2);

        assert_eq!(paused.take(&fp(1)).map(|d| d.fingerprint), Some(fp(1)));
        assert!(paused.take(&fp(1)).is_none());
        assert!(paused.contains(&fp(2)));

        let drained = paused.drain();
        assert_eq!(drained.len(), 1);
        assert!(paused.is_empty());
    }

    #[test]
    fn test_priority_watch() {
        let mut watch = PriorityWatch::new();
        watch.arm(fp(1));
        assert!(watch.fires(&fp(1), 0.81, 0.8));
        assert!(!watch.fires(&fp(1), 0.8, 0.8));
        assert!(!watch.fires(&fp(2), 0.99, 0.8));

        assert_eq!(watch.cancel_all(), 1);
        assert!(!watch.fires(&fp(1), 0.99, 0.8));
        assert!(watch.is_empty());
    }

    #[test]
    fn test_settings_from_config() {
        let settings = PrioritySettings::default();
        assert_eq!(settings.prioritize_below, 0.5);
        assert_eq!(settings.keep_above, 0.9);
        assert_eq!(settings.release_above, 0.8);
        assert_eq!(settings.critical_divisor, 8);
        assert!(settings.rollback_on_allocation_failure);
    }

    #[tokio::test]
    async fn test_stream_pauses_slow_transfers_and_keeps_nearly_done() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        engine.insert(fp(0xa), 0.3);
        engine.insert(fp(0xb), 0.95);

        let url = controller
            .request_stream("r1".to_string(), &fp(0xc).to_hex())
            .await
            .unwrap();

        assert!(url.starts_with("http://localhost:"));
        assert!(url.ends_with("/0"));
        assert!(!engine.is_active(&fp(0xa)));
        assert!(engine.is_active(&fp(0xb)));
        assert!(engine.is_active(&fp(0xc)));
        assert_eq!(controller.paused.fingerprints(), vec![fp(0xa)]);
        assert!(controller.watch.is_armed_for(&fp(0xc)));
        assert!(controller.releases.contains("r1"));

        let calls = engine.calls();
        assert!(calls.contains(&EngineCall::Critical(fp(0xc), 0..8)));
        assert!(!calls.contains(&EngineCall::Remove(fp(0xb))));

        // Newly added target has its descriptor persisted
        assert!(controller.media.descriptor_path(&fp(0xc)).exists());
        assert_exclusive(&controller);
    }

    #[tokio::test]
    async fn test_stream_for_advanced_target_pauses_nothing() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        engine.insert(fp(0xa), 0.3);
        engine.insert(fp(0xc), 0.6);

        controller
            .request_stream("r1".to_string(), &fp(0xc).to_hex())
            .await
            .unwrap();

        assert!(engine.is_active(&fp(0xa)));
        assert!(controller.paused.is_empty());
        assert!(!controller.watch.is_armed_for(&fp(0xc)));
        assert!(engine
            .calls()
            .contains(&EngineCall::Critical(fp(0xc), 0..8)));
    }

    #[tokio::test]
    async fn test_resume_precedes_next_target_admission() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        engine.insert(fp(0xa), 0.3);
        engine.preset_progress(fp(0xa), 0.3);

        controller
            .request_stream("r1".to_string(), &fp(0xc).to_hex())
            .await
            .unwrap();
        assert!(controller.paused.contains(&fp(0xa)));
        engine.clear_calls();

        controller
            .request_stream("r2".to_string(), &fp(0xd).to_hex())
            .await
            .unwrap();

        let calls = engine.calls();
        assert!(matches!(&calls[0], EngineCall::Add(f, _) if *f == fp(0xa)));
        assert!(matches!(&calls[1], EngineCall::Add(f, _) if *f == fp(0xd)));
        assert!(!controller.watch.is_armed_for(&fp(0xc)));
        assert!(controller.watch.is_armed_for(&fp(0xd)));
        assert_exclusive(&controller);
    }

    #[tokio::test]
    async fn test_unprioritize_resumes_everything() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        for n in 1..=3 {
            engine.insert(fp(n), 0.1);
        }

        controller
            .request_stream("r1".to_string(), &fp(0xc).to_hex())
            .await
            .unwrap();
        assert_eq!(controller.paused.len(), 3);

        let _ = controller.unprioritize(true).await;

        assert!(controller.paused.is_empty());
        assert!(controller.watch.is_empty());
        for n in 1..=3 {
            assert!(engine.is_active(&fp(n)));
        }

        // Resumed transfers land in their own data directory
        let resumed = engine.calls().into_iter().find_map(|call| match call {
            EngineCall::Add(f, options) if f == fp(1) => Some(options),
            _ => None,
        });
        assert_eq!(
            resumed.unwrap().data_dir,
            controller.media.data_path(&fp(1))
        );
    }

    #[tokio::test]
    async fn test_unprioritize_without_restart_keeps_paused() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        engine.insert(fp(1), 0.1);

        controller
            .request_stream("r1".to_string(), &fp(0xc).to_hex())
            .await
            .unwrap();
        let _ = controller.unprioritize(false).await;

        assert!(controller.watch.is_empty());
        assert!(controller.paused.contains(&fp(1)));
        assert!(!engine.is_active(&fp(1)));
    }

    #[tokio::test]
    async fn test_failed_resume_is_dropped() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        engine.insert(fp(1), 0.1);
        engine.insert(fp(2), 0.1);

        controller
            .request_stream("r1".to_string(), &fp(0xc).to_hex())
            .await
            .unwrap();
        engine.fail_add(fp(1));

        let _ = controller.unprioritize(true).await;

        assert!(controller.paused.is_empty());
        assert!(!engine.is_active(&fp(1)));
        assert!(engine.is_active(&fp(2)));
    }

    #[tokio::test]
    async fn test_failed_pause_leaves_transfer_running() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        engine.insert(fp(1), 0.1);
        engine.fail_remove(fp(1));

        controller
            .request_stream("r1".to_string(), &fp(0xc).to_hex())
            .await
            .unwrap();

        assert!(engine.is_active(&fp(1)));
        assert!(!controller.paused.contains(&fp(1)));
        assert_exclusive(&controller);
    }

    #[tokio::test]
    async fn test_progress_past_threshold_resumes_automatically() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        engine.insert(fp(1), 0.2);

        controller
            .request_stream("r1".to_string(), &fp(0xc).to_hex())
            .await
            .unwrap();
        assert!(controller.paused.contains(&fp(1)));

        let event = engine.set_progress(fp(0xc), 0.7);
        controller.on_engine_event(event).await;
        assert!(controller.paused.contains(&fp(1)));

        let event = engine.set_progress(fp(0xc), 0.85);
        controller.on_engine_event(event).await;

        assert!(controller.paused.is_empty());
        assert!(engine.is_active(&fp(1)));
        assert!(controller.watch.is_empty());
    }

    #[tokio::test]
    async fn test_allocation_failure_rolls_back() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        controller.settings.stream_host = "192.0.2.1".parse().unwrap();
        engine.insert(fp(1), 0.2);

        let result = controller
            .request_stream("r1".to_string(), &fp(0xc).to_hex())
            .await;

        assert!(matches!(result, Err(ControllerError::Allocation(_))));
        assert!(engine.is_active(&fp(1)));
        assert!(controller.paused.is_empty());
        assert!(!controller.releases.contains("r1"));
    }

    #[tokio::test]
    async fn test_allocation_failure_without_rollback_keeps_paused() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        controller.settings.stream_host = "192.0.2.1".parse().unwrap();
        controller.settings.priority.rollback_on_allocation_failure = false;
        engine.insert(fp(1), 0.2);

        let result = controller
            .request_stream("r1".to_string(), &fp(0xc).to_hex())
            .await;

        assert!(result.is_err());
        assert!(controller.paused.contains(&fp(1)));
        assert_exclusive(&controller);
    }

    #[tokio::test]
    async fn test_stream_target_taken_from_paused() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        engine.insert(fp(1), 0.2);

        controller
            .request_stream("r1".to_string(), &fp(0xc).to_hex())
            .await
            .unwrap();
        assert!(controller.paused.contains(&fp(1)));

        // Streaming the paused transfer resumes everything first, then admits it
        controller
            .request_stream("r2".to_string(), &fp(1).to_hex())
            .await
            .unwrap();

        assert!(engine.is_active(&fp(1)));
        assert!(!controller.paused.contains(&fp(1)));
        assert!(controller.paused.contains(&fp(0xc)));
        assert_exclusive(&controller);
    }
}
