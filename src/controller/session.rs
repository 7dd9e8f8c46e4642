// The controller actor: owns pause/resume state and reacts to engine events

use crate::controller::handle::Message;
use crate::controller::priority::{PausedSet, PrioritySettings, PriorityWatch};
use crate::controller::release::ReleaseRegistry;
use crate::core::config::Config;
use crate::core::error::ControllerError;
use crate::engine::{AddOptions, EngineEvent, EngineEventKind, TransferEngine};
use crate::models::event::OutboundEvent;
use crate::models::transfer::{Descriptor, DescriptorSource, Fingerprint, TransferSnapshot};
use crate::status::bus::EventBus;
use crate::status::coalescer::{StatusReporters, StatusTiming};
use crate::stores::media_store::MediaStore;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub priority: PrioritySettings,
    /// Trackers attached to every add
    pub announce: Vec<String>,
    /// Address stream servers bind to
    pub stream_host: IpAddr,
    pub timing: StatusTiming,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            priority: PrioritySettings::default(),
            announce: Vec::new(),
            stream_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            timing: StatusTiming::default(),
        }
    }
}

impl From<&Config> for ControllerSettings {
    fn from(config: &Config) -> Self {
        Self {
            priority: PrioritySettings::from(&config.priority),
            announce: config.media.announce.clone(),
            stream_host: config.stream.host,
            timing: StatusTiming {
                debounce: config.schedule.status_debounce(),
                heartbeat: config.schedule.status_heartbeat(),
            },
        }
    }
}

/// Single owner of the paused set, priority watchers, stream releases and
/// status reporters. Runs as one task; see [`crate::controller::handle::spawn`].
pub struct Controller<E: TransferEngine> {
    pub(crate) engine: Arc<E>,
    pub(crate) media: MediaStore,
    pub(crate) bus: EventBus,
    pub(crate) settings: ControllerSettings,
    pub(crate) paused: PausedSet,
    pub(crate) watch: PriorityWatch,
    pub(crate) releases: ReleaseRegistry,
    pub(crate) reporters: StatusReporters<E>,
    pub(crate) cancel: CancellationToken,
}

impl<E: TransferEngine> Controller<E> {
    pub fn new(
        engine: Arc<E>,
        media: MediaStore,
        bus: EventBus,
        settings: ControllerSettings,
        cancel: CancellationToken,
    ) -> Self {
        let reporters = StatusReporters::new(
            Arc::clone(&engine),
            bus.clone(),
            settings.timing,
            cancel.clone(),
        );

        Self {
            engine,
            media,
            bus,
            settings,
            paused: PausedSet::new(),
            watch: PriorityWatch::new(),
            releases: ReleaseRegistry::new(),
            reporters,
            cancel,
        }
    }

    pub fn add_options(&self, fingerprint: &Fingerprint) -> AddOptions {
        AddOptions {
            data_dir: self.media.data_path(fingerprint),
            announce: self.settings.announce.clone(),
        }
    }

    /// Find an active transfer or add it from an identifier.
    ///
    /// A newly added transfer has its descriptor written to the media root.
    pub async fn resolve(&mut self, transfer_id: &str) -> Result<TransferSnapshot, ControllerError> {
        let descriptor = self.engine.parse(DescriptorSource::Identifier(transfer_id))?;
        let fingerprint = descriptor.fingerprint;

        if let Some(active) = self.engine.get(&fingerprint) {
            return Ok(active);
        }

        let added = self.add_unpaused(descriptor).await?;
        if let Some(metadata) = &added.descriptor.metadata {
            self.media.write_descriptor(&fingerprint, metadata).await?;
        }

        info!(fingerprint = %fingerprint, progress = added.progress, "Transfer added");
        Ok(added)
    }

    /// Add a transfer, taking it out of the paused set first.
    ///
    /// The paused descriptor goes back if the add fails.
    pub async fn add_unpaused(&mut self, descriptor: Descriptor) -> Result<TransferSnapshot, ControllerError> {
        let fingerprint = descriptor.fingerprint;
        let paused = self.paused.take(&fingerprint);

        let descriptor = match &paused {
            Some(cached) if descriptor.metadata.is_none() => cached.clone(),
            _ => descriptor,
        };

        let options = self.add_options(&fingerprint);
        match self.engine.add(descriptor, options).await {
            Ok(added) => Ok(added),
            Err(e) => {
                if let Some(cached) = paused {
                    self.paused.push(cached);
                }
                Err(e.into())
            }
        }
    }

    /// Add a persisted descriptor for seeding.
    ///
    /// Returns `None` when the transfer is already active or paused.
    pub async fn seed_persisted(
        &mut self,
        data_dir: PathBuf,
        metadata: &[u8],
    ) -> Result<Option<Fingerprint>, ControllerError> {
        let descriptor = self.engine.parse(DescriptorSource::Bytes(metadata))?;
        let fingerprint = descriptor.fingerprint;

        if self.engine.get(&fingerprint).is_some() || self.paused.contains(&fingerprint) {
            debug!(fingerprint = %fingerprint, "Transfer already known, not seeding again");
            return Ok(None);
        }

        let options = AddOptions {
            data_dir,
            announce: self.settings.announce.clone(),
        };
        self.engine.add(descriptor, options).await?;

        info!(fingerprint = %fingerprint, "Seeding persisted transfer");
        Ok(Some(fingerprint))
    }

    pub async fn on_engine_event(&mut self, event: EngineEvent) {
        let fingerprint = event.fingerprint;

        match event.kind {
            EngineEventKind::Added => self.reporters.start(fingerprint),
            EngineEventKind::Removed => {
                self.reporters.stop(&fingerprint);
            }
            kind => {
                self.reporters.trigger(&fingerprint);
                if kind == EngineEventKind::Download {
                    self.check_watch(&fingerprint).await;
                }
            }
        }
    }

    async fn check_watch(&mut self, fingerprint: &Fingerprint) {
        let Some(progress) = self.engine.get(fingerprint).map(|t| t.progress) else {
            return;
        };

        if self
            .watch
            .fires(fingerprint, progress, self.settings.priority.release_above)
        {
            info!(fingerprint = %fingerprint, progress, "Stream target past release threshold, resuming paused transfers");
            let _ = self.unprioritize(true).await;
        }
    }

    /// Rebuild reporters from the engine after missing events
    async fn resync(&mut self) {
        let active: HashSet<Fingerprint> = self
            .engine
            .transfers()
            .into_iter()
            .map(|t| t.fingerprint)
            .collect();

        for fingerprint in self.reporters.fingerprints() {
            if !active.contains(&fingerprint) {
                self.reporters.stop(&fingerprint);
            }
        }

        for fingerprint in &active {
            if !self.reporters.trigger(fingerprint) {
                self.reporters.start(*fingerprint);
            }
        }

        for fingerprint in &active {
            self.check_watch(fingerprint).await;
        }
    }

    async fn handle_message(&mut self, message: Message) {
        match message {
            Message::Command { request, reply } => {
                let response = self.dispatch(request).await;
                if reply.send(response).is_err() {
                    debug!("Command caller went away before the response");
                }
            }
            Message::SeedPersisted {
                data_dir,
                metadata,
                reply,
            } => {
                let result = self.seed_persisted(data_dir, &metadata).await;
                let _ = reply.send(result);
            }
        }
    }

    /// Serve the inbox and engine events until cancelled or every handle is gone
    pub async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Message>,
        mut events: broadcast::Receiver<EngineEvent>,
        ready: watch::Sender<bool>,
    ) {
        ready.send_replace(true);
        self.bus.emit(OutboundEvent::Ready);
        info!("Controller ready");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Controller cancelled");
                    break;
                }
                message = inbox.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => {
                        debug!("All controller handles dropped");
                        break;
                    }
                },
                event = events.recv() => match event {
                    Ok(event) => self.on_engine_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Controller lagged behind engine events, resyncing");
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("Engine event channel closed");
                        break;
                    }
                },
            }
        }

        let released = self.releases.release_all();
        self.reporters.stop_all();
        info!(released_streams = released, "Controller stopped");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::mock::{fp, EngineCall, MockEngine};
    use std::time::Duration;
    use tempfile::TempDir;

    pub(crate) fn controller(dir: &TempDir) -> (Controller<MockEngine>, Arc<MockEngine>) {
        let engine = Arc::new(MockEngine::new());
        let controller = Controller::new(
            Arc::clone(&engine),
            MediaStore::new(dir.path()),
            EventBus::new(),
            ControllerSettings::default(),
            CancellationToken::new(),
        );
        (controller, engine)
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 9090

            [media]
            root = "/srv/media"
            announce = ["udp://tracker.example:6969"]

            [stream]
            host = "0.0.0.0"

            [schedule]
            status_debounce_ms = 250

            [logging]
            "#,
        )
        .unwrap();

        let settings = ControllerSettings::from(&config);
        assert_eq!(settings.announce, vec!["udp://tracker.example:6969"]);
        assert_eq!(settings.stream_host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(settings.timing.debounce, Duration::from_millis(250));
        assert_eq!(settings.timing.heartbeat, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_resolve_active_transfer_does_not_add() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        engine.insert(fp(1), 0.4);

        let snapshot = controller.resolve(&fp(1).to_hex()).await.unwrap();

        assert_eq!(snapshot.fingerprint, fp(1));
        assert!(engine.calls().is_empty());
        assert!(!controller.media.descriptor_path(&fp(1)).exists());
    }

    #[tokio::test]
    async fn test_resolve_adds_with_options_and_persists() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        controller.settings.announce = vec!["udp://tracker.example:6969".to_string()];

        let magnet = format!("magnet:?xt=urn:btih:{}", fp(2));
        controller.resolve(&magnet).await.unwrap();

        assert_eq!(
            engine.calls(),
            vec![EngineCall::Add(
                fp(2),
                AddOptions {
                    data_dir: dir.path().join(fp(2).to_hex()),
                    announce: vec!["udp://tracker.example:6969".to_string()],
                }
            )]
        );
        let persisted = controller.media.read_descriptor(&fp(2)).await.unwrap();
        assert_eq!(persisted, fp(2).to_hex().into_bytes());
    }

    #[tokio::test]
    async fn test_failed_add_returns_descriptor_to_paused() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        controller.paused.push(Descriptor::from_fingerprint(fp(3)));
        engine.fail_add(fp(3));

        let result = controller.resolve(&fp(3).to_hex()).await;

        assert!(result.is_err());
        assert!(controller.paused.contains(&fp(3)));
        assert!(!engine.is_active(&fp(3)));
    }

    #[tokio::test]
    async fn test_seed_persisted_skips_known_transfers() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        engine.insert(fp(1), 1.0);
        controller.paused.push(Descriptor::from_fingerprint(fp(2)));

        let active = controller
            .seed_persisted(dir.path().join("a"), fp(1).to_hex().as_bytes())
            .await
            .unwrap();
        let paused = controller
            .seed_persisted(dir.path().join("b"), fp(2).to_hex().as_bytes())
            .await
            .unwrap();
        let fresh = controller
            .seed_persisted(dir.path().join("c"), fp(3).to_hex().as_bytes())
            .await
            .unwrap();

        assert_eq!(active, None);
        assert_eq!(paused, None);
        assert_eq!(fresh, Some(fp(3)));
        assert!(!engine.is_active(&fp(2)));
        assert!(matches!(
            engine.calls().as_slice(),
            [EngineCall::Add(f, options)] if *f == fp(3) && options.data_dir == dir.path().join("c")
        ));
    }

    #[tokio::test]
    async fn test_seed_persisted_rejects_bad_metadata() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);

        let result = controller
            .seed_persisted(dir.path().join("x"), b"not a descriptor")
            .await;

        assert!(matches!(result, Err(ControllerError::Engine(_))));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_engine_events_drive_reporters() {
        let dir = TempDir::new().unwrap();
        let (mut controller, _engine) = controller(&dir);

        controller
            .on_engine_event(EngineEvent::new(fp(1), EngineEventKind::Added))
            .await;
        assert!(controller.reporters.contains(&fp(1)));

        controller
            .on_engine_event(EngineEvent::new(fp(1), EngineEventKind::Wire))
            .await;
        assert!(controller.reporters.contains(&fp(1)));

        controller
            .on_engine_event(EngineEvent::new(fp(1), EngineEventKind::Removed))
            .await;
        assert!(!controller.reporters.contains(&fp(1)));
    }

    #[tokio::test]
    async fn test_resync_matches_engine() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        engine.insert(fp(1), 0.1);
        engine.insert(fp(2), 0.1);
        controller.reporters.start(fp(9));

        controller.resync().await;

        assert!(controller.reporters.contains(&fp(1)));
        assert!(controller.reporters.contains(&fp(2)));
        assert!(!controller.reporters.contains(&fp(9)));
    }

    #[tokio::test]
    async fn test_pause_stops_reporter_and_announces() {
        let dir = TempDir::new().unwrap();
        let (mut controller, engine) = controller(&dir);
        let mut rx = controller.bus.subscribe();
        engine.insert(fp(1), 0.1);
        controller.reporters.start(fp(1));

        let snapshot = engine.get(&fp(1)).unwrap();
        controller.pause(snapshot).await;

        assert!(!controller.reporters.contains(&fp(1)));
        assert!(controller.paused.contains(&fp(1)));
        assert_eq!(rx.recv().await.unwrap(), OutboundEvent::paused(fp(1)));
    }
}
