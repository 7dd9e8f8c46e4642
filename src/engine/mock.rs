// In-memory engine double shared by unit tests

use crate::engine::adapter::{AddOptions, EngineError, EngineEvent, EngineEventKind, TransferEngine};
use crate::models::transfer::{
    AggregateStats, Descriptor, DescriptorSource, Fingerprint, TransferSnapshot,
};
use axum::{routing::get, Router};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Mutex;
use tokio::sync::broadcast;

pub const MOCK_PIECE_COUNT: u32 = 64;

pub fn fp(n: u8) -> Fingerprint {
    Fingerprint([n; 20])
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Add(Fingerprint, AddOptions),
    Remove(Fingerprint),
    Critical(Fingerprint, Range<u32>),
}

pub struct MockEngine {
    transfers: Mutex<HashMap<Fingerprint, TransferSnapshot>>,
    calls: Mutex<Vec<EngineCall>>,
    failing_adds: Mutex<HashSet<Fingerprint>>,
    failing_removes: Mutex<HashSet<Fingerprint>>,
    initial_progress: Mutex<HashMap<Fingerprint, f64>>,
    events: broadcast::Sender<EngineEvent>,
}

impl MockEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            transfers: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failing_adds: Mutex::new(HashSet::new()),
            failing_removes: Mutex::new(HashSet::new()),
            initial_progress: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Make a transfer active without recording an engine call
    pub fn insert(&self, fingerprint: Fingerprint, progress: f64) {
        let snapshot = snapshot(descriptor(fingerprint), progress);
        self.transfers.lock().unwrap().insert(fingerprint, snapshot);
    }

    /// Progress a transfer reports once it is added
    pub fn preset_progress(&self, fingerprint: Fingerprint, progress: f64) {
        self.initial_progress.lock().unwrap().insert(fingerprint, progress);
    }

    pub fn set_progress(&self, fingerprint: Fingerprint, progress: f64) -> EngineEvent {
        if let Some(t) = self.transfers.lock().unwrap().get_mut(&fingerprint) {
            t.progress = progress;
            t.done = progress >= 1.0;
        }
        let event = EngineEvent::new(fingerprint, EngineEventKind::Download);
        let _ = self.events.send(event);
        event
    }

    pub fn fail_add(&self, fingerprint: Fingerprint) {
        self.failing_adds.lock().unwrap().insert(fingerprint);
    }

    pub fn fail_remove(&self, fingerprint: Fingerprint) {
        self.failing_removes.lock().unwrap().insert(fingerprint);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn is_active(&self, fingerprint: &Fingerprint) -> bool {
        self.transfers.lock().unwrap().contains_key(fingerprint)
    }

    pub fn active(&self) -> Vec<Fingerprint> {
        let mut active: Vec<Fingerprint> = self.transfers.lock().unwrap().keys().copied().collect();
        active.sort();
        active
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn descriptor(fingerprint: Fingerprint) -> Descriptor {
    Descriptor {
        fingerprint,
        name: None,
        metadata: Some(fingerprint.to_hex().into_bytes()),
    }
}

fn snapshot(descriptor: Descriptor, progress: f64) -> TransferSnapshot {
    TransferSnapshot {
        fingerprint: descriptor.fingerprint,
        progress,
        download_speed: 100.0,
        upload_speed: 50.0,
        num_peers: 2,
        downloaded: 1000,
        uploaded: 500,
        done: progress >= 1.0,
        piece_count: MOCK_PIECE_COUNT,
        magnet_uri: format!("magnet:?xt=urn:btih:{}", descriptor.fingerprint),
        descriptor,
    }
}

impl TransferEngine for MockEngine {
    fn parse(&self, source: DescriptorSource<'_>) -> Result<Descriptor, EngineError> {
        match source {
            DescriptorSource::Identifier(id) => {
                let hex = id.strip_prefix("magnet:?xt=urn:btih:").unwrap_or(id);
                let fingerprint = hex
                    .parse()
                    .map_err(|_| EngineError::InvalidIdentifier(id.to_string()))?;
                Ok(Descriptor::from_fingerprint(fingerprint))
            }
            DescriptorSource::Bytes(bytes) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| EngineError::InvalidDescriptor(e.to_string()))?;
                let fingerprint = text
                    .trim()
                    .parse()
                    .map_err(|_| EngineError::InvalidDescriptor(text.to_string()))?;
                Ok(descriptor(fingerprint))
            }
        }
    }

    async fn add(
        &self,
        descriptor: Descriptor,
        options: AddOptions,
    ) -> Result<TransferSnapshot, EngineError> {
        let fingerprint = descriptor.fingerprint;
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::Add(fingerprint, options));

        if self.failing_adds.lock().unwrap().contains(&fingerprint) {
            return Err(EngineError::MetadataUnavailable(fingerprint));
        }

        let progress = self
            .initial_progress
            .lock()
            .unwrap()
            .get(&fingerprint)
            .copied()
            .unwrap_or(0.0);
        let added = snapshot(self::descriptor(fingerprint), progress);
        self.transfers
            .lock()
            .unwrap()
            .insert(fingerprint, added.clone());
        let _ = self
            .events
            .send(EngineEvent::new(fingerprint, EngineEventKind::Added));
        Ok(added)
    }

    fn get(&self, fingerprint: &Fingerprint) -> Option<TransferSnapshot> {
        self.transfers.lock().unwrap().get(fingerprint).cloned()
    }

    fn transfers(&self) -> Vec<TransferSnapshot> {
        let mut all: Vec<TransferSnapshot> =
            self.transfers.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|t| t.fingerprint);
        all
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<(), EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::Remove(*fingerprint));

        if self.failing_removes.lock().unwrap().contains(fingerprint) {
            return Err(EngineError::Io(std::io::Error::other("remove failed")));
        }

        if self.transfers.lock().unwrap().remove(fingerprint).is_none() {
            return Err(EngineError::NotFound(*fingerprint));
        }
        let _ = self
            .events
            .send(EngineEvent::new(*fingerprint, EngineEventKind::Removed));
        Ok(())
    }

    fn mark_critical(&self, fingerprint: &Fingerprint, pieces: Range<u32>) -> Result<(), EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::Critical(*fingerprint, pieces));
        Ok(())
    }

    fn stream_router(&self, fingerprint: &Fingerprint) -> Result<Router, EngineError> {
        if !self.is_active(fingerprint) {
            return Err(EngineError::NotFound(*fingerprint));
        }
        Ok(Router::new().route("/0", get(|| async { "stream" })))
    }

    fn stats(&self) -> AggregateStats {
        let transfers = self.transfers.lock().unwrap();
        if transfers.is_empty() {
            return AggregateStats::default();
        }
        AggregateStats {
            progress: transfers.values().map(|t| t.progress).sum::<f64>() / transfers.len() as f64,
            down: transfers.values().map(|t| t.download_speed).sum(),
            up: transfers.values().map(|t| t.upload_speed).sum(),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
