//! Offline, seeding-only engine.
//!
//! Serves content that is already present in the media root. It has no
//! peers, so transfer rates are always zero and progress is simply the share
//! of payload bytes found on disk.

use crate::engine::adapter::{AddOptions, EngineError, EngineEvent, EngineEventKind, TransferEngine};
use crate::models::transfer::{
    AggregateStats, Descriptor, DescriptorSource, Fingerprint, TransferSnapshot, FINGERPRINT_LEN,
};
use axum::Router;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tower_http::services::ServeFile;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 1024;
const MAGNET_PREFIX: &str = "magnet:?";
const BTIH_PREFIX: &str = "urn:btih:";

/// Metadata document stored in descriptor files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMetadata {
    pub name: String,
    pub length: u64,
    pub piece_length: u64,
}

impl LocalMetadata {
    pub fn piece_count(&self) -> u32 {
        self.length.div_ceil(self.piece_length) as u32
    }
}

struct LocalTransfer {
    descriptor: Descriptor,
    metadata: LocalMetadata,
    data_dir: PathBuf,
    critical: Option<Range<u32>>,
}

impl LocalTransfer {
    fn payload_path(&self) -> PathBuf {
        self.data_dir.join(&self.metadata.name)
    }

    fn present_bytes(&self) -> u64 {
        std::fs::metadata(self.payload_path())
            .map(|m| m.len())
            .unwrap_or(0)
            .min(self.metadata.length)
    }

    fn snapshot(&self) -> TransferSnapshot {
        let present = self.present_bytes();
        let progress = if self.metadata.length == 0 {
            1.0
        } else {
            present as f64 / self.metadata.length as f64
        };

        TransferSnapshot {
            fingerprint: self.descriptor.fingerprint,
            progress,
            download_speed: 0.0,
            upload_speed: 0.0,
            num_peers: 0,
            downloaded: present,
            uploaded: 0,
            done: present == self.metadata.length,
            piece_count: self.metadata.piece_count(),
            magnet_uri: magnet_uri(&self.descriptor.fingerprint, &self.metadata.name),
            descriptor: self.descriptor.clone(),
        }
    }
}

pub struct LocalEngine {
    root: PathBuf,
    transfers: DashMap<Fingerprint, LocalTransfer>,
    events: broadcast::Sender<EngineEvent>,
}

impl LocalEngine {
    /// `root` is where descriptor files are looked up for identifier-only adds
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            root: root.into(),
            transfers: DashMap::new(),
            events,
        }
    }

    /// Fingerprint of a metadata document
    pub fn fingerprint_of(metadata: &[u8]) -> Fingerprint {
        let digest = Sha256::digest(metadata);
        let mut fingerprint = [0u8; FINGERPRINT_LEN];
        fingerprint.copy_from_slice(&digest[..FINGERPRINT_LEN]);
        Fingerprint(fingerprint)
    }

    pub fn critical_range(&self, fingerprint: &Fingerprint) -> Option<Range<u32>> {
        self.transfers
            .get(fingerprint)
            .and_then(|t| t.critical.clone())
    }

    fn emit(&self, fingerprint: Fingerprint, kind: EngineEventKind) {
        // No subscribers is fine
        let _ = self.events.send(EngineEvent::new(fingerprint, kind));
    }

    async fn resolve_metadata(&self, descriptor: &Descriptor) -> Result<Vec<u8>, EngineError> {
        if let Some(metadata) = &descriptor.metadata {
            return Ok(metadata.clone());
        }

        let path = self.root.join(format!("{}.torrent", descriptor.fingerprint));
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(EngineError::MetadataUnavailable(descriptor.fingerprint))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_metadata(bytes: &[u8]) -> Result<LocalMetadata, EngineError> {
    let metadata: LocalMetadata = serde_json::from_slice(bytes)
        .map_err(|e| EngineError::InvalidDescriptor(e.to_string()))?;

    if metadata.piece_length == 0 {
        return Err(EngineError::InvalidDescriptor(
            "pieceLength must be greater than 0".to_string(),
        ));
    }

    if metadata.name.is_empty() || Path::new(&metadata.name).components().count() != 1 {
        return Err(EngineError::InvalidDescriptor(format!(
            "invalid payload name '{}'",
            metadata.name
        )));
    }

    Ok(metadata)
}

fn parse_magnet(uri: &str) -> Result<Descriptor, EngineError> {
    let query = uri
        .strip_prefix(MAGNET_PREFIX)
        .ok_or_else(|| EngineError::InvalidIdentifier(uri.to_string()))?;
    let params: Vec<(String, String)> = serde_urlencoded::from_str(query)
        .map_err(|e| EngineError::InvalidIdentifier(e.to_string()))?;

    let mut descriptor = None;
    let mut name = None;
    for (key, value) in params {
        match key.as_str() {
            "xt" => {
                let hash = value
                    .strip_prefix(BTIH_PREFIX)
                    .ok_or_else(|| EngineError::InvalidIdentifier(uri.to_string()))?;
                let fingerprint = hash
                    .parse()
                    .map_err(|_| EngineError::InvalidIdentifier(uri.to_string()))?;
                descriptor = Some(Descriptor::from_fingerprint(fingerprint));
            }
            "dn" => name = Some(value),
            _ => {}
        }
    }

    let mut descriptor = descriptor.ok_or_else(|| EngineError::InvalidIdentifier(uri.to_string()))?;
    descriptor.name = name;
    Ok(descriptor)
}

pub fn magnet_uri(fingerprint: &Fingerprint, name: &str) -> String {
    let dn = serde_urlencoded::to_string([("dn", name)]).unwrap_or_default();
    format!("{MAGNET_PREFIX}xt={BTIH_PREFIX}{fingerprint}&{dn}")
}

impl TransferEngine for LocalEngine {
    fn parse(&self, source: DescriptorSource<'_>) -> Result<Descriptor, EngineError> {
        match source {
            DescriptorSource::Identifier(id) if id.starts_with(MAGNET_PREFIX) => parse_magnet(id),
            DescriptorSource::Identifier(id) => id
                .parse()
                .map(Descriptor::from_fingerprint)
                .map_err(|_| EngineError::InvalidIdentifier(id.to_string())),
            DescriptorSource::Bytes(bytes) => {
                let metadata = parse_metadata(bytes)?;
                Ok(Descriptor {
                    fingerprint: Self::fingerprint_of(bytes),
                    name: Some(metadata.name),
                    metadata: Some(bytes.to_vec()),
                })
            }
        }
    }

    async fn add(
        &self,
        descriptor: Descriptor,
        options: AddOptions,
    ) -> Result<TransferSnapshot, EngineError> {
        let fingerprint = descriptor.fingerprint;
        if self.transfers.contains_key(&fingerprint) {
            return Err(EngineError::AlreadyActive(fingerprint));
        }

        let bytes = self.resolve_metadata(&descriptor).await?;
        if Self::fingerprint_of(&bytes) != fingerprint {
            return Err(EngineError::InvalidDescriptor(format!(
                "metadata does not match fingerprint {fingerprint}"
            )));
        }
        let metadata = parse_metadata(&bytes)?;

        let transfer = LocalTransfer {
            descriptor: Descriptor {
                fingerprint,
                name: Some(metadata.name.clone()),
                metadata: Some(bytes),
            },
            metadata,
            data_dir: options.data_dir,
            critical: None,
        };
        let snapshot = transfer.snapshot();
        self.transfers.insert(fingerprint, transfer);

        debug!(
            fingerprint = %fingerprint,
            trackers = options.announce.len(),
            progress = snapshot.progress,
            "Local transfer added"
        );

        self.emit(fingerprint, EngineEventKind::Added);
        self.emit(fingerprint, EngineEventKind::Ready);
        if snapshot.done {
            self.emit(fingerprint, EngineEventKind::Done);
        } else {
            // Nothing on disk to seed and nobody to fetch from
            self.emit(fingerprint, EngineEventKind::NoPeers);
        }

        Ok(snapshot)
    }

    fn get(&self, fingerprint: &Fingerprint) -> Option<TransferSnapshot> {
        self.transfers.get(fingerprint).map(|t| t.snapshot())
    }

    fn transfers(&self) -> Vec<TransferSnapshot> {
        self.transfers.iter().map(|t| t.snapshot()).collect()
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<(), EngineError> {
        self.transfers
            .remove(fingerprint)
            .ok_or(EngineError::NotFound(*fingerprint))?;
        self.emit(*fingerprint, EngineEventKind::Removed);
        info!(fingerprint = %fingerprint, "Local transfer removed");
        Ok(())
    }

    fn mark_critical(&self, fingerprint: &Fingerprint, pieces: Range<u32>) -> Result<(), EngineError> {
        let mut transfer = self
            .transfers
            .get_mut(fingerprint)
            .ok_or(EngineError::NotFound(*fingerprint))?;

        let piece_count = transfer.metadata.piece_count();
        if pieces.start > pieces.end || pieces.end > piece_count {
            return Err(EngineError::InvalidPieceRange {
                start: pieces.start,
                end: pieces.end,
                piece_count,
            });
        }

        transfer.critical = Some(pieces);
        Ok(())
    }

    fn stream_router(&self, fingerprint: &Fingerprint) -> Result<Router, EngineError> {
        let transfer = self
            .transfers
            .get(fingerprint)
            .ok_or(EngineError::NotFound(*fingerprint))?;

        Ok(Router::new().route_service("/0", ServeFile::new(transfer.payload_path())))
    }

    fn stats(&self) -> AggregateStats {
        let count = self.transfers.len();
        if count == 0 {
            return AggregateStats::default();
        }

        let total: f64 = self.transfers.iter().map(|t| t.snapshot().progress).sum();
        AggregateStats {
            progress: total / count as f64,
            down: 0.0,
            up: 0.0,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
