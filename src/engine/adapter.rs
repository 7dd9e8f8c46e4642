// Capability surface of the transfer engine

use crate::models::transfer::{
    AggregateStats, Descriptor, DescriptorSource, Fingerprint, TransferSnapshot,
};
use axum::Router;
use std::future::Future;
use std::ops::Range;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid transfer identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Metadata unavailable for {0}")]
    MetadataUnavailable(Fingerprint),

    #[error("Transfer not found: {0}")]
    NotFound(Fingerprint),

    #[error("Transfer already active: {0}")]
    AlreadyActive(Fingerprint),

    #[error("Invalid piece range {start}..{end} for {piece_count} pieces")]
    InvalidPieceRange {
        start: u32,
        end: u32,
        piece_count: u32,
    },

    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Options attached to every add
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOptions {
    pub data_dir: PathBuf,
    pub announce: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEventKind {
    Added,
    Removed,
    Download,
    Upload,
    Done,
    NoPeers,
    Ready,
    Wire,
}

impl EngineEventKind {
    /// Whether this event should refresh the transfer's status report
    pub fn triggers_status(&self) -> bool {
        !matches!(self, EngineEventKind::Added | EngineEventKind::Removed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineEvent {
    pub fingerprint: Fingerprint,
    pub kind: EngineEventKind,
}

impl EngineEvent {
    pub fn new(fingerprint: Fingerprint, kind: EngineEventKind) -> Self {
        Self { fingerprint, kind }
    }
}

/// What the controller needs from a peer-to-peer transfer engine.
///
/// Piece selection, peer discovery, hashing and piece storage all live behind
/// this trait. Engines publish lifecycle and progress events on a broadcast
/// channel; `Added` must be sent by `add` and `Removed` by `remove`.
pub trait TransferEngine: Send + Sync + 'static {
    /// Parse a descriptor from an identifier or persisted bytes
    fn parse(&self, source: DescriptorSource<'_>) -> Result<Descriptor, EngineError>;

    /// Admit a transfer; resolves once its metadata is known
    fn add(
        &self,
        descriptor: Descriptor,
        options: AddOptions,
    ) -> impl Future<Output = Result<TransferSnapshot, EngineError>> + Send;

    fn get(&self, fingerprint: &Fingerprint) -> Option<TransferSnapshot>;

    fn transfers(&self) -> Vec<TransferSnapshot>;

    /// Stop and discard a transfer, keeping its data on disk
    fn remove(
        &self,
        fingerprint: &Fingerprint,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Fetch the given pieces before anything else
    fn mark_critical(&self, fingerprint: &Fingerprint, pieces: Range<u32>) -> Result<(), EngineError>;

    /// Byte-range HTTP service for a transfer's content, rooted at `/0`
    fn stream_router(&self, fingerprint: &Fingerprint) -> Result<Router, EngineError>;

    fn stats(&self) -> AggregateStats;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
