use crate::models::transfer::{AggregateStats, Fingerprint, TransferSnapshot};
use serde::Serialize;

/// Progress report for one active transfer
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub progress: f64,
    pub download_speed: f64,
    pub upload_speed: f64,
    pub num_peers: u32,
    pub downloaded: u64,
    pub uploaded: u64,
    pub loading: bool,
}

impl From<&TransferSnapshot> for StatusSnapshot {
    fn from(transfer: &TransferSnapshot) -> Self {
        Self {
            progress: transfer.progress,
            download_speed: transfer.download_speed,
            upload_speed: transfer.upload_speed,
            num_peers: transfer.num_peers,
            downloaded: transfer.downloaded,
            uploaded: transfer.uploaded,
            loading: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TransferStatus {
    Active(StatusSnapshot),
    Paused { paused: bool },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusEvent {
    pub fingerprint: Fingerprint,
    #[serde(flatten)]
    pub status: TransferStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReadyEvent {
    pub ready: bool,
}

/// Events pushed to the control process
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundEvent {
    Status(StatusEvent),
    Stats(AggregateStats),
    Ready,
}

impl OutboundEvent {
    pub fn status(transfer: &TransferSnapshot) -> Self {
        OutboundEvent::Status(StatusEvent {
            fingerprint: transfer.fingerprint,
            status: TransferStatus::Active(StatusSnapshot::from(transfer)),
        })
    }

    pub fn paused(fingerprint: Fingerprint) -> Self {
        OutboundEvent::Status(StatusEvent {
            fingerprint,
            status: TransferStatus::Paused { paused: true },
        })
    }

    /// Event name used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Status(_) => "status",
            OutboundEvent::Stats(_) => "stats",
            OutboundEvent::Ready => "ready",
        }
    }

    /// JSON payload used on the wire
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            OutboundEvent::Status(event) => serde_json::to_string(event),
            OutboundEvent::Stats(stats) => serde_json::to_string(stats),
            OutboundEvent::Ready => serde_json::to_string(&ReadyEvent { ready: true }),
        }
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        match self {
            OutboundEvent::Status(event) => Some(event.fingerprint),
            _ => None,
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(
            self,
            OutboundEvent::Status(StatusEvent {
                status: TransferStatus::Paused { .. },
                ..
            })
        )
    }
}
