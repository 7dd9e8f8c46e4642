use crate::controller::handle::ControllerHandle;
use crate::core::error::ControllerError;
use crate::models::transfer::Fingerprint;
use crate::stores::media_store::MediaStore;
use rand::seq::SliceRandom;
use rand::Rng;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where the startup rollout sends persisted descriptors
pub trait SeedTarget: Send + Sync {
    fn seed(
        &self,
        data_dir: PathBuf,
        metadata: Vec<u8>,
    ) -> impl Future<Output = Result<Option<Fingerprint>, ControllerError>> + Send;
}

impl SeedTarget for ControllerHandle {
    async fn seed(
        &self,
        data_dir: PathBuf,
        metadata: Vec<u8>,
    ) -> Result<Option<Fingerprint>, ControllerError> {
        self.seed_persisted(data_dir, metadata).await
    }
}

/// Re-add every persisted descriptor for seeding, in random order, waiting
/// `spacing` before each one.
///
/// Returns how many transfers were added. Per-item failures are logged and
/// skipped.
pub async fn run_rollout<T, R>(
    media: &MediaStore,
    target: &T,
    spacing: Duration,
    rng: &mut R,
    cancel: &CancellationToken,
) -> usize
where
    T: SeedTarget,
    R: Rng + ?Sized,
{
    let mut descriptors = match media.list_descriptors().await {
        Ok(descriptors) => descriptors,
        Err(e) => {
            error!(
                root = %media.root().display(),
                error = %e,
                "Failed to list persisted descriptors, skipping rollout"
            );
            return 0;
        }
    };

    // Directory order is unspecified; sort so a seeded shuffle is reproducible
    descriptors.sort();
    descriptors.shuffle(rng);

    info!(
        count = descriptors.len(),
        spacing_seconds = spacing.as_secs(),
        "Seeding rollout started"
    );

    let mut seeded = 0;
    for path in descriptors {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(seeded, "Seeding rollout cancelled");
                return seeded;
            }
            _ = tokio::time::sleep(spacing) => {}
        }

        let Some(data_dir) = media.data_path_for(&path) else {
            warn!(path = %path.display(), "Descriptor has no file stem, skipping");
            continue;
        };

        let metadata = match tokio::fs::read(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read descriptor, skipping");
                continue;
            }
        };

        match target.seed(data_dir, metadata).await {
            Ok(Some(fingerprint)) => {
                seeded += 1;
                debug!(fingerprint = %fingerprint, path = %path.display(), "Rolled out transfer");
            }
            Ok(None) => {
                debug!(path = %path.display(), "Transfer already known, skipped");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to seed descriptor, skipping");
            }
        }
    }

    info!(seeded, "Seeding rollout completed");
    seeded
}
