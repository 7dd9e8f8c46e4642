use crate::models::transfer::Fingerprint;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Extension of persisted descriptor files
pub const DESCRIPTOR_EXTENSION: &str = "torrent";

/// Result of a best-effort delete
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub descriptor_removed: bool,
    pub data_removed: bool,
}

/// On-disk layout of the media root
///
/// Each transfer has a descriptor file `<root>/<fingerprint>.torrent` and a
/// payload directory `<root>/<fingerprint>`.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn descriptor_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join(format!("{}.{}", fingerprint, DESCRIPTOR_EXTENSION))
    }

    pub fn data_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(fingerprint.to_hex())
    }

    /// Payload directory belonging to a descriptor file
    pub fn data_path_for(&self, descriptor_file: &Path) -> Option<PathBuf> {
        descriptor_file
            .file_stem()
            .map(|stem| self.root.join(stem))
    }

    pub async fn write_descriptor(&self, fingerprint: &Fingerprint, bytes: &[u8]) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.descriptor_path(fingerprint), bytes).await
    }

    pub async fn read_descriptor(&self, fingerprint: &Fingerprint) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.descriptor_path(fingerprint)).await
    }

    /// All descriptor files in the root, in directory order
    pub async fn list_descriptors(&self) -> io::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut items = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_descriptor = path
                .extension()
                .is_some_and(|ext| ext == DESCRIPTOR_EXTENSION);
            if is_descriptor && entry.file_type().await?.is_file() {
                items.push(path);
            }
        }

        Ok(items)
    }

    /// Remove the descriptor file and the payload directory.
    ///
    /// The two removals are independent; a failure in one never blocks the
    /// other. Missing files count as removed.
    pub async fn delete(&self, fingerprint: &Fingerprint) -> DeleteOutcome {
        let descriptor_path = self.descriptor_path(fingerprint);
        let descriptor_removed = match tokio::fs::remove_file(&descriptor_path).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(
                    path = %descriptor_path.display(),
                    error = %e,
                    "Failed to remove descriptor file"
                );
                false
            }
        };

        let data_path = self.data_path(fingerprint);
        let data_removed = match tokio::fs::remove_dir_all(&data_path).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(
                    path = %data_path.display(),
                    error = %e,
                    "Failed to remove data directory"
                );
                false
            }
        };

        DeleteOutcome {
            descriptor_removed,
            data_removed,
        }
    }
}
