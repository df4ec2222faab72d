//! Snapshot persistence
//!
//! The store contract is whole-snapshot and crash-atomic per call: after
//! a crash, `read` returns either the previous snapshot or the new one,
//! never a torn mix. The shipped implementation writes JSON to a sibling
//! temp file, syncs it, then renames over the target.

use crate::snapshot::{RegistrySnapshot, SNAPSHOT_SCHEMA_VERSION};
use async_trait::async_trait;
use pkgd_errors::{Error, RegistryError};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// Crash-atomic persistence for registry snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist one snapshot, replacing any previous one. Returns the
    /// serialized size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or the backing write fails;
    /// the previous snapshot stays intact in that case.
    async fn write(&self, snapshot: &RegistrySnapshot) -> Result<u64, Error>;

    /// Load the last persisted snapshot, `None` when nothing was ever
    /// written.
    ///
    /// # Errors
    ///
    /// Returns an error when the stored bytes are unreadable or carry an
    /// unsupported schema version.
    async fn read(&self) -> Result<Option<RegistrySnapshot>, Error>;
}

/// JSON file store using write-to-temp-then-rename
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    /// Store rooted at a directory; the snapshot lives in
    /// `<root>/settings.json`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join("settings.json"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn write(&self, snapshot: &RegistrySnapshot) -> Result<u64, Error> {
        let bytes = serde_json::to_vec_pretty(snapshot).map_err(|e| {
            RegistryError::StoreFailure {
                message: format!("serialize snapshot: {e}"),
            }
        })?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io_with_path(&e, parent))?;
        }

        // Same-directory temp file so the rename stays on one filesystem
        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| Error::io_with_path(&e, &tmp))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| Error::io_with_path(&e, &tmp))?;
        file.sync_all()
            .await
            .map_err(|e| Error::io_with_path(&e, &tmp))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::io_with_path(&e, &self.path))?;

        Ok(bytes.len() as u64)
    }

    async fn read(&self) -> Result<Option<RegistrySnapshot>, Error> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io_with_path(&e, &self.path)),
        };
        let snapshot: RegistrySnapshot =
            serde_json::from_slice(&bytes).map_err(|e| RegistryError::SnapshotCorrupt {
                message: e.to_string(),
            })?;
        if snapshot.schema_version > SNAPSHOT_SCHEMA_VERSION {
            return Err(RegistryError::SchemaVersionUnsupported {
                found: snapshot.schema_version,
                supported: SNAPSHOT_SCHEMA_VERSION,
            }
            .into());
        }
        Ok(Some(snapshot))
    }
}

/// In-memory store for tests and ephemeral registries
#[derive(Default)]
pub struct MemorySnapshotStore {
    inner: Mutex<Option<RegistrySnapshot>>,
}

impl MemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn write(&self, snapshot: &RegistrySnapshot) -> Result<u64, Error> {
        let bytes = serde_json::to_vec(snapshot)?;
        let mut slot = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = Some(snapshot.clone());
        Ok(bytes.len() as u64)
    }

    async fn read(&self) -> Result<Option<RegistrySnapshot>, Error> {
        let slot = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(slot.clone())
    }
}
