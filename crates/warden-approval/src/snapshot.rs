//! Snapshot persistence for the queue and rules.
//!
//! The queue and rule engine are in-memory. A [`SnapshotStore`] lets a host
//! save them across restarts; what substrate backs it is up to the host.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ApprovalError, ApprovalResult};
use crate::queue::QueueSnapshot;
use crate::rules::AutoApproveRule;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to restore an approval manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Format version.
    pub version: u32,
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
    /// Queue contents.
    pub queue: QueueSnapshot,
    /// Rules in evaluation order.
    pub rules: Vec<AutoApproveRule>,
}

/// Storage for [`PersistedState`].
///
/// # Example
///
/// ```rust,ignore
/// struct RedisStore { /* ... */ }
///
/// #[async_trait::async_trait]
/// impl SnapshotStore for RedisStore {
///     async fn save(&self, state: &PersistedState) -> ApprovalResult<()> { todo!() }
///     async fn load(&self) -> ApprovalResult<Option<PersistedState>> { todo!() }
/// }
/// ```
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist `state`, replacing any previous snapshot.
    async fn save(&self, state: &PersistedState) -> ApprovalResult<()>;

    /// Load the last snapshot, or `None` if nothing was saved.
    async fn load(&self) -> ApprovalResult<Option<PersistedState>>;
}

/// Keeps the snapshot in memory. Useful for tests.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemorySnapshotStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, state: &PersistedState) -> ApprovalResult<()> {
        let mut slot = self.state.lock().unwrap_or_else(|e| {
            warn!("Snapshot store lock was poisoned, recovering");
            e.into_inner()
        });
        *slot = Some(state.clone());
        Ok(())
    }

    async fn load(&self) -> ApprovalResult<Option<PersistedState>> {
        let slot = self.state.lock().unwrap_or_else(|e| {
            warn!("Snapshot store lock was poisoned, recovering");
            e.into_inner()
        });
        Ok(slot.clone())
    }
}

/// Writes the snapshot as pretty JSON. Saves go through a temporary file and
/// a rename so a crash never leaves a half-written snapshot.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotStore {
    path: PathBuf,
}

impl JsonFileSnapshotStore {
    /// Store at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileSnapshotStore {
    async fn save(&self, state: &PersistedState) -> ApprovalResult<()> {
        let json = serde_json::to_vec_pretty(state)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ApprovalError::Storage(format!("{}: {e}", parent.display())))?;
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| ApprovalError::Storage(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| ApprovalError::Storage(format!("{}: {e}", self.path.display())))?;

        debug!(path = %self.path.display(), bytes = json.len(), "Approval snapshot saved");
        Ok(())
    }

    async fn load(&self) -> ApprovalResult<Option<PersistedState>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ApprovalError::Storage(format!(
                    "{}: {e}",
                    self.path.display()
                )));
            },
        };
        let state: PersistedState = serde_json::from_slice(&bytes)?;
        if state.version != SNAPSHOT_VERSION {
            return Err(ApprovalError::InvalidSnapshot(format!(
                "unsupported snapshot version {}",
                state.version
            )));
        }
        Ok(Some(state))
    }
}
