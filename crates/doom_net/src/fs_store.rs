//! Filesystem store backend.
//!
//! Objects are files directly under the root directory. Queued input events
//! are one JSON file each under `keys/`. Every write goes to a temporary
//! file first and is renamed into place.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use doom_core::DoomKey;
use doom_core::key::sort_by_timestamp;

use crate::store::{KeyQueue, ObjectStore, StoreError, validate_key};

const KEYS_DIR: &str = "keys";
const KEY_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open the store rooted at `root`, creating the directories if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directories cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(KEYS_DIR)).await?;
        debug!(root = %root.display(), "opened filesystem store");
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(format!(".{}.tmp", Uuid::new_v4().simple()))
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        let temp = self.temp_path();
        fs::write(&temp, data).await?;
        if let Err(error) = fs::rename(&temp, path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(error.into());
        }
        Ok(())
    }
}

impl ObjectStore for FsStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        validate_key(key)?;
        self.write_atomic(&self.root.join(key), &data).await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        validate_key(key)?;
        match fs::read(self.root.join(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

impl KeyQueue for FsStore {
    async fn push(&self, key: &DoomKey) -> Result<(), StoreError> {
        let name = format!("{}.{KEY_EXTENSION}", Uuid::new_v4().simple());
        let path = self.root.join(KEYS_DIR).join(name);
        self.write_atomic(&path, &serde_json::to_vec(key)?).await
    }

    async fn drain(&self) -> Result<Vec<DoomKey>, StoreError> {
        let mut entries = fs::read_dir(self.root.join(KEYS_DIR)).await?;
        let mut keys = Vec::new();

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => {
                    warn!(%error, "failed to list queued input, keeping the rest for the next poll");
                    break;
                }
            };
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != KEY_EXTENSION) {
                continue;
            }
            if let Some(key) = take_entry(&path).await {
                keys.push(key);
            }
        }

        sort_by_timestamp(&mut keys);
        Ok(keys)
    }
}

/// Read and delete one queued event. An entry that cannot be read or
/// deleted stays where it is and is not delivered.
async fn take_entry(path: &Path) -> Option<DoomKey> {
    let data = match fs::read(path).await {
        Ok(data) => data,
        // Another reader drained it first.
        Err(error) if error.kind() == ErrorKind::NotFound => return None,
        Err(error) => {
            warn!(%error, path = %path.display(), "skipping unreadable queued input");
            return None;
        }
    };
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(error) if error.kind() == ErrorKind::NotFound => return None,
        Err(error) => {
            warn!(%error, path = %path.display(), "failed to dequeue input, leaving it queued");
            return None;
        }
    }
    match serde_json::from_slice::<DoomKey>(&data) {
        Ok(key) => Some(key),
        Err(error) => {
            warn!(%error, path = %path.display(), "discarding malformed queued input");
            None
        }
    }
}
