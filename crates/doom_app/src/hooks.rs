//! Frame hooks wiring the frame loop to a transport.
//!
//! A hook never fails the loop. Every transport error is logged here and the
//! frame is dropped.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tracing::{info, warn};

use doom_core::{Checkpoint, FrameBuffer};
use doom_host::{FrameHook, StepOutput};
use doom_net::{FramePublisher, ObjectStore, encode_png};

/// Overwrites one PNG file with every frame.
pub struct PngFileHook {
    path: PathBuf,
}

impl PngFileHook {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn write(&self, frame: &FrameBuffer) -> anyhow::Result<()> {
        let png = encode_png(frame)?;
        let temp = self.path.with_extension("png.tmp");
        fs::write(&temp, &png).await?;
        fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}

impl FrameHook for PngFileHook {
    async fn on_step(&mut self, step: StepOutput) {
        let Some(frame) = step.frame else {
            return;
        };
        if let Err(error) = self.write(&frame).await {
            warn!(
                error = %format!("{error:#}"),
                frame_id = step.frame_id,
                path = %self.path.display(),
                "failed to write frame"
            );
        }
    }
}

/// Writes every frame as PNG to a fixed store key.
pub struct StoreFrameHook<S> {
    store: Arc<S>,
    frame_key: String,
}

impl<S: ObjectStore> StoreFrameHook<S> {
    #[must_use]
    pub fn new(store: Arc<S>, frame_key: String) -> Self {
        Self { store, frame_key }
    }
}

impl<S: ObjectStore> FrameHook for StoreFrameHook<S> {
    async fn on_step(&mut self, step: StepOutput) {
        let Some(frame) = step.frame else {
            return;
        };
        let png = match encode_png(&frame) {
            Ok(png) => png,
            Err(error) => {
                warn!(%error, frame_id = step.frame_id, "failed to encode frame");
                return;
            }
        };
        if let Err(error) = self.store.put(&self.frame_key, png).await {
            warn!(%error, frame_id = step.frame_id, key = %self.frame_key, "failed to store frame");
        }
    }
}

/// Publishes frames on the bus and persists checkpoints to the store.
pub struct BusHook<S> {
    publisher: FramePublisher,
    store: Arc<S>,
    state_key: String,
}

impl<S: ObjectStore> BusHook<S> {
    #[must_use]
    pub fn new(publisher: FramePublisher, store: Arc<S>, state_key: String) -> Self {
        Self {
            publisher,
            store,
            state_key,
        }
    }
}

impl<S: ObjectStore> FrameHook for BusHook<S> {
    async fn on_step(&mut self, step: StepOutput) {
        if let Some(frame) = &step.frame {
            self.publisher.publish(step.frame_id, frame).await;
        }
    }

    async fn on_checkpoint(&mut self, checkpoint: Checkpoint) {
        persist_checkpoint(self.store.as_ref(), &self.state_key, &checkpoint).await;
    }
}

/// Write `checkpoint` as JSON under `key`. Returns whether it was stored.
pub async fn persist_checkpoint<S: ObjectStore>(store: &S, key: &str, checkpoint: &Checkpoint) -> bool {
    let json = match checkpoint.to_json() {
        Ok(json) => json,
        Err(error) => {
            warn!(%error, "failed to serialise checkpoint");
            return false;
        }
    };
    let len = json.len();
    match store.put(key, json.into()).await {
        Ok(()) => {
            info!(key, bytes = len, timestamp = checkpoint.timestamp, "checkpoint persisted");
            true
        }
        Err(error) => {
            warn!(%error, key, "failed to persist checkpoint");
            false
        }
    }
}

/// Read the checkpoint under `key`, if there is a readable one.
pub async fn load_checkpoint<S: ObjectStore>(store: &S, key: &str) -> Option<Checkpoint> {
    let json = match store.get(key).await {
        Ok(Some(json)) => json,
        Ok(None) => {
            info!(key, "no checkpoint stored, starting fresh");
            return None;
        }
        Err(error) => {
            warn!(%error, key, "failed to read checkpoint, starting fresh");
            return None;
        }
    };
    match Checkpoint::from_json(&json) {
        Ok(checkpoint) => {
            info!(key, timestamp = checkpoint.timestamp, "checkpoint found");
            Some(checkpoint)
        }
        Err(error) => {
            warn!(%error, key, "stored checkpoint is malformed, starting fresh");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use doom_core::screen::FRAME_LEN;
    use doom_net::FsStore;
    use uuid::Uuid;

    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("doom-app-{}", Uuid::new_v4().simple()))
    }

    fn frame(frame_id: u64) -> StepOutput {
        StepOutput {
            frame_id,
            frame: FrameBuffer::from_pixels(vec![0x40u8; FRAME_LEN]),
        }
    }

    #[tokio::test]
    async fn test_png_file_hook_writes_frame() {
        let dir = temp_dir();
        fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("doom.png");
        let mut hook = PngFileHook::new(path.clone());

        hook.on_step(frame(1)).await;

        let written = fs::read(&path).await.unwrap();
        assert_eq!(&written[..4], b"\x89PNG");
        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_png_file_hook_survives_bad_path() {
        let mut hook = PngFileHook::new(temp_dir().join("missing").join("doom.png"));
        hook.on_step(frame(1)).await;
    }

    #[tokio::test]
    async fn test_store_frame_hook_puts_png() {
        let store = Arc::new(FsStore::open(temp_dir()).await.unwrap());
        let mut hook = StoreFrameHook::new(store.clone(), "doom-frame.png".to_string());

        hook.on_step(StepOutput { frame_id: 1, frame: None }).await;
        assert_eq!(store.get("doom-frame.png").await.unwrap(), None);

        hook.on_step(frame(2)).await;
        let png = store.get("doom-frame.png").await.unwrap().unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
        fs::remove_dir_all(store.root()).await.unwrap();
    }

    #[tokio::test]
    async fn test_checkpoint_persist_and_load() {
        let store = FsStore::open(temp_dir()).await.unwrap();
        assert!(load_checkpoint(&store, "doom-state-key").await.is_none());

        let checkpoint = Checkpoint::capture(&[1, 2, 3, 4], 42_000.0).unwrap();
        assert!(persist_checkpoint(&store, "doom-state-key", &checkpoint).await);

        let loaded = load_checkpoint(&store, "doom-state-key").await.unwrap();
        assert_eq!(loaded, checkpoint);
        fs::remove_dir_all(store.root()).await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_checkpoint_starts_fresh() {
        let store = FsStore::open(temp_dir()).await.unwrap();
        store
            .put("doom-state-key", Bytes::from_static(b"{\"snapshot\":"))
            .await
            .unwrap();
        assert!(load_checkpoint(&store, "doom-state-key").await.is_none());
        fs::remove_dir_all(store.root()).await.unwrap();
    }
}
