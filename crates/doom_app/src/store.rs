//! Store backend selection.

use bytes::Bytes;

use doom_core::DoomKey;
use doom_net::{FsStore, JetStreamStore, KeyQueue, NatsConnection, ObjectStore, StoreError};

use crate::cli::BackendArgs;

/// The configured store: a local directory, or JetStream buckets.
#[derive(Clone)]
pub enum Store {
    Fs(FsStore),
    JetStream(JetStreamStore),
}

impl Store {
    /// Open the directory store if `--store-dir` is set, otherwise the
    /// JetStream buckets, connecting to NATS unless a connection is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened.
    pub async fn open(args: &BackendArgs, connection: Option<&NatsConnection>) -> anyhow::Result<Self> {
        if let Some(dir) = &args.store_dir {
            return Ok(Self::Fs(FsStore::open(dir.clone()).await?));
        }
        let connection = match connection {
            Some(connection) => connection.clone(),
            None => NatsConnection::connect_to(&args.nats_url).await?,
        };
        let store = JetStreamStore::open(&connection, &args.bucket, &args.key_bucket).await?;
        Ok(Self::JetStream(store))
    }
}

impl ObjectStore for Store {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        match self {
            Self::Fs(store) => store.put(key, data).await,
            Self::JetStream(store) => store.put(key, data).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        match self {
            Self::Fs(store) => store.get(key).await,
            Self::JetStream(store) => store.get(key).await,
        }
    }
}

impl KeyQueue for Store {
    async fn push(&self, key: &DoomKey) -> Result<(), StoreError> {
        match self {
            Self::Fs(store) => store.push(key).await,
            Self::JetStream(store) => store.push(key).await,
        }
    }

    async fn drain(&self) -> Result<Vec<DoomKey>, StoreError> {
        match self {
            Self::Fs(store) => store.drain().await,
            Self::JetStream(store) => store.drain().await,
        }
    }
}
