//! NATS JetStream store backend.
//!
//! Objects live in a JetStream object store bucket; queued input events are
//! entries of a key-value bucket, one entry per event.

use std::fmt::Display;

use async_nats::jetstream::{self, kv, object_store};
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use uuid::Uuid;

use doom_core::DoomKey;
use doom_core::key::sort_by_timestamp;

use crate::connection::NatsConnection;
use crate::store::{KeyQueue, ObjectStore, StoreError, validate_key};

#[derive(Clone)]
pub struct JetStreamStore {
    objects: object_store::ObjectStore,
    keys: kv::Store,
}

impl JetStreamStore {
    /// Bind to the object bucket `bucket` and the key-value bucket
    /// `key_bucket`, creating either if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if JetStream is unavailable.
    pub async fn open(
        connection: &NatsConnection,
        bucket: &str,
        key_bucket: &str,
    ) -> Result<Self, StoreError> {
        let context = jetstream::new(connection.client().clone());

        let objects = match context.get_object_store(bucket).await {
            Ok(objects) => objects,
            Err(_) => {
                info!(bucket, "creating object store bucket");
                context
                    .create_object_store(object_store::Config {
                        bucket: bucket.to_string(),
                        ..Default::default()
                    })
                    .await
                    .map_err(backend)?
            }
        };

        let keys = match context.get_key_value(key_bucket).await {
            Ok(keys) => keys,
            Err(_) => {
                info!(bucket = key_bucket, "creating key-value bucket");
                context
                    .create_key_value(kv::Config {
                        bucket: key_bucket.to_string(),
                        history: 1,
                        ..Default::default()
                    })
                    .await
                    .map_err(backend)?
            }
        };

        Ok(Self { objects, keys })
    }
}

fn backend(error: impl Display) -> StoreError {
    StoreError::Backend(error.to_string())
}

impl ObjectStore for JetStreamStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        validate_key(key)?;
        let mut reader: &[u8] = &data;
        self.objects.put(key, &mut reader).await.map_err(backend)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        validate_key(key)?;
        match self.objects.get(key).await {
            Ok(mut object) => {
                let mut data = Vec::new();
                object.read_to_end(&mut data).await?;
                Ok(Some(Bytes::from(data)))
            }
            Err(error) if error.kind() == object_store::GetErrorKind::NotFound => Ok(None),
            Err(error) => Err(backend(error)),
        }
    }
}

impl KeyQueue for JetStreamStore {
    async fn push(&self, key: &DoomKey) -> Result<(), StoreError> {
        let payload = Bytes::from(serde_json::to_vec(key)?);
        let name = Uuid::new_v4().simple().to_string();
        self.keys.put(name, payload).await.map_err(backend)?;
        Ok(())
    }

    async fn drain(&self) -> Result<Vec<DoomKey>, StoreError> {
        let mut names = Vec::new();
        let mut listing = self.keys.keys().await.map_err(backend)?;
        while let Some(name) = listing.next().await {
            match name {
                Ok(name) => names.push(name),
                Err(error) => {
                    warn!(%error, "failed to list queued input, keeping the rest for the next poll");
                    break;
                }
            }
        }

        let mut keys = Vec::with_capacity(names.len());
        for name in names {
            if let Some(key) = self.take_entry(&name).await {
                keys.push(key);
            }
        }

        sort_by_timestamp(&mut keys);
        Ok(keys)
    }
}

impl JetStreamStore {
    /// Read and purge one queued event. An entry that cannot be read or
    /// purged stays in the bucket and is not delivered.
    async fn take_entry(&self, name: &str) -> Option<DoomKey> {
        let payload = match self.keys.get(name).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(error) => {
                warn!(%error, entry = %name, "skipping unreadable queued input");
                return None;
            }
        };
        if let Err(error) = self.keys.purge(name).await {
            warn!(%error, entry = %name, "failed to dequeue input, leaving it queued");
            return None;
        }
        match serde_json::from_slice::<DoomKey>(&payload) {
            Ok(key) => Some(key),
            Err(error) => {
                warn!(%error, entry = %name, "discarding malformed queued input");
                None
            }
        }
    }
}
