//! NATS connection shared by the bus adapters and the JetStream store.

use async_nats::{ConnectOptions, Event};
use bytes::Bytes;
use tracing::{info, warn};

use crate::error::NetError;

/// Default NATS server URL.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// Client name the harness announces to the server.
pub const CLIENT_NAME: &str = "doom-harness";

/// One NATS client. Cloning shares the underlying connection.
#[derive(Debug, Clone)]
pub struct NatsConnection {
    client: async_nats::Client,
}

impl NatsConnection {
    /// Connect to `url`. Disconnects and reconnects after this point are
    /// logged; publishes made while disconnected are buffered by the client.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Connect`] if the first connection attempt fails.
    pub async fn connect_to(url: &str) -> Result<Self, NetError> {
        info!(url, "connecting to NATS");
        let client = ConnectOptions::new()
            .name(CLIENT_NAME)
            .event_callback(|event| async move { log_event(&event) })
            .connect(url)
            .await?;
        info!(url, "NATS connection established");
        Ok(Self { client })
    }

    #[must_use]
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Publish a JSON-encoded message to a subject.
    ///
    /// # Errors
    ///
    /// Returns [`NetError`] if encoding or publishing fails.
    pub async fn publish<T: serde::Serialize>(
        &self,
        subject: &str,
        message: &T,
    ) -> Result<(), NetError> {
        let payload = crate::codec::encode(message)?;
        self.publish_bytes(subject, payload.into()).await
    }

    /// Publish a raw payload to a subject.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Publish`] if publishing fails.
    pub async fn publish_bytes(&self, subject: &str, payload: Bytes) -> Result<(), NetError> {
        self.client.publish(subject.to_string(), payload).await?;
        Ok(())
    }

    /// Wait until everything published so far has reached the server.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Flush`] if the connection is gone.
    pub async fn flush(&self) -> Result<(), NetError> {
        self.client
            .flush()
            .await
            .map_err(|error| NetError::Flush(error.to_string()))
    }

    /// Subscribe to a subject.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Subscribe`] if the subscription fails.
    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber, NetError> {
        let sub = self.client.subscribe(subject.to_string()).await?;
        Ok(sub)
    }
}

fn log_event(event: &Event) {
    match event {
        Event::Connected => info!("NATS reconnected"),
        Event::Disconnected => warn!("NATS disconnected, buffering publishes"),
        other => warn!(event = %other, "NATS client event"),
    }
}
