//! Message-bus transport.
//!
//! Frames go out as PNG payloads on `<prefix>.frame`; input comes in as JSON
//! [`DoomKey`]s on `<prefix>.input`.

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use doom_core::{DoomKey, FrameBuffer, InputSink};

use crate::codec;
use crate::connection::NatsConnection;
use crate::error::NetError;
use crate::frame::encode_png;
use crate::subjects;

/// Publishes rendered frames on the bus.
#[derive(Debug, Clone)]
pub struct FramePublisher {
    connection: NatsConnection,
    subject: String,
}

impl FramePublisher {
    #[must_use]
    pub fn new(connection: NatsConnection, prefix: &str) -> Self {
        Self {
            connection,
            subject: subjects::frame(prefix),
        }
    }

    /// Publish one frame. Failures are logged and swallowed.
    pub async fn publish(&self, frame_id: u64, frame: &FrameBuffer) {
        if let Err(error) = self.try_publish(frame).await {
            warn!(%error, frame_id, subject = %self.subject, "failed to publish frame");
        }
    }

    async fn try_publish(&self, frame: &FrameBuffer) -> Result<(), NetError> {
        let png = encode_png(frame)?;
        self.connection.publish_bytes(&self.subject, png).await
    }
}

/// Forwards input events from the bus into an [`InputSink`].
pub struct InputSubscriber;

impl InputSubscriber {
    /// Subscribe to `<prefix>.input` and forward every well-formed event to
    /// `sink` until the subscription ends. Malformed messages are logged and
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Subscribe`] if the subscription cannot be made.
    pub async fn spawn<S>(
        connection: &NatsConnection,
        prefix: &str,
        sink: S,
    ) -> Result<JoinHandle<()>, NetError>
    where
        S: InputSink + 'static,
    {
        let subject = subjects::input(prefix);
        let mut subscriber = connection.subscribe(&subject).await?;
        info!(subject = %subject, "listening for input");

        Ok(tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                match parse_input(&message.payload) {
                    Ok(key) => sink.send_key(key),
                    Err(error) => warn!(%error, subject = %message.subject, "skipping malformed input"),
                }
            }
            debug!("input subscription closed");
        }))
    }
}

/// Publish one input event to `<prefix>.input`.
///
/// # Errors
///
/// Returns [`NetError`] if encoding or publishing fails.
pub async fn publish_key(
    connection: &NatsConnection,
    prefix: &str,
    key: &DoomKey,
) -> Result<(), NetError> {
    connection.publish(&subjects::input(prefix), key).await
}

fn parse_input(payload: &[u8]) -> Result<DoomKey, NetError> {
    codec::decode(payload)
}
