//! # doom_net
//!
//! Transport adapters for the Doom harness.
//!
//! This crate provides:
//!
//! - [`subjects`]: NATS subject builders.
//! - [`codec`]: JSON serialisation helpers for bus payloads.
//! - [`connection`]: NATS connection management.
//! - [`bus`]: frame publisher and input subscriber on the message bus.
//! - [`store`]: the polling store seams ([`ObjectStore`], [`KeyQueue`]) with
//!   a filesystem backend ([`FsStore`]) and a JetStream backend
//!   ([`JetStreamStore`]).
//! - [`frame`]: PNG encoding of frames.
//! - [`error`]: network-layer error types.
//!
//! Adapters log and swallow send failures; none of them can stop the frame
//! loop.

pub mod bus;
pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod fs_store;
pub mod jetstream_store;
pub mod store;
pub mod subjects;

pub use bus::{FramePublisher, InputSubscriber};
pub use codec::{decode, encode};
pub use connection::NatsConnection;
pub use error::NetError;
pub use frame::encode_png;
pub use fs_store::FsStore;
pub use jetstream_store::JetStreamStore;
pub use store::{KeyQueue, ObjectStore, StoreError, forward_keys};
