//! # doom_core
//!
//! Shared vocabulary for the Doom harness.
//!
//! This crate provides:
//!
//! - [`key`]: input events, their wire form, and browser key translation.
//! - [`screen`]: framebuffer dimensions, the bounds-checked [`Frame`] view
//!   and the owned [`FrameBuffer`] copy handed to transports.
//! - [`checkpoint`]: the `{snapshot, timestamp}` checkpoint and its
//!   deflate + base64 codec.
//! - [`error`]: codec error types.

pub mod checkpoint;
pub mod error;
pub mod key;
pub mod screen;

pub use checkpoint::Checkpoint;
pub use error::CodecError;
pub use key::{DoomKey, InputSink, KeyEvent};
pub use screen::{Frame, FrameBuffer};
