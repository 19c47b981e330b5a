//! Framebuffer geometry and views.
//!
//! The module announces a finished frame by passing the offset of an RGBA
//! block inside its linear memory. [`Frame`] is a bounds-checked view of that
//! block, borrowed from memory and therefore unusable once the next step runs.
//! Transports receive a [`FrameBuffer`], an owned copy.

use bytes::Bytes;

/// Frame width in pixels.
pub const SCREEN_WIDTH: usize = 320 * 2;

/// Frame height in pixels.
pub const SCREEN_HEIGHT: usize = 200 * 2;

/// Bytes per RGBA pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// Size of one frame in bytes.
pub const FRAME_LEN: usize = SCREEN_WIDTH * SCREEN_HEIGHT * BYTES_PER_PIXEL;

/// A read-only view of one frame inside simulation memory.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pixels: &'a [u8],
}

impl<'a> Frame<'a> {
    /// View the frame starting at `offset`, or `None` if the block does not
    /// fit inside `memory`.
    #[must_use]
    pub fn at(memory: &'a [u8], offset: usize) -> Option<Self> {
        let end = offset.checked_add(FRAME_LEN)?;
        memory.get(offset..end).map(|pixels| Self { pixels })
    }

    /// The RGBA pixels, row-major.
    #[must_use]
    pub fn pixels(&self) -> &'a [u8] {
        self.pixels
    }

    /// Copy the frame out of simulation memory.
    #[must_use]
    pub fn to_buffer(&self) -> FrameBuffer {
        FrameBuffer {
            pixels: Bytes::copy_from_slice(self.pixels),
        }
    }
}

/// An owned frame. Cloning shares the pixel storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    pixels: Bytes,
}

impl FrameBuffer {
    /// Wrap raw RGBA pixels, or `None` if the length is not one frame.
    #[must_use]
    pub fn from_pixels(pixels: impl Into<Bytes>) -> Option<Self> {
        let pixels = pixels.into();
        (pixels.len() == FRAME_LEN).then_some(Self { pixels })
    }

    /// The RGBA pixels, row-major.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Width in pixels, always [`SCREEN_WIDTH`].
    #[must_use]
    pub fn width(&self) -> u32 {
        SCREEN_WIDTH as u32
    }

    /// Height in pixels, always [`SCREEN_HEIGHT`].
    #[must_use]
    pub fn height(&self) -> u32 {
        SCREEN_HEIGHT as u32
    }
}
