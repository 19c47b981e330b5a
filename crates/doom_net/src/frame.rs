//! PNG encoding of frames.

use bytes::Bytes;
use png::{BitDepth, ColorType, Encoder};

use doom_core::FrameBuffer;

use crate::error::NetError;

/// Encode an RGBA frame as an 8-bit PNG.
///
/// # Errors
///
/// Returns [`NetError::Png`] if the encoder rejects the image.
pub fn encode_png(frame: &FrameBuffer) -> Result<Bytes, NetError> {
    let mut out = Vec::with_capacity(frame.pixels().len() / 4);
    let mut encoder = Encoder::new(&mut out, frame.width(), frame.height());
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(frame.pixels())?;
    writer.finish()?;
    Ok(Bytes::from(out))
}
