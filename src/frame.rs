//! Transient frame layer.
//!
//! - `Frame`: RGB8 pixel buffer decoded from one wire message. Lives for a
//!   single pipeline pass and is zeroed when dropped.
//! - `decode_data_url` / `decode_image_bytes`: the only constructors used by
//!   the connection handler.
//!
//! Frames are never written to disk, logged, or retained across messages.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::GenericImageView;
use zeroize::Zeroize;

/// Upper bound on encoded image bytes accepted from a single message.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// RGB channels per pixel.
pub const CHANNELS: usize = 3;

/// Decoded RGB8 frame, row-major, `width * height * 3` bytes.
///
/// No `Clone`: a frame is created per message and dropped after inference.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap an RGB8 buffer, validating its length against the dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Read-only pixel access for detector backends.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// RGB triple at (x, y). Panics on out-of-range coordinates.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }
}

impl std::fmt::Debug for Frame {
    // Pixel content is deliberately left out of debug output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

/// Decode a `data:<mime>;base64,<payload>` string into a frame.
///
/// The header is everything before the first comma and is not interpreted;
/// the image format is sniffed from the decoded bytes.
pub fn decode_data_url(message: &str) -> Result<Frame> {
    let (_header, payload) = message
        .split_once(',')
        .ok_or_else(|| anyhow!("data url has no ',' separator"))?;
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(anyhow!("data url payload is empty"));
    }
    // base64 expands 3 bytes to 4 characters.
    if payload.len() / 4 * 3 > MAX_IMAGE_BYTES {
        return Err(anyhow!(
            "data url payload exceeds {} byte limit",
            MAX_IMAGE_BYTES
        ));
    }
    let bytes = STANDARD
        .decode(payload)
        .context("decode base64 payload")?;
    decode_image_bytes(&bytes)
}

/// Decode encoded image bytes (JPEG or PNG) into an RGB8 frame.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<Frame> {
    if bytes.is_empty() {
        return Err(anyhow!("image payload is empty"));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(anyhow!(
            "image payload of {} bytes exceeds {} byte limit",
            bytes.len(),
            MAX_IMAGE_BYTES
        ));
    }
    let image = image::load_from_memory(bytes).context("decode image")?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Frame::from_rgb(rgb.into_raw(), width, height)
}
