//! Screenshot decoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub const FALLBACK_WIDTH: u32 = 1080;
pub const FALLBACK_HEIGHT: u32 = 2400;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Width and height from the IHDR chunk of a PNG.
pub fn png_dimensions(png: &[u8]) -> Option<(u32, u32)> {
    if png.len() < 24 || !png.starts_with(PNG_SIGNATURE) || &png[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(png[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(png[20..24].try_into().ok()?);
    Some((width, height))
}

/// A decoded screenshot ready for the planner.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub base64: String,
    pub width: u32,
    pub height: u32,
}

impl Screenshot {
    /// `None` for empty or non-PNG output, which is what secure surfaces
    /// (payment pages, lock screens) produce.
    pub fn from_png(png: &[u8]) -> Option<Self> {
        let (width, height) = png_dimensions(png)?;
        Some(Self {
            base64: STANDARD.encode(png),
            width,
            height,
        })
    }
}
