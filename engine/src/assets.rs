use std::path::Path;

use anyhow::{Context, Result};

/// Decoded RGBA8 pixels, ready for the texture upload path.
#[derive(Clone, Debug)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ImageData {
    pub fn load(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("failed to decode texture `{}`", path.display()))?
            .into_rgba8();

        let (width, height) = image.dimensions();
        Ok(Self {
            width,
            height,
            pixels: image.into_raw(),
        })
    }

    /// 1x1 opaque white, used when no texture is configured so the
    /// pipeline layout stays the same either way.
    pub fn white() -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: vec![0xff, 0xff, 0xff, 0xff],
        }
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}
