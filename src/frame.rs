//! Frames flowing through the pipeline.
//!
//! A `Frame` is one RGB image plus its position in the stream. It is produced
//! by a frame source, consumed by the detector and annotator within a single
//! loop iteration, then dropped. Frames are not `Clone`: the iteration that
//! produced a frame owns it.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::ConfigError;

/// Width/height pair used for resize overrides and fixed sink geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ConfigError;

    /// Parses `WxH` (e.g. `640x480`). Both sides must be positive integers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidResolution(s.to_string());
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

/// One decoded RGB frame.
pub struct Frame {
    image: RgbImage,
    /// Zero-based index of this frame within its source.
    sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    /// Wraps packed RGB24 bytes. Fails when the buffer does not match the geometry.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let len = pixels.len();
        let image = RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
            anyhow!(
                "RGB frame length mismatch: {}x{} needs {} bytes, got {}",
                width,
                height,
                width as usize * height as usize * 3,
                len
            )
        })?;
        Ok(Self { image, sequence })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Returns the frame resized to `target`. A frame already at that size is returned as is.
    pub fn resized(self, target: Resolution) -> Self {
        if self.resolution() == target {
            return self;
        }
        let image = imageops::resize(&self.image, target.width, target.height, FilterType::Triangle);
        Self {
            image,
            sequence: self.sequence,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}
