//! V4L2 capture for USB cameras and the camera module.
//!
//! The device is asked for RGB24 first; drivers that refuse get YUYV or MJPEG
//! and frames are normalised to RGB in memory.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::Read;

const PREFERRED_FOURCCS: [&[u8; 4]; 3] = [b"RGB3", b"YUYV", b"MJPG"];

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Requested capture rate; 0 leaves the driver default.
    pub target_fps: u32,
    /// Mmap buffers queued with the driver.
    pub buffers: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            target_fps: 0,
            buffers: 4,
        }
    }
}

pub struct V4l2Source {
    config: V4l2Config,
    state: Option<V4l2State>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Rgb24,
        }
    }

    /// Opens the device, negotiates a pixel format and starts streaming.
    pub fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;

        let mut negotiated = None;
        for fourcc in PREFERRED_FOURCCS {
            let mut format = device.format().context("read v4l2 format")?;
            format.width = self.config.width;
            format.height = self.config.height;
            format.fourcc = v4l::FourCC::new(fourcc);
            match device.set_format(&format) {
                Ok(applied) => {
                    if let Some(pixel) = PixelFormat::from_fourcc(&applied.fourcc.repr) {
                        negotiated = Some((applied, pixel));
                        break;
                    }
                }
                Err(err) => {
                    log::debug!(
                        "V4l2Source: {} refused {}: {}",
                        self.config.device,
                        String::from_utf8_lossy(fourcc),
                        err
                    );
                }
            }
        }
        let (format, pixel) = negotiated.ok_or_else(|| {
            anyhow!(
                "{} offers none of RGB3, YUYV, MJPG at {}x{}",
                self.config.device,
                self.config.width,
                self.config.height
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        if (format.width, format.height) != (self.config.width, self.config.height) {
            log::warn!(
                "V4l2Source: {} delivers {}x{} instead of {}x{}",
                self.config.device,
                format.width,
                format.height,
                self.config.width,
                self.config.height
            );
        }
        self.active_width = format.width;
        self.active_height = format.height;
        self.format = pixel;

        let buffers = self.config.buffers.max(1);
        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, buffers)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    pub(crate) fn next_image(&mut self) -> Read {
        match self.capture() {
            Ok(image) => Read::Frame(image),
            Err(err) => Read::Failed(err),
        }
    }

    fn capture(&mut self) -> Result<RgbImage> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (width, height, format) = (self.active_width, self.active_height, self.format);
        let pixels = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, meta) = fields
                .stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let data = if used == 0 { buf } else { &buf[..used] };
            normalize_to_rgb(data, width, height, format)
        })?;
        RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("captured frame does not match {}x{}", width, height))
    }
}
