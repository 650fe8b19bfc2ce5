//! Frame sources.
//!
//! A `SourceDescriptor` names where frames come from; `FrameSource` produces
//! them on demand. Supported inputs:
//! - a single image file or a directory of images
//! - a video file (feature: ingest-ffmpeg)
//! - a USB camera `usb<N>` or camera module `picamera<N>` (feature: ingest-v4l2)
//! - a synthetic pattern `stub://[frames]` for bench runs
//!
//! When a target resolution is configured every frame is resized to it before
//! it leaves the source.

mod still;
mod synthetic;
#[cfg(feature = "ingest-ffmpeg")]
mod video_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Result;
use image::RgbImage;
use regex::Regex;

use crate::error::{ConfigError, SourceError};
use crate::frame::{Frame, Resolution};
use still::StillSource;
use synthetic::SyntheticSource;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["avi", "mov", "mp4", "mkv", "wmv"];

/// Where frames come from, as parsed from the `--source` argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceDescriptor {
    Image(PathBuf),
    Folder(PathBuf),
    Video(PathBuf),
    Usb(u32),
    PiCamera(u32),
    /// Generated test pattern; `None` runs until interrupted.
    Synthetic(Option<u64>),
}

/// Coarse source category used by the loop for timing and overlay decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Image,
    Folder,
    Video,
    Usb,
    PiCamera,
    Synthetic,
}

impl SourceKind {
    /// Continuous sources: frame rate is shown, keys are polled briefly, recording is allowed.
    pub fn is_streaming(self) -> bool {
        !matches!(self, SourceKind::Image | SourceKind::Folder)
    }

    /// Live devices retry failed reads; files end on the first failure.
    pub fn is_live(self) -> bool {
        matches!(self, SourceKind::Usb | SourceKind::PiCamera)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Image => "image",
            SourceKind::Folder => "folder",
            SourceKind::Video => "video",
            SourceKind::Usb => "usb",
            SourceKind::PiCamera => "picamera",
            SourceKind::Synthetic => "synthetic",
        };
        f.write_str(name)
    }
}

impl SourceDescriptor {
    /// Classifies `raw`: existing directory, existing file with a supported
    /// extension, `usb<N>`, `picamera<N>`, or `stub://[frames]`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("stub://") {
            if rest.is_empty() {
                return Ok(Self::Synthetic(None));
            }
            let frames = rest
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidSource(raw.to_string()))?;
            return Ok(Self::Synthetic(Some(frames)));
        }

        let path = Path::new(raw);
        if !raw.is_empty() && path.is_dir() {
            return Ok(Self::Folder(path.to_path_buf()));
        }
        if path.is_file() {
            let ext = extension_of(path);
            if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                return Ok(Self::Image(path.to_path_buf()));
            }
            if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
                return Ok(Self::Video(path.to_path_buf()));
            }
            return Err(ConfigError::UnsupportedExtension(format!(".{}", ext)));
        }

        if let Some(index) = device_index(usb_pattern(), raw) {
            return Ok(Self::Usb(index));
        }
        if let Some(index) = device_index(picamera_pattern(), raw) {
            return Ok(Self::PiCamera(index));
        }
        Err(ConfigError::InvalidSource(raw.to_string()))
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Image(_) => SourceKind::Image,
            Self::Folder(_) => SourceKind::Folder,
            Self::Video(_) => SourceKind::Video,
            Self::Usb(_) => SourceKind::Usb,
            Self::PiCamera(_) => SourceKind::PiCamera,
            Self::Synthetic(_) => SourceKind::Synthetic,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.kind().is_streaming()
    }

    /// The camera module has no default capture size.
    pub fn requires_resolution(&self) -> bool {
        matches!(self, Self::PiCamera(_))
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(path) | Self::Folder(path) | Self::Video(path) => {
                write!(f, "{} {}", self.kind(), path.display())
            }
            Self::Usb(index) => write!(f, "usb{}", index),
            Self::PiCamera(index) => write!(f, "picamera{}", index),
            Self::Synthetic(Some(frames)) => write!(f, "stub://{}", frames),
            Self::Synthetic(None) => f.write_str("stub://"),
        }
    }
}

fn usb_pattern() -> &'static Regex {
    static USB_RE: OnceLock<Regex> = OnceLock::new();
    USB_RE.get_or_init(|| Regex::new(r"^usb(\d+)$").unwrap())
}

fn picamera_pattern() -> &'static Regex {
    static PICAMERA_RE: OnceLock<Regex> = OnceLock::new();
    PICAMERA_RE.get_or_init(|| Regex::new(r"^picamera(\d+)$").unwrap())
}

fn device_index(pattern: &Regex, raw: &str) -> Option<u32> {
    pattern.captures(raw)?.get(1)?.as_str().parse().ok()
}

pub(crate) fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// One read attempt from a backend.
pub(crate) enum Read {
    Frame(RgbImage),
    End,
    Failed(anyhow::Error),
}

/// Source of frames for the pipeline.
pub struct FrameSource {
    kind: SourceKind,
    label: String,
    backend: SourceBackend,
    resolution: Option<Resolution>,
    max_read_failures: u32,
    consecutive_failures: u32,
    frames_read: u64,
    finished: bool,
}

enum SourceBackend {
    Still(StillSource),
    Synthetic(SyntheticSource),
    Scripted(VecDeque<Option<RgbImage>>),
    #[cfg(feature = "ingest-ffmpeg")]
    Video(video_ffmpeg::FfmpegVideoSource),
    #[cfg(feature = "ingest-v4l2")]
    Camera(v4l2::V4l2Source),
}

impl FrameSource {
    /// Opens the source. Device and decoder setup happen here, so failures
    /// surface before the loop starts.
    pub fn open(
        descriptor: &SourceDescriptor,
        resolution: Option<Resolution>,
        max_read_failures: u32,
    ) -> Result<Self> {
        let backend = match descriptor {
            SourceDescriptor::Image(path) => SourceBackend::Still(StillSource::single(path)),
            SourceDescriptor::Folder(path) => SourceBackend::Still(StillSource::folder(path)?),
            SourceDescriptor::Synthetic(frames) => {
                SourceBackend::Synthetic(SyntheticSource::new(*frames))
            }
            SourceDescriptor::Video(path) => open_video(path)?,
            SourceDescriptor::Usb(index) | SourceDescriptor::PiCamera(index) => {
                open_camera(*index, resolution)?
            }
        };
        let source = Self {
            kind: descriptor.kind(),
            label: descriptor.to_string(),
            backend,
            resolution,
            max_read_failures: max_read_failures.max(1),
            consecutive_failures: 0,
            frames_read: 0,
            finished: false,
        };
        log::info!(
            "FrameSource: opened {} (resolution {})",
            source.label,
            resolution.map_or_else(|| "native".to_string(), |r| r.to_string())
        );
        Ok(source)
    }

    /// In-memory source; `None` entries are failed reads.
    pub fn scripted(
        kind: SourceKind,
        reads: Vec<Option<RgbImage>>,
        resolution: Option<Resolution>,
        max_read_failures: u32,
    ) -> Self {
        Self {
            kind,
            label: format!("scripted {}", kind),
            backend: SourceBackend::Scripted(reads.into()),
            resolution,
            max_read_failures: max_read_failures.max(1),
            consecutive_failures: 0,
            frames_read: 0,
            finished: false,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Next frame, or `Ok(None)` once the source is exhausted.
    ///
    /// File-backed sources end on their first failed read. Live devices retry
    /// and fail with `SourceError::DeviceRead` after `max_read_failures`
    /// consecutive failures.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            match self.read_backend() {
                Read::Frame(image) => {
                    self.consecutive_failures = 0;
                    let frame = Frame::new(image, self.frames_read);
                    self.frames_read += 1;
                    let frame = match self.resolution {
                        Some(target) => frame.resized(target),
                        None => frame,
                    };
                    return Ok(Some(frame));
                }
                Read::End => {
                    self.finished = true;
                    return Ok(None);
                }
                Read::Failed(err) if self.kind.is_live() => {
                    self.consecutive_failures += 1;
                    log::warn!(
                        "FrameSource: read from {} failed ({}/{}): {:#}",
                        self.label,
                        self.consecutive_failures,
                        self.max_read_failures,
                        err
                    );
                    if self.consecutive_failures >= self.max_read_failures {
                        self.finished = true;
                        return Err(SourceError::DeviceRead {
                            device: self.label.clone(),
                            attempts: self.consecutive_failures,
                        }
                        .into());
                    }
                }
                Read::Failed(err) => {
                    log::warn!("FrameSource: {} stopped: {:#}", self.label, err);
                    self.finished = true;
                    return Ok(None);
                }
            }
        }
    }

    fn read_backend(&mut self) -> Read {
        match &mut self.backend {
            SourceBackend::Still(source) => source.next_image(),
            SourceBackend::Synthetic(source) => source.next_image(),
            SourceBackend::Scripted(reads) => match reads.pop_front() {
                Some(Some(image)) => Read::Frame(image),
                Some(None) => Read::Failed(anyhow::anyhow!("scripted read failure")),
                None => Read::End,
            },
            #[cfg(feature = "ingest-ffmpeg")]
            SourceBackend::Video(source) => source.next_image(),
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::Camera(source) => source.next_image(),
        }
    }
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_video(path: &Path) -> Result<SourceBackend> {
    Ok(SourceBackend::Video(video_ffmpeg::FfmpegVideoSource::open(
        path,
    )?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_video(_path: &Path) -> Result<SourceBackend> {
    Err(ConfigError::FeatureDisabled {
        what: "video file ingestion",
        feature: "ingest-ffmpeg",
    }
    .into())
}

#[cfg(feature = "ingest-v4l2")]
fn open_camera(index: u32, resolution: Option<Resolution>) -> Result<SourceBackend> {
    let mut config = v4l2::V4l2Config {
        device: format!("/dev/video{}", index),
        ..v4l2::V4l2Config::default()
    };
    if let Some(resolution) = resolution {
        config.width = resolution.width;
        config.height = resolution.height;
    }
    let mut source = v4l2::V4l2Source::new(config);
    source.connect()?;
    Ok(SourceBackend::Camera(source))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_camera(_index: u32, _resolution: Option<Resolution>) -> Result<SourceBackend> {
    Err(ConfigError::FeatureDisabled {
        what: "camera capture",
        feature: "ingest-v4l2",
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_patterns() {
        assert_eq!(SourceDescriptor::parse("usb0"), Ok(SourceDescriptor::Usb(0)));
        assert_eq!(
            SourceDescriptor::parse("picamera12"),
            Ok(SourceDescriptor::PiCamera(12))
        );
        assert_eq!(
            SourceDescriptor::parse("stub://25"),
            Ok(SourceDescriptor::Synthetic(Some(25)))
        );
        assert!(matches!(
            SourceDescriptor::parse("usb"),
            Err(ConfigError::InvalidSource(_))
        ));
        assert!(matches!(
            SourceDescriptor::parse("/no/such/clip.mp4"),
            Err(ConfigError::InvalidSource(_))
        ));
    }

    #[test]
    fn files_are_classified_by_extension() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let still = dir.path().join("trail.JPG");
        let clip = dir.path().join("night.mkv");
        let notes = dir.path().join("notes.txt");
        for path in [&still, &clip, &notes] {
            std::fs::write(path, b"x")?;
        }
        assert_eq!(
            SourceDescriptor::parse(still.to_str().unwrap()),
            Ok(SourceDescriptor::Image(still.clone()))
        );
        assert_eq!(
            SourceDescriptor::parse(clip.to_str().unwrap()),
            Ok(SourceDescriptor::Video(clip.clone()))
        );
        assert_eq!(
            SourceDescriptor::parse(notes.to_str().unwrap()),
            Err(ConfigError::UnsupportedExtension(".txt".into()))
        );
        assert_eq!(
            SourceDescriptor::parse(dir.path().to_str().unwrap()),
            Ok(SourceDescriptor::Folder(dir.path().to_path_buf()))
        );
        Ok(())
    }

    #[test]
    fn streaming_kinds() {
        assert!(!SourceKind::Image.is_streaming());
        assert!(!SourceKind::Folder.is_streaming());
        assert!(SourceKind::Video.is_streaming());
        assert!(SourceKind::PiCamera.is_streaming());
        assert!(SourceKind::Usb.is_live());
        assert!(!SourceKind::Video.is_live());
    }

    #[test]
    fn frames_are_resized_to_the_target() -> Result<()> {
        let mut source = FrameSource::scripted(
            SourceKind::Video,
            vec![Some(RgbImage::new(64, 48))],
            Some(Resolution::new(32, 16)),
            3,
        );
        let frame = source.next_frame()?.expect("one frame");
        assert_eq!(frame.resolution(), Resolution::new(32, 16));
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn video_ends_on_first_failed_read() -> Result<()> {
        let mut source = FrameSource::scripted(
            SourceKind::Video,
            vec![Some(RgbImage::new(4, 4)), None, Some(RgbImage::new(4, 4))],
            None,
            3,
        );
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn camera_fails_after_consecutive_read_errors() -> Result<()> {
        let mut source = FrameSource::scripted(
            SourceKind::Usb,
            vec![None, Some(RgbImage::new(4, 4)), None, None, None],
            None,
            3,
        );
        // One failure then a good frame resets the counter.
        assert!(source.next_frame()?.is_some());
        let err = source.next_frame().unwrap_err();
        assert_eq!(
            err.downcast_ref::<SourceError>(),
            Some(&SourceError::DeviceRead {
                device: "scripted usb".into(),
                attempts: 3
            })
        );
        Ok(())
    }

    #[cfg(not(feature = "ingest-ffmpeg"))]
    #[test]
    fn video_without_decoder_feature_is_a_config_error() -> Result<()> {
        let file = tempfile::Builder::new().suffix(".mp4").tempfile()?;
        let descriptor = SourceDescriptor::parse(file.path().to_str().unwrap())?;
        let err = FrameSource::open(&descriptor, None, 3).err().expect("disabled");
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::FeatureDisabled { .. })
        ));
        Ok(())
    }
}
