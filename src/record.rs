//! Recording of the annotated stream.
//!
//! Only continuous sources with an explicit resolution may record; every frame
//! is written at the configured fixed rate, whatever the loop achieves.

use std::path::Path;

use anyhow::Result;

use crate::config::RecordingSettings;
use crate::frame::{Frame, Resolution};

pub trait RecordingSink {
    fn write(&mut self, frame: &Frame) -> Result<()>;
    /// Flushes and closes the container. Called once on every exit path.
    fn finish(&mut self) -> Result<()>;
}

/// Opens the MJPEG/AVI recorder at `settings.path`.
pub fn open_recorder(
    settings: &RecordingSettings,
    resolution: Resolution,
) -> Result<Box<dyn RecordingSink>> {
    open_ffmpeg(&settings.path, resolution, settings.fps)
}

#[cfg(feature = "record-ffmpeg")]
fn open_ffmpeg(path: &Path, resolution: Resolution, fps: u32) -> Result<Box<dyn RecordingSink>> {
    Ok(Box::new(ffmpeg_sink::FfmpegRecorder::create(path, resolution, fps)?))
}

#[cfg(not(feature = "record-ffmpeg"))]
fn open_ffmpeg(_path: &Path, _resolution: Resolution, _fps: u32) -> Result<Box<dyn RecordingSink>> {
    Err(crate::error::ConfigError::FeatureDisabled {
        what: "recording",
        feature: "record-ffmpeg",
    }
    .into())
}

#[cfg(feature = "record-ffmpeg")]
mod ffmpeg_sink {
    use std::path::{Path, PathBuf};

    use anyhow::{anyhow, bail, Context, Result};
    use ffmpeg_next as ffmpeg;
    use ffmpeg::util::format::pixel::Pixel;

    use super::RecordingSink;
    use crate::frame::{Frame, Resolution};

    pub(super) struct FfmpegRecorder {
        path: PathBuf,
        output: ffmpeg::format::context::Output,
        encoder: ffmpeg::encoder::Video,
        scaler: ffmpeg::software::scaling::Context,
        stream_index: usize,
        stream_time_base: ffmpeg::Rational,
        frame_time_base: ffmpeg::Rational,
        resolution: Resolution,
        frames_written: i64,
        finished: bool,
    }

    impl FfmpegRecorder {
        pub(super) fn create(path: &Path, resolution: Resolution, fps: u32) -> Result<Self> {
            ffmpeg::init().context("initialize ffmpeg")?;
            let fps = i32::try_from(fps.max(1)).context("recording fps out of range")?;
            let mut output = ffmpeg::format::output(&path)
                .with_context(|| format!("failed to create recording {}", path.display()))?;
            let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MJPEG)
                .ok_or_else(|| anyhow!("ffmpeg was built without an MJPEG encoder"))?;
            let global_header = output
                .format()
                .flags()
                .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

            let mut stream = output.add_stream(codec).context("add video stream")?;
            let stream_index = stream.index();
            let frame_time_base = ffmpeg::Rational::new(1, fps);

            let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
                .encoder()
                .video()
                .context("create MJPEG encoder")?;
            encoder.set_width(resolution.width);
            encoder.set_height(resolution.height);
            encoder.set_format(Pixel::YUVJ420P);
            encoder.set_time_base(frame_time_base);
            encoder.set_frame_rate(Some(ffmpeg::Rational::new(fps, 1)));
            if global_header {
                encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
            }
            let encoder = encoder.open_as(codec).context("open MJPEG encoder")?;
            stream.set_parameters(&encoder);
            stream.set_time_base(frame_time_base);

            output.write_header().context("write recording header")?;
            let stream_time_base = output
                .stream(stream_index)
                .map(|s| s.time_base())
                .unwrap_or(frame_time_base);

            let scaler = ffmpeg::software::scaling::context::Context::get(
                Pixel::RGB24,
                resolution.width,
                resolution.height,
                Pixel::YUVJ420P,
                resolution.width,
                resolution.height,
                ffmpeg::software::scaling::flag::Flags::BILINEAR,
            )
            .context("create recording scaler")?;

            log::info!(
                "Recorder: writing {} ({} MJPEG @ {} fps)",
                path.display(),
                resolution,
                fps
            );
            Ok(Self {
                path: path.to_path_buf(),
                output,
                encoder,
                scaler,
                stream_index,
                stream_time_base,
                frame_time_base,
                resolution,
                frames_written: 0,
                finished: false,
            })
        }

        fn drain(&mut self) -> Result<()> {
            let mut packet = ffmpeg::Packet::empty();
            while self.encoder.receive_packet(&mut packet).is_ok() {
                packet.set_stream(self.stream_index);
                packet.rescale_ts(self.frame_time_base, self.stream_time_base);
                packet
                    .write_interleaved(&mut self.output)
                    .context("write recording packet")?;
            }
            Ok(())
        }
    }

    impl RecordingSink for FfmpegRecorder {
        fn write(&mut self, frame: &Frame) -> Result<()> {
            if frame.resolution() != self.resolution {
                bail!(
                    "frame is {} but the recording is {}",
                    frame.resolution(),
                    self.resolution
                );
            }
            let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, self.resolution.width, self.resolution.height);
            let row_bytes = self.resolution.width as usize * 3;
            let stride = rgb.stride(0);
            let src = frame.image().as_raw();
            let dst = rgb.data_mut(0);
            for (row, chunk) in src.chunks_exact(row_bytes).enumerate() {
                dst[row * stride..row * stride + row_bytes].copy_from_slice(chunk);
            }

            let mut yuv = ffmpeg::frame::Video::empty();
            self.scaler.run(&rgb, &mut yuv).context("convert frame for recording")?;
            yuv.set_pts(Some(self.frames_written));
            self.encoder.send_frame(&yuv).context("encode recording frame")?;
            self.frames_written += 1;
            self.drain()
        }

        fn finish(&mut self) -> Result<()> {
            if self.finished {
                return Ok(());
            }
            self.finished = true;
            self.encoder.send_eof().context("flush recording encoder")?;
            self.drain()?;
            self.output.write_trailer().context("write recording trailer")?;
            log::info!(
                "Recorder: closed {} after {} frames",
                self.path.display(),
                self.frames_written
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[cfg(not(feature = "record-ffmpeg"))]
    #[test]
    fn recording_without_encoder_feature_is_a_config_error() {
        let settings = RecordingSettings {
            path: PathBuf::from("demo1.avi"),
            fps: 30,
        };
        let err = open_recorder(&settings, Resolution::new(640, 480))
            .err()
            .expect("feature disabled");
        assert!(matches!(
            err.downcast_ref::<crate::error::ConfigError>(),
            Some(crate::error::ConfigError::FeatureDisabled { feature: "record-ffmpeg", .. })
        ));
    }

    #[cfg(feature = "record-ffmpeg")]
    #[test]
    fn writes_a_short_clip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = RecordingSettings {
            path: dir.path().join("clip.avi"),
            fps: 30,
        };
        let mut sink = open_recorder(&settings, Resolution::new(64, 48))?;
        for seq in 0..3 {
            sink.write(&Frame::new(image::RgbImage::new(64, 48), seq))?;
        }
        assert!(sink.write(&Frame::new(image::RgbImage::new(32, 32), 3)).is_err());
        sink.finish()?;
        assert!(std::fs::metadata(PathBuf::from(&settings.path))?.len() > 0);
        Ok(())
    }
}
