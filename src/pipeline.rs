//! The per-frame control loop.
//!
//! Each iteration: read a frame, detect, alert on target-class detections above
//! the threshold, annotate, record, present, handle keys, then time the
//! iteration. The loop ends on quit, interrupt, source exhaustion or device
//! failure. Recorder, display and alert worker are closed on every exit path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::alert::{AlertEvent, AlertHandle, AlertStats};
use crate::annotate::{Annotator, OverlayStats};
use crate::detect::{Detection, DetectorBackend};
use crate::display::{ControlKey, Display, KeyWait};
use crate::error::SourceError;
use crate::frame::Frame;
use crate::rate::FrameRateEstimator;
use crate::record::RecordingSink;
use crate::source::FrameSource;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Quit key.
    Quit,
    /// Ctrl-C or another shutdown request.
    Interrupted,
    /// Last image processed or end of video.
    Exhausted,
    /// A live device stopped delivering frames.
    DeviceFailure,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    pub detections_drawn: u64,
    pub alert_requests: u64,
    pub snapshots: u64,
    pub alerts: AlertStats,
    pub average_fps: f64,
    pub stop_reason: StopReason,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineOptions {
    /// Draw and alert only when `confidence > threshold`.
    pub threshold: f32,
    pub target_class: String,
    pub stream_key_wait: Duration,
    pub snapshot_path: PathBuf,
    pub frame_rate_window: usize,
}

pub struct Pipeline {
    source: FrameSource,
    detector: Box<dyn DetectorBackend>,
    annotator: Annotator,
    alerts: Option<AlertHandle>,
    recorder: Option<Box<dyn RecordingSink>>,
    display: Box<dyn Display>,
    estimator: FrameRateEstimator,
    options: PipelineOptions,
    shutdown: Arc<AtomicBool>,
    counters: Counters,
}

#[derive(Default)]
struct Counters {
    frames: u64,
    detections_drawn: u64,
    alert_requests: u64,
    snapshots: u64,
}

impl Pipeline {
    pub fn new(
        source: FrameSource,
        detector: Box<dyn DetectorBackend>,
        annotator: Annotator,
        alerts: AlertHandle,
        display: Box<dyn Display>,
        options: PipelineOptions,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            detector,
            annotator,
            alerts: Some(alerts),
            recorder: None,
            display,
            estimator: FrameRateEstimator::new(options.frame_rate_window),
            options,
            shutdown,
            counters: Counters::default(),
        }
    }

    pub fn with_recorder(mut self, recorder: Box<dyn RecordingSink>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Runs until a stop condition. Errors from the detector, recorder or
    /// display end the run after cleanup.
    pub fn run(mut self) -> Result<RunSummary> {
        log::info!(
            "Pipeline: {} with detector {}, threshold {:.2}, target class {:?}",
            self.source.label(),
            self.detector.name(),
            self.options.threshold,
            self.options.target_class
        );
        let outcome = self.drive();
        let alerts = self.close();
        let stop_reason = outcome?;

        let summary = RunSummary {
            frames: self.counters.frames,
            detections_drawn: self.counters.detections_drawn,
            alert_requests: self.counters.alert_requests,
            snapshots: self.counters.snapshots,
            alerts,
            average_fps: self.estimator.current_rate(),
            stop_reason,
        };
        log::info!("Average pipeline FPS: {:.2}", summary.average_fps);
        log::info!(
            "Pipeline: stopped ({:?}) after {} frames, {} detections drawn, alerts sent {} / duplicate {} / failed {} / no fix {}",
            summary.stop_reason,
            summary.frames,
            summary.detections_drawn,
            summary.alerts.sent,
            summary.alerts.duplicates,
            summary.alerts.failed,
            summary.alerts.no_fix
        );
        Ok(summary)
    }

    fn drive(&mut self) -> Result<StopReason> {
        let streaming = self.source.kind().is_streaming();
        let key_wait = if streaming {
            KeyWait::Bounded(self.options.stream_key_wait)
        } else {
            KeyWait::Indefinite
        };
        let mut last_health_log = Instant::now();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(StopReason::Interrupted);
            }
            let started = Instant::now();

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    if streaming {
                        log::info!("Pipeline: reached the end of {}", self.source.label());
                    } else {
                        log::info!("Pipeline: all images have been processed");
                    }
                    return Ok(StopReason::Exhausted);
                }
                Err(err) if err.downcast_ref::<SourceError>().is_some() => {
                    log::error!("Pipeline: {:#}", err);
                    return Ok(StopReason::DeviceFailure);
                }
                Err(err) => return Err(err),
            };

            let frame = self.process(frame, streaming)?;

            if let Some(recorder) = self.recorder.as_mut() {
                recorder.write(&frame)?;
            }
            self.display.present(&frame)?;
            self.counters.frames += 1;

            match self.display.poll_key(key_wait) {
                Some(ControlKey::Quit) => return Ok(StopReason::Quit),
                Some(ControlKey::Pause) => {
                    log::info!("Pipeline: paused, press any key to continue");
                    if self.display.poll_key(KeyWait::Indefinite) == Some(ControlKey::Quit) {
                        return Ok(StopReason::Quit);
                    }
                }
                Some(ControlKey::Snapshot) => self.snapshot(&frame),
                Some(ControlKey::Other(_)) | None => {}
            }

            if let Err(rejected) = self.estimator.record_duration(started.elapsed()) {
                log::debug!("Pipeline: frame time sample skipped: {:?}", rejected);
            }

            if streaming && last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!(
                    "Pipeline: {} frames, {:.2} fps, {} alert requests",
                    self.counters.frames,
                    self.estimator.current_rate(),
                    self.counters.alert_requests
                );
                last_health_log = Instant::now();
            }
        }
    }

    /// Detection, alert hand-off and annotation for one frame.
    fn process(&mut self, frame: Frame, streaming: bool) -> Result<Frame> {
        let detections = self.detector.detect(&frame)?;
        let drawn: Vec<Detection> = detections
            .into_iter()
            .filter(|d| d.clears(self.options.threshold))
            .collect();

        let labels = self.annotator.labels();
        for detection in &drawn {
            if labels.is_class(detection.class_index, &self.options.target_class) {
                self.counters.alert_requests += 1;
                if let Some(alerts) = self.alerts.as_mut() {
                    alerts.submit(AlertEvent {
                        label: labels.name(detection.class_index).into_owned(),
                        confidence: detection.confidence,
                        frame_sequence: frame.sequence(),
                    });
                }
            }
        }
        self.counters.detections_drawn += drawn.len() as u64;

        let stats = OverlayStats {
            frame_rate: streaming.then(|| self.estimator.current_rate()),
            object_count: drawn.len(),
        };
        Ok(self.annotator.annotate(frame, &drawn, &stats))
    }

    fn snapshot(&mut self, frame: &Frame) {
        let path = &self.options.snapshot_path;
        match frame.image().save(path) {
            Ok(()) => {
                self.counters.snapshots += 1;
                log::info!("Pipeline: snapshot written to {}", path.display());
            }
            Err(err) => log::warn!("Pipeline: snapshot to {} failed: {}", path.display(), err),
        }
    }

    fn close(&mut self) -> AlertStats {
        if let Some(mut recorder) = self.recorder.take() {
            if let Err(err) = recorder.finish() {
                log::error!("Pipeline: closing the recording failed: {:#}", err);
            }
        }
        if let Err(err) = self.display.close() {
            log::warn!("Pipeline: closing the display failed: {:#}", err);
        }
        self.alerts
            .take()
            .map(AlertHandle::finish)
            .unwrap_or_default()
    }
}
