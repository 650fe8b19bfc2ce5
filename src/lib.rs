//! Wildwatch
//!
//! A field sentry for wildlife: frames from a camera, stills or a video file go
//! through an object detector; when the target species is detected above the
//! confidence threshold the device reads its satellite position and sends one
//! SMS per distinct location.
//!
//! # Module Structure
//!
//! - `source`: frame sources (images, folders, video, USB camera, camera module)
//! - `detect`: detector backends (replayed detections, YOLOv8 ONNX)
//! - `annotate`: box, label and instrumentation overlays
//! - `position`: NMEA receiver and position fixes
//! - `alert`: dedup coordinator, AT modem dispatcher, background worker
//! - `record`: MJPEG/AVI recording of the annotated stream
//! - `display`: frame presentation and control keys
//! - `pipeline`: the per-frame control loop
//! - `config`: run and device configuration

pub mod alert;
pub mod annotate;
pub mod config;
pub mod detect;
pub mod display;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod position;
pub mod rate;
pub mod record;
pub mod serial;
pub mod source;

pub use alert::{
    AlertCoordinator, AlertDispatcher, AlertEvent, AlertHandle, AlertOutcome, AlertPolicy,
    AlertStats,
};
pub use annotate::{Annotator, OverlayStats};
pub use config::{AlertMode, DeviceConfig, RunConfig};
pub use detect::{BoundingBox, Detection, DetectorBackend, LabelMap};
pub use display::{ConsoleDisplay, ControlKey, Display, KeyWait};
pub use error::{ConfigError, SourceError};
pub use frame::{Frame, Resolution};
pub use pipeline::{Pipeline, PipelineOptions, RunSummary, StopReason};
pub use position::{LocationKey, NmeaReceiver, PositionFix, PositionReader};
pub use rate::FrameRateEstimator;
pub use record::RecordingSink;
pub use source::{FrameSource, SourceDescriptor, SourceKind};
