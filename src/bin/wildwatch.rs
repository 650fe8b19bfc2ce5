//! wildwatch - camera detection loop with GPS-keyed SMS alerts.
//!
//! Reads frames from the configured source, runs the detector, draws detections
//! above the threshold and, for the target class, sends one SMS per distinct
//! location. Device wiring (ports, number, labels) comes from the TOML config.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use wildwatch::config::DEFAULT_THRESHOLD;
use wildwatch::detect::open_backend;
use wildwatch::error::config_error;
use wildwatch::record::open_recorder;
use wildwatch::{
    AlertHandle, Annotator, ConsoleDisplay, DeviceConfig, Display, FrameSource, Pipeline,
    PipelineOptions, RunConfig, RunSummary, StopReason,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Wildlife detection loop with GPS-keyed SMS alerts")]
struct Args {
    /// Detection model: a YOLOv8 .onnx file or a .jsonl detection replay.
    #[arg(long, env = "WILDWATCH_MODEL")]
    model: PathBuf,

    /// Image file, image folder, video file, usb<N> or picamera<N>.
    #[arg(long, env = "WILDWATCH_SOURCE")]
    source: String,

    /// Minimum confidence; detections must score strictly above it.
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    thresh: f32,

    /// Resize frames to WxH (e.g. 640x480). Required for --record and picamera.
    #[arg(long)]
    resolution: Option<String>,

    /// Record the annotated stream (video and camera sources only).
    #[arg(long)]
    record: bool,

    /// Device configuration file (TOML). Falls back to WILDWATCH_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not read control keys from stdin.
    #[arg(long, env = "WILDWATCH_HEADLESS")]
    headless: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args) {
        Ok(summary) if summary.stop_reason == StopReason::DeviceFailure => ExitCode::from(2),
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            match config_error(&err) {
                Some(cfg) => log::error!("configuration error: {}", cfg),
                None => log::error!("{:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<RunSummary> {
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .expect("error setting Ctrl-C handler");
    }

    let run_cfg = RunConfig::new(
        &args.model,
        &args.source,
        args.thresh,
        args.resolution.as_deref(),
        args.record,
    )?;
    let device = DeviceConfig::load(args.config.as_deref())?;

    let mut detector = open_backend(&run_cfg.model, &device.detector)?;
    detector.warm_up()?;
    let annotator = Annotator::with_font(device.labels.clone(), device.display.font_path.as_deref())?;
    let source = FrameSource::open(&run_cfg.source, run_cfg.resolution, device.max_read_failures)?;
    let alerts = AlertHandle::from_config(&device, Arc::clone(&shutdown))?;

    let display: Box<dyn Display> = if args.headless {
        Box::new(
            ConsoleDisplay::headless(device.display.preview_path.clone())
                .with_shutdown(Arc::clone(&shutdown)),
        )
    } else {
        log::info!("keys: q + Enter quits, s pauses, p saves a snapshot");
        Box::new(
            ConsoleDisplay::interactive(device.display.preview_path.clone())?
                .with_shutdown(Arc::clone(&shutdown)),
        )
    };

    let options = PipelineOptions {
        threshold: run_cfg.threshold,
        target_class: device.target_class.clone(),
        stream_key_wait: device.display.stream_key_wait,
        snapshot_path: device.display.snapshot_path.clone(),
        frame_rate_window: device.frame_rate_window,
    };
    let mut pipeline = Pipeline::new(
        source,
        detector,
        annotator,
        alerts,
        display,
        options,
        Arc::clone(&shutdown),
    );
    // Opened last so an earlier setup failure leaves no truncated file behind.
    if let (true, Some(resolution)) = (run_cfg.record, run_cfg.resolution) {
        pipeline = pipeline.with_recorder(open_recorder(&device.recording, resolution)?);
    }

    pipeline.run()
}
