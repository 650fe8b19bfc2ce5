//! gps_probe - print fixes from the GPS receiver.
//!
//! With `--beacon`, also send the current location by SMS whenever it changes,
//! pausing between fixes. Useful to check the antenna, the receiver and the
//! modem before a deployment.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use wildwatch::alert::{open_dispatcher, AlertOutcome, NoFixReason};
use wildwatch::serial::SerialChannel;
use wildwatch::{
    AlertCoordinator, AlertEvent, AlertPolicy, DeviceConfig, NmeaReceiver, PositionReader,
};

const BEACON_TEMPLATE: &str = "Current location: {location}";

#[derive(Parser, Debug)]
#[command(author, version, about = "Print GPS fixes; optionally send them by SMS")]
struct Args {
    /// Device configuration file (TOML). Falls back to WILDWATCH_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Receiver port; overrides the configured gps.port.
    #[arg(long)]
    port: Option<String>,

    /// Send the location through the modem whenever it changes.
    #[arg(long)]
    beacon: bool,

    /// Pause after each beacon fix.
    #[arg(long, default_value_t = 10)]
    interval_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .expect("error setting Ctrl-C handler");
    }

    let mut device = DeviceConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        device.gps.port = port;
    }
    let channel = SerialChannel::open(&device.gps.port, device.gps.baud, device.gps.read_timeout)?;
    log::info!("gps_probe reading {}", device.gps.port);
    let mut receiver = NmeaReceiver::new(channel);

    if !args.beacon {
        while !shutdown.load(Ordering::SeqCst) {
            match receiver.poll_fix() {
                Ok(Some(fix)) => println!(
                    "Latitude: {:.6}, Longitude: {:.6}{}",
                    fix.latitude,
                    fix.longitude,
                    if fix.is_usable() { "" } else { " (no fix)" }
                ),
                Ok(None) => {}
                Err(err) => {
                    log::warn!("gps_probe: {:#}", err);
                    break;
                }
            }
        }
        log::info!(
            "gps_probe: {} lines read, {} skipped",
            receiver.lines_read(),
            receiver.lines_skipped()
        );
        return Ok(());
    }

    let mut coordinator = AlertCoordinator::new(
        Box::new(receiver),
        open_dispatcher(&device.modem)?,
        AlertPolicy {
            message_template: BEACON_TEMPLATE.to_string(),
            retry_failed: device.alerts.retry_failed,
            fix_timeout: device.gps.fix_timeout,
        },
        Arc::clone(&shutdown),
    );
    let interval = Duration::from_secs(args.interval_secs);
    let mut sequence = 0u64;
    while !shutdown.load(Ordering::SeqCst) {
        let event = AlertEvent {
            label: "beacon".to_string(),
            confidence: 1.0,
            frame_sequence: sequence,
        };
        sequence += 1;
        match coordinator.handle(&event) {
            AlertOutcome::Sent(key) => println!("Location sent: {}", key),
            AlertOutcome::Duplicate(key) => println!("Current location: {}", key),
            AlertOutcome::SendFailed(key) => println!("Sending {} failed", key),
            AlertOutcome::NoFix(NoFixReason::TimedOut) => {
                println!("No fix yet");
                continue;
            }
            AlertOutcome::NoFix(_) => break,
        }
        sleep_unless_stopped(interval, &shutdown);
    }

    let stats = coordinator.stats();
    log::info!(
        "gps_probe: {} sent, {} unchanged, {} failed",
        stats.sent,
        stats.duplicates,
        stats.failed
    );
    Ok(())
}

fn sleep_unless_stopped(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(200)));
    }
}
