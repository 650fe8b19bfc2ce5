//! sms_probe - send one SMS through the modem and print its replies.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;

use wildwatch::alert::{AlertDispatcher, AtModem};
use wildwatch::serial::SerialChannel;
use wildwatch::DeviceConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Send a test SMS through the AT modem")]
struct Args {
    /// Device configuration file (TOML). Falls back to WILDWATCH_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Modem port; overrides the configured modem.port.
    #[arg(long)]
    port: Option<String>,

    /// Destination number; overrides the configured modem.destination.
    #[arg(long)]
    number: Option<String>,

    /// Message body.
    #[arg(long, default_value = "wildwatch modem test")]
    text: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let device = DeviceConfig::load(args.config.as_deref())?;
    let port = args
        .port
        .or(device.modem.port.clone())
        .ok_or_else(|| anyhow!("no modem port configured; pass --port"))?;
    let number = args
        .number
        .or(device.modem.destination.clone())
        .ok_or_else(|| anyhow!("no destination number configured; pass --number"))?;

    let channel = SerialChannel::open(&port, device.modem.baud, device.modem.read_timeout)?;
    let replies = channel.try_clone()?;
    let mut modem = AtModem::new(channel, &number, device.modem.timing)?.with_responses(replies);

    log::info!("sms_probe: sending to {} via {}", modem.destination(), port);
    let result = modem.send(&args.text);
    for reply in modem.last_replies() {
        println!("<<< {}", reply);
    }
    result?;
    println!("SMS sent: {}", args.text);
    Ok(())
}
