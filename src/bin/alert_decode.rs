//! alert_decode - extract coordinates from received alert texts.
//!
//! Reads one message per line on stdin and prints `{"latitude":..,"longitude":..}`
//! for each one that carries a position, e.g. to feed a map on the receiving side.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use wildwatch::alert::parse_alert_location;

#[derive(Parser, Debug)]
#[command(author, version, about = "Decode coordinates from received alert messages")]
struct Args {
    /// Also print an error object for lines without coordinates.
    #[arg(long)]
    strict: bool,
}

#[derive(Serialize)]
struct DecodedLocation {
    latitude: f64,
    longitude: f64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (line_no, line) in stdin.lock().lines().enumerate() {
        let line = line.context("read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_alert_location(&line) {
            Some((latitude, longitude)) => {
                let decoded = DecodedLocation {
                    latitude,
                    longitude,
                };
                writeln!(out, "{}", serde_json::to_string(&decoded)?)?;
            }
            None if args.strict => {
                let error = serde_json::json!({ "line": line_no + 1, "error": "no coordinates" });
                writeln!(out, "{}", error)?;
            }
            None => log::warn!("line {}: no coordinates found", line_no + 1),
        }
    }
    Ok(())
}
