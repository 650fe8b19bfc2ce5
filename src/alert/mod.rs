//! Position-keyed text alerts.
//!
//! `AlertCoordinator` owns the dedup state and drives the position reader and
//! the dispatcher. `AlertHandle` is what the frame loop holds: the coordinator
//! itself (inline), a worker thread owning it (background), or nothing.

mod coordinator;
mod dispatcher;
mod message;
mod worker;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;

pub use coordinator::{
    AlertCoordinator, AlertEvent, AlertOutcome, AlertPhase, AlertPolicy, AlertState, AlertStats,
    NoFixReason,
};
pub use dispatcher::{open_dispatcher, AlertDispatcher, AtModem, LogDispatcher, ModemTiming};
pub use message::{format_message, parse_alert_location};
pub use worker::{AlertWorker, Submission};

use crate::config::{AlertMode, DeviceConfig};
use crate::position::NmeaReceiver;
use crate::serial::SerialChannel;

pub enum AlertHandle {
    Inline(Box<AlertCoordinator>),
    Background(AlertWorker),
    Disabled,
}

impl AlertHandle {
    /// Wires the receiver and dispatcher from device configuration.
    pub fn from_config(config: &DeviceConfig, shutdown: Arc<AtomicBool>) -> Result<Self> {
        if config.alerts.mode == AlertMode::Disabled {
            log::info!("alerts disabled");
            return Ok(Self::Disabled);
        }
        let gps = SerialChannel::open(&config.gps.port, config.gps.baud, config.gps.read_timeout)?;
        log::info!("PositionReader: NMEA on {}", config.gps.port);
        let coordinator = AlertCoordinator::new(
            Box::new(NmeaReceiver::new(gps)),
            open_dispatcher(&config.modem)?,
            AlertPolicy {
                message_template: config.alerts.message_template.clone(),
                retry_failed: config.alerts.retry_failed,
                fix_timeout: config.gps.fix_timeout,
            },
            Arc::clone(&shutdown),
        );
        Self::with_mode(coordinator, config.alerts.mode, shutdown)
    }

    pub fn with_mode(
        coordinator: AlertCoordinator,
        mode: AlertMode,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        Ok(match mode {
            AlertMode::Inline => Self::Inline(Box::new(coordinator)),
            AlertMode::Background => Self::Background(AlertWorker::spawn(coordinator, shutdown)?),
            AlertMode::Disabled => Self::Disabled,
        })
    }

    /// Hands one eligible detection to the coordinator. Inline mode blocks
    /// until the fix wait and any dispatch are done.
    pub fn submit(&mut self, event: AlertEvent) {
        match self {
            Self::Inline(coordinator) => {
                coordinator.handle(&event);
            }
            Self::Background(worker) => {
                if worker.submit(event) == Submission::Coalesced {
                    log::trace!("alert request coalesced into pending one");
                }
            }
            Self::Disabled => {}
        }
    }

    pub fn finish(self) -> AlertStats {
        match self {
            Self::Inline(coordinator) => coordinator.stats(),
            Self::Background(worker) => worker.shutdown(),
            Self::Disabled => AlertStats::default(),
        }
    }
}
