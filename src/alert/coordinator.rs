//! Alert deduplication.
//!
//! For each alert-eligible detection the coordinator waits for a usable fix,
//! keys it to 6 decimals and sends a message only when the key differs from
//! the last alerted one. State lives for one run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::dispatcher::AlertDispatcher;
use super::message::format_message;
use crate::position::{LocationKey, PositionFix, PositionReader};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertPhase {
    Idle,
    AwaitingFix,
    Dispatching,
}

/// A detection of the target class that cleared the threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertEvent {
    pub label: String,
    pub confidence: f32,
    pub frame_sequence: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoFixReason {
    TimedOut,
    Shutdown,
    ReceiverClosed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlertOutcome {
    Sent(LocationKey),
    SendFailed(LocationKey),
    Duplicate(LocationKey),
    NoFix(NoFixReason),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlertStats {
    pub requested: u64,
    pub sent: u64,
    pub failed: u64,
    pub duplicates: u64,
    pub no_fix: u64,
    /// Background mode only: events folded into an already pending request.
    pub coalesced: u64,
}

/// The most recently alerted location.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlertState {
    last_key: Option<LocationKey>,
}

impl AlertState {
    pub fn last_key(&self) -> Option<&LocationKey> {
        self.last_key.as_ref()
    }

    pub fn is_duplicate(&self, key: &LocationKey) -> bool {
        self.last_key.as_ref() == Some(key)
    }

    fn record(&mut self, key: LocationKey) {
        self.last_key = Some(key);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AlertPolicy {
    pub message_template: String,
    /// Keep the previous key after a failed send so the next detection retries.
    pub retry_failed: bool,
    /// Bound on the fix wait; `None` waits until a fix or shutdown.
    pub fix_timeout: Option<Duration>,
}

pub struct AlertCoordinator {
    reader: Box<dyn PositionReader>,
    dispatcher: Box<dyn AlertDispatcher>,
    policy: AlertPolicy,
    state: AlertState,
    phase: AlertPhase,
    shutdown: Arc<AtomicBool>,
    stats: AlertStats,
}

impl AlertCoordinator {
    pub fn new(
        reader: Box<dyn PositionReader>,
        dispatcher: Box<dyn AlertDispatcher>,
        policy: AlertPolicy,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            reader,
            dispatcher,
            policy,
            state: AlertState::default(),
            phase: AlertPhase::Idle,
            shutdown,
            stats: AlertStats::default(),
        }
    }

    pub fn phase(&self) -> AlertPhase {
        self.phase
    }

    pub fn state(&self) -> &AlertState {
        &self.state
    }

    pub fn stats(&self) -> AlertStats {
        self.stats
    }

    pub(crate) fn note_coalesced(&mut self, count: u64) {
        self.stats.coalesced += count;
    }

    /// Runs one event through fix wait, dedup and dispatch. Always ends `Idle`.
    pub fn handle(&mut self, event: &AlertEvent) -> AlertOutcome {
        self.stats.requested += 1;
        self.enter(AlertPhase::AwaitingFix);
        let fix = match self.wait_for_fix() {
            Ok(fix) => fix,
            Err(reason) => {
                self.stats.no_fix += 1;
                self.enter(AlertPhase::Idle);
                log::warn!(
                    "AlertCoordinator: no usable fix for {} in frame {} ({:?}), alert skipped",
                    event.label,
                    event.frame_sequence,
                    reason
                );
                return AlertOutcome::NoFix(reason);
            }
        };

        self.enter(AlertPhase::Dispatching);
        let outcome = self.dispatch(event, fix.location_key());
        self.enter(AlertPhase::Idle);
        outcome
    }

    fn dispatch(&mut self, event: &AlertEvent, key: LocationKey) -> AlertOutcome {
        if self.state.is_duplicate(&key) {
            self.stats.duplicates += 1;
            log::debug!("AlertCoordinator: {} already alerted, suppressed", key);
            return AlertOutcome::Duplicate(key);
        }

        let text = format_message(&self.policy.message_template, &event.label, &key);
        match self.dispatcher.send(&text) {
            Ok(()) => {
                self.stats.sent += 1;
                log::info!(
                    "AlertCoordinator: alert sent via {} for {} ({:.0}%) at {}",
                    self.dispatcher.name(),
                    event.label,
                    event.confidence * 100.0,
                    key
                );
                self.state.record(key.clone());
                AlertOutcome::Sent(key)
            }
            Err(err) => {
                self.stats.failed += 1;
                log::error!(
                    "AlertCoordinator: alert for {} via {} failed: {:#}",
                    key,
                    self.dispatcher.name(),
                    err
                );
                if !self.policy.retry_failed {
                    self.state.record(key.clone());
                }
                AlertOutcome::SendFailed(key)
            }
        }
    }

    /// Polls until a usable fix; unusable and unparseable input is skipped.
    fn wait_for_fix(&mut self) -> Result<PositionFix, NoFixReason> {
        let started = Instant::now();
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(NoFixReason::Shutdown);
            }
            if let Some(limit) = self.policy.fix_timeout {
                if started.elapsed() >= limit {
                    return Err(NoFixReason::TimedOut);
                }
            }
            match self.reader.poll_fix() {
                Ok(Some(fix)) if fix.is_usable() => return Ok(fix),
                Ok(_) => {}
                Err(err) => {
                    log::warn!("AlertCoordinator: position receiver failed: {:#}", err);
                    return Err(NoFixReason::ReceiverClosed);
                }
            }
        }
    }

    fn enter(&mut self, phase: AlertPhase) {
        log::trace!("AlertCoordinator: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedFixes(VecDeque<Option<PositionFix>>);

    impl PositionReader for ScriptedFixes {
        fn poll_fix(&mut self) -> Result<Option<PositionFix>> {
            self.0.pop_front().ok_or_else(|| anyhow!("script exhausted"))
        }
    }

    #[derive(Clone, Default)]
    struct Outbox {
        sent: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl AlertDispatcher for Outbox {
        fn name(&self) -> &'static str {
            "outbox"
        }

        fn send(&mut self, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            if self.fail {
                Err(anyhow!("no network"))
            } else {
                Ok(())
            }
        }
    }

    fn fix(lat: f64, lon: f64) -> Option<PositionFix> {
        Some(PositionFix::new(lat, lon, true))
    }

    fn policy(retry_failed: bool) -> AlertPolicy {
        AlertPolicy {
            message_template: "{label} at {location}".into(),
            retry_failed,
            fix_timeout: None,
        }
    }

    fn event() -> AlertEvent {
        AlertEvent {
            label: "bear".into(),
            confidence: 0.93,
            frame_sequence: 1,
        }
    }

    fn coordinator(fixes: Vec<Option<PositionFix>>, outbox: &Outbox, retry: bool) -> AlertCoordinator {
        AlertCoordinator::new(
            Box::new(ScriptedFixes(fixes.into())),
            Box::new(outbox.clone()),
            policy(retry),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn skips_sentinel_and_noise_then_alerts() {
        let outbox = Outbox::default();
        let mut coordinator = coordinator(
            vec![None, fix(0.0, 0.0), Some(PositionFix::new(44.4, 26.1, false)), fix(44.4331071, 26.0584579)],
            &outbox,
            false,
        );
        let outcome = coordinator.handle(&event());
        assert!(matches!(outcome, AlertOutcome::Sent(_)));
        assert_eq!(coordinator.phase(), AlertPhase::Idle);
        assert_eq!(
            outbox.sent.lock().unwrap().as_slice(),
            ["bear at 44.433107,26.058458"]
        );
    }

    #[test]
    fn same_key_is_suppressed_until_location_changes() {
        let outbox = Outbox::default();
        let mut coordinator = coordinator(
            vec![fix(44.5, 26.1), fix(44.5, 26.1), fix(44.500_000_1, 26.1), fix(44.6, 26.1)],
            &outbox,
            false,
        );
        assert!(matches!(coordinator.handle(&event()), AlertOutcome::Sent(_)));
        assert!(matches!(coordinator.handle(&event()), AlertOutcome::Duplicate(_)));
        assert!(matches!(coordinator.handle(&event()), AlertOutcome::Duplicate(_)));
        assert!(matches!(coordinator.handle(&event()), AlertOutcome::Sent(_)));
        assert_eq!(outbox.sent.lock().unwrap().len(), 2);
        let stats = coordinator.stats();
        assert_eq!((stats.requested, stats.sent, stats.duplicates), (4, 2, 2));
    }

    #[test]
    fn failed_send_records_key_by_default() {
        let outbox = Outbox {
            fail: true,
            ..Outbox::default()
        };
        let mut coordinator = coordinator(vec![fix(1.0, 2.0), fix(1.0, 2.0)], &outbox, false);
        assert!(matches!(coordinator.handle(&event()), AlertOutcome::SendFailed(_)));
        assert!(matches!(coordinator.handle(&event()), AlertOutcome::Duplicate(_)));
        assert_eq!(coordinator.state().last_key().map(LocationKey::as_str), Some("1.000000,2.000000"));
    }

    #[test]
    fn retry_policy_leaves_state_untouched_on_failure() {
        let outbox = Outbox {
            fail: true,
            ..Outbox::default()
        };
        let mut coordinator = coordinator(vec![fix(1.0, 2.0), fix(1.0, 2.0)], &outbox, true);
        assert!(matches!(coordinator.handle(&event()), AlertOutcome::SendFailed(_)));
        assert!(coordinator.state().last_key().is_none());
        assert!(matches!(coordinator.handle(&event()), AlertOutcome::SendFailed(_)));
        assert_eq!(outbox.sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn receiver_loss_and_shutdown_end_the_wait() {
        let outbox = Outbox::default();
        let mut closed = coordinator(vec![None, None], &outbox, false);
        assert_eq!(
            closed.handle(&event()),
            AlertOutcome::NoFix(NoFixReason::ReceiverClosed)
        );

        let shutdown = Arc::new(AtomicBool::new(true));
        let mut stopped = AlertCoordinator::new(
            Box::new(ScriptedFixes(vec![fix(1.0, 1.0)].into())),
            Box::new(outbox.clone()),
            policy(false),
            shutdown,
        );
        assert_eq!(stopped.handle(&event()), AlertOutcome::NoFix(NoFixReason::Shutdown));
        assert!(outbox.sent.lock().unwrap().is_empty());
        assert!(stopped.state().last_key().is_none());
    }

    #[test]
    fn fix_timeout_bounds_the_wait() {
        struct Silent;
        impl PositionReader for Silent {
            fn poll_fix(&mut self) -> Result<Option<PositionFix>> {
                std::thread::sleep(Duration::from_millis(5));
                Ok(None)
            }
        }
        let mut coordinator = AlertCoordinator::new(
            Box::new(Silent),
            Box::new(Outbox::default()),
            AlertPolicy {
                fix_timeout: Some(Duration::from_millis(30)),
                ..policy(false)
            },
            Arc::new(AtomicBool::new(false)),
        );
        assert_eq!(
            coordinator.handle(&event()),
            AlertOutcome::NoFix(NoFixReason::TimedOut)
        );
        assert_eq!(coordinator.stats().no_fix, 1);
    }
}
