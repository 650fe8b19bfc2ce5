use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

use super::coordinator::{AlertCoordinator, AlertEvent, AlertStats};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// A request is already pending; its dedup check covers this detection.
    Coalesced,
    /// The worker is gone.
    Dropped,
}

/// Runs the coordinator on its own thread so the frame loop never waits on
/// the receiver or the modem. At most one request is pending at a time.
pub struct AlertWorker {
    sender: Option<SyncSender<AlertEvent>>,
    handle: Option<JoinHandle<AlertCoordinator>>,
    shutdown: Arc<AtomicBool>,
    coalesced: u64,
}

impl AlertWorker {
    pub fn spawn(mut coordinator: AlertCoordinator, shutdown: Arc<AtomicBool>) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<AlertEvent>(1);
        let handle = thread::Builder::new()
            .name("alert-worker".into())
            .spawn(move || {
                while let Ok(event) = receiver.recv() {
                    let outcome = coordinator.handle(&event);
                    log::debug!("AlertWorker: frame {} -> {:?}", event.frame_sequence, outcome);
                }
                coordinator
            })
            .context("spawn alert worker")?;
        log::info!("AlertWorker: started");
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            shutdown,
            coalesced: 0,
        })
    }

    pub fn submit(&mut self, event: AlertEvent) -> Submission {
        let Some(sender) = &self.sender else {
            return Submission::Dropped;
        };
        match sender.try_send(event) {
            Ok(()) => Submission::Queued,
            Err(TrySendError::Full(_)) => {
                self.coalesced += 1;
                Submission::Coalesced
            }
            Err(TrySendError::Disconnected(_)) => {
                log::error!("AlertWorker: worker thread is gone, alert dropped");
                Submission::Dropped
            }
        }
    }

    /// Stops the worker, cancelling any fix wait in progress, and returns its stats.
    pub fn shutdown(mut self) -> AlertStats {
        self.stop()
    }

    fn stop(&mut self) -> AlertStats {
        self.shutdown.store(true, Ordering::SeqCst);
        self.sender.take();
        let Some(handle) = self.handle.take() else {
            return AlertStats::default();
        };
        match handle.join() {
            Ok(mut coordinator) => {
                coordinator.note_coalesced(self.coalesced);
                log::info!("AlertWorker: stopped");
                coordinator.stats()
            }
            Err(_) => {
                log::error!("AlertWorker: worker thread panicked");
                AlertStats {
                    coalesced: self.coalesced,
                    ..AlertStats::default()
                }
            }
        }
    }
}

impl Drop for AlertWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::coordinator::AlertPolicy;
    use crate::alert::dispatcher::AlertDispatcher;
    use crate::position::{PositionFix, PositionReader};
    use std::sync::mpsc::{Receiver, Sender};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    /// Reports every poll and hands out a fix each time the test releases one.
    struct GatedFixes {
        fixes: Receiver<PositionFix>,
        polled: Sender<()>,
    }

    impl PositionReader for GatedFixes {
        fn poll_fix(&mut self) -> anyhow::Result<Option<PositionFix>> {
            let _ = self.polled.send(());
            Ok(self.fixes.recv_timeout(Duration::from_millis(10)).ok())
        }
    }

    struct NotifyingDispatcher(Sender<String>);

    impl AlertDispatcher for NotifyingDispatcher {
        fn name(&self) -> &'static str {
            "notifying"
        }

        fn send(&mut self, text: &str) -> Result<()> {
            let _ = self.0.send(text.to_string());
            Ok(())
        }
    }

    fn event(seq: u64) -> AlertEvent {
        AlertEvent {
            label: "bear".into(),
            confidence: 0.9,
            frame_sequence: seq,
        }
    }

    #[test]
    fn pending_requests_coalesce_and_shutdown_reports_stats() -> Result<()> {
        let (release, fixes) = mpsc::channel();
        let (polled, worker_polling) = mpsc::channel();
        let (outbox, sent) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let coordinator = AlertCoordinator::new(
            Box::new(GatedFixes { fixes, polled }),
            Box::new(NotifyingDispatcher(outbox)),
            AlertPolicy {
                message_template: "{label} {location}".into(),
                retry_failed: false,
                fix_timeout: None,
            },
            Arc::clone(&shutdown),
        );
        let mut worker = AlertWorker::spawn(coordinator, Arc::clone(&shutdown))?;

        assert_eq!(worker.submit(event(0)), Submission::Queued);
        // The worker has taken event 0 and is waiting for a fix.
        worker_polling.recv_timeout(WAIT)?;
        assert_eq!(worker.submit(event(1)), Submission::Queued);
        for seq in 2..5 {
            assert_eq!(worker.submit(event(seq)), Submission::Coalesced);
        }

        release.send(PositionFix::new(45.0, 25.0, true))?;
        assert_eq!(sent.recv_timeout(WAIT)?, "bear 45.000000,25.000000");

        let stats = worker.shutdown();
        assert_eq!(stats.requested, 2);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.coalesced, 3);
        assert!(shutdown.load(Ordering::SeqCst));
        Ok(())
    }
}
