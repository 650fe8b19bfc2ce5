//! Frame presentation and control keys.
//!
//! The device runs headless, so the shipped display reads keys from stdin
//! lines (`q`, `s`, `p` then Enter) and can mirror each presented frame to a
//! preview image for a remote viewer.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::frame::Frame;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlKey {
    Quit,
    Pause,
    Snapshot,
    Other(char),
}

impl ControlKey {
    pub fn from_char(c: char) -> Self {
        match c.to_ascii_lowercase() {
            'q' => Self::Quit,
            's' => Self::Pause,
            'p' => Self::Snapshot,
            other => Self::Other(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyWait {
    Indefinite,
    Bounded(Duration),
}

pub trait Display {
    fn present(&mut self, frame: &Frame) -> Result<()>;
    /// Next key within `wait`; `None` on timeout or when no input remains.
    fn poll_key(&mut self, wait: KeyWait) -> Option<ControlKey>;
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct ConsoleDisplay {
    keys: Option<Receiver<char>>,
    preview_path: Option<PathBuf>,
    shutdown: Option<Arc<AtomicBool>>,
    presented: u64,
}

impl ConsoleDisplay {
    /// Reads control keys from stdin on a background thread.
    pub fn interactive(preview_path: Option<PathBuf>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("stdin-keys".into())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if let Some(c) = line.trim().chars().next() {
                        if tx.send(c).is_err() {
                            break;
                        }
                    }
                }
            })
            .context("spawn stdin key reader")?;
        Ok(Self {
            keys: Some(rx),
            preview_path,
            shutdown: None,
            presented: 0,
        })
    }

    /// No key input; every wait returns immediately.
    pub fn headless(preview_path: Option<PathBuf>) -> Self {
        Self {
            keys: None,
            preview_path,
            shutdown: None,
            presented: 0,
        }
    }

    /// Indefinite waits give up once `flag` is set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    fn stopping(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

impl Display for ConsoleDisplay {
    fn present(&mut self, frame: &Frame) -> Result<()> {
        self.presented += 1;
        if let Some(path) = &self.preview_path {
            frame
                .image()
                .save(path)
                .with_context(|| format!("failed to write preview {}", path.display()))?;
        }
        Ok(())
    }

    fn poll_key(&mut self, wait: KeyWait) -> Option<ControlKey> {
        let keys = self.keys.as_ref()?;
        let received = match wait {
            KeyWait::Bounded(limit) => keys.recv_timeout(limit),
            KeyWait::Indefinite => loop {
                match keys.recv_timeout(SHUTDOWN_POLL) {
                    Err(RecvTimeoutError::Timeout) if !self.stopping() => continue,
                    other => break other,
                }
            },
        };
        match received {
            Ok(c) => Some(ControlKey::from_char(c)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!("ConsoleDisplay: key input closed");
                self.keys = None;
                None
            }
        }
    }
}
