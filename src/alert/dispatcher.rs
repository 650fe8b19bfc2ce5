//! Text alert transmission over a GSM modem's AT command interface.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::config::{is_valid_destination, ModemSettings};
use crate::error::ConfigError;
use crate::serial::SerialChannel;

const CTRL_Z: u8 = 0x1A;

/// Settle intervals after each step of the SMS exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModemTiming {
    pub probe_settle: Duration,
    pub mode_settle: Duration,
    pub address_settle: Duration,
    pub body_settle: Duration,
}

impl Default for ModemTiming {
    fn default() -> Self {
        Self {
            probe_settle: Duration::from_secs(1),
            mode_settle: Duration::from_secs(1),
            address_settle: Duration::from_secs(1),
            body_settle: Duration::from_secs(3),
        }
    }
}

impl ModemTiming {
    pub fn immediate() -> Self {
        Self {
            probe_settle: Duration::ZERO,
            mode_settle: Duration::ZERO,
            address_settle: Duration::ZERO,
            body_settle: Duration::ZERO,
        }
    }
}

/// Sends one text alert. Blocking; no retries.
pub trait AlertDispatcher: Send {
    fn name(&self) -> &'static str;
    fn send(&mut self, text: &str) -> Result<()>;
}

impl<T: AlertDispatcher + ?Sized> AlertDispatcher for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn send(&mut self, text: &str) -> Result<()> {
        (**self).send(text)
    }
}

/// Opens the dispatcher described by the modem settings: a serial modem, or a
/// dry-run logger when no port is configured.
pub fn open_dispatcher(settings: &ModemSettings) -> Result<Box<dyn AlertDispatcher>> {
    let Some(port) = settings.port.as_deref() else {
        log::warn!("AlertDispatcher: no modem port configured, alerts are logged only");
        return Ok(Box::new(LogDispatcher::default()));
    };
    let destination = settings.destination.as_deref().ok_or_else(|| {
        ConfigError::Invalid("modem.destination must be set to send alerts".into())
    })?;
    let channel = SerialChannel::open(port, settings.baud, settings.read_timeout)?;
    let responses = channel.try_clone()?;
    let modem = AtModem::new(channel, destination, settings.timing)?.with_responses(responses);
    log::info!("AlertDispatcher: modem on {} -> {}", port, destination);
    Ok(Box::new(modem))
}

/// SMS over a Hayes-style modem (e.g. SIM800L) in text mode.
///
/// Exchange: `AT`, `AT+CMGF=1`, `AT+CMGS="<number>"`, then the body terminated
/// by Ctrl-Z, each followed by its settle interval. Replies are collected by a
/// reader thread when one is attached; an `ERROR` reply fails the send.
pub struct AtModem<W: Write + Send> {
    writer: W,
    destination: String,
    timing: ModemTiming,
    replies: Option<ReplyReader>,
    last_replies: Vec<String>,
}

struct ReplyReader {
    lines: Receiver<String>,
    stop: Arc<AtomicBool>,
}

impl Drop for ReplyReader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl<W: Write + Send> AtModem<W> {
    pub fn new(writer: W, destination: &str, timing: ModemTiming) -> Result<Self, ConfigError> {
        if !is_valid_destination(destination) {
            return Err(ConfigError::Invalid(format!(
                "destination {:?} is not a phone number",
                destination
            )));
        }
        Ok(Self {
            writer,
            destination: destination.to_string(),
            timing,
            replies: None,
            last_replies: Vec::new(),
        })
    }

    /// Attaches the read side of the channel; a thread forwards reply lines.
    pub fn with_responses<R: Read + Send + 'static>(mut self, reader: R) -> Self {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let spawned = thread::Builder::new()
            .name("modem-replies".into())
            .spawn(move || {
                let mut reader = BufReader::new(reader);
                let mut line = Vec::new();
                while !thread_stop.load(Ordering::SeqCst) {
                    match reader.read_until(b'\n', &mut line) {
                        Ok(0) => break,
                        Ok(_) => {
                            let text = String::from_utf8_lossy(&line).trim().to_string();
                            line.clear();
                            if !text.is_empty() && tx.send(text).is_err() {
                                break;
                            }
                        }
                        Err(err)
                            if matches!(
                                err.kind(),
                                ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                            ) => {}
                        Err(err) => {
                            log::warn!("AtModem: reply reader stopped: {}", err);
                            break;
                        }
                    }
                }
            });
        match spawned {
            Ok(_) => self.replies = Some(ReplyReader { lines: rx, stop }),
            Err(err) => log::warn!("AtModem: replies will not be checked: {}", err),
        }
        self
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Reply lines gathered during the most recent `send`.
    pub fn last_replies(&self) -> &[String] {
        &self.last_replies
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Takes replies that arrived after the previous exchange settled, so they
    /// are not judged as part of the next one.
    pub fn discard_stale_replies(&mut self) -> Vec<String> {
        let stale: Vec<String> = match &self.replies {
            Some(replies) => replies.lines.try_iter().collect(),
            None => Vec::new(),
        };
        for reply in &stale {
            if is_error_reply(reply) {
                log::warn!("AtModem: late reply to the previous message: {}", reply);
            } else {
                log::debug!("AtModem: late reply: {}", reply);
            }
        }
        stale
    }

    fn step(&mut self, bytes: &[u8], settle: Duration) -> Result<()> {
        self.writer
            .write_all(bytes)
            .and_then(|_| self.writer.flush())
            .context("write to modem")?;
        if !settle.is_zero() {
            thread::sleep(settle);
        }
        if let Some(replies) = &self.replies {
            self.last_replies.extend(replies.lines.try_iter());
        }
        Ok(())
    }
}

impl<W: Write + Send> AlertDispatcher for AtModem<W> {
    fn name(&self) -> &'static str {
        "at-modem"
    }

    fn send(&mut self, text: &str) -> Result<()> {
        self.discard_stale_replies();
        self.last_replies.clear();
        // Ctrl-Z inside the body would end the message early.
        let body: Vec<u8> = text.bytes().filter(|b| *b != CTRL_Z).collect();

        let timing = self.timing;
        self.step(b"AT\r", timing.probe_settle)?;
        self.step(b"AT+CMGF=1\r", timing.mode_settle)?;
        let address = format!("AT+CMGS=\"{}\"\r", self.destination);
        self.step(address.as_bytes(), timing.address_settle)?;
        let mut payload = body;
        payload.push(CTRL_Z);
        self.step(&payload, timing.body_settle)?;

        for reply in &self.last_replies {
            log::debug!("AtModem: <- {}", reply);
        }
        if let Some(error) = self.last_replies.iter().find(|reply| is_error_reply(reply)) {
            bail!("modem rejected the message: {}", error);
        }
        Ok(())
    }
}

fn is_error_reply(reply: &str) -> bool {
    reply == "ERROR" || reply.contains("CMS ERROR")
}

/// Dry-run dispatcher: logs each alert instead of transmitting it.
#[derive(Debug, Default)]
pub struct LogDispatcher {
    sent: Vec<String>,
}

impl LogDispatcher {
    pub fn sent(&self) -> &[String] {
        &self.sent
    }
}

impl AlertDispatcher for LogDispatcher {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Err(anyhow!("refusing to send an empty alert"));
        }
        log::warn!("ALERT (dry run): {}", text);
        self.sent.push(text.to_string());
        Ok(())
    }
}
