use std::io::{BufRead, BufReader, ErrorKind, Read};

use anyhow::{anyhow, Context, Result};

use super::nmea::parse_sentence;
use super::{PositionFix, PositionReader};

/// Reads NMEA lines from a serial channel or any byte stream.
pub struct NmeaReceiver<R: Read> {
    reader: BufReader<R>,
    line: Vec<u8>,
    lines_read: u64,
    lines_skipped: u64,
}

impl<R: Read> NmeaReceiver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            line: Vec::with_capacity(96),
            lines_read: 0,
            lines_skipped: 0,
        }
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    pub fn lines_skipped(&self) -> u64 {
        self.lines_skipped
    }

    fn take_line(&mut self) -> Option<PositionFix> {
        let text = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        self.lines_read += 1;
        let fix = parse_sentence(&text);
        if fix.is_none() {
            self.lines_skipped += 1;
        }
        fix
    }
}

impl<R: Read + Send> PositionReader for NmeaReceiver<R> {
    fn poll_fix(&mut self) -> Result<Option<PositionFix>> {
        // A timed-out read keeps its partial line for the next poll.
        match self.reader.read_until(b'\n', &mut self.line) {
            Ok(0) if self.line.is_empty() => Err(anyhow!("position stream closed")),
            Ok(_) => Ok(self.take_line()),
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Ok(None)
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(err).context("read from position receiver"),
        }
    }
}
