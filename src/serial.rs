//! Serial channels to the GPS receiver and the modem.
//!
//! Device nodes are opened through `serialport`. Regular files and FIFOs are
//! opened as plain streams so recorded receiver output can be replayed.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

pub enum SerialChannel {
    Port(Box<dyn serialport::SerialPort>),
    Stream(File),
}

impl SerialChannel {
    pub fn open(path: &str, baud: u32, read_timeout: Duration) -> Result<Self> {
        if is_plain_stream(Path::new(path)) {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .or_else(|_| File::open(path))
                .with_context(|| format!("failed to open {}", path))?;
            log::debug!("SerialChannel: {} opened as a plain stream", path);
            return Ok(Self::Stream(file));
        }
        let port = serialport::new(path, baud)
            .timeout(read_timeout)
            .open()
            .with_context(|| format!("failed to open serial port {} at {} baud", path, baud))?;
        log::debug!("SerialChannel: {} opened at {} baud", path, baud);
        Ok(Self::Port(port))
    }

    /// Second handle to the same channel, e.g. for a reader thread.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(match self {
            Self::Port(port) => Self::Port(port.try_clone().context("clone serial port")?),
            Self::Stream(file) => Self::Stream(file.try_clone().context("clone stream")?),
        })
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Port(port) => port.read(buf),
            Self::Stream(file) => file.read(buf),
        }
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Port(port) => port.write(buf),
            Self::Stream(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Port(port) => port.flush(),
            Self::Stream(file) => file.flush(),
        }
    }
}

#[cfg(unix)]
fn is_plain_stream(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() || meta.file_type().is_fifo())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_plain_stream(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_files_open_as_streams() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"$GPGGA,,,,,,0,,,,,,,,*66\r\n")?;
        let mut channel =
            SerialChannel::open(file.path().to_str().unwrap(), 9600, Duration::from_secs(1))?;
        assert!(matches!(channel, SerialChannel::Stream(_)));
        let mut text = String::new();
        channel.read_to_string(&mut text)?;
        assert!(text.starts_with("$GPGGA"));
        Ok(())
    }

    #[test]
    fn missing_device_is_an_error() {
        assert!(SerialChannel::open("/dev/does-not-exist-ttyX9", 9600, Duration::from_secs(1))
            .is_err());
    }
}
