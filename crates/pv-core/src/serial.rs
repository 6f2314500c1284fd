//! Serial-line [`CommandChannel`] for RS-232 instruments.
//!
//! # Types
//!
//! - [`SerialPortIO`]: trait alias combining AsyncRead + AsyncWrite
//! - [`DynSerial`]: type-erased boxed serial port
//! - [`SerialChannel`]: line-oriented command/query channel over any
//!   [`SerialPortIO`] (a real `tokio_serial::SerialStream`, or a
//!   `tokio::io::DuplexStream` in tests)
//!
//! # Example
//!
//! ```rust,ignore
//! use pv_core::serial::{open_serial_async, SerialChannel};
//!
//! let port = open_serial_async("/dev/ttyUSB0", 9600, "Keithley 2400").await?;
//! let mut channel = SerialChannel::new(Box::new(port), &settings.instrument);
//! let idn = channel.query("*IDN?").await?;
//! ```

use crate::channel::CommandChannel;
use crate::error::{CommunicationError, CommunicationErrorKind};
use crate::settings::InstrumentSettings;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Trait alias for async serial port I/O.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
///
/// # Errors
///
/// Returns an error if the port cannot be opened or spawn_blocking fails.
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Drain stale bytes from a reader until it stays silent for `quiet`.
///
/// Returns the number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, quiet: Duration) -> usize {
    let mut discard = [0u8; 256];
    let mut total_discarded = 0usize;

    loop {
        match tokio::time::timeout(quiet, port.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(_)) | Err(_) => break,
        }
    }

    total_discarded
}

/// Line-terminated command/query channel over a serial port.
pub struct SerialChannel {
    port: BufReader<DynSerial>,
    terminator: String,
    read_timeout: Duration,
    write_timeout: Duration,
    drain_window: Duration,
}

impl SerialChannel {
    /// Wrap an open port using the terminator and timeouts from `settings`.
    pub fn new(port: DynSerial, settings: &InstrumentSettings) -> Self {
        Self {
            port: BufReader::new(port),
            terminator: settings.terminator.clone(),
            read_timeout: Duration::from_millis(settings.read_timeout_ms),
            write_timeout: Duration::from_millis(settings.write_timeout_ms),
            drain_window: Duration::from_millis(settings.drain_ms),
        }
    }

    /// Open the configured serial port and wrap it.
    pub async fn open(settings: &InstrumentSettings) -> anyhow::Result<Self> {
        let port = open_serial_async(&settings.port, settings.baud_rate, &settings.name).await?;
        tracing::info!(
            port = %settings.port,
            baud = settings.baud_rate,
            "opened instrument serial port"
        );
        Ok(Self::new(Box::new(port), settings))
    }

    async fn send_line(&mut self, command: &str) -> Result<(), CommunicationError> {
        let line = format!("{}{}", command, self.terminator);
        tracing::debug!(cmd = %command, "serial write");

        let port = self.port.get_mut();
        let write = async move {
            port.write_all(line.as_bytes()).await?;
            port.flush().await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(io_error(command, e)),
            Err(_) => Err(CommunicationError::timeout(command, self.write_timeout)),
        }
    }

    /// Discard anything left over from an earlier, abandoned exchange.
    async fn discard_stale_input(&mut self) {
        let buffered = self.port.buffer().len();
        if buffered > 0 {
            tracing::debug!(bytes = buffered, "clearing stale bytes from read buffer");
            self.port.consume(buffered);
        }
        if !self.drain_window.is_zero() {
            let discarded = drain_serial_buffer(self.port.get_mut(), self.drain_window).await;
            if discarded > 0 {
                tracing::debug!(bytes = discarded, "flushed stale bytes from stream");
            }
        }
    }
}

fn io_error(command: &str, err: std::io::Error) -> CommunicationError {
    let kind = match err.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => CommunicationErrorKind::Closed,
        std::io::ErrorKind::TimedOut => CommunicationErrorKind::Timeout,
        _ => CommunicationErrorKind::Io,
    };
    CommunicationError::new(kind, command, err.to_string())
}

#[async_trait]
impl CommandChannel for SerialChannel {
    async fn write(&mut self, command: &str) -> Result<(), CommunicationError> {
        self.send_line(command).await
    }

    async fn query(&mut self, command: &str) -> Result<String, CommunicationError> {
        self.discard_stale_input().await;
        self.send_line(command).await?;

        let mut response = String::new();
        match tokio::time::timeout(self.read_timeout, self.port.read_line(&mut response)).await {
            Ok(Ok(0)) => Err(CommunicationError::new(
                CommunicationErrorKind::Closed,
                command,
                "connection closed",
            )),
            Ok(Ok(_)) => {
                let reply = response.trim().to_string();
                tracing::debug!(cmd = %command, bytes = reply.len(), "serial reply");
                Ok(reply)
            }
            Ok(Err(e)) => Err(io_error(command, e)),
            Err(_) => Err(CommunicationError::timeout(command, self.read_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> InstrumentSettings {
        InstrumentSettings {
            read_timeout_ms: 100,
            drain_ms: 0,
            ..InstrumentSettings::default()
        }
    }

    #[tokio::test]
    async fn write_appends_terminator() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut channel = SerialChannel::new(Box::new(device), &settings());

        channel.write(":OUTP ON").await.unwrap();

        let mut buf = vec![0u8; 16];
        let n = host.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b":OUTP ON\n");
    }

    #[tokio::test]
    async fn query_reads_one_trimmed_line() {
        let (mut host, device) = tokio::io::duplex(256);
        let mut channel = SerialChannel::new(Box::new(device), &settings());

        let device_side = tokio::spawn(async move {
            let mut buf = vec![0u8; 32];
            let n = host.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"*IDN?\n");
            host.write_all(b"KEITHLEY INSTRUMENTS INC.,MODEL 2400\r\n")
                .await
                .unwrap();
            host
        });

        let reply = channel.query("*IDN?").await.unwrap();
        assert_eq!(reply, "KEITHLEY INSTRUMENTS INC.,MODEL 2400");
        drop(device_side.await.unwrap());
    }

    #[tokio::test]
    async fn query_times_out_without_reply() {
        let (_host, device) = tokio::io::duplex(64);
        let mut channel = SerialChannel::new(Box::new(device), &settings());

        let err = channel.query(":STAT:OPER:COND?").await.unwrap_err();
        assert_eq!(err.kind, CommunicationErrorKind::Timeout);
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn query_reports_closed_port() {
        let (host, device) = tokio::io::duplex(64);
        let mut channel = SerialChannel::new(Box::new(device), &settings());
        drop(host);

        let err = channel.query("*IDN?").await.unwrap_err();
        assert_eq!(err.kind, CommunicationErrorKind::Closed);
    }

    #[tokio::test]
    async fn query_values_parses_numeric_line() {
        let (mut host, device) = tokio::io::duplex(256);
        let mut channel = SerialChannel::new(Box::new(device), &settings());

        let device_side = tokio::spawn(async move {
            let mut buf = vec![0u8; 32];
            let _ = host.read(&mut buf).await.unwrap();
            host.write_all(b"1.0E-1,-2.0E-3,3.0E+0\n").await.unwrap();
            host
        });

        let values = channel.query_values(":TRAC:DATA?").await.unwrap();
        assert_eq!(values, vec![0.1, -0.002, 3.0]);
        drop(device_side.await.unwrap());
    }

    #[tokio::test]
    async fn drain_discards_pending_bytes() {
        let (mut host, mut device) = tokio::io::duplex(64);
        host.write_all(b"stale 1024\n").await.unwrap();

        let discarded = drain_serial_buffer(&mut device, Duration::from_millis(20)).await;
        assert_eq!(discarded, 11);
    }
}
