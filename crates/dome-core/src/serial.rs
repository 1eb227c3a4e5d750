//! Serial Transport
//!
//! The dome controller hangs off a single 9600-baud serial line. This module
//! owns that line: opening it, writing frames, reading until a terminator
//! byte with a deadline, and discarding stale bytes.
//!
//! # Types
//!
//! - [`SerialPortIO`]: Trait alias combining AsyncRead + AsyncWrite for serial ports
//! - [`DynSerial`]: Type-erased boxed serial port
//! - [`PortConfig`]: Port name plus the fixed baud rate
//! - [`PortOpener`]: Seam for opening a line (real hardware or an in-memory stream)
//! - [`SerialLine`]: Buffered, exclusively owned line with the read/write primitives
//!
//! # Example
//!
//! ```rust,ignore
//! use dome_core::serial::{PortConfig, PortOpener, SerialLine, SerialPortOpener};
//! use std::time::Duration;
//!
//! let config = PortConfig::new("/dev/ttyACM0");
//! let mut line = SerialLine::new(&config.port_name, SerialPortOpener.open(&config).await?);
//!
//! line.write_frame(b"+G;").await?;
//! let reply = line.read_until(b';', Duration::from_secs(2)).await?;
//! ```

use crate::error::{DomeError, DomeResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Baud rate of the dome controller. Not configurable.
pub const DOME_BAUD_RATE: u32 = 9600;

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
/// - Any mock implementing the async I/O traits
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for all types meeting the requirements
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

// =============================================================================
// Port Configuration
// =============================================================================

/// Where to find the dome controller.
///
/// Supplied by the configuration collaborator before connecting and never
/// changed while a connection is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    /// Serial port path (e.g., "/dev/ttyACM0", "COM3")
    pub port_name: String,
    /// Always [`DOME_BAUD_RATE`]
    pub baud_rate: u32,
}

impl PortConfig {
    /// Port at the fixed dome baud rate.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: DOME_BAUD_RATE,
        }
    }
}

// =============================================================================
// Opening
// =============================================================================

/// Opens the serial line for a [`PortConfig`].
///
/// The dispatcher only ever talks to this trait, so tests can hand it an
/// in-memory stream instead of real hardware.
#[async_trait]
pub trait PortOpener: Send + Sync {
    /// Open the line. Failures are reported as [`DomeError::Connect`].
    async fn open(&self, config: &PortConfig) -> DomeResult<DynSerial>;
}

/// Opens real serial hardware through `tokio-serial`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortOpener;

#[async_trait]
impl PortOpener for SerialPortOpener {
    async fn open(&self, config: &PortConfig) -> DomeResult<DynSerial> {
        let stream = open_serial_async(config).await?;
        Ok(Box::new(stream))
    }
}

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
pub async fn open_serial_async(config: &PortConfig) -> DomeResult<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::{SerialPort, SerialPortBuilderExt};

    let port_name = config.port_name.clone();
    let baud_rate = config.baud_rate;

    let opened = spawn_blocking(move || {
        tokio_serial::new(&port_name, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|e| DomeError::Connect {
        port: config.port_name.clone(),
        message: format!("spawn_blocking for serial port opening failed: {}", e),
    })?;

    let stream = opened.map_err(|e| DomeError::Connect {
        port: config.port_name.clone(),
        message: e.to_string(),
    })?;

    // Whatever the device sent to a previous handle is not ours to read.
    if let Err(e) = stream.clear(tokio_serial::ClearBuffer::All) {
        tracing::debug!(port = %config.port_name, error = %e, "Could not clear serial buffers");
    }

    tracing::info!(port = %config.port_name, baud = baud_rate, "Opened dome serial port");
    Ok(stream)
}

/// Serial ports present on this host.
pub fn available_ports() -> DomeResult<Vec<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| DomeError::Io(std::io::Error::other(e)))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

// =============================================================================
// SerialLine
// =============================================================================

/// An open serial line, owned by exactly one connection.
///
/// Reads go through a `BufReader` so [`read_until`](Self::read_until) can
/// accumulate bytes up to the terminator.
pub struct SerialLine {
    port_name: String,
    stream: BufReader<DynSerial>,
}

impl SerialLine {
    /// Wrap an opened stream.
    pub fn new(port_name: impl Into<String>, stream: DynSerial) -> Self {
        Self {
            port_name: port_name.into(),
            stream: BufReader::new(stream),
        }
    }

    /// Name of the port this line was opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Write a complete frame and flush it onto the line.
    pub async fn write_frame(&mut self, frame: &[u8]) -> DomeResult<()> {
        let writer = self.stream.get_mut();
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read until `terminator` has been received, or `timeout` elapses.
    ///
    /// Returns the bytes read including the terminator. On timeout any
    /// partially received bytes are dropped; bytes that arrive later stay on
    /// the line and must be removed with [`drain`](Self::drain) before the
    /// next exchange.
    pub async fn read_until(&mut self, terminator: u8, timeout: Duration) -> DomeResult<Vec<u8>> {
        let mut frame = Vec::with_capacity(16);
        let n = tokio::time::timeout(timeout, self.stream.read_until(terminator, &mut frame))
            .await
            .map_err(|_| DomeError::Timeout { timeout })??;

        if n == 0 || frame.last() != Some(&terminator) {
            return Err(DomeError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("serial line closed before '{}' was received", terminator as char),
            )));
        }
        Ok(frame)
    }

    /// Discard everything that arrives on the line within `window`.
    ///
    /// Bytes already sitting in the read buffer are discarded too. Returns the
    /// total number of bytes dropped.
    pub async fn drain(&mut self, window: Duration) -> usize {
        drain_serial_buffer(&mut self.stream, window).await
    }

    /// Shut the line down.
    pub async fn close(mut self) -> DomeResult<()> {
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }
}

impl std::fmt::Debug for SerialLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLine")
            .field("port_name", &self.port_name)
            .finish_non_exhaustive()
    }
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards data until nothing more arrives before the deadline.
/// Returns the total number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, window: Duration) -> usize {
    let mut discard = [0u8; 64];
    let deadline = tokio::time::Instant::now() + window;
    let mut total_discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break, // EOF
            Ok(Ok(n)) => {
                total_discarded += n;
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Read error while draining dome line");
                break;
            }
            Err(_) => break, // nothing more arrived
        }
    }

    if total_discarded > 0 {
        tracing::debug!(discarded = total_discarded, "Drained stale bytes from dome line");
    }
    total_discarded
}
