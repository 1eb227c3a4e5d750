//! Dome Command Dispatcher
//!
//! [`DomeDriver`] is what the device-interface adapter talks to. Every
//! operation follows the same path:
//!
//! 1. Gate on the capability table. Operations without a wire counterpart
//!    fail with `NotSupported` and never touch the line.
//! 2. Check the connection state. A disconnected dome fails with
//!    `NotConnected` before anything is written.
//! 3. Take exclusive access to the line for the whole exchange.
//! 4. Drain stale bytes, write the frame, and read the terminated reply with
//!    a bounded timeout when the command has one.
//! 5. Decode and convert, then release the line.
//!
//! An exchange that does not complete (timeout, I/O error, malformed frame, or
//! a caller dropping the future mid-exchange) leaves the session marked for
//! resync. The next exchange closes and reopens the line before writing, so a
//! late reply can never be mistaken for the answer to the next command.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dome_driver::{DomeConfig, DomeDriver};
//!
//! let driver = DomeDriver::new(DomeConfig::load()?);
//! driver.connect().await?;
//!
//! driver.move_to_azimuth(182.5).await?;   // sends "+MA182;"
//! let az = driver.query_azimuth().await?; // sends "+G;", expects "#<deg>;"
//! ```

use crate::azimuth;
use crate::config::DomeConfig;
use crate::connection::{Connection, ConnectionState, SessionGuard};
use crate::protocol::{self, Command, Reply, TERMINATOR};
use dome_core::capabilities::{self, CapabilityFlags, DomeOperation};
use dome_core::error::DomeResult;
use dome_core::serial::{PortOpener, SerialPortOpener};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Last known shutter position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutterState {
    /// Shutter open
    Open,
    /// Shutter closed
    Closed,
}

/// Descriptive information about the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Short name
    pub name: &'static str,
    /// One-line description
    pub description: &'static str,
    /// Version of this crate
    pub driver_version: &'static str,
    /// Revision of the dome device interface this driver implements
    pub interface_version: u16,
}

/// Dome device interface revision reported by [`DomeDriver::device_info`].
pub const INTERFACE_VERSION: u16 = 2;

// =============================================================================
// DomeDriver
// =============================================================================

/// Driver for the serial dome controller.
///
/// All methods take `&self`; share the driver between tasks with an `Arc`.
/// Concurrent calls are serialized on the serial line, never interleaved.
pub struct DomeDriver {
    config: DomeConfig,
    connection: Connection,
    shutter: RwLock<ShutterState>,
}

impl DomeDriver {
    /// Create a driver that opens real serial hardware.
    pub fn new(config: DomeConfig) -> Self {
        Self::with_opener(config, Arc::new(SerialPortOpener))
    }

    /// Create a driver that opens its line through `opener`.
    pub fn with_opener(config: DomeConfig, opener: Arc<dyn PortOpener>) -> Self {
        Self {
            config,
            connection: Connection::new(opener),
            shutter: RwLock::new(ShutterState::Closed),
        }
    }

    /// Configuration this driver was built with.
    pub fn config(&self) -> &DomeConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Connection
    // -------------------------------------------------------------------------

    /// Open the serial line configured in `port.name`. No-op when connected.
    pub async fn connect(&self) -> DomeResult<()> {
        self.connection.connect(&self.config.port_config()).await
    }

    /// Close the serial line. No-op when disconnected.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    /// Whether the dome is connected.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    // -------------------------------------------------------------------------
    // Capabilities and descriptive properties
    // -------------------------------------------------------------------------

    /// Capability flags, taken from the same table that gates dispatch.
    pub fn capabilities(&self) -> CapabilityFlags {
        CapabilityFlags::current()
    }

    /// Whether `operation` can be dispatched.
    pub fn supports(&self, operation: DomeOperation) -> bool {
        capabilities::is_supported(operation)
    }

    /// Descriptive information about this driver.
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "Dome Controller",
            description: "Serial dome rotation controller (azimuth only)",
            driver_version: env!("CARGO_PKG_VERSION"),
            interface_version: INTERFACE_VERSION,
        }
    }

    /// Cached shutter state.
    ///
    /// The firmware has no shutter commands, so this stays at its initial
    /// `Closed` value.
    pub fn shutter_status(&self) -> ShutterState {
        *self.shutter.read()
    }

    /// Whether the dome is slewing.
    ///
    /// The firmware reports no motion status, so this is always `false`.
    pub fn is_slewing(&self) -> bool {
        false
    }

    /// Whether the dome is slaved to a telescope. Slaving is not supported.
    pub fn is_slaved(&self) -> bool {
        false
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Read the current azimuth in degrees.
    ///
    /// The device reports whole degrees; the value is passed through without
    /// range checks.
    #[instrument(skip(self), err)]
    pub async fn query_azimuth(&self) -> DomeResult<f64> {
        let reply = self.query(Command::QueryAzimuth).await?;
        let degrees = azimuth::from_wire(reply.payload())?;
        tracing::debug!(azimuth = degrees, "Dome azimuth");
        Ok(degrees)
    }

    /// Start a slew to `target` degrees.
    ///
    /// The target is wrapped into `[0, 360)` and truncated to whole degrees.
    /// Returns once the command is on the wire; the firmware sends no reply.
    #[instrument(skip(self), err)]
    pub async fn move_to_azimuth(&self, target: f64) -> DomeResult<()> {
        self.command(Command::MoveToAzimuth(target)).await
    }

    /// Not supported by the firmware.
    pub async fn abort_slew(&self) -> DomeResult<()> {
        self.command(Command::Abort).await
    }

    /// Not supported by the firmware.
    pub async fn find_home(&self) -> DomeResult<()> {
        self.command(Command::FindHome).await
    }

    /// Not supported by the firmware.
    pub async fn park(&self) -> DomeResult<()> {
        self.command(Command::Park).await
    }

    /// Not supported by the firmware.
    pub async fn open_shutter(&self) -> DomeResult<()> {
        self.command(Command::OpenShutter).await
    }

    /// Not supported by the firmware.
    pub async fn close_shutter(&self) -> DomeResult<()> {
        self.command(Command::CloseShutter).await
    }

    // -------------------------------------------------------------------------
    // Exchange
    // -------------------------------------------------------------------------

    /// Send a command that has no reply.
    async fn command(&self, command: Command) -> DomeResult<()> {
        let mut session = self.send(&command).await?;
        session.mark_synchronized();
        Ok(())
    }

    /// Send a command and read its reply frame, holding the line throughout.
    async fn query(&self, command: Command) -> DomeResult<Reply> {
        let mut session = self.send(&command).await?;
        let timeout = self.config.timing.read_timeout();

        let raw = match session.line().read_until(TERMINATOR, timeout).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(?command, error = %e, "Dome reply not received");
                return Err(e);
            }
        };
        tracing::debug!(reply = %String::from_utf8_lossy(&raw), "Received dome reply");

        match protocol::decode(&raw) {
            Ok(reply) => {
                session.mark_synchronized();
                Ok(reply)
            }
            Err(e) => {
                tracing::warn!(
                    ?command,
                    reply = %String::from_utf8_lossy(&raw),
                    error = %e,
                    "Malformed dome reply"
                );
                Err(e.into())
            }
        }
    }

    /// Encode, acquire the line, drain, and write. Returns the still-held
    /// session so a reply can be read before anyone else gets the line.
    ///
    /// The session is marked desynchronized before the write and stays that
    /// way until the caller completes the exchange, so an error or a dropped
    /// future leaves the line to be reset on next use.
    async fn send(&self, command: &Command) -> DomeResult<SessionGuard<'_>> {
        let frame = match protocol::encode(command) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(?command, error = %e, "Dome command rejected");
                return Err(e);
            }
        };

        let mut session = self.connection.acquire(command.operation()).await?;
        self.discard_stale(&mut session).await;

        session.mark_desynchronized();
        if let Err(e) = session.line().write_frame(&frame).await {
            tracing::warn!(?command, error = %e, "Dome command write failed");
            return Err(e);
        }
        tracing::debug!(frame = %String::from_utf8_lossy(&frame), "Sent dome command");

        Ok(session)
    }

    /// Discard bytes nobody asked for before the next command goes out.
    ///
    /// A freshly reset line is drained for the longer resync window.
    async fn discard_stale(&self, session: &mut SessionGuard<'_>) {
        let timing = &self.config.timing;

        if session.take_settling() {
            let discarded = session.line().drain(timing.resync_window()).await;
            if discarded > 0 {
                tracing::warn!(discarded, "Discarded stale bytes after dome line reset");
            }
        } else {
            session.line().drain(timing.drain_window()).await;
        }
    }
}

impl std::fmt::Debug for DomeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomeDriver")
            .field("port", &self.config.port.name)
            .field("state", &self.connection_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dome_core::error::{DomeError, FrameError};
    use dome_core::serial::{DynSerial, PortConfig};
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tracing_test::traced_test;

    /// Hands out pre-made duplex ends, one per open.
    struct PipeOpener {
        devices: parking_lot::Mutex<VecDeque<DuplexStream>>,
    }

    #[async_trait]
    impl PortOpener for PipeOpener {
        async fn open(&self, config: &PortConfig) -> DomeResult<DynSerial> {
            match self.devices.lock().pop_front() {
                Some(device) => Ok(Box::new(device)),
                None => Err(DomeError::Connect {
                    port: config.port_name.clone(),
                    message: "no pipe left".into(),
                }),
            }
        }
    }

    fn test_config() -> DomeConfig {
        let mut config = DomeConfig::default();
        config.timing.read_timeout_ms = 200;
        config.timing.drain_window_ms = 0;
        config.timing.resync_window_ms = 50;
        config
    }

    /// Connected driver plus the far end of every line it may open.
    async fn connected_driver_with_lines(lines: usize) -> (Vec<DuplexStream>, DomeDriver) {
        let (hosts, devices): (Vec<_>, VecDeque<_>) =
            (0..lines).map(|_| tokio::io::duplex(256)).unzip();
        let opener = PipeOpener {
            devices: parking_lot::Mutex::new(devices),
        };
        let driver = DomeDriver::with_opener(test_config(), Arc::new(opener));
        driver.connect().await.unwrap();
        (hosts, driver)
    }

    async fn connected_driver() -> (DuplexStream, DomeDriver) {
        let (mut hosts, driver) = connected_driver_with_lines(1).await;
        (hosts.remove(0), driver)
    }

    /// Answer one `+G;` on `host` with `reply`.
    async fn answer_query(host: &mut DuplexStream, reply: &[u8]) {
        let mut sent = [0u8; 3];
        host.read_exact(&mut sent).await.unwrap();
        assert_eq!(&sent, b"+G;");
        host.write_all(reply).await.unwrap();
    }

    #[tokio::test]
    async fn test_query_azimuth() {
        let (mut host, driver) = connected_driver().await;
        host.write_all(b"#45;").await.unwrap();

        assert_eq!(driver.query_azimuth().await.unwrap(), 45.0);

        let mut sent = [0u8; 3];
        host.read_exact(&mut sent).await.unwrap();
        assert_eq!(&sent, b"+G;");
    }

    #[tokio::test]
    async fn test_move_to_azimuth_writes_frame() {
        let (mut host, driver) = connected_driver().await;

        driver.move_to_azimuth(180.0).await.unwrap();

        let mut sent = [0u8; 7];
        host.read_exact(&mut sent).await.unwrap();
        assert_eq!(&sent, b"+MA180;");
    }

    #[tokio::test]
    async fn test_malformed_reply_is_an_error() {
        let (mut host, driver) = connected_driver().await;
        host.write_all(b"45;").await.unwrap();

        let err = driver.query_azimuth().await.unwrap_err();
        assert!(matches!(err, DomeError::Frame(FrameError::BadPrefix)));
    }

    #[tokio::test]
    async fn test_empty_reply_is_an_error() {
        let (mut host, driver) = connected_driver().await;
        host.write_all(b"#;").await.unwrap();

        let err = driver.query_azimuth().await.unwrap_err();
        assert!(matches!(err, DomeError::Frame(FrameError::Empty)));
    }

    #[tokio::test]
    async fn test_non_numeric_payload_is_an_error() {
        let (mut host, driver) = connected_driver().await;
        host.write_all(b"#4x;").await.unwrap();

        let err = driver.query_azimuth().await.unwrap_err();
        assert!(matches!(err, DomeError::ValueParse(_)));
    }

    #[tokio::test]
    async fn test_unsupported_operations() {
        let (_host, driver) = connected_driver().await;

        assert!(matches!(
            driver.find_home().await,
            Err(DomeError::NotSupported(DomeOperation::FindHome))
        ));
        assert!(matches!(
            driver.park().await,
            Err(DomeError::NotSupported(DomeOperation::Park))
        ));
        assert!(matches!(
            driver.abort_slew().await,
            Err(DomeError::NotSupported(DomeOperation::AbortSlew))
        ));
        assert!(matches!(
            driver.open_shutter().await,
            Err(DomeError::NotSupported(DomeOperation::SetShutter))
        ));
        assert!(matches!(
            driver.close_shutter().await,
            Err(DomeError::NotSupported(DomeOperation::SetShutter))
        ));
        assert_eq!(driver.shutter_status(), ShutterState::Closed);
    }

    #[tokio::test]
    async fn test_capabilities_match_dispatch() {
        let driver = DomeDriver::new(test_config());
        let flags = driver.capabilities();

        assert_eq!(flags.can_set_azimuth, driver.supports(DomeOperation::SetAzimuth));
        assert_eq!(flags.can_find_home, driver.supports(DomeOperation::FindHome));
        assert!(!flags.can_set_shutter);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_exchange_is_logged() {
        let (mut host, driver) = connected_driver().await;
        host.write_all(b"#90;").await.unwrap();

        driver.query_azimuth().await.unwrap();

        assert!(logs_contain("Sent dome command"));
        assert!(logs_contain("+G;"));
        assert!(logs_contain("Received dome reply"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_timeout_resets_line() {
        let (mut hosts, driver) = connected_driver_with_lines(2).await;
        let mut second = hosts.pop().unwrap();
        let mut first = hosts.pop().unwrap();

        let err = driver.query_azimuth().await.unwrap_err();
        assert!(matches!(err, DomeError::Timeout { .. }));
        assert!(logs_contain("Dome reply not received"));

        // The late answer to the first query arrives on the old line.
        first.write_all(b"#11;").await.unwrap();

        let (azimuth, ()) = tokio::join!(driver.query_azimuth(), answer_query(&mut second, b"#12;"));
        assert_eq!(azimuth.unwrap(), 12.0);
        assert!(logs_contain("Resetting dome serial line"));

        // The old line saw only the first query before it was closed.
        let mut rest = Vec::new();
        first.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"+G;");
    }

    #[tokio::test]
    async fn test_cancelled_query_resets_line() {
        let (mut hosts, driver) = connected_driver_with_lines(2).await;
        let mut second = hosts.pop().unwrap();
        let mut first = hosts.pop().unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(30), driver.query_azimuth()).await;
        assert!(cancelled.is_err());

        // Reply to the abandoned query shows up after the caller gave up.
        first.write_all(b"#11;").await.unwrap();

        let (azimuth, ()) = tokio::join!(driver.query_azimuth(), answer_query(&mut second, b"#12;"));
        assert_eq!(azimuth.unwrap(), 12.0);
        assert!(driver.is_connected());
    }

    #[tokio::test]
    async fn test_clean_exchanges_keep_the_line() {
        let (mut host, driver) = connected_driver().await;

        driver.move_to_azimuth(15.0).await.unwrap();
        let mut sent = [0u8; 6];
        host.read_exact(&mut sent).await.unwrap();
        assert_eq!(&sent, b"+MA15;");

        // A second open would fail: the opener only has one pipe.
        let (azimuth, ()) = tokio::join!(driver.query_azimuth(), answer_query(&mut host, b"#15;"));
        assert_eq!(azimuth.unwrap(), 15.0);
        let (azimuth, ()) = tokio::join!(driver.query_azimuth(), answer_query(&mut host, b"#16;"));
        assert_eq!(azimuth.unwrap(), 16.0);
    }

    #[tokio::test]
    async fn test_failed_reset_reports_connection_error() {
        let (_host, driver) = connected_driver().await;

        assert!(matches!(
            driver.query_azimuth().await,
            Err(DomeError::Timeout { .. })
        ));

        let err = driver.query_azimuth().await.unwrap_err();
        assert_eq!(err.kind(), dome_core::DomeErrorKind::Connection);
        assert_eq!(driver.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_motion_status_is_constant() {
        let driver = DomeDriver::new(DomeConfig::default());
        assert!(!driver.is_slewing());
        assert!(!driver.is_slaved());
    }

    #[tokio::test]
    async fn test_disconnected_operations_fail() {
        let (_host, driver) = connected_driver().await;
        driver.disconnect().await;

        assert!(matches!(
            driver.move_to_azimuth(10.0).await,
            Err(DomeError::NotConnected {
                operation: DomeOperation::SetAzimuth
            })
        ));
        assert_eq!(driver.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_device_info() {
        let info = DomeDriver::new(DomeConfig::default()).device_info();
        assert_eq!(info.driver_version, env!("CARGO_PKG_VERSION"));
        assert!(!info.name.is_empty());
        assert_eq!(info.interface_version, 2);
    }
}
