//! Connection lifecycle for the dome serial line.
//!
//! [`Connection`] owns the open line (if any) behind a single async mutex.
//! Every exchange, connect and disconnect takes that mutex, so at most one of
//! them touches the line at a time and a command can never interleave with a
//! reconnect.
//!
//! The [`ConnectionState`] is mirrored in a separate lock so callers can check
//! it synchronously, without queueing behind an exchange in flight.
//!
//! A session whose last exchange did not complete (an error, or a caller that
//! dropped the future after the frame was written) may still receive that
//! exchange's reply. [`Connection::acquire`] closes and reopens such a line
//! before handing it out, so a late reply can never be read as the answer to
//! the next command.
//!
//! ```text
//!   Disconnected ──connect()──▶ Connecting ──open ok──▶ Connected
//!        ▲                          │                       │
//!        └──────── open failed ─────┘                       │
//!        └──────────────────── disconnect() ────────────────┘
//! ```

use dome_core::capabilities::DomeOperation;
use dome_core::error::{DomeError, DomeResult};
use dome_core::serial::{DynSerial, PortConfig, PortOpener, SerialLine};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

/// Connection state surfaced to the controlling application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No line is open
    Disconnected,
    /// The port is being opened
    Connecting,
    /// The line is open and exchanges are allowed
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        write!(f, "{}", label)
    }
}

// =============================================================================
// Session
// =============================================================================

/// An open line plus what the dispatcher knows about its synchronisation.
#[derive(Debug)]
pub struct Session {
    port: PortConfig,
    line: SerialLine,
    needs_resync: bool,
    settling: bool,
}

impl Session {
    fn open(port: PortConfig, stream: DynSerial) -> Self {
        let line = SerialLine::new(&port.port_name, stream);
        Self {
            port,
            line,
            needs_resync: false,
            settling: false,
        }
    }

    /// The serial line.
    pub fn line(&mut self) -> &mut SerialLine {
        &mut self.line
    }

    /// True while an exchange is between its write and its completion. A
    /// session handed out in this state would be reset first.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Record that a frame is about to go out and its exchange is not done.
    pub fn mark_desynchronized(&mut self) {
        self.needs_resync = true;
    }

    /// Record that the exchange completed cleanly.
    pub fn mark_synchronized(&mut self) {
        self.needs_resync = false;
    }

    /// True exactly once after the line was reopened, so the first exchange
    /// can drain whatever the device was still sending.
    pub fn take_settling(&mut self) -> bool {
        std::mem::take(&mut self.settling)
    }
}

/// Exclusive access to the session for one exchange.
pub type SessionGuard<'a> = MappedMutexGuard<'a, Session>;

// =============================================================================
// Connection
// =============================================================================

/// Owns the serial line and the connection state machine.
pub struct Connection {
    opener: Arc<dyn PortOpener>,
    state: RwLock<ConnectionState>,
    session: Mutex<Option<Session>>,
}

impl Connection {
    /// New connection in the `Disconnected` state.
    pub fn new(opener: Arc<dyn PortOpener>) -> Self {
        Self {
            opener,
            state: RwLock::new(ConnectionState::Disconnected),
            session: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether exchanges are currently allowed.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Open the line. A no-op when already connected.
    ///
    /// On failure the state returns to `Disconnected` and the open error is
    /// returned.
    pub async fn connect(&self, config: &PortConfig) -> DomeResult<()> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            tracing::debug!(port = %config.port_name, "Dome already connected");
            return Ok(());
        }

        *self.state.write() = ConnectionState::Connecting;
        tracing::info!(port = %config.port_name, baud = config.baud_rate, "Connecting to dome");

        match self.opener.open(config).await {
            Ok(stream) => {
                *slot = Some(Session::open(config.clone(), stream));
                *self.state.write() = ConnectionState::Connected;
                tracing::info!(port = %config.port_name, "Dome connected");
                Ok(())
            }
            Err(e) => {
                *self.state.write() = ConnectionState::Disconnected;
                tracing::warn!(port = %config.port_name, error = %e, "Dome connection failed");
                Err(e)
            }
        }
    }

    /// Close the line. A no-op when already disconnected.
    ///
    /// Always ends in `Disconnected`; a failure to close is logged only.
    pub async fn disconnect(&self) {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.take() else {
            tracing::debug!("Dome already disconnected");
            return;
        };
        *self.state.write() = ConnectionState::Disconnected;

        let port = session.line.port_name().to_string();
        if let Err(e) = session.line.close().await {
            tracing::warn!(port = %port, error = %e, "Error closing dome serial port");
        }
        tracing::info!(port = %port, "Dome disconnected");
    }

    /// Take exclusive access to the line for one exchange.
    ///
    /// The state is checked before waiting for the lock, so a disconnected
    /// dome fails immediately. It is checked again once the lock is held, in
    /// case a disconnect completed while this caller was queued.
    ///
    /// A session left mid-exchange is reset first. If the port cannot be
    /// reopened the connection drops to `Disconnected` and the open error is
    /// returned.
    pub async fn acquire(&self, operation: DomeOperation) -> DomeResult<SessionGuard<'_>> {
        if !self.is_connected() {
            return Err(DomeError::NotConnected { operation });
        }

        let mut slot = self.session.lock().await;
        if slot.as_ref().is_some_and(Session::needs_resync) {
            self.reset(&mut slot).await?;
        }

        MutexGuard::try_map(slot, |slot| slot.as_mut())
            .map_err(|_| DomeError::NotConnected { operation })
    }

    /// Close the line in `slot` and open it again on the same port.
    async fn reset(&self, slot: &mut Option<Session>) -> DomeResult<()> {
        let Some(stale) = slot.take() else {
            return Ok(());
        };
        let port = stale.port;
        tracing::warn!(port = %port.port_name, "Resetting dome serial line after incomplete exchange");

        if let Err(e) = stale.line.close().await {
            tracing::warn!(port = %port.port_name, error = %e, "Error closing dome serial port");
        }

        match self.opener.open(&port).await {
            Ok(stream) => {
                let mut session = Session::open(port, stream);
                session.settling = true;
                *slot = Some(session);
                Ok(())
            }
            Err(e) => {
                *self.state.write() = ConnectionState::Disconnected;
                tracing::warn!(port = %port.port_name, error = %e, "Dome serial line reset failed");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
