//! Shared fixtures: a simulated dome controller reached through duplex pipes.

#![allow(dead_code)]

use async_trait::async_trait;
use dome_core::serial::{DynSerial, PortConfig, PortOpener};
use dome_driver::{DomeConfig, DomeDriver, DomeError, DomeResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

/// How long the simulated controller sits on a query before answering.
/// Anything the host sends during that time is counted as interleaving.
pub const REPLY_DELAY: Duration = Duration::from_millis(20);

/// How the simulated controller answers one `+G;`.
#[derive(Debug, Clone)]
pub enum QueryReply {
    /// `#<current azimuth>;`
    Azimuth,
    /// Exactly these bytes
    Raw(&'static [u8]),
    /// No answer at all
    Silent,
    /// `#<current azimuth>;` after the given delay
    Late(Duration),
    /// These bytes, after the given delay
    LateRaw(Duration, &'static [u8]),
}

/// A frame as seen by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    /// Which open of the port carried it (0 for the first connection)
    pub line: usize,
    /// The frame text, terminator included
    pub frame: String,
}

#[derive(Default)]
struct DomeState {
    azimuth: Mutex<u16>,
    script: Mutex<VecDeque<QueryReply>>,
    received: Mutex<Vec<Received>>,
    interleaved: AtomicUsize,
    opens: AtomicUsize,
    refuse_opens: AtomicBool,
}

// =============================================================================
// Simulated controller
// =============================================================================

/// Firmware stand-in and port opener in one: every open creates a fresh pipe
/// served by its own task, all sharing the controller state. Records every
/// frame, tracks the last `+MA` target, and answers queries from a script
/// (falling back to the current azimuth).
#[derive(Clone)]
pub struct SimulatedDome {
    state: Arc<DomeState>,
}

impl SimulatedDome {
    pub fn new(initial_azimuth: u16, script: Vec<QueryReply>) -> Self {
        let state = DomeState {
            azimuth: Mutex::new(initial_azimuth),
            script: Mutex::new(script.into()),
            ..Default::default()
        };
        Self {
            state: Arc::new(state),
        }
    }

    /// Every frame received so far, in order.
    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().clone()
    }

    /// Frame texts only.
    pub fn frames(&self) -> Vec<String> {
        self.received().into_iter().map(|r| r.frame).collect()
    }

    /// Number of times bytes arrived while a query was being answered.
    pub fn interleaved(&self) -> usize {
        self.state.interleaved.load(Ordering::SeqCst)
    }

    /// Number of times the port was opened.
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Make every further open fail, as if the device had been unplugged.
    pub fn unplug(&self) {
        self.state.refuse_opens.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PortOpener for SimulatedDome {
    async fn open(&self, config: &PortConfig) -> DomeResult<DynSerial> {
        let line = self.state.opens.fetch_add(1, Ordering::SeqCst);
        if self.state.refuse_opens.load(Ordering::SeqCst) {
            return Err(DomeError::Connect {
                port: config.port_name.clone(),
                message: "No such file or directory".into(),
            });
        }

        let (host, device) = tokio::io::duplex(256);
        tokio::spawn(serve(device, line, self.state.clone()));
        Ok(Box::new(host))
    }
}

async fn serve(device: DuplexStream, line: usize, state: Arc<DomeState>) {
    let (read_half, mut write_half) = tokio::io::split(device);
    let mut reader = BufReader::new(read_half);

    loop {
        let mut frame = Vec::new();
        match reader.read_until(b';', &mut frame).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let text = String::from_utf8_lossy(&frame).into_owned();
        state.received.lock().push(Received {
            line,
            frame: text.clone(),
        });

        if let Some(target) = text.strip_prefix("+MA").and_then(|t| t.strip_suffix(';')) {
            if let Ok(target) = target.parse() {
                *state.azimuth.lock() = target;
            }
            continue;
        }
        if text != "+G;" {
            continue;
        }

        if let Ok(Ok(pending)) = tokio::time::timeout(REPLY_DELAY, reader.fill_buf()).await {
            if !pending.is_empty() {
                state.interleaved.fetch_add(1, Ordering::SeqCst);
            }
        }

        let next = state.script.lock().pop_front().unwrap_or(QueryReply::Azimuth);
        let reply = match next {
            QueryReply::Azimuth => format!("#{};", *state.azimuth.lock()).into_bytes(),
            QueryReply::Raw(bytes) => bytes.to_vec(),
            QueryReply::Silent => continue,
            QueryReply::Late(delay) => {
                tokio::time::sleep(delay).await;
                format!("#{};", *state.azimuth.lock()).into_bytes()
            }
            QueryReply::LateRaw(delay, bytes) => {
                tokio::time::sleep(delay).await;
                bytes.to_vec()
            }
        };
        // A closed line swallows the reply.
        if write_half.write_all(&reply).await.is_err() {
            break;
        }
    }
}

// =============================================================================
// Setup helpers
// =============================================================================

/// Timing tightened for tests.
pub fn test_config() -> DomeConfig {
    let mut config = DomeConfig::default();
    config.port.name = "/dev/ttySIM0".into();
    config.timing.read_timeout_ms = 100;
    config.timing.drain_window_ms = 5;
    config.timing.resync_window_ms = 50;
    config
}

/// A disconnected driver wired to a fresh simulated controller.
pub fn simulated_driver(initial_azimuth: u16, script: Vec<QueryReply>) -> (DomeDriver, SimulatedDome) {
    let dome = SimulatedDome::new(initial_azimuth, script);
    let driver = DomeDriver::with_opener(test_config(), Arc::new(dome.clone()));
    (driver, dome)
}
