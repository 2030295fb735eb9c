//! Connection handshake and MCU reset handling.
//!
//! While handshaking, a background thread sends a CONNECT frame every
//! interval. The reader thread offers every zero-length CONNECT/MCU_RESET frame
//! to [`HandshakeController::offer`]; a CRC-valid CONNECT echo completes the
//! handshake and stops the sender.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use mculink_protocol::{
    build_handshake, build_status_reply, FunctionCode, HexBytes, RawFrame, StatusCode,
    FUN_MCU_RESET,
};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use crate::error::SessionResult;
use crate::transport::Transport;

/// Link state as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No handshake in progress.
    #[default]
    Disconnected,
    /// Sending CONNECT frames, waiting for the echo.
    Handshaking,
    /// The device echoed CONNECT.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Owns the connection state and the CONNECT sender thread.
pub struct HandshakeController {
    state: Mutex<ConnectionState>,
    changed: Condvar,
    interval: Duration,
    reset_echo: AtomicBool,
    /// Dropping the sender wakes the handshake thread and stops it.
    stop_tx: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HandshakeController {
    /// Create a controller that resends CONNECT every `interval`.
    pub fn new(interval: Duration, reset_echo: bool) -> Self {
        HandshakeController {
            state: Mutex::new(ConnectionState::Disconnected),
            changed: Condvar::new(),
            interval,
            reset_echo: AtomicBool::new(reset_echo),
            stop_tx: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether MCU_RESET frames are echoed back.
    pub fn reset_echo(&self) -> bool {
        self.reset_echo.load(Ordering::Relaxed)
    }

    /// Toggle the MCU_RESET echo policy.
    pub fn set_reset_echo(&self, enabled: bool) {
        self.reset_echo.store(enabled, Ordering::Relaxed);
    }

    /// Enter `Handshaking` and start sending CONNECT frames.
    ///
    /// A connected link is handshaken again from scratch. Does nothing while a
    /// handshake is already running.
    pub fn start(self: &Arc<Self>, transport: Arc<dyn Transport>) -> SessionResult<()> {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Handshaking {
                return Ok(());
            }
            *state = ConnectionState::Handshaking;
        }
        self.changed.notify_all();
        self.stop_tx.lock().take();
        self.join_worker();

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        *self.stop_tx.lock() = Some(stop_tx);

        let controller = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("mculink-handshake".to_string())
            .spawn(move || {
                let frame = build_handshake();
                info!("handshake started");
                while controller.state() == ConnectionState::Handshaking {
                    match transport.write(&frame) {
                        Ok(_) => trace!(frame = %HexBytes(&frame), "sent handshake"),
                        Err(e) => {
                            warn!(error = %e, "handshake write failed");
                            break;
                        }
                    }
                    match stop_rx.recv_timeout(controller.interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
                debug!("handshake thread exiting");
            });

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                self.stop_tx.lock().take();
                Err(e.into())
            }
        }
    }

    /// Cancel the handshake thread and wait for it.
    ///
    /// The connection state is left untouched.
    pub fn stop(&self) {
        self.stop_tx.lock().take();
        self.join_worker();
    }

    /// Cancel the handshake and return to `Disconnected`.
    pub fn reset(&self) {
        self.stop();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Block until `Connected` or `timeout` elapses. Returns whether connected.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        self.changed
            .wait_while_for(&mut state, |s| *s != ConnectionState::Connected, timeout);
        *state == ConnectionState::Connected
    }

    /// Handle a CONNECT or MCU_RESET frame observed on the link.
    ///
    /// Returns true when the frame was consumed. Frames with a payload are
    /// never handshake frames and are left for ordinary dispatch.
    pub fn offer(&self, frame: &RawFrame, transport: &dyn Transport) -> bool {
        if !frame.function().is_handshake() || frame.declared_len() != 0 {
            return false;
        }

        match frame.function() {
            FunctionCode::McuReset => self.on_reset(frame, transport),
            FunctionCode::Connect => {
                if !frame.crc_valid() {
                    debug!(frame = %HexBytes(frame.as_bytes()), "handshake echo failed crc");
                    return false;
                }
                // Only a running handshake may complete; a stray echo after
                // disconnect leaves the state alone.
                match self.complete_handshake() {
                    ConnectionState::Handshaking => {
                        self.stop_tx.lock().take();
                        info!("device connected");
                    }
                    other => debug!(state = %other, "ignoring handshake echo"),
                }
                true
            }
            _ => false,
        }
    }

    fn on_reset(&self, frame: &RawFrame, transport: &dyn Transport) -> bool {
        let echo = self.reset_echo();
        if frame.crc_valid() {
            info!("device reset");
            if echo {
                send(transport, frame.as_bytes(), "reset echo");
            }
            return true;
        }

        warn!(frame = %HexBytes(frame.as_bytes()), "reset frame failed crc");
        if echo {
            let reply = build_status_reply(FUN_MCU_RESET, StatusCode::CrcError);
            send(transport, &reply, "reset crc error reply");
        }
        false
    }

    /// Move `Handshaking` to `Connected` under one lock. Returns the state
    /// found.
    fn complete_handshake(&self) -> ConnectionState {
        let mut state = self.state.lock();
        let found = *state;
        if found == ConnectionState::Handshaking {
            *state = ConnectionState::Connected;
            debug!(from = %found, to = %*state, "connection state changed");
            self.changed.notify_all();
        }
        found
    }

    fn set_state(&self, next: ConnectionState) -> ConnectionState {
        let previous = std::mem::replace(&mut *self.state.lock(), next);
        if previous != next {
            debug!(from = %previous, to = %next, "connection state changed");
            self.changed.notify_all();
        }
        previous
    }

    fn join_worker(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn send(transport: &dyn Transport, bytes: &[u8], what: &str) {
    match transport.write(bytes) {
        Ok(_) => debug!(frame = %HexBytes(bytes), "sent {}", what),
        Err(e) => warn!(error = %e, "failed to send {}", what),
    }
}
