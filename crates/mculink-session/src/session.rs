//! The session: reader loop, frame dispatch, and the request API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use mculink_protocol::{
    build_read, build_write, FrameReassembler, FunctionCode, HexBytes, ProtocolError, RawFrame,
    RegisterValue, Reply, ValueType,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::directory::{ItemDirectory, ItemInfo, ReportSink};
use crate::error::{SessionError, SessionResult};
use crate::handshake::{ConnectionState, HandshakeController};
use crate::pending::{PendingReply, PendingTable, RequestKind};
use crate::report::ReportHandler;
use crate::transport::Transport;

// ============================================================================
// Shared State
// ============================================================================

/// State shared between the caller-facing [`Session`] and the reader thread.
struct Shared {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    pending: Arc<PendingTable>,
    handshake: Arc<HandshakeController>,
    reports: ReportHandler,
    directory: Arc<dyn ItemDirectory>,
    /// Cleared to stop the reader loop.
    running: AtomicBool,
}

impl Shared {
    fn reader_loop(&self) {
        let mut reassembler = FrameReassembler::new();
        let poll = self.config.poll_interval();
        info!("listener started");

        while self.running.load(Ordering::Acquire) {
            if !self.transport.is_open() {
                info!("transport closed, listener stopping");
                self.on_link_lost();
                break;
            }

            let chunk = match self.transport.bytes_available() {
                Ok(0) => None,
                Ok(available) => match self.transport.read(available) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        error!(error = %e, "transport read failed");
                        self.on_link_lost();
                        break;
                    }
                },
                Err(e) => {
                    error!(error = %e, "transport poll failed");
                    self.on_link_lost();
                    break;
                }
            };

            match chunk {
                Some(bytes) if !bytes.is_empty() => {
                    trace!(bytes = %HexBytes(&bytes), "rx");
                    reassembler.push(&bytes);
                    while self.running.load(Ordering::Acquire) {
                        let Some(frame) = reassembler.decode() else {
                            break;
                        };
                        self.dispatch(&frame);
                    }
                }
                _ => thread::sleep(poll),
            }
        }
        debug!(discarded = reassembler.discarded(), "listener stopped");
    }

    fn dispatch(&self, frame: &RawFrame) {
        debug!(frame = %HexBytes(frame.as_bytes()), "recv");
        let transport = self.transport.as_ref();
        let function = frame.function();

        if function.is_handshake() && self.handshake.offer(frame, transport) {
            return;
        }

        match function {
            FunctionCode::ReportAlarm | FunctionCode::ReportConfig | FunctionCode::ReportData => {
                self.reports.handle(frame, transport);
            }
            FunctionCode::AckWithData | FunctionCode::AckNoData => {
                if let Err(e) = frame.verify_crc() {
                    warn!(error = %e, frame = %HexBytes(frame.as_bytes()), "dropping ack");
                    return;
                }
                if !self.pending.complete(frame) {
                    debug!(frame = %HexBytes(frame.as_bytes()), "no request waiting for ack");
                }
            }
            other => debug!(function = ?other, "ignoring frame"),
        }
    }

    fn on_link_lost(&self) {
        self.running.store(false, Ordering::Release);
        self.handshake.reset();
        self.pending.clear();
    }
}

// ============================================================================
// Session
// ============================================================================

/// A host-side session with one MCU.
///
/// Requests may be issued from any number of threads; each blocks on its own
/// completion signal while the reader thread feeds acknowledgements back.
pub struct Session {
    shared: Arc<Shared>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Create a session over `transport`. No thread is started yet.
    pub fn new(
        transport: Arc<dyn Transport>,
        directory: Arc<dyn ItemDirectory>,
        sink: Arc<dyn ReportSink>,
        config: SessionConfig,
    ) -> Self {
        let handshake = Arc::new(HandshakeController::new(
            config.handshake_interval(),
            config.reset_echo,
        ));
        let reports = ReportHandler::new(Arc::clone(&directory), sink, config.report_ack);
        Session {
            shared: Arc::new(Shared {
                transport,
                config,
                pending: PendingTable::new(),
                handshake,
                reports,
                directory,
                running: AtomicBool::new(false),
            }),
            listener: Mutex::new(None),
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.shared.transport
    }

    /// Look up a register in the item directory.
    pub fn item(&self, address: u16) -> Option<ItemInfo> {
        self.shared.directory.lookup(address)
    }

    /// Number of requests awaiting an acknowledgement.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Start the reader thread. Does nothing if it is already running.
    pub fn start_listener(&self) -> SessionResult<()> {
        let mut listener = self.listener.lock();
        if let Some(handle) = listener.as_ref() {
            if !handle.is_finished() {
                return Ok(());
            }
        }
        if let Some(handle) = listener.take() {
            let _ = handle.join();
        }

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("mculink-reader".to_string())
            .spawn(move || shared.reader_loop());
        match spawned {
            Ok(handle) => {
                *listener = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Stop the reader thread, waiting at most the configured join timeout.
    pub fn stop_listener(&self) {
        self.shared.running.store(false, Ordering::Release);
        let Some(handle) = self.listener.lock().take() else {
            return;
        };

        let deadline = Instant::now() + self.shared.config.listener_join_timeout();
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(self.shared.config.poll_interval().min(Duration::from_millis(10)));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!("listener did not stop in time, detaching");
        }
    }

    /// Whether the reader thread is running.
    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the listener if needed and begin the CONNECT handshake.
    ///
    /// Calling this while connected runs the handshake again.
    pub fn connect(&self) -> SessionResult<()> {
        if !self.shared.transport.is_open() {
            return Err(SessionError::TransportClosed);
        }
        self.start_listener()?;
        self.shared
            .handshake
            .start(Arc::clone(&self.shared.transport))
    }

    /// Cancel the handshake, stop the listener, fail outstanding requests and
    /// close the transport.
    pub fn disconnect(&self) {
        self.stop_listener();
        self.shared.handshake.reset();
        self.shared.pending.clear();
        self.shared.transport.close();
        info!("disconnected");
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.handshake.state()
    }

    /// Block until connected or `timeout` elapses. Returns whether connected.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        self.shared.handshake.wait_connected(timeout)
    }

    /// Toggle echoing of MCU_RESET frames.
    pub fn set_reset_echo(&self, enabled: bool) {
        self.shared.handshake.set_reset_echo(enabled);
    }

    /// Toggle status replies to alarm/config reports.
    pub fn set_report_ack(&self, enabled: bool) {
        self.shared.reports.set_ack(enabled);
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Register `kind` and write `frame`, returning the handle to wait on.
    ///
    /// The entry exists before the first byte is written, so an immediate
    /// reply cannot be missed.
    pub fn submit(&self, kind: RequestKind, frame: &Bytes) -> SessionResult<PendingReply> {
        if !self.shared.transport.is_open() {
            return Err(SessionError::TransportClosed);
        }
        let reply = self.shared.pending.register(kind);
        self.shared.transport.write(frame)?;
        debug!(id = reply.id(), frame = %HexBytes(frame), "sent");
        Ok(reply)
    }

    /// Send a request and block for its acknowledgement.
    pub fn issue_request(
        &self,
        kind: RequestKind,
        frame: &Bytes,
        timeout: Duration,
    ) -> SessionResult<Reply> {
        let reply = self.submit(kind, frame)?;
        let id = reply.id();
        let result = reply.wait(timeout);
        if let Err(SessionError::Timeout) = result {
            debug!(id, ?kind, "request timed out");
        }
        result
    }

    /// Read a register, decoding it as `value_type`.
    pub fn read_register(&self, address: u16, value_type: ValueType) -> SessionResult<RegisterValue> {
        let kind = RequestKind::Read {
            address,
            value_type,
        };
        let reply = self.issue_request(
            kind,
            &build_read(address),
            self.shared.config.request_timeout(),
        )?;
        match reply {
            Reply::Data { value, .. } => Ok(value),
            Reply::Rejected {
                function_code,
                status,
            } => Err(SessionError::Device {
                function_code,
                status,
            }),
            Reply::Accepted { .. } => Err(ProtocolError::Malformed(
                "status acknowledgement answered a read".to_string(),
            )
            .into()),
        }
    }

    /// Write a register, packing `value` as `value_type`.
    pub fn write_register(
        &self,
        address: u16,
        value: RegisterValue,
        value_type: ValueType,
    ) -> SessionResult<()> {
        let reply = self.issue_request(
            RequestKind::Write { address },
            &build_write(address, value, value_type),
            self.shared.config.request_timeout(),
        )?;
        match reply {
            Reply::Accepted { .. } => Ok(()),
            Reply::Rejected {
                function_code,
                status,
            } => Err(SessionError::Device {
                function_code,
                status,
            }),
            Reply::Data { .. } => Err(ProtocolError::UnexpectedData.into()),
        }
    }

    /// Read a register using the type the item directory declares.
    pub fn read_item(&self, address: u16) -> SessionResult<RegisterValue> {
        let info = self
            .item(address)
            .ok_or(SessionError::UnknownAddress(address))?;
        if !info.permission.is_readable() {
            return Err(SessionError::NotReadable(address));
        }
        self.read_register(address, info.value_type)
    }

    /// Write a register using the type the item directory declares.
    ///
    /// Read-only registers are refused before anything is sent.
    pub fn write_item(&self, address: u16, value: RegisterValue) -> SessionResult<()> {
        let info = self
            .item(address)
            .ok_or(SessionError::UnknownAddress(address))?;
        if !info.permission.is_writable() {
            return Err(SessionError::NotWritable(address));
        }
        self.write_register(address, value, info.value_type)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.handshake.stop();
        // The reader notices the flag within one poll interval.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DiscardReports, Permission, StaticDirectory};
    use crate::transport::{DeviceEnd, MemoryTransport};
    use mculink_protocol::{build_status_reply, Frame, StatusCode, FUN_WRITE};

    fn session() -> (Session, DeviceEnd) {
        let (host, device) = MemoryTransport::pair();
        let directory = StaticDirectory::new()
            .with(0x0010, ValueType::UInt16, Permission::ReadWrite)
            .with(0x0020, ValueType::Int32, Permission::ReadOnly)
            .with(0x0030, ValueType::Int32, Permission::WriteOnly);
        let config = SessionConfig {
            request_timeout_ms: 200,
            poll_interval_ms: 1,
            ..SessionConfig::default()
        };
        let session = Session::new(
            Arc::new(host),
            Arc::new(directory),
            Arc::new(DiscardReports),
            config,
        );
        (session, device)
    }

    #[test]
    fn test_read_resolves_from_ack() {
        let (session, device) = session();
        session.start_listener().unwrap();

        let responder = thread::spawn(move || {
            let request = device.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(request, build_read(0x0010).to_vec());
            device.inject(
                &Frame::AckWithData {
                    address: 0x0010,
                    raw: [0, 0, 0x12, 0x34],
                }
                .encode(),
            );
        });

        assert_eq!(session.read_item(0x0010).unwrap(), RegisterValue::Int(0x1234));
        responder.join().unwrap();
        assert_eq!(session.pending_requests(), 0);
        session.stop_listener();
    }

    #[test]
    fn test_write_rejection_surfaces_status() {
        let (session, device) = session();
        session.start_listener().unwrap();

        let responder = thread::spawn(move || {
            device.recv_timeout(Duration::from_secs(1)).unwrap();
            device.inject(&build_status_reply(FUN_WRITE, StatusCode::NoPermission));
        });

        let err = session
            .write_register(0x0010, RegisterValue::Int(1), ValueType::UInt16)
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Device {
                function_code: FUN_WRITE,
                status: StatusCode::NoPermission
            }
        ));
        responder.join().unwrap();
    }

    #[test]
    fn test_permissions_checked_before_sending() {
        let (session, device) = session();
        assert!(matches!(
            session.write_item(0x0020, RegisterValue::Int(1)),
            Err(SessionError::NotWritable(0x0020))
        ));
        assert!(matches!(
            session.read_item(0x0030),
            Err(SessionError::NotReadable(0x0030))
        ));
        assert!(matches!(
            session.read_item(0x0099),
            Err(SessionError::UnknownAddress(0x0099))
        ));
        assert!(device.try_recv().is_none());
    }

    #[test]
    fn test_read_times_out_without_listener_reply() {
        let (session, _device) = session();
        session.start_listener().unwrap();
        assert!(matches!(
            session.read_register(0x0010, ValueType::UInt16),
            Err(SessionError::Timeout)
        ));
        assert_eq!(session.pending_requests(), 0);
    }

    #[test]
    fn test_corrupt_ack_is_dropped() {
        let (session, device) = session();
        session.start_listener().unwrap();

        let responder = thread::spawn(move || {
            device.recv_timeout(Duration::from_secs(1)).unwrap();
            let mut ack = build_status_reply(FUN_WRITE, StatusCode::Ok).to_vec();
            let last = ack.len() - 1;
            ack[last] ^= 0xFF;
            device.inject(&ack);
        });

        assert!(matches!(
            session.write_register(0x0010, RegisterValue::Int(1), ValueType::UInt16),
            Err(SessionError::Timeout)
        ));
        responder.join().unwrap();
    }

    #[test]
    fn test_transport_loss_stops_listener() {
        let (session, device) = session();
        session.start_listener().unwrap();
        assert!(session.is_listening());
        device.close();

        let deadline = Instant::now() + Duration::from_secs(1);
        while session.is_listening() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!session.is_listening());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(matches!(
            session.read_register(0x0010, ValueType::UInt16),
            Err(SessionError::TransportClosed)
        ));
    }

    #[test]
    fn test_disconnect_closes_transport() {
        let (session, device) = session();
        session.start_listener().unwrap();
        session.disconnect();
        assert!(!device.is_open());
        assert!(!session.is_listening());
    }
}
