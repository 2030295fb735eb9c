//! End-to-end tests: a [`Session`] talking to a simulated MCU over the
//! in-memory transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mculink_protocol::{
    build_status_reply, crc16, encode_frame, Frame, FunctionCode, RegisterValue, ReportKind,
    StatusCode, ValueType, FUN_REPORT_ALARM, FUN_UPGRADE_CRC, FUN_UPGRADE_DATA, FUN_WRITE,
};
use mculink_session::{
    ConnectionState, DeviceEnd, MemoryTransport, Permission, Session, SessionConfig,
    SessionError, StaticDirectory, UpgradeConfig,
};
use parking_lot::Mutex;

// ============================================================================
// Simulated MCU
// ============================================================================

/// Device thread answering host frames through a responder closure.
struct FakeMcu {
    received: Arc<Mutex<Vec<Frame>>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FakeMcu {
    fn spawn<F>(device: DeviceEnd, mut respond: F) -> Self
    where
        F: FnMut(&Frame) -> Vec<Vec<u8>> + Send + 'static,
    {
        let received = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let received = Arc::clone(&received);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let Some(bytes) = device.recv_timeout(Duration::from_millis(5)) else {
                        continue;
                    };
                    let frame = Frame::decode(&bytes).expect("host sent a valid frame");
                    received.lock().push(frame.clone());
                    for reply in respond(&frame) {
                        device.inject(&reply);
                    }
                }
            })
        };

        FakeMcu {
            received,
            stop,
            thread: Some(thread),
        }
    }

    fn received(&self) -> Vec<Frame> {
        self.received.lock().clone()
    }

    fn count(&self, function: FunctionCode) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|frame| frame.function() == function)
            .count()
    }
}

impl Drop for FakeMcu {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn ack(function_code: u8, status: StatusCode) -> Vec<u8> {
    build_status_reply(function_code, status).to_vec()
}

fn data_ack(address: u16, raw: [u8; 4]) -> Vec<u8> {
    Frame::AckWithData { address, raw }.encode().to_vec()
}

fn test_config() -> SessionConfig {
    SessionConfig {
        request_timeout_ms: 500,
        poll_interval_ms: 1,
        handshake_interval_ms: 20,
        upgrade: UpgradeConfig {
            packet_timeout_ms: 100,
            confirm_timeout_ms: 300,
            max_retries: 3,
            packet_gap_ms: 0,
        },
        ..SessionConfig::default()
    }
}

type Reports = Arc<Mutex<Vec<(ReportKind, u16, RegisterValue)>>>;

fn start_session(config: SessionConfig) -> (Session, DeviceEnd, Reports) {
    let (host, device) = MemoryTransport::pair();
    let directory: StaticDirectory = (0u16..64)
        .map(|address| {
            (
                address,
                mculink_session::ItemInfo::new(ValueType::Int32, Permission::ReadWrite),
            )
        })
        .collect();
    let directory = directory.with(0x0100, ValueType::Float32, Permission::ReadOnly);

    let reports: Reports = Arc::new(Mutex::new(Vec::new()));
    let sink_reports = Arc::clone(&reports);
    let sink = move |kind: ReportKind, address: u16, value: RegisterValue| {
        sink_reports.lock().push((kind, address, value));
    };

    let session = Session::new(Arc::new(host), Arc::new(directory), Arc::new(sink), config);
    session.start_listener().expect("listener starts");
    (session, device, reports)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

// ============================================================================
// Handshake
// ============================================================================

#[test]
fn test_handshake_connects_on_echo() {
    let (session, device, _) = start_session(test_config());
    let mut seen = 0;
    let mcu = FakeMcu::spawn(
        device,
        move |frame| {
            seen += 1;
            // Ignore the first CONNECT to exercise the resend loop.
            if *frame == Frame::Connect && seen >= 2 {
                vec![Frame::Connect.encode().to_vec()]
            } else {
                Vec::new()
            }
        },
    );

    session.connect().unwrap();
    assert!(session.wait_connected(Duration::from_secs(2)));
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(mcu.count(FunctionCode::Connect) >= 2);

    thread::sleep(Duration::from_millis(30));
    let sent = mcu.count(FunctionCode::Connect);
    thread::sleep(Duration::from_millis(80));
    assert_eq!(mcu.count(FunctionCode::Connect), sent);
}

#[test]
fn test_reset_echoed_when_enabled() {
    let (session, device, _) = start_session(test_config());
    session.set_reset_echo(true);
    let reset = Frame::McuReset.encode();
    device.inject(&reset);

    let echoed = device.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(echoed, reset.to_vec());
}

#[test]
fn test_disconnect_resets_state() {
    let (session, device, _) = start_session(test_config());
    let _mcu = FakeMcu::spawn(
        device,
        |frame| match frame {
            Frame::Connect => vec![Frame::Connect.encode().to_vec()],
            _ => Vec::new(),
        },
    );
    session.connect().unwrap();
    assert!(session.wait_connected(Duration::from_secs(2)));

    session.disconnect();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(matches!(
        session.read_item(0x0001),
        Err(SessionError::TransportClosed)
    ));
}

#[test]
fn test_disconnect_during_echo_flood_stays_disconnected() {
    let (session, device, _) = start_session(test_config());
    let _mcu = FakeMcu::spawn(
        device.clone(),
        |frame| match frame {
            Frame::Connect => vec![Frame::Connect.encode().to_vec()],
            _ => Vec::new(),
        },
    );
    session.connect().unwrap();
    assert!(session.wait_connected(Duration::from_secs(2)));

    let echo = Frame::Connect.encode();
    let flood: Vec<u8> = echo.iter().copied().cycle().take(echo.len() * 20_000).collect();
    device.inject(&flood);
    thread::sleep(Duration::from_millis(3));

    session.disconnect();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[test]
fn test_connect_again_after_connected_rehandshakes() {
    let (session, device, _) = start_session(test_config());
    let mcu = FakeMcu::spawn(
        device,
        |frame| match frame {
            Frame::Connect => vec![Frame::Connect.encode().to_vec()],
            _ => Vec::new(),
        },
    );
    session.connect().unwrap();
    assert!(session.wait_connected(Duration::from_secs(2)));
    let before = mcu.count(FunctionCode::Connect);

    session.connect().unwrap();
    assert!(session.wait_connected(Duration::from_secs(2)));
    assert!(wait_until(Duration::from_secs(1), || {
        mcu.count(FunctionCode::Connect) > before
    }));
}

// ============================================================================
// Reads and Writes
// ============================================================================

#[test]
fn test_concurrent_reads_resolve_to_their_own_address() {
    const READS: usize = 16;
    let (session, device, _) = start_session(test_config());

    // Collect every read first, then answer them in reverse order.
    let mut queued = Vec::new();
    let _mcu = FakeMcu::spawn(
        device,
        move |frame| {
            if let Frame::Read { address } = frame {
                queued.push(*address);
            }
            if queued.len() == READS {
                queued
                    .drain(..)
                    .rev()
                    .map(|address| data_ack(address, (address as i32 * 3).to_be_bytes()))
                    .collect()
            } else {
                Vec::new()
            }
        },
    );

    let results: Vec<(u16, RegisterValue)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..READS as u16)
            .map(|address| {
                let session = &session;
                scope.spawn(move || (address, session.read_item(address).unwrap()))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (address, value) in results {
        assert_eq!(value, RegisterValue::Int(address as i64 * 3));
    }
    assert_eq!(session.pending_requests(), 0);
}

#[test]
fn test_write_item_uses_declared_type() {
    let (session, device, _) = start_session(test_config());
    let mcu = FakeMcu::spawn(
        device,
        |frame| match frame {
            Frame::Write { .. } => vec![ack(FUN_WRITE, StatusCode::Ok)],
            _ => Vec::new(),
        },
    );

    session.write_item(0x0005, RegisterValue::Int(-1)).unwrap();
    assert_eq!(
        mcu.received(),
        vec![Frame::Write {
            address: 0x0005,
            raw: [0xFF, 0xFF, 0xFF, 0xFF]
        }]
    );
}

#[test]
fn test_read_only_item_never_written() {
    let (session, device, _) = start_session(test_config());
    let mcu = FakeMcu::spawn(device, |_| Vec::new());
    assert!(matches!(
        session.write_item(0x0100, RegisterValue::Float(1.0)),
        Err(SessionError::NotWritable(0x0100))
    ));
    thread::sleep(Duration::from_millis(20));
    assert!(mcu.received().is_empty());
}

#[test]
fn test_late_ack_after_timeout_is_dropped() {
    let config = SessionConfig {
        request_timeout_ms: 50,
        ..test_config()
    };
    let (session, device, _) = start_session(config);
    let _mcu = FakeMcu::spawn(
        device,
        |frame| match frame {
            Frame::Read { address: 0x0007 } => {
                thread::sleep(Duration::from_millis(120));
                vec![data_ack(0x0007, 7i32.to_be_bytes())]
            }
            Frame::Read { address } => vec![data_ack(*address, 1i32.to_be_bytes())],
            _ => Vec::new(),
        },
    );

    assert!(matches!(session.read_item(0x0007), Err(SessionError::Timeout)));
    assert_eq!(session.pending_requests(), 0);
    thread::sleep(Duration::from_millis(150));

    assert_eq!(session.read_item(0x0008).unwrap(), RegisterValue::Int(1));
    assert_eq!(session.pending_requests(), 0);
}

#[test]
fn test_noise_between_frames_is_skipped() {
    let (session, device, _) = start_session(test_config());
    let _mcu = FakeMcu::spawn(
        device,
        |frame| match frame {
            Frame::Read { address } => {
                let mut bytes = vec![0x00, 0xFF, 0x5A, 0x77, 0x13];
                bytes.extend(data_ack(*address, 42i32.to_be_bytes()));
                vec![bytes]
            }
            _ => Vec::new(),
        },
    );
    assert_eq!(session.read_item(0x0003).unwrap(), RegisterValue::Int(42));
}

// ============================================================================
// Reports
// ============================================================================

#[test]
fn test_reports_forwarded_and_acknowledged() {
    let config = SessionConfig {
        report_ack: true,
        ..test_config()
    };
    let (_session, device, reports) = start_session(config);

    let mut payload = Vec::new();
    payload.extend_from_slice(&0x0002u16.to_be_bytes());
    payload.extend_from_slice(&9i32.to_be_bytes());
    payload.extend_from_slice(&0x0100u16.to_be_bytes());
    payload.extend_from_slice(&2.5f32.to_be_bytes());
    device.inject(&encode_frame(FunctionCode::ReportAlarm, &payload));

    let reply = device.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(reply, ack(FUN_REPORT_ALARM, StatusCode::Ok));
    assert_eq!(
        reports.lock().as_slice(),
        &[
            (ReportKind::Alarm, 0x0002, RegisterValue::Int(9)),
            (ReportKind::Alarm, 0x0100, RegisterValue::Float(2.5)),
        ]
    );

    device.inject(&encode_frame(FunctionCode::ReportData, &payload[..6]));
    assert!(wait_until(Duration::from_secs(1), || reports.lock().len() == 3));
    assert!(device.recv_timeout(Duration::from_millis(30)).is_none());
}

// ============================================================================
// Firmware Upgrade
// ============================================================================

fn image(packets: usize) -> Vec<u8> {
    (0..packets * 2048).map(|i| (i * 7 % 251) as u8).collect()
}

#[test]
fn test_upgrade_two_packets() {
    let (session, device, _) = start_session(test_config());
    let firmware = image(2);
    let expected_crc = crc16(&firmware);
    let mcu = FakeMcu::spawn(
        device,
        move |frame| match frame {
            Frame::UpgradeData { .. } => vec![ack(FUN_UPGRADE_DATA, StatusCode::Ok)],
            Frame::UpgradeCrc {
                image_crc,
                packet_count,
            } => {
                let status = if *image_crc == expected_crc && *packet_count == 2 {
                    StatusCode::Ok
                } else {
                    StatusCode::UpgradeCrcError
                };
                vec![ack(FUN_UPGRADE_CRC, status)]
            }
            _ => Vec::new(),
        },
    );

    let mut progress = Vec::new();
    let report = session
        .upgrade(&firmware, |done, total| progress.push((done, total)))
        .unwrap();

    assert_eq!(report.packets, 2);
    assert_eq!(report.attempts, 1);
    assert_eq!(progress, vec![(1, 2), (2, 2)]);

    let received = mcu.received();
    assert_eq!(received.len(), 3);
    match (&received[0], &received[1]) {
        (
            Frame::UpgradeData { index: 0, chunk: first },
            Frame::UpgradeData { index: 1, chunk: second },
        ) => {
            assert_eq!(&first[..], &firmware[..2048]);
            assert_eq!(&second[..], &firmware[2048..]);
        }
        other => panic!("unexpected frames: {:?}", other),
    }
}

#[test]
fn test_upgrade_rejected_packet_aborts() {
    let (session, device, _) = start_session(test_config());
    let mcu = FakeMcu::spawn(
        device,
        |frame| match frame {
            Frame::UpgradeData { index: 0, .. } => vec![ack(FUN_UPGRADE_DATA, StatusCode::Ok)],
            Frame::UpgradeData { .. } => vec![ack(FUN_UPGRADE_DATA, StatusCode::DataError)],
            _ => Vec::new(),
        },
    );

    let err = session.upgrade(&image(2), |_, _| {}).unwrap_err();
    assert!(matches!(
        err,
        SessionError::PacketRejected {
            packet: 2,
            status: StatusCode::DataError
        }
    ));
    assert_eq!(err.to_string(), "upgrade pack 2 failed, status: DATA_ERROR");

    thread::sleep(Duration::from_millis(50));
    assert_eq!(mcu.count(FunctionCode::UpgradeData), 2);
    assert_eq!(mcu.count(FunctionCode::UpgradeCrc), 0);
}

#[test]
fn test_upgrade_packet_timeout_retries_then_fails() {
    let (session, device, _) = start_session(test_config());
    let mcu = FakeMcu::spawn(device, |_| Vec::new());

    let err = session.upgrade(&image(2), |_, _| {}).unwrap_err();
    assert!(matches!(
        err,
        SessionError::PacketTimeout {
            packet: 1,
            attempts: 3
        }
    ));

    assert!(wait_until(Duration::from_secs(1), || {
        mcu.count(FunctionCode::UpgradeData) == 3
    }));
    assert!(mcu
        .received()
        .iter()
        .all(|frame| matches!(frame, Frame::UpgradeData { index: 0, .. })));
}

#[test]
fn test_upgrade_restarts_after_crc_failure() {
    let (session, device, _) = start_session(test_config());
    let mut confirmations = 0;
    let mcu = FakeMcu::spawn(
        device,
        move |frame| match frame {
            Frame::UpgradeData { .. } => vec![ack(FUN_UPGRADE_DATA, StatusCode::Ok)],
            Frame::UpgradeCrc { .. } => {
                confirmations += 1;
                let status = if confirmations == 1 {
                    StatusCode::UpgradeCrcError
                } else {
                    StatusCode::Ok
                };
                vec![ack(FUN_UPGRADE_CRC, status)]
            }
            _ => Vec::new(),
        },
    );

    let report = session.upgrade(&image(2), |_, _| {}).unwrap();
    assert_eq!(report.attempts, 2);
    assert_eq!(mcu.count(FunctionCode::UpgradeData), 4);
    assert_eq!(mcu.count(FunctionCode::UpgradeCrc), 2);
}

#[test]
fn test_upgrade_restarts_after_confirmation_timeout() {
    let (session, device, _) = start_session(test_config());
    let mut confirmations = 0;
    let mcu = FakeMcu::spawn(
        device,
        move |frame| match frame {
            Frame::UpgradeData { .. } => vec![ack(FUN_UPGRADE_DATA, StatusCode::Ok)],
            Frame::UpgradeCrc { .. } => {
                confirmations += 1;
                // Stay silent on the first confirmation request.
                if confirmations == 1 {
                    Vec::new()
                } else {
                    vec![ack(FUN_UPGRADE_CRC, StatusCode::Ok)]
                }
            }
            _ => Vec::new(),
        },
    );

    let report = session.upgrade(&image(2), |_, _| {}).unwrap();
    assert_eq!(report.attempts, 2);
    assert_eq!(mcu.count(FunctionCode::UpgradeData), 2 * 2);
    assert_eq!(mcu.count(FunctionCode::UpgradeCrc), 2);
}

#[test]
fn test_upgrade_gives_up_after_max_attempts() {
    let (session, device, _) = start_session(test_config());
    let mcu = FakeMcu::spawn(
        device,
        |frame| match frame {
            Frame::UpgradeData { .. } => vec![ack(FUN_UPGRADE_DATA, StatusCode::Ok)],
            Frame::UpgradeCrc { .. } => vec![ack(FUN_UPGRADE_CRC, StatusCode::UpgradeCrcError)],
            _ => Vec::new(),
        },
    );

    let err = session.upgrade(&image(1), |_, _| {}).unwrap_err();
    assert!(matches!(err, SessionError::UpgradeFailed { attempts: 3 }));
    assert_eq!(mcu.count(FunctionCode::UpgradeCrc), 3);
}
