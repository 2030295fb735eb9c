//! Frame layout, function codes, and the typed [`Frame`] representation.
//!
//! Every frame on the wire has the same shape, in both directions:
//!
//! ```text
//! +------+----------+---------+---------+-----------------+--------+--------+
//! | 0x5A | function | len_hi  | len_lo  | payload[0..len] | crc_hi | crc_lo |
//! +------+----------+---------+---------+-----------------+--------+--------+
//! ```
//!
//! The CRC covers everything from the head byte to the end of the payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::*;
use crate::crc::crc16;
use crate::error::{ProtocolError, StatusCode};

/// Function code carried in byte 1 of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    /// Register read request.
    Read,
    /// Register write request.
    Write,
    /// Firmware upgrade packet.
    UpgradeData,
    /// Firmware upgrade confirmation.
    UpgradeCrc,
    /// Device reset / keepalive.
    McuReset,
    /// Connection handshake.
    Connect,
    /// Alarm report pushed by the device.
    ReportAlarm,
    /// Configuration report pushed by the device.
    ReportConfig,
    /// Live data report pushed by the device.
    ReportData,
    /// Acknowledgement with address and value.
    AckWithData,
    /// Acknowledgement with function code and status.
    AckNoData,
}

impl FunctionCode {
    /// Whether this code is a device-pushed report.
    pub fn is_report(self) -> bool {
        matches!(
            self,
            FunctionCode::ReportAlarm | FunctionCode::ReportConfig | FunctionCode::ReportData
        )
    }

    /// Whether this code takes part in connection establishment.
    pub fn is_handshake(self) -> bool {
        matches!(self, FunctionCode::Connect | FunctionCode::McuReset)
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            FUN_READ => Ok(FunctionCode::Read),
            FUN_WRITE => Ok(FunctionCode::Write),
            FUN_UPGRADE_DATA => Ok(FunctionCode::UpgradeData),
            FUN_UPGRADE_CRC => Ok(FunctionCode::UpgradeCrc),
            FUN_MCU_RESET => Ok(FunctionCode::McuReset),
            FUN_CONNECT => Ok(FunctionCode::Connect),
            FUN_REPORT_ALARM => Ok(FunctionCode::ReportAlarm),
            FUN_REPORT_CONFIG => Ok(FunctionCode::ReportConfig),
            FUN_REPORT_DATA => Ok(FunctionCode::ReportData),
            ACK_WITH_DATA => Ok(FunctionCode::AckWithData),
            ACK_NO_DATA => Ok(FunctionCode::AckNoData),
            _ => Err(ProtocolError::UnknownFunctionCode(code)),
        }
    }
}

impl From<FunctionCode> for u8 {
    fn from(code: FunctionCode) -> Self {
        match code {
            FunctionCode::Read => FUN_READ,
            FunctionCode::Write => FUN_WRITE,
            FunctionCode::UpgradeData => FUN_UPGRADE_DATA,
            FunctionCode::UpgradeCrc => FUN_UPGRADE_CRC,
            FunctionCode::McuReset => FUN_MCU_RESET,
            FunctionCode::Connect => FUN_CONNECT,
            FunctionCode::ReportAlarm => FUN_REPORT_ALARM,
            FunctionCode::ReportConfig => FUN_REPORT_CONFIG,
            FunctionCode::ReportData => FUN_REPORT_DATA,
            FunctionCode::AckWithData => ACK_WITH_DATA,
            FunctionCode::AckNoData => ACK_NO_DATA,
        }
    }
}

// ============================================================================
// Raw Frames
// ============================================================================

/// A structurally complete frame as cut from the byte stream.
///
/// The head byte, function code, and length field are guaranteed consistent.
/// The CRC is *not* checked on construction: handshake handling needs to see
/// CRC-invalid reset frames in order to answer them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    bytes: Bytes,
    function: FunctionCode,
}

impl RawFrame {
    /// Wrap a complete frame, checking everything except the CRC.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let bytes = bytes.into();
        check_structure(&bytes)?;
        let function = FunctionCode::try_from(bytes[1])?;
        Ok(RawFrame { bytes, function })
    }

    /// Wrap bytes the reassembler has already checked.
    pub(crate) fn from_validated(bytes: Bytes, function: FunctionCode) -> Self {
        RawFrame { bytes, function }
    }

    /// Function code of the frame.
    pub fn function(&self) -> FunctionCode {
        self.function
    }

    /// Value of the length field.
    pub fn declared_len(&self) -> usize {
        u16::from_be_bytes([self.bytes[2], self.bytes[3]]) as usize
    }

    /// Payload bytes (between the length field and the CRC).
    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..self.bytes.len() - CRC_SIZE]
    }

    /// CRC carried in the trailer.
    pub fn received_crc(&self) -> u16 {
        let n = self.bytes.len();
        u16::from_be_bytes([self.bytes[n - 2], self.bytes[n - 1]])
    }

    /// CRC computed over head..payload.
    pub fn computed_crc(&self) -> u16 {
        crc16(&self.bytes[..self.bytes.len() - CRC_SIZE])
    }

    /// Whether the trailer matches the contents.
    pub fn crc_valid(&self) -> bool {
        self.received_crc() == self.computed_crc()
    }

    /// Fail with [`ProtocolError::CrcMismatch`] unless the CRC is valid.
    pub fn verify_crc(&self) -> Result<(), ProtocolError> {
        let received = self.received_crc();
        let computed = self.computed_crc();
        if received != computed {
            return Err(ProtocolError::CrcMismatch { received, computed });
        }
        Ok(())
    }

    /// The complete frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume into the underlying buffer.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// Total frame size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Frames are never empty; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Check head, minimum size, and that the length field matches the frame size.
pub(crate) fn check_structure(bytes: &[u8]) -> Result<(), ProtocolError> {
    if bytes.len() < MIN_FRAME_SIZE {
        return Err(ProtocolError::Malformed(format!(
            "frame too short: expected at least {} bytes, got {}",
            MIN_FRAME_SIZE,
            bytes.len()
        )));
    }
    if bytes[0] != FRAME_HEAD {
        return Err(ProtocolError::Malformed(format!(
            "invalid head byte 0x{:02X}",
            bytes[0]
        )));
    }
    let declared = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    if bytes.len() != MIN_FRAME_SIZE + declared {
        return Err(ProtocolError::Malformed(format!(
            "length field says {} payload bytes but frame holds {}",
            declared,
            bytes.len() - MIN_FRAME_SIZE
        )));
    }
    Ok(())
}

/// Assemble head, function, length, payload, and CRC into one frame.
pub fn encode_frame(function: FunctionCode, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MIN_FRAME_SIZE + payload.len());
    buf.put_u8(FRAME_HEAD);
    buf.put_u8(function.into());
    buf.put_u16(payload.len() as u16);
    buf.extend_from_slice(payload);
    let crc = crc16(&buf);
    buf.put_u16(crc);
    buf.freeze()
}

// ============================================================================
// Typed Frames
// ============================================================================

/// Which report a device-initiated frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    /// 0x40.
    Alarm,
    /// 0x50.
    Config,
    /// 0x60. The device does not expect an acknowledgement.
    Data,
}

impl ReportKind {
    /// Function code carrying this report.
    pub fn function(self) -> FunctionCode {
        match self {
            ReportKind::Alarm => FunctionCode::ReportAlarm,
            ReportKind::Config => FunctionCode::ReportConfig,
            ReportKind::Data => FunctionCode::ReportData,
        }
    }

    /// Report kind for a function code, if it is one.
    pub fn from_function(function: FunctionCode) -> Option<Self> {
        match function {
            FunctionCode::ReportAlarm => Some(ReportKind::Alarm),
            FunctionCode::ReportConfig => Some(ReportKind::Config),
            FunctionCode::ReportData => Some(ReportKind::Data),
            _ => None,
        }
    }

    /// Whether the device expects a status reply to this report.
    pub fn expects_reply(self) -> bool {
        self != ReportKind::Data
    }
}

/// One `{address, raw_value}` record of a device report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportRecord {
    /// Register address.
    pub address: u16,
    /// Undecoded 4-byte value.
    pub raw: [u8; VALUE_SIZE],
}

/// A fully decoded frame, one variant per function code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Read one register.
    Read {
        /// Register address.
        address: u16,
    },
    /// Write one register.
    Write {
        /// Register address.
        address: u16,
        /// Packed value.
        raw: [u8; VALUE_SIZE],
    },
    /// One firmware upgrade packet.
    UpgradeData {
        /// Zero-based packet index.
        index: u16,
        /// Image chunk, zero-padded to [`UPGRADE_PACKET_SIZE`].
        chunk: Bytes,
    },
    /// Whole-image confirmation.
    UpgradeCrc {
        /// CRC16 of the complete image.
        image_crc: u16,
        /// Number of packets sent.
        packet_count: u16,
    },
    /// Device reset / keepalive.
    McuReset,
    /// Handshake request or echo.
    Connect,
    /// Device-pushed register values.
    Report {
        /// Which report.
        kind: ReportKind,
        /// Records in wire order.
        records: Vec<ReportRecord>,
    },
    /// Read acknowledgement.
    AckWithData {
        /// Register address.
        address: u16,
        /// Undecoded 4-byte value.
        raw: [u8; VALUE_SIZE],
    },
    /// Status acknowledgement.
    AckNoData {
        /// Function code being acknowledged.
        function_code: u8,
        /// Result of the operation.
        status: StatusCode,
    },
}

impl Frame {
    /// Function code of this frame.
    pub fn function(&self) -> FunctionCode {
        match self {
            Frame::Read { .. } => FunctionCode::Read,
            Frame::Write { .. } => FunctionCode::Write,
            Frame::UpgradeData { .. } => FunctionCode::UpgradeData,
            Frame::UpgradeCrc { .. } => FunctionCode::UpgradeCrc,
            Frame::McuReset => FunctionCode::McuReset,
            Frame::Connect => FunctionCode::Connect,
            Frame::Report { kind, .. } => kind.function(),
            Frame::AckWithData { .. } => FunctionCode::AckWithData,
            Frame::AckNoData { .. } => FunctionCode::AckNoData,
        }
    }

    /// Encode to wire bytes, CRC included.
    pub fn encode(&self) -> Bytes {
        let mut payload = BytesMut::new();
        match self {
            Frame::Read { address } => payload.put_u16(*address),
            Frame::Write { address, raw } | Frame::AckWithData { address, raw } => {
                payload.put_u16(*address);
                payload.extend_from_slice(raw);
            }
            Frame::UpgradeData { index, chunk } => {
                payload.reserve(UPGRADE_DATA_PAYLOAD_SIZE);
                payload.put_u16(*index);
                payload.extend_from_slice(chunk);
                if chunk.len() < UPGRADE_PACKET_SIZE {
                    payload.put_bytes(0, UPGRADE_PACKET_SIZE - chunk.len());
                }
            }
            Frame::UpgradeCrc {
                image_crc,
                packet_count,
            } => {
                payload.put_u16(*image_crc);
                payload.put_u16(*packet_count);
            }
            Frame::McuReset | Frame::Connect => {}
            Frame::Report { records, .. } => {
                for record in records {
                    payload.put_u16(record.address);
                    payload.extend_from_slice(&record.raw);
                }
            }
            Frame::AckNoData {
                function_code,
                status,
            } => {
                payload.put_u8(*function_code);
                payload.put_u8((*status).into());
            }
        }
        encode_frame(self.function(), &payload)
    }

    /// Decode a complete frame, validating structure, CRC, and payload shape.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw = RawFrame::from_bytes(Bytes::copy_from_slice(bytes))?;
        raw.verify_crc()?;
        Frame::from_raw(&raw)
    }

    /// Interpret the payload of an already-cut frame. The CRC is not re-checked.
    pub fn from_raw(raw: &RawFrame) -> Result<Self, ProtocolError> {
        let p = raw.payload();
        let frame = match raw.function() {
            FunctionCode::Read => {
                expect_len(p, ADDRESS_SIZE)?;
                Frame::Read {
                    address: read_u16(p, 0),
                }
            }
            FunctionCode::Write => {
                expect_len(p, REPORT_RECORD_SIZE)?;
                Frame::Write {
                    address: read_u16(p, 0),
                    raw: read_value(p, ADDRESS_SIZE),
                }
            }
            FunctionCode::UpgradeData => {
                expect_len(p, UPGRADE_DATA_PAYLOAD_SIZE)?;
                Frame::UpgradeData {
                    index: read_u16(p, 0),
                    chunk: Bytes::copy_from_slice(&p[2..]),
                }
            }
            FunctionCode::UpgradeCrc => {
                expect_len(p, 4)?;
                Frame::UpgradeCrc {
                    image_crc: read_u16(p, 0),
                    packet_count: read_u16(p, 2),
                }
            }
            FunctionCode::McuReset => {
                expect_len(p, 0)?;
                Frame::McuReset
            }
            FunctionCode::Connect => {
                expect_len(p, 0)?;
                Frame::Connect
            }
            FunctionCode::ReportAlarm | FunctionCode::ReportConfig | FunctionCode::ReportData => {
                if p.len() % REPORT_RECORD_SIZE != 0 {
                    return Err(ProtocolError::BadLength {
                        expected: p.len() - p.len() % REPORT_RECORD_SIZE,
                        actual: p.len(),
                    });
                }
                let records = p
                    .chunks_exact(REPORT_RECORD_SIZE)
                    .map(|rec| ReportRecord {
                        address: read_u16(rec, 0),
                        raw: read_value(rec, ADDRESS_SIZE),
                    })
                    .collect();
                Frame::Report {
                    kind: ReportKind::from_function(raw.function())
                        .unwrap_or(ReportKind::Data),
                    records,
                }
            }
            FunctionCode::AckWithData => {
                expect_len(p, REPORT_RECORD_SIZE)?;
                Frame::AckWithData {
                    address: read_u16(p, 0),
                    raw: read_value(p, ADDRESS_SIZE),
                }
            }
            FunctionCode::AckNoData => {
                expect_len(p, 2)?;
                Frame::AckNoData {
                    function_code: p[0],
                    status: StatusCode::from(p[1]),
                }
            }
        };
        Ok(frame)
    }
}

fn expect_len(payload: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if payload.len() != expected {
        return Err(ProtocolError::BadLength {
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

pub(crate) fn read_value(data: &[u8], offset: usize) -> [u8; VALUE_SIZE] {
    let mut raw = [0u8; VALUE_SIZE];
    raw.copy_from_slice(&data[offset..offset + VALUE_SIZE]);
    raw
}
