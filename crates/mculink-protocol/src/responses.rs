//! Interpretation of MCU acknowledgements.

use crate::constants::*;
use crate::crc::crc16;
use crate::error::{ProtocolError, StatusCode};
use crate::frame::{check_structure, read_u16, read_value};
use crate::types::{unpack, RegisterValue, ValueType};

/// Outcome of a well-formed acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    /// Read succeeded.
    Data {
        /// Register address.
        address: u16,
        /// Value decoded with the declared type.
        value: RegisterValue,
    },
    /// Write (or upgrade step) accepted.
    Accepted {
        /// Always [`StatusCode::Ok`].
        status: StatusCode,
    },
    /// Device refused the operation.
    Rejected {
        /// Function code the device is answering.
        function_code: u8,
        /// Reason given by the device.
        status: StatusCode,
    },
}

/// Parse an acknowledgement frame.
///
/// `awaiting_write` is true for writes and upgrade steps; a data ack is then a
/// protocol violation. `expected_address` is checked against data acks when
/// given. `declared_type` decodes the value carried by a data ack.
pub fn parse_response(
    frame: &[u8],
    awaiting_write: bool,
    expected_address: Option<u16>,
    declared_type: ValueType,
) -> Result<Reply, ProtocolError> {
    check_structure(frame)?;

    let body_len = frame.len() - CRC_SIZE;
    let received = read_u16(frame, body_len);
    let computed = crc16(&frame[..body_len]);
    if received != computed {
        return Err(ProtocolError::CrcMismatch { received, computed });
    }

    let payload = &frame[HEADER_SIZE..body_len];
    match frame[1] {
        ACK_WITH_DATA => {
            if awaiting_write {
                return Err(ProtocolError::UnexpectedData);
            }
            if payload.len() != REPORT_RECORD_SIZE {
                return Err(ProtocolError::BadLength {
                    expected: REPORT_RECORD_SIZE,
                    actual: payload.len(),
                });
            }
            let address = read_u16(payload, 0);
            if let Some(expected) = expected_address {
                if expected != address {
                    return Err(ProtocolError::AddressMismatch {
                        expected,
                        actual: address,
                    });
                }
            }
            let value = unpack(read_value(payload, ADDRESS_SIZE), declared_type);
            Ok(Reply::Data { address, value })
        }
        ACK_NO_DATA => {
            if payload.len() != 2 {
                return Err(ProtocolError::BadLength {
                    expected: 2,
                    actual: payload.len(),
                });
            }
            let function_code = payload[0];
            let status = StatusCode::from(payload[1]);
            if awaiting_write && status.is_ok() {
                Ok(Reply::Accepted { status })
            } else {
                Ok(Reply::Rejected {
                    function_code,
                    status,
                })
            }
        }
        other => Err(ProtocolError::UnknownResponseType(other)),
    }
}
