//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when decoding or validating frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is structurally invalid (too short, wrong head, length field
    /// disagreeing with the frame size).
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// CRC16 trailer does not match the frame contents.
    #[error("CRC mismatch: frame carries 0x{received:04X}, computed 0x{computed:04X}")]
    CrcMismatch {
        /// CRC carried by the frame.
        received: u16,
        /// CRC computed over head..payload.
        computed: u16,
    },

    /// Acknowledgement names a different register than the one requested.
    #[error("address mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    AddressMismatch {
        /// Address the caller asked for.
        expected: u16,
        /// Address carried by the acknowledgement.
        actual: u16,
    },

    /// Data acknowledgement received while awaiting a write.
    #[error("unexpected data response for write command")]
    UnexpectedData,

    /// Payload length is not what the function code requires.
    #[error("bad payload length: expected {expected} bytes, got {actual}")]
    BadLength {
        /// Length the function code requires.
        expected: usize,
        /// Length carried by the frame.
        actual: usize,
    },

    /// Function code is valid but not an acknowledgement.
    #[error("unknown response type: 0x{0:02X}")]
    UnknownResponseType(u8),

    /// Function code is not part of the protocol.
    #[error("unknown function code: 0x{0:02X}")]
    UnknownFunctionCode(u8),

    /// Register type name not recognised.
    #[error("unknown value type: {0}")]
    UnknownValueType(String),

    /// Text could not be parsed as a value of the declared type.
    #[error("invalid value {text:?} for type {value_type}")]
    InvalidValue {
        /// Offending input.
        text: String,
        /// Declared register type.
        value_type: crate::ValueType,
    },
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Status codes returned by the MCU in `ACK_NO_DATA` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Operation succeeded.
    Ok,
    /// Function code not supported.
    NoFunctionCode,
    /// Frame failed its CRC check.
    CrcError,
    /// Register address unknown.
    AddressError,
    /// Register not accessible with this operation.
    NoPermission,
    /// Value rejected.
    DataError,
    /// Persisting the value failed.
    WriteStoreError,
    /// Peripheral I/O failed.
    IoError,
    /// Payload length invalid.
    DataLengthError,
    /// Whole-image CRC mismatch after an upgrade.
    UpgradeCrcError,
    /// Status byte outside the documented set.
    Unknown(u8),
}

impl StatusCode {
    /// Whether the status reports success.
    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusCode::Ok => write!(f, "OK"),
            StatusCode::NoFunctionCode => write!(f, "NO_FUNCODE"),
            StatusCode::CrcError => write!(f, "CRC_ERROR"),
            StatusCode::AddressError => write!(f, "ADDRESS_ERROR"),
            StatusCode::NoPermission => write!(f, "NO_PERMISSION"),
            StatusCode::DataError => write!(f, "DATA_ERROR"),
            StatusCode::WriteStoreError => write!(f, "WRITE_STORE_ERROR"),
            StatusCode::IoError => write!(f, "IO_ERROR"),
            StatusCode::DataLengthError => write!(f, "DATA_LENGTH_ERROR"),
            StatusCode::UpgradeCrcError => write!(f, "UPGRADE_CRC_ERROR"),
            StatusCode::Unknown(code) => write!(f, "UNKNOWN(0x{:02X})", code),
        }
    }
}

impl From<u8> for StatusCode {
    fn from(code: u8) -> Self {
        use crate::constants::*;
        match code {
            STATUS_OK => StatusCode::Ok,
            STATUS_NO_FUNCODE => StatusCode::NoFunctionCode,
            STATUS_CRC_ERROR => StatusCode::CrcError,
            STATUS_ADDRESS_ERROR => StatusCode::AddressError,
            STATUS_NO_PERMISSION => StatusCode::NoPermission,
            STATUS_DATA_ERROR => StatusCode::DataError,
            STATUS_WRITE_STORE_ERROR => StatusCode::WriteStoreError,
            STATUS_IO_ERROR => StatusCode::IoError,
            STATUS_DATA_LENGTH_ERROR => StatusCode::DataLengthError,
            STATUS_UPGRADE_CRC_ERROR => StatusCode::UpgradeCrcError,
            _ => StatusCode::Unknown(code),
        }
    }
}

impl From<StatusCode> for u8 {
    fn from(code: StatusCode) -> Self {
        use crate::constants::*;
        match code {
            StatusCode::Ok => STATUS_OK,
            StatusCode::NoFunctionCode => STATUS_NO_FUNCODE,
            StatusCode::CrcError => STATUS_CRC_ERROR,
            StatusCode::AddressError => STATUS_ADDRESS_ERROR,
            StatusCode::NoPermission => STATUS_NO_PERMISSION,
            StatusCode::DataError => STATUS_DATA_ERROR,
            StatusCode::WriteStoreError => STATUS_WRITE_STORE_ERROR,
            StatusCode::IoError => STATUS_IO_ERROR,
            StatusCode::DataLengthError => STATUS_DATA_LENGTH_ERROR,
            StatusCode::UpgradeCrcError => STATUS_UPGRADE_CRC_ERROR,
            StatusCode::Unknown(code) => code,
        }
    }
}
