//! Error types for session operations.

use mculink_protocol::{ProtocolError, StatusCode};
use thiserror::Error;

/// Errors returned to the caller of a session operation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// I/O error on the byte transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or enumerated.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The matching acknowledgement violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No matching response before the deadline.
    #[error("timeout waiting for response")]
    Timeout,

    /// The device explicitly refused the operation.
    #[error("device rejected function 0x{function_code:02X}: {status}")]
    Device {
        /// Function code the device answered.
        function_code: u8,
        /// Status reported by the device.
        status: StatusCode,
    },

    /// The transport closed while a request was outstanding.
    #[error("transport closed")]
    TransportClosed,

    /// Address not present in the item directory.
    #[error("unknown register address 0x{0:04X}")]
    UnknownAddress(u16),

    /// Register is read-only.
    #[error("register 0x{0:04X} is not writable")]
    NotWritable(u16),

    /// Register is write-only.
    #[error("register 0x{0:04X} is not readable")]
    NotReadable(u16),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// Firmware image is not a whole number of packets.
    #[error("upgrade failed bin size error: {len} bytes is not a multiple of {packet_size}")]
    SizeError {
        /// Image length.
        len: usize,
        /// Required packet size.
        packet_size: usize,
    },

    /// A packet went unacknowledged on every send.
    #[error("upgrade pack {packet} timeout after {attempts} retries")]
    PacketTimeout {
        /// One-based packet number.
        packet: usize,
        /// Number of sends.
        attempts: u32,
    },

    /// The device refused a packet; not retried.
    #[error("upgrade pack {packet} failed, status: {status}")]
    PacketRejected {
        /// One-based packet number.
        packet: usize,
        /// Status reported by the device.
        status: StatusCode,
    },

    /// Every whole-image attempt failed confirmation.
    #[error("upgrade failed after {attempts} attempts")]
    UpgradeFailed {
        /// Attempts made.
        attempts: u32,
    },
}

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
