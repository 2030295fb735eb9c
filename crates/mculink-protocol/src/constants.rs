//! Protocol constants
//!
//! These constants define the frame layout, function codes, and status codes
//! understood by the MCU firmware.

// ============================================================================
// Frame Layout
// ============================================================================

/// First byte of every frame.
pub const FRAME_HEAD: u8 = 0x5A;
/// Bytes before the payload: head, function code, 2-byte length.
pub const HEADER_SIZE: usize = 4;
/// Size of the trailing CRC16.
pub const CRC_SIZE: usize = 2;
/// Smallest valid frame (empty payload).
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + CRC_SIZE;

/// Every register value occupies four bytes on the wire.
pub const VALUE_SIZE: usize = 4;
/// Size of a register address on the wire.
pub const ADDRESS_SIZE: usize = 2;
/// One `{address, raw_value}` record in a device report.
pub const REPORT_RECORD_SIZE: usize = ADDRESS_SIZE + VALUE_SIZE;

/// Firmware image bytes carried by one upgrade-data frame.
pub const UPGRADE_PACKET_SIZE: usize = 2048;
/// Payload of an upgrade-data frame: packet index followed by the chunk.
pub const UPGRADE_DATA_PAYLOAD_SIZE: usize = 2 + UPGRADE_PACKET_SIZE;

// ============================================================================
// Function Codes
// ============================================================================

/// Read one register (host → MCU).
pub const FUN_READ: u8 = 0x10;
/// Write one register (host → MCU).
pub const FUN_WRITE: u8 = 0x20;
/// One firmware upgrade packet (host → MCU).
pub const FUN_UPGRADE_DATA: u8 = 0x30;
/// Whole-image CRC and packet count confirmation (host → MCU).
pub const FUN_UPGRADE_CRC: u8 = 0x31;
/// MCU signals its own reset; doubles as keepalive.
pub const FUN_MCU_RESET: u8 = 0xF0;
/// Connection handshake, echoed by the MCU.
pub const FUN_CONNECT: u8 = 0xE0;

/// MCU-initiated alarm report.
pub const FUN_REPORT_ALARM: u8 = 0x40;
/// MCU-initiated configuration report.
pub const FUN_REPORT_CONFIG: u8 = 0x50;
/// MCU-initiated live data report. Never acknowledged.
pub const FUN_REPORT_DATA: u8 = 0x60;

/// Acknowledgement carrying an address and a value.
pub const ACK_WITH_DATA: u8 = 0x11;
/// Acknowledgement carrying a function code and a status code.
pub const ACK_NO_DATA: u8 = 0xF1;

// ============================================================================
// Status Codes
// ============================================================================

/// Operation succeeded.
pub const STATUS_OK: u8 = 0x00;
/// Function code not supported.
pub const STATUS_NO_FUNCODE: u8 = 0xF0;
/// Frame failed its CRC check.
pub const STATUS_CRC_ERROR: u8 = 0xF1;
/// Register address unknown.
pub const STATUS_ADDRESS_ERROR: u8 = 0xF2;
/// Register not accessible with this operation.
pub const STATUS_NO_PERMISSION: u8 = 0xF3;
/// Value rejected.
pub const STATUS_DATA_ERROR: u8 = 0xF4;
/// Persisting the value failed.
pub const STATUS_WRITE_STORE_ERROR: u8 = 0xF5;
/// Peripheral I/O failed.
pub const STATUS_IO_ERROR: u8 = 0xF6;
/// Payload length invalid.
pub const STATUS_DATA_LENGTH_ERROR: u8 = 0xF7;
/// Whole-image CRC did not match after an upgrade.
pub const STATUS_UPGRADE_CRC_ERROR: u8 = 0xF8;
