//! Builders for frames the host sends to the MCU.

use bytes::Bytes;

use crate::constants::*;
use crate::crc::crc16;
use crate::error::StatusCode;
use crate::frame::Frame;
use crate::types::{pack, RegisterValue, ValueType};

/// Read request for one register.
pub fn build_read(address: u16) -> Bytes {
    Frame::Read { address }.encode()
}

/// Write request for one register, packing `value` as `value_type`.
pub fn build_write(address: u16, value: RegisterValue, value_type: ValueType) -> Bytes {
    Frame::Write {
        address,
        raw: pack(value, value_type),
    }
    .encode()
}

/// Handshake request. The MCU echoes it once it is ready.
pub fn build_handshake() -> Bytes {
    Frame::Connect.encode()
}

/// Status reply acknowledging a device-initiated frame.
pub fn build_status_reply(function_code: u8, status: StatusCode) -> Bytes {
    Frame::AckNoData {
        function_code,
        status,
    }
    .encode()
}

/// Split `image` into upgrade-data frames of [`UPGRADE_PACKET_SIZE`] bytes.
///
/// The final chunk is zero-padded to full size.
pub fn build_upgrade_packets(image: &[u8]) -> Vec<Bytes> {
    image
        .chunks(UPGRADE_PACKET_SIZE)
        .enumerate()
        .map(|(index, chunk)| {
            Frame::UpgradeData {
                index: index as u16,
                chunk: Bytes::copy_from_slice(chunk),
            }
            .encode()
        })
        .collect()
}

/// Confirmation frame sent after all packets: image CRC and packet count.
pub fn build_upgrade_crc(image: &[u8], packet_count: u16) -> Bytes {
    Frame::UpgradeCrc {
        image_crc: crc16(image),
        packet_count,
    }
    .encode()
}
