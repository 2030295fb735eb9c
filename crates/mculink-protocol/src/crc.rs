//! CRC16 used for frame integrity and whole-image upgrade confirmation.
//!
//! The firmware calls this XMODEM, but the register is seeded with `0xFFFF`,
//! which makes it CRC-16/CCITT-FALSE: polynomial `0x1021`, MSB first, no
//! reflection, no final XOR.

/// Generator polynomial.
pub const CRC16_POLY: u16 = 0x1021;
/// Initial register value.
pub const CRC16_INIT: u16 = 0xFFFF;

/// Compute the CRC16 of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
