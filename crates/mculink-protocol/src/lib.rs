//! MCU UART Protocol
//!
//! This crate provides the frame codec and stream reassembler for the binary
//! protocol spoken by the MCU firmware over its serial link.
//!
//! # Protocol Overview
//!
//! Every message, in both directions, is a frame:
//!
//! - a `0x5A` head byte,
//! - a function code,
//! - a big-endian payload length,
//! - the payload,
//! - a big-endian CRC16 over everything before it.
//!
//! The host sends reads, writes, handshakes, and firmware upgrade packets. The
//! MCU answers with `ACK_WITH_DATA` / `ACK_NO_DATA` acknowledgements and pushes
//! unsolicited reports of register values.
//!
//! # Example
//!
//! ```rust
//! use mculink_protocol::{build_read, parse_response, FrameReassembler, ValueType};
//!
//! let request = build_read(0x1200);
//! assert_eq!(&request[..4], &[0x5A, 0x10, 0x00, 0x02]);
//!
//! let mut reassembler = FrameReassembler::new();
//! reassembler.push(&[0x00, 0x01]); // line noise
//! reassembler.push(&request);
//! let frame = reassembler.decode().expect("one frame");
//! assert!(frame.crc_valid());
//! assert!(parse_response(frame.as_bytes(), false, None, ValueType::Int32).is_err());
//! ```

mod commands;
mod constants;
mod crc;
mod error;
mod frame;
mod reassembler;
mod responses;
mod types;

pub use commands::*;
pub use constants::*;
pub use crc::*;
pub use error::*;
pub use frame::*;
pub use reassembler::*;
pub use responses::*;
pub use types::*;
