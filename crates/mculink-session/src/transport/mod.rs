//! Byte transports the session runs over.
//!
//! The session only needs a handful of primitives: write bytes, read what has
//! arrived, ask how much has arrived, and check the link is still open. All
//! methods take `&self` because the reader thread and request callers share one
//! transport; implementations synchronise internally.

mod memory;
mod serial;

use std::io;

pub use memory::{DeviceEnd, MemoryTransport};
pub use serial::{list_ports, SerialTransport};

/// A byte-oriented, full-duplex link to the MCU.
pub trait Transport: Send + Sync {
    /// Write all of `data`, returning the number of bytes written.
    fn write(&self, data: &[u8]) -> io::Result<usize>;

    /// Read up to `max_bytes` already-received bytes.
    fn read(&self, max_bytes: usize) -> io::Result<Vec<u8>>;

    /// Number of received bytes waiting to be read.
    fn bytes_available(&self) -> io::Result<usize>;

    /// Whether the link is usable.
    fn is_open(&self) -> bool;

    /// Close the link. Further writes fail and `is_open` returns false.
    fn close(&self);
}

pub(crate) fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport not open")
}
