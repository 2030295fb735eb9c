//! In-memory transport pair for tests and device simulation.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use super::{not_open, Transport};

/// Host side of an in-memory link.
///
/// Bytes injected at the [`DeviceEnd`] become readable here; every `write`
/// arrives at the device end as one message.
pub struct MemoryTransport {
    inbound: Arc<Mutex<VecDeque<u8>>>,
    outbound: Sender<Vec<u8>>,
    open: Arc<AtomicBool>,
}

/// Device side of an in-memory link.
#[derive(Clone)]
pub struct DeviceEnd {
    inbound: Arc<Mutex<VecDeque<u8>>>,
    outbound: Receiver<Vec<u8>>,
    open: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Create a connected host/device pair.
    pub fn pair() -> (MemoryTransport, DeviceEnd) {
        let inbound = Arc::new(Mutex::new(VecDeque::new()));
        let (tx, rx) = crossbeam_channel::unbounded();
        let open = Arc::new(AtomicBool::new(true));
        (
            MemoryTransport {
                inbound: inbound.clone(),
                outbound: tx,
                open: open.clone(),
            },
            DeviceEnd {
                inbound,
                outbound: rx,
                open,
            },
        )
    }
}

impl Transport for MemoryTransport {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        if !self.is_open() {
            return Err(not_open());
        }
        self.outbound
            .send(data.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "device end dropped"))?;
        Ok(data.len())
    }

    fn read(&self, max_bytes: usize) -> io::Result<Vec<u8>> {
        if !self.is_open() {
            return Err(not_open());
        }
        let mut inbound = self.inbound.lock();
        let count = max_bytes.min(inbound.len());
        Ok(inbound.drain(..count).collect())
    }

    fn bytes_available(&self) -> io::Result<usize> {
        if !self.is_open() {
            return Ok(0);
        }
        Ok(self.inbound.lock().len())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl DeviceEnd {
    /// Make `data` readable on the host side.
    pub fn inject(&self, data: &[u8]) {
        self.inbound.lock().extend(data.iter().copied());
    }

    /// Next host write, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.outbound.recv_timeout(timeout).ok()
    }

    /// Next host write, if one is queued.
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.outbound.try_recv().ok()
    }

    /// Everything the host has written so far, one entry per write.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.outbound.try_iter().collect()
    }

    /// Whether the host side is still open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Simulate the cable being pulled.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}
