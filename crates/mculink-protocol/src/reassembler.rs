//! Stream reassembly: cutting whole frames out of a serial byte stream.
//!
//! Bytes arrive in arbitrary pieces. The reassembler keeps a rolling buffer,
//! resynchronises on the head byte, throws away runs that cannot start a
//! frame, and hands out structurally complete [`RawFrame`]s in stream order.

use bytes::{Buf, BytesMut};
use log::{trace, warn};

use crate::constants::*;
use crate::frame::{FunctionCode, RawFrame};
use crate::types::HexBytes;

/// Initial buffer capacity; grows as needed.
const INITIAL_CAPACITY: usize = 4096;

/// Accumulates received bytes and yields complete frames.
#[derive(Debug)]
pub struct FrameReassembler {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
    /// Total bytes thrown away while resynchronising.
    discarded: u64,
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReassembler {
    /// Create an empty reassembler.
    pub fn new() -> Self {
        FrameReassembler {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            discarded: 0,
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to cut the next frame from the buffer.
    ///
    /// Returns `None` once the buffer holds no complete frame; call again after
    /// the next [`push`](Self::push). Malformed runs are discarded along the way,
    /// so repeated calls always make progress.
    pub fn decode(&mut self) -> Option<RawFrame> {
        loop {
            if self.buffer.len() < MIN_FRAME_SIZE {
                return None;
            }

            let Some(head) = self.buffer.iter().position(|&b| b == FRAME_HEAD) else {
                warn!("discarding {} bytes: no frame head: {}", self.buffer.len(), HexBytes(&self.buffer));
                self.discard(self.buffer.len());
                return None;
            };
            if head > 0 {
                trace!("skipping {} bytes before frame head", head);
                self.discard(head);
            }

            if self.buffer.len() < MIN_FRAME_SIZE {
                return None;
            }

            let function = match FunctionCode::try_from(self.buffer[1]) {
                Ok(function) => function,
                Err(_) => {
                    let code = self.buffer[1];
                    match self.buffer[1..].iter().position(|&b| b == FRAME_HEAD) {
                        Some(next) => {
                            warn!(
                                "invalid function code 0x{:02X}, discarding {}",
                                code,
                                HexBytes(&self.buffer[..next + 1])
                            );
                            self.discard(next + 1);
                            continue;
                        }
                        None => {
                            warn!(
                                "invalid function code 0x{:02X}, discarding {}",
                                code,
                                HexBytes(&self.buffer)
                            );
                            self.discard(self.buffer.len());
                            return None;
                        }
                    }
                }
            };

            let len = u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize;
            let total = MIN_FRAME_SIZE + len;
            if self.buffer.len() < total {
                return None;
            }

            let frame = RawFrame::from_validated(self.buffer.split_to(total).freeze(), function);
            trace!("frame: {}", HexBytes(frame.as_bytes()));
            return Some(frame);
        }
    }

    /// Drain every complete frame currently buffered.
    pub fn decode_all(&mut self) -> Vec<RawFrame> {
        std::iter::from_fn(|| self.decode()).collect()
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes discarded while resynchronising.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn discard(&mut self, count: usize) {
        self.buffer.advance(count);
        self.discarded += count as u64;
    }
}
