//! Pending-request table: matching acknowledgements to the callers awaiting them.
//!
//! Every request registers an entry before its frame is written. The reader
//! thread claims the first entry an acknowledgement matches, removing it in the
//! same critical section, then decodes the frame and delivers the result outside
//! the lock. A caller that gives up removes its own entry, so a late
//! acknowledgement finds nothing to claim and is dropped.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use mculink_protocol::{
    parse_response, FunctionCode, ProtocolError, RawFrame, Reply, ValueType, ADDRESS_SIZE,
    FUN_UPGRADE_CRC, FUN_UPGRADE_DATA,
};
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{SessionError, SessionResult};

/// What an outstanding request is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Register read; matched by address on `ACK_WITH_DATA`.
    Read {
        /// Register address.
        address: u16,
        /// Type used to decode the value.
        value_type: ValueType,
    },
    /// Register write; matched by any `ACK_NO_DATA`.
    Write {
        /// Register address, for logging only.
        address: u16,
    },
    /// Upgrade packet; matched by `ACK_NO_DATA` for function 0x30.
    UpgradeData {
        /// Zero-based packet index.
        index: u16,
    },
    /// Upgrade confirmation; matched by `ACK_NO_DATA` for function 0x31.
    UpgradeCrc,
}

impl RequestKind {
    /// Whether an acknowledgement with this function code and payload answers
    /// this request.
    pub fn matches(&self, function: FunctionCode, payload: &[u8]) -> bool {
        match (self, function) {
            (RequestKind::Read { address, .. }, FunctionCode::AckWithData) => {
                payload.len() >= ADDRESS_SIZE
                    && u16::from_be_bytes([payload[0], payload[1]]) == *address
            }
            (RequestKind::Write { .. }, FunctionCode::AckNoData) => true,
            (RequestKind::UpgradeData { .. }, FunctionCode::AckNoData) => {
                payload.first() == Some(&FUN_UPGRADE_DATA)
            }
            (RequestKind::UpgradeCrc, FunctionCode::AckNoData) => {
                payload.first() == Some(&FUN_UPGRADE_CRC)
            }
            _ => false,
        }
    }

    fn decode(&self, frame: &RawFrame) -> Result<Reply, ProtocolError> {
        match *self {
            RequestKind::Read {
                address,
                value_type,
            } => parse_response(frame.as_bytes(), false, Some(address), value_type),
            _ => parse_response(frame.as_bytes(), true, None, ValueType::default()),
        }
    }
}

type Completion = Sender<Result<Reply, ProtocolError>>;

struct PendingEntry {
    kind: RequestKind,
    created: Instant,
    completion: Completion,
}

/// Thread-safe table of outstanding requests, oldest first.
pub struct PendingTable {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<u64, PendingEntry>>,
}

impl Default for PendingTable {
    fn default() -> Self {
        PendingTable {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(BTreeMap::new()),
        }
    }
}

impl PendingTable {
    /// Create an empty table.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a request. The entry lives until it is claimed, the returned
    /// handle times out, or the handle is dropped.
    pub fn register(self: &Arc<Self>, kind: RequestKind) -> PendingReply {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.entries.lock().insert(
            id,
            PendingEntry {
                kind,
                created: Instant::now(),
                completion: tx,
            },
        );
        PendingReply {
            id,
            kind,
            table: Arc::clone(self),
            receiver: rx,
        }
    }

    /// Remove an entry. Returns false if it was already claimed or removed.
    pub fn remove(&self, id: u64) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    /// Deliver an acknowledgement to the first matching request.
    ///
    /// Returns false when nothing was waiting for it.
    pub fn complete(&self, frame: &RawFrame) -> bool {
        let claimed = {
            let mut entries = self.entries.lock();
            let id = entries
                .iter()
                .find(|(_, entry)| entry.kind.matches(frame.function(), frame.payload()))
                .map(|(id, _)| *id);
            id.and_then(|id| entries.remove(&id).map(|entry| (id, entry)))
        };

        let Some((id, entry)) = claimed else {
            return false;
        };
        trace!(
            id,
            kind = ?entry.kind,
            elapsed_ms = entry.created.elapsed().as_millis() as u64,
            "request matched"
        );
        let result = entry.kind.decode(frame);
        // The receiver may already have timed out; the result is then dropped.
        let _ = entry.completion.send(result);
        true
    }

    /// Drop every entry; waiting callers see [`SessionError::TransportClosed`].
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no request is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Caller's handle on one outstanding request.
///
/// Dropping the handle withdraws the request.
pub struct PendingReply {
    id: u64,
    kind: RequestKind,
    table: Arc<PendingTable>,
    receiver: Receiver<Result<Reply, ProtocolError>>,
}

impl PendingReply {
    /// Table id of the request.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// What the request is waiting for.
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Block until the acknowledgement arrives or `timeout` elapses.
    pub fn wait(self, timeout: Duration) -> SessionResult<Reply> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Ok(result?),
            Err(RecvTimeoutError::Timeout) => {
                self.table.remove(self.id);
                Err(SessionError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(SessionError::TransportClosed),
        }
    }

    /// Non-blocking check; `None` while still waiting.
    pub fn try_take(&self) -> Option<SessionResult<Reply>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result.map_err(SessionError::from)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(SessionError::TransportClosed)),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}
