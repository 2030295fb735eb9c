//! Device-initiated reports (0x40 alarm, 0x50 config, 0x60 live data).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mculink_protocol::{
    build_status_reply, unpack, HexBytes, RawFrame, ReportKind, StatusCode, ADDRESS_SIZE,
    REPORT_RECORD_SIZE,
};
use tracing::{debug, warn};

use crate::directory::{ItemDirectory, ReportSink};
use crate::transport::Transport;

/// Decodes report frames and forwards their values to a [`ReportSink`].
pub struct ReportHandler {
    directory: Arc<dyn ItemDirectory>,
    sink: Arc<dyn ReportSink>,
    ack: AtomicBool,
}

impl ReportHandler {
    /// Create a handler. `ack` enables status replies to alarm/config reports.
    pub fn new(directory: Arc<dyn ItemDirectory>, sink: Arc<dyn ReportSink>, ack: bool) -> Self {
        ReportHandler {
            directory,
            sink,
            ack: AtomicBool::new(ack),
        }
    }

    /// Whether alarm/config reports are acknowledged.
    pub fn ack_enabled(&self) -> bool {
        self.ack.load(Ordering::Relaxed)
    }

    /// Toggle the acknowledgement policy.
    pub fn set_ack(&self, enabled: bool) {
        self.ack.store(enabled, Ordering::Relaxed);
    }

    /// Process one report frame.
    ///
    /// Returns the status the frame earned, or `None` if it is not a report.
    /// Records are forwarded in order until the first address the directory
    /// does not know; CRC-invalid frames forward nothing.
    pub fn handle(&self, frame: &RawFrame, transport: &dyn Transport) -> Option<StatusCode> {
        let kind = ReportKind::from_function(frame.function())?;
        let status = self.process(kind, frame);

        if self.ack_enabled() && kind.expects_reply() {
            let reply = build_status_reply(u8::from(frame.function()), status);
            match transport.write(&reply) {
                Ok(_) => debug!(frame = %HexBytes(&reply), "sent report reply"),
                Err(e) => warn!(error = %e, "failed to send report reply"),
            }
        }
        Some(status)
    }

    fn process(&self, kind: ReportKind, frame: &RawFrame) -> StatusCode {
        if !frame.crc_valid() {
            warn!(
                ?kind,
                received = frame.received_crc(),
                computed = frame.computed_crc(),
                "report failed crc"
            );
            return StatusCode::CrcError;
        }

        let payload = frame.payload();
        if payload.len() % REPORT_RECORD_SIZE != 0 {
            warn!(?kind, len = payload.len(), "report length is not a whole number of records");
            return StatusCode::DataLengthError;
        }

        for record in payload.chunks_exact(REPORT_RECORD_SIZE) {
            let address = u16::from_be_bytes([record[0], record[1]]);
            let Some(info) = self.directory.lookup(address) else {
                warn!(?kind, address, "report names unknown address");
                return StatusCode::AddressError;
            };
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&record[ADDRESS_SIZE..]);
            let value = unpack(raw, info.value_type);
            debug!(?kind, address = format_args!("0x{:04X}", address), %value, "report value");
            self.sink.report_value(kind, address, value);
        }
        StatusCode::Ok
    }
}
