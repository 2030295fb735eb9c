//! Firmware upgrade: chunked transfer with per-packet and whole-image retries.

use std::fmt;
use std::thread;

use bytes::Bytes;
use mculink_protocol::{build_upgrade_crc, build_upgrade_packets, Reply, UPGRADE_PACKET_SIZE};
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::pending::RequestKind;
use crate::session::Session;

/// Summary of a successful upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeReport {
    /// Packets in the image.
    pub packets: usize,
    /// Whole-image attempts used, starting at 1.
    pub attempts: u32,
}

impl fmt::Display for UpgradeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upgrade file sent, total {} packets", self.packets)
    }
}

/// How one whole-image attempt ended, when it did not abort the upgrade.
enum AttemptOutcome {
    Confirmed,
    Unconfirmed,
}

impl Session {
    /// Transfer `image` to the device.
    ///
    /// `progress` is called with `(packets_done, total)` after every
    /// acknowledged packet. A rejected packet or a packet that never gets
    /// acknowledged aborts the upgrade; a failed confirmation restarts the
    /// transfer from the first packet until the retry budget is spent.
    pub fn upgrade<F>(&self, image: &[u8], mut progress: F) -> SessionResult<UpgradeReport>
    where
        F: FnMut(usize, usize),
    {
        let total = image.len() / UPGRADE_PACKET_SIZE;
        if image.is_empty()
            || image.len() % UPGRADE_PACKET_SIZE != 0
            || total > u16::MAX as usize
        {
            return Err(SessionError::SizeError {
                len: image.len(),
                packet_size: UPGRADE_PACKET_SIZE,
            });
        }

        let packets = build_upgrade_packets(image);
        let confirm = build_upgrade_crc(image, total as u16);
        let attempts = self.config().upgrade.retries();

        for attempt in 1..=attempts {
            info!(attempt, attempts, packets = total, "upgrade attempt");
            match self.upgrade_attempt(&packets, &confirm, &mut progress)? {
                AttemptOutcome::Confirmed => {
                    let report = UpgradeReport {
                        packets: total,
                        attempts: attempt,
                    };
                    info!("{}", report);
                    return Ok(report);
                }
                AttemptOutcome::Unconfirmed => {
                    warn!(attempt, "upgrade not confirmed, restarting transfer");
                }
            }
        }
        Err(SessionError::UpgradeFailed { attempts })
    }

    fn upgrade_attempt<F>(
        &self,
        packets: &[Bytes],
        confirm: &Bytes,
        progress: &mut F,
    ) -> SessionResult<AttemptOutcome>
    where
        F: FnMut(usize, usize),
    {
        let upgrade = &self.config().upgrade;
        let total = packets.len();

        for (index, packet) in packets.iter().enumerate() {
            self.send_packet(index, packet)?;
            progress(index + 1, total);
            thread::sleep(upgrade.packet_gap());
        }

        match self.issue_request(RequestKind::UpgradeCrc, confirm, upgrade.confirm_timeout()) {
            Ok(Reply::Accepted { .. }) => Ok(AttemptOutcome::Confirmed),
            Ok(Reply::Rejected { status, .. }) => {
                warn!(%status, "device rejected image crc");
                Ok(AttemptOutcome::Unconfirmed)
            }
            Ok(Reply::Data { .. }) | Err(SessionError::Protocol(_)) => {
                warn!("malformed confirmation");
                Ok(AttemptOutcome::Unconfirmed)
            }
            Err(SessionError::Timeout) => {
                warn!("confirmation timed out");
                Ok(AttemptOutcome::Unconfirmed)
            }
            Err(e) => Err(e),
        }
    }

    /// Send one packet until acknowledged, at most `max_retries` times.
    fn send_packet(&self, index: usize, packet: &Bytes) -> SessionResult<()> {
        let upgrade = &self.config().upgrade;
        let sends = upgrade.retries();
        let kind = RequestKind::UpgradeData {
            index: index as u16,
        };

        for send in 1..=sends {
            match self.issue_request(kind, packet, upgrade.packet_timeout()) {
                Ok(Reply::Accepted { .. }) => {
                    debug!(packet = index + 1, send, "packet acknowledged");
                    return Ok(());
                }
                Ok(Reply::Rejected { status, .. }) => {
                    return Err(SessionError::PacketRejected {
                        packet: index + 1,
                        status,
                    });
                }
                Ok(Reply::Data { .. }) | Err(SessionError::Protocol(_)) => {
                    warn!(packet = index + 1, send, "malformed packet acknowledgement");
                }
                Err(SessionError::Timeout) => {
                    warn!(packet = index + 1, send, sends, "packet timed out");
                }
                Err(e) => return Err(e),
            }
        }
        Err(SessionError::PacketTimeout {
            packet: index + 1,
            attempts: sends,
        })
    }
}
