//! Session, upgrade, and serial-port configuration.
//!
//! All durations are stored in milliseconds so the YAML file stays readable:
//!
//! ```yaml
//! serial:
//!   port: /dev/ttyUSB0
//!   baud_rate: 115200
//! session:
//!   request_timeout_ms: 2000
//!   reset_echo: true
//!   upgrade:
//!     max_retries: 3
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

/// Timing and policy for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Deadline for a single read or write.
    pub request_timeout_ms: u64,
    /// Reader loop sleep between transport polls.
    pub poll_interval_ms: u64,
    /// Delay between handshake frames while connecting.
    pub handshake_interval_ms: u64,
    /// How long `stop_listener` waits for the reader thread.
    pub listener_join_timeout_ms: u64,
    /// Echo MCU_RESET frames back to the device.
    pub reset_echo: bool,
    /// Acknowledge alarm/config reports with a status reply.
    pub report_ack: bool,
    /// Firmware upgrade policy.
    pub upgrade: UpgradeConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            request_timeout_ms: 2000,
            poll_interval_ms: 10,
            handshake_interval_ms: 500,
            listener_join_timeout_ms: 1000,
            reset_echo: false,
            report_ack: false,
            upgrade: UpgradeConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Deadline for a single read or write.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reader loop poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Handshake resend interval.
    pub fn handshake_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_interval_ms)
    }

    /// Bounded wait when joining the reader thread.
    pub fn listener_join_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_join_timeout_ms)
    }
}

/// Retry and timing policy for firmware upgrades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Deadline for each packet acknowledgement.
    pub packet_timeout_ms: u64,
    /// Deadline for the whole-image confirmation.
    pub confirm_timeout_ms: u64,
    /// Sends per packet, and whole-flow attempts.
    pub max_retries: u32,
    /// Pause after each acknowledged packet.
    pub packet_gap_ms: u64,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        UpgradeConfig {
            packet_timeout_ms: 2000,
            confirm_timeout_ms: 10_000,
            max_retries: 3,
            packet_gap_ms: 50,
        }
    }
}

impl UpgradeConfig {
    /// Deadline for each packet acknowledgement.
    pub fn packet_timeout(&self) -> Duration {
        Duration::from_millis(self.packet_timeout_ms)
    }

    /// Deadline for the whole-image confirmation.
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    /// Pause after each acknowledged packet.
    pub fn packet_gap(&self) -> Duration {
        Duration::from_millis(self.packet_gap_ms)
    }

    /// Retry budget, never less than one.
    pub fn retries(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Parity setting for the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path or COM port name.
    pub port: String,
    /// Line speed.
    pub baud_rate: u32,
    /// Data bits per character (5-8).
    pub data_bits: u8,
    /// Stop bits (1 or 2).
    pub stop_bits: u8,
    /// Parity.
    pub parity: Parity,
    /// Blocking read timeout of the port.
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port: String::new(),
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            read_timeout_ms: 1000,
        }
    }
}

/// Everything needed to bring up a link, as stored in a YAML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port settings.
    pub serial: SerialConfig,
    /// Session timing and policy.
    pub session: SessionConfig,
}

impl LinkConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(text: &str) -> SessionResult<Self> {
        serde_yaml::from_str(text).map_err(|e| SessionError::Config(e.to_string()))
    }

    /// Load a YAML file.
    pub fn load(path: impl AsRef<Path>) -> SessionResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }
}
