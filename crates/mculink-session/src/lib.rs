//! Host-side session for the MCU UART link.
//!
//! A [`Session`] owns one [`Transport`] and runs a reader thread that feeds
//! received bytes through the frame reassembler and dispatches each frame:
//!
//! - CONNECT / MCU_RESET frames go to the [`HandshakeController`]
//! - reports 0x40/0x50/0x60 go to the [`ReportHandler`] and on to a [`ReportSink`]
//! - acknowledgements complete the matching entry of the [`PendingTable`]
//!
//! Callers issue reads, writes and firmware upgrades from their own threads
//! and block only on their own request.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mculink_protocol::ValueType;
//! use mculink_session::{
//!     DiscardReports, Permission, SerialConfig, SerialTransport, Session, SessionConfig,
//!     StaticDirectory,
//! };
//!
//! # fn main() -> Result<(), mculink_session::SessionError> {
//! let serial = SerialConfig {
//!     port: "/dev/ttyUSB0".to_string(),
//!     ..SerialConfig::default()
//! };
//! let directory = StaticDirectory::new().with(0x1200, ValueType::UInt16, Permission::ReadWrite);
//! let session = Session::new(
//!     Arc::new(SerialTransport::open(&serial)?),
//!     Arc::new(directory),
//!     Arc::new(DiscardReports),
//!     SessionConfig::default(),
//! );
//! session.connect()?;
//! if session.wait_connected(Duration::from_secs(5)) {
//!     println!("0x1200 = {}", session.read_item(0x1200)?);
//! }
//! session.disconnect();
//! # Ok(())
//! # }
//! ```

mod config;
mod directory;
mod error;
mod handshake;
mod pending;
mod report;
mod session;
mod upgrade;

pub mod transport;

pub use config::*;
pub use directory::*;
pub use error::*;
pub use handshake::*;
pub use pending::*;
pub use report::*;
pub use session::*;
pub use transport::{list_ports, DeviceEnd, MemoryTransport, SerialTransport, Transport};
pub use upgrade::*;
