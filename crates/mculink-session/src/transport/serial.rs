//! Serial-port transport backed by the `serialport` crate.

use std::io::{self, Read, Write};
use std::time::Duration;

use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, SerialPort, StopBits};
use tracing::{debug, info};

use super::{not_open, Transport};
use crate::config::{Parity, SerialConfig};
use crate::error::{SessionError, SessionResult};

/// A serial port opened for the MCU link.
///
/// Reads and writes go through separate handles to the same port so the
/// reader thread never blocks a request from being sent.
pub struct SerialTransport {
    name: String,
    reader: Mutex<Option<Box<dyn SerialPort>>>,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
}

impl SerialTransport {
    /// Open the port described by `config`.
    pub fn open(config: &SerialConfig) -> SessionResult<Self> {
        if config.port.is_empty() {
            return Err(SessionError::Config("no serial port given".to_string()));
        }
        let data_bits = match config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => {
                return Err(SessionError::Config(format!("unsupported data bits: {}", other)))
            }
        };
        let stop_bits = match config.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => {
                return Err(SessionError::Config(format!("unsupported stop bits: {}", other)))
            }
        };
        let parity = match config.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .open()?;
        let writer = port.try_clone()?;

        info!(port = %config.port, baud = config.baud_rate, "serial port opened");
        Ok(SerialTransport {
            name: config.port.clone(),
            reader: Mutex::new(Some(port)),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Port name this transport was opened on.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Transport for SerialTransport {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut guard = self.writer.lock();
        let port = guard.as_mut().ok_or_else(not_open)?;
        port.write_all(data)?;
        port.flush()?;
        Ok(data.len())
    }

    fn read(&self, max_bytes: usize) -> io::Result<Vec<u8>> {
        let mut guard = self.reader.lock();
        let port = guard.as_mut().ok_or_else(not_open)?;
        let mut buf = vec![0u8; max_bytes];
        match port.read(&mut buf) {
            Ok(count) => {
                buf.truncate(count);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn bytes_available(&self) -> io::Result<usize> {
        let guard = self.reader.lock();
        let port = guard.as_ref().ok_or_else(not_open)?;
        Ok(port.bytes_to_read().map_err(io::Error::from)? as usize)
    }

    fn is_open(&self) -> bool {
        self.reader.lock().is_some()
    }

    fn close(&self) {
        let had_port = self.reader.lock().take().is_some();
        self.writer.lock().take();
        if had_port {
            debug!(port = %self.name, "serial port closed");
        }
    }
}

/// Names of the serial ports present on this machine.
pub fn list_ports() -> SessionResult<Vec<String>> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|info| info.port_name)
        .collect())
}
