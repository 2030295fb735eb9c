//! `mculink`: talk to an MCU over its UART configuration protocol.
//!
//! Usage:
//!   mculink ports
//!   mculink --port /dev/ttyUSB0 read 0x1200 --type uint16_t
//!   mculink --port /dev/ttyUSB0 write 0x1200 42 --type uint16_t
//!   mculink --port /dev/ttyUSB0 --items items.yaml monitor --report-ack
//!   mculink --config link.yaml upgrade firmware.bin

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use mculink_protocol::{RegisterValue, ReportKind, ValueType};
use mculink_session::{
    list_ports, LinkConfig, SerialTransport, Session, SessionError, SessionResult,
    StaticDirectory,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mculink", version, about = "Configure and upgrade MCUs over UART")]
struct Cli {
    /// YAML file with `serial` and `session` settings.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// YAML item catalog mapping addresses to type and permission.
    #[arg(long)]
    items: Option<PathBuf>,

    /// Serial port, overriding the config file.
    #[arg(long, short)]
    port: Option<String>,

    /// Baud rate, overriding the config file.
    #[arg(long, short)]
    baud: Option<u32>,

    /// How long to wait for the handshake, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    connect_timeout_ms: u64,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports.
    Ports,
    /// Read one register.
    Read {
        /// Register address (decimal or 0x hex).
        #[arg(value_parser = parse_address)]
        address: u16,
        /// Value type; defaults to the catalog entry, then int32_t.
        #[arg(long = "type", short)]
        value_type: Option<ValueType>,
    },
    /// Write one register.
    Write {
        /// Register address (decimal or 0x hex).
        #[arg(value_parser = parse_address)]
        address: u16,
        /// Value to write (decimal, 0x hex, or float).
        value: String,
        /// Value type; defaults to the catalog entry, then int32_t.
        #[arg(long = "type", short)]
        value_type: Option<ValueType>,
    },
    /// Connect and print device reports until Ctrl-C.
    Monitor {
        /// Echo MCU_RESET frames back to the device.
        #[arg(long)]
        reset_echo: bool,
        /// Acknowledge alarm and config reports.
        #[arg(long)]
        report_ack: bool,
    },
    /// Send a firmware image.
    Upgrade {
        /// Image file; its size must be a multiple of 2048 bytes.
        image: PathBuf,
    },
}

fn parse_address(text: &str) -> Result<u16, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid address {:?}: {}", text, e))
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> SessionResult<()> {
    if let Command::Ports = cli.command {
        for port in list_ports()? {
            println!("{}", port);
        }
        return Ok(());
    }

    let mut link = match &cli.config {
        Some(path) => LinkConfig::load(path)?,
        None => LinkConfig::default(),
    };
    if let Some(port) = &cli.port {
        link.serial.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        link.serial.baud_rate = baud;
    }
    if let Command::Monitor {
        reset_echo,
        report_ack,
    } = cli.command
    {
        link.session.reset_echo |= reset_echo;
        link.session.report_ack |= report_ack;
    }
    let directory = match &cli.items {
        Some(path) => StaticDirectory::load(path)?,
        None => StaticDirectory::new(),
    };

    let transport = SerialTransport::open(&link.serial)?;
    let sink = |kind: ReportKind, address: u16, value: RegisterValue| {
        println!("{:?} 0x{:04X} = {}", kind, address, value);
    };
    let session = Session::new(
        Arc::new(transport),
        Arc::new(directory),
        Arc::new(sink),
        link.session,
    );

    let result = connect(&session, Duration::from_millis(cli.connect_timeout_ms))
        .and_then(|()| execute(&session, cli.command));
    session.disconnect();
    result
}

fn connect(session: &Session, timeout: Duration) -> SessionResult<()> {
    session.connect()?;
    if !session.wait_connected(timeout) {
        return Err(SessionError::Timeout);
    }
    Ok(())
}

fn execute(session: &Session, command: Command) -> SessionResult<()> {
    match command {
        Command::Ports => Ok(()),
        Command::Read {
            address,
            value_type,
        } => {
            let value = match value_type {
                Some(ty) => session.read_register(address, ty)?,
                None if session.item(address).is_some() => session.read_item(address)?,
                None => session.read_register(address, ValueType::default())?,
            };
            println!("0x{:04X} = {}", address, value);
            Ok(())
        }
        Command::Write {
            address,
            value,
            value_type,
        } => {
            match (value_type, session.item(address)) {
                (Some(ty), _) => {
                    let value = RegisterValue::parse(&value, ty)?;
                    session.write_register(address, value, ty)?;
                }
                (None, Some(info)) => {
                    let value = RegisterValue::parse(&value, info.value_type)?;
                    session.write_item(address, value)?;
                }
                (None, None) => {
                    let ty = ValueType::default();
                    let value = RegisterValue::parse(&value, ty)?;
                    session.write_register(address, value, ty)?;
                }
            }
            info!(address = format_args!("0x{:04X}", address), "write accepted");
            Ok(())
        }
        Command::Monitor { .. } => {
            let (tx, rx) = crossbeam_channel::bounded::<()>(1);
            ctrlc::set_handler(move || {
                let _ = tx.try_send(());
            })
            .map_err(|e| SessionError::Config(format!("cannot install Ctrl-C handler: {}", e)))?;

            info!("monitoring, press Ctrl-C to stop");
            while rx.recv_timeout(Duration::from_millis(200)).is_err() {
                if !session.transport().is_open() || !session.is_listening() {
                    return Err(SessionError::TransportClosed);
                }
            }
            info!("stopping");
            Ok(())
        }
        Command::Upgrade { image } => {
            let bytes = std::fs::read(&image)?;
            info!(image = %image.display(), len = bytes.len(), "starting upgrade");
            let report = session.upgrade(&bytes, |done, total| {
                println!("packet {}/{}", done, total);
            })?;
            println!("{}", report);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x1200"), Ok(0x1200));
        assert_eq!(parse_address("4608"), Ok(4608));
        assert!(parse_address("0x10000").is_err());
        assert!(parse_address("reg").is_err());
    }

    #[test]
    fn test_cli_parses_write() {
        let cli = Cli::try_parse_from([
            "mculink", "--port", "COM3", "write", "0x10", "1.5", "--type", "float",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        match cli.command {
            Command::Write {
                address,
                value,
                value_type,
            } => {
                assert_eq!(address, 0x10);
                assert_eq!(value, "1.5");
                assert_eq!(value_type, Some(ValueType::Float32));
            }
            _ => panic!("expected write"),
        }
    }
}
