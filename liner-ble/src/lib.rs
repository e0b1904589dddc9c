//! Argument handling for the `liner-ble` tool

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use liner_proto::{Command, DataTypes};

#[derive(Parser, Debug)]
#[command(name = "liner-ble")]
#[command(about = "BLE tool for scanning, monitoring and commanding liner devices")]
pub struct Cli {
    /// Config file (default: $LINER_HOME/config.json or ~/.liner/config.json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store the device UUIDs in the config file
    Init {
        /// service, command, data, mode, liveStream and optionally the DFU service
        #[arg(required = true, num_args = 5..=6)]
        uuids: Vec<String>,
        /// Default scan window in milliseconds
        #[arg(long)]
        scan_duration_ms: Option<u64>,
    },
    /// Scan for liner devices
    Scan {
        /// Scan duration in milliseconds (default from config)
        #[arg(short, long)]
        duration_ms: Option<u64>,
        /// Look for devices in firmware update mode instead
        #[arg(long)]
        dfu: bool,
    },
    /// Connect and print every event as JSON until interrupted
    Monitor {
        /// Device address or identifier
        device: String,
    },
    /// Write raw bytes to the command characteristic
    Send {
        device: String,
        /// Hex payload, e.g. "20" or "21:03"
        #[arg(value_parser = parse_payload)]
        payload: Payload,
        /// How long to wait for replies, in milliseconds
        #[arg(long, default_value = "3000")]
        wait_ms: u64,
    },
    /// Send a known request
    Request {
        device: String,
        #[command(subcommand)]
        request: Request,
        /// How long to wait for replies, in milliseconds
        #[arg(long, default_value = "3000")]
        wait_ms: u64,
    },
    /// Print device state, MAC address and firmware version
    Status { device: String },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Number of files stored on the device
    FileCount,
    /// Download one file
    File { index: u8 },
    /// Download the summary file
    Summary,
    /// Erase one file
    Erase { index: u8 },
    /// Erase every file
    EraseAll,
    /// Start logging the selected data types (all of them if none is given)
    StartLogging {
        #[arg(long)]
        step: bool,
        #[arg(long)]
        imu: bool,
        #[arg(long)]
        fsr: bool,
    },
    StopLogging,
}

impl Request {
    pub fn command(&self) -> Command {
        match *self {
            Request::FileCount => Command::GetFileCount,
            Request::File { index } => Command::GetFile { index },
            Request::Summary => Command::GetSummaryFile,
            Request::Erase { index } => Command::EraseFile { index },
            Request::EraseAll => Command::EraseAllFiles,
            Request::StartLogging { step, imu, fsr } => {
                let mut data_types = DataTypes::NONE;
                if step {
                    data_types = data_types | DataTypes::STEP;
                }
                if imu {
                    data_types = data_types | DataTypes::IMU;
                }
                if fsr {
                    data_types = data_types | DataTypes::FSR;
                }
                if data_types == DataTypes::NONE {
                    data_types = DataTypes::ALL;
                }
                Command::StartLogging { data_types }
            }
            Request::StopLogging => Command::StopLogging,
        }
    }
}

/// Raw command bytes given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(pub Vec<u8>);

/// Parse hex with optional `0x` prefix and `:`/space separators
pub fn parse_payload(s: &str) -> Result<Payload, String> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let hex: String = s.chars().filter(|c| !matches!(c, ':' | ' ')).collect();
    if hex.is_empty() {
        return Err("empty payload".to_string());
    }
    data_encoding::HEXLOWER_PERMISSIVE
        .decode(hex.as_bytes())
        .map(Payload)
        .map_err(|e| format!("invalid hex payload: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_payloads() {
        assert_eq!(parse_payload("20"), Ok(Payload(vec![0x20])));
        assert_eq!(parse_payload("0x2103"), Ok(Payload(vec![0x21, 0x03])));
        assert_eq!(parse_payload("21:0A"), Ok(Payload(vec![0x21, 0x0a])));
        assert_eq!(parse_payload("01 07"), Ok(Payload(vec![0x01, 0x07])));
        assert!(parse_payload("").is_err());
        assert!(parse_payload("2").is_err());
        assert!(parse_payload("zz").is_err());
    }

    #[test]
    fn requests_map_to_commands() {
        assert_eq!(Request::FileCount.command().to_bytes(), vec![0x20]);
        assert_eq!(Request::Erase { index: 4 }.command().to_bytes(), vec![0x22, 4]);
        assert_eq!(
            Request::StartLogging {
                step: true,
                imu: false,
                fsr: true
            }
            .command(),
            Command::StartLogging {
                data_types: DataTypes(5)
            }
        );
        assert_eq!(
            Request::StartLogging {
                step: false,
                imu: false,
                fsr: false
            }
            .command(),
            Command::StartLogging {
                data_types: DataTypes::ALL
            }
        );
    }

    #[test]
    fn command_line_parses() {
        let cli = Cli::try_parse_from([
            "liner-ble",
            "--config",
            "/tmp/liner.json",
            "request",
            "AA:BB",
            "file",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/liner.json")));
        match cli.command {
            Commands::Request {
                device,
                request,
                wait_ms,
            } => {
                assert_eq!(device, "AA:BB");
                assert_eq!(request, Request::File { index: 2 });
                assert_eq!(wait_ms, 3000);
            }
            other => panic!("unexpected {other:?}"),
        }

        let cli = Cli::try_parse_from(["liner-ble", "send", "AA:BB", "0x29"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Send { payload: Payload(ref p), .. } if p == &vec![0x29]
        ));
    }

    #[test]
    fn init_needs_five_uuids() {
        assert!(Cli::try_parse_from(["liner-ble", "init", "a", "b", "c", "d"]).is_err());
        let cli = Cli::try_parse_from(["liner-ble", "init", "a", "b", "c", "d", "e"]).unwrap();
        assert!(matches!(cli.command, Commands::Init { ref uuids, .. } if uuids.len() == 5));
    }
}
