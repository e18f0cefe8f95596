//! Simulated thermometer entry point.
//!
//! Wires together the thermometer, the collector connection, and a headless
//! line-oriented shell, then runs until `quit` or Ctrl+C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ Thermometer::new() + spawn_generator()   -- readings on a timer
//!  └─ ConnectionManager::new()                 -- collector link + event channel
//!  └─ event printer task                       -- ShellEvent -> stdout
//!  └─ command loop                             -- stdin -> ShellBridge
//!       ├─ connect <ip> <port>
//!       ├─ disconnect
//!       ├─ interval <seconds>
//!       ├─ update / status / help
//!       └─ quit                                -> shutdown
//! ```
//!
//! # Shutdown (for beginners)
//!
//! The command loop races every stdin read against `tokio::signal::ctrl_c`.
//! Whichever way the loop ends, the device tries to say goodbye to the
//! collector with `Method: DISCONNECT;` (if connected), closes the session and
//! stops the generator before the runtime exits.  A collector that stopped
//! reading only costs the goodbye frame; shutdown still completes.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use thermo_core::WireEncoding;
use thermo_device::application::simulate_device::{Thermometer, ThermometerConfig};
use thermo_device::infrastructure::network::{ConnectionConfig, ConnectionManager};
use thermo_device::infrastructure::shell_bridge::{ShellBridge, ShellCommand, ShellEvent};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Text encoding used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EncodingArg {
    /// UTF-16 little endian, as spoken by the reference collector.
    Utf16le,
    /// UTF-8.
    Utf8,
}

impl From<EncodingArg> for WireEncoding {
    fn from(arg: EncodingArg) -> Self {
        match arg {
            EncodingArg::Utf16le => WireEncoding::Utf16Le,
            EncodingArg::Utf8 => WireEncoding::Utf8,
        }
    }
}

/// Simulated network-attached thermometer.
///
/// Connects to a collector over TCP, reports a drifting temperature, and
/// obeys the collector's commands.  Type `help` at the prompt for commands.
#[derive(Debug, Parser)]
#[command(
    name = "thermo-device",
    about = "Simulated network thermometer that reports to a TCP collector",
    version
)]
struct Cli {
    /// IP address of the collector.
    #[arg(long, default_value = "127.0.0.1")]
    address: String,

    /// TCP port of the collector; must lie in [1024, 49151].
    #[arg(long, default_value = "8888")]
    port: String,

    /// Connect immediately at startup instead of waiting for `connect`.
    #[arg(long)]
    connect: bool,

    /// Seconds between readings; must lie in [1, 10].
    #[arg(long, default_value_t = 1)]
    interval: i64,

    /// Text encoding of frames on the wire.
    #[arg(long, value_enum, default_value_t = EncodingArg::Utf16le)]
    encoding: EncodingArg,

    /// Show detail lines (sent status, manual close, error causes).
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn thermometer_config(&self) -> ThermometerConfig {
        ThermometerConfig {
            update_interval_secs: self.interval,
            ..Default::default()
        }
    }

    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            encoding: self.encoding.into(),
            verbose: self.verbose,
            ..Default::default()
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let thermometer =
        Thermometer::new(cli.thermometer_config()).context("invalid thermometer configuration")?;
    thermometer.spawn_generator();

    let (manager, mut events) = ConnectionManager::new(cli.connection_config(), thermometer);
    let bridge = ShellBridge::new(manager);

    info!(
        "thermometer starting; collector={}:{}, encoding={:?}",
        cli.address, cli.port, cli.encoding
    );

    // ── Event printer ─────────────────────────────────────────────────────────
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    if cli.connect {
        spawn_connect(&bridge, cli.address.clone(), cli.port.clone());
    }

    println!("{}", ShellCommand::USAGE);

    // ── Command loop ──────────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("received Ctrl+C; shutting down"),
                    Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
                }
                break;
            }
            line = lines.next_line() => line.context("failed to read stdin")?,
        };

        // stdin closed
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<ShellCommand>() {
            Ok(ShellCommand::Connect { address, port }) => spawn_connect(&bridge, address, port),
            Ok(ShellCommand::Disconnect) => bridge.disconnect().await,
            Ok(ShellCommand::SetInterval(secs)) => {
                // Failures were already logged to the shell.
                let _ = bridge.set_update_interval(&secs).await;
            }
            Ok(ShellCommand::UpdateTemperature) => {
                bridge.force_temperature_update();
            }
            Ok(ShellCommand::Status) => {
                let status = bridge.status();
                println!(
                    "[{}] {} °C, interval {} s",
                    status.connection_label, status.temperature_display, status.update_interval_secs
                );
            }
            Ok(ShellCommand::Help) => println!("{}", ShellCommand::USAGE),
            Ok(ShellCommand::Quit) => break,
            Err(msg) => warn!("{msg}"),
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    bridge.disconnect().await;
    bridge.manager().thermometer().dispose().await;
    drop(bridge);
    printer.abort();

    info!("thermometer stopped");
    Ok(())
}

/// Connects in the background so a slow TCP handshake never blocks the
/// prompt.
fn spawn_connect(bridge: &ShellBridge, address: String, port: String) {
    let bridge = bridge.clone();
    tokio::spawn(async move {
        // Failures were already logged to the shell.
        let _ = bridge.connect(&address, &port).await;
    });
}

fn print_event(event: &ShellEvent) {
    match event {
        ShellEvent::TemperatureChanged(value) => {
            println!("temperature {}", thermo_core::protocol::format_temperature(*value))
        }
        ShellEvent::ConnectionStateChanged(state) => println!("connection [{state}]"),
        ShellEvent::UpdateIntervalChanged(secs) => println!("update interval {secs} s"),
        ShellEvent::LogLine(line) => println!("{line}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        // Arrange: parse with no arguments (all defaults apply)
        let cli = Cli::parse_from(["thermo-device"]);

        // Assert
        assert_eq!(cli.address, "127.0.0.1");
        assert_eq!(cli.port, "8888");
        assert!(!cli.connect);
        assert_eq!(cli.interval, 1);
        assert_eq!(cli.encoding, EncodingArg::Utf16le);
    }

    #[test]
    fn test_cli_maps_into_configs() {
        let cli = Cli::parse_from([
            "thermo-device",
            "--interval",
            "4",
            "--encoding",
            "utf8",
            "--verbose",
        ]);

        let thermo = cli.thermometer_config();
        let conn = cli.connection_config();

        assert_eq!(thermo.update_interval_secs, 4);
        assert_eq!(conn.encoding, WireEncoding::Utf8);
        assert!(conn.verbose);
        assert_eq!(conn.device_type, "Thermometer");
    }

    #[test]
    fn test_cli_rejects_unknown_encoding() {
        assert!(Cli::try_parse_from(["thermo-device", "--encoding", "latin1"]).is_err());
    }
}
