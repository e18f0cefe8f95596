//! Bridge between the device core and whatever shell displays it.
//!
//! The shell (a desktop window, a terminal, a test) is outside this crate.  It
//! talks to the core in two directions:
//!
//! ```text
//! shell                         core
//! ─────────────────────────────────────────────────────────────
//! connect("10.0.0.5", "8888") ─> ShellBridge::connect
//! set_update_interval("3")    ─> ShellBridge::set_update_interval
//!                             <─ ShellEvent::TemperatureChanged(21.4)
//!                             <─ ShellEvent::ConnectionStateChanged(Connected)
//!                             <─ ShellEvent::LogLine("Network: Sent info")
//! ```
//!
//! Operations take the raw strings typed into the shell's fields and validate
//! them here; every rejected input produces exactly one log line.  Events are
//! delivered on an unbounded channel from whichever task produced them, and
//! moving them onto a UI thread is the shell's business.
//!
//! All types in this module derive `serde` traits so a GUI bridge can ship
//! them across an IPC boundary as JSON.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::application::log_line::LogLabel;
use crate::infrastructure::network::{ConnectionManager, NetworkError, MAX_PORT, MIN_PORT};

// ── Shared state types ────────────────────────────────────────────────────────

/// State of the link to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// TCP handshake in progress.
    Connecting,
    /// Handshake done; facts flow both ways.
    Connected,
    /// The last connect or write failed.
    Error,
}

impl ConnectionState {
    /// Short status label shown next to the connection indicator.
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "down",
            ConnectionState::Connecting => "wait",
            ConnectionState::Connected => "up",
            ConnectionState::Error => "err",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Notifications from the core to the shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ShellEvent {
    /// A new temperature reading.
    TemperatureChanged(f64),
    /// The connection moved to a new state.
    ConnectionStateChanged(ConnectionState),
    /// The update interval was changed (locally or by the collector).
    UpdateIntervalChanged(u32),
    /// A line for the log pane.
    LogLine(String),
}

/// Snapshot of everything the shell displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatusDto {
    pub connection_state: ConnectionState,
    pub connection_label: String,
    pub temperature: f64,
    /// Reading formatted with two decimals.
    pub temperature_display: String,
    pub update_interval_secs: u32,
    /// Microseconds since the Unix epoch of the latest reading.
    pub last_update_us: u64,
}

// ── Shell commands ────────────────────────────────────────────────────────────

/// A command typed into a line-oriented shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Connect { address: String, port: String },
    Disconnect,
    SetInterval(String),
    UpdateTemperature,
    Status,
    Help,
    Quit,
}

impl ShellCommand {
    /// Usage text for [`ShellCommand::Help`].
    pub const USAGE: &'static str = "commands: connect <ip> <port> | disconnect | interval <seconds> \
                                     | update | status | help | quit";
}

impl FromStr for ShellCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        match (command.as_str(), args.as_slice()) {
            ("connect", [address, port]) => Ok(ShellCommand::Connect {
                address: (*address).to_string(),
                port: (*port).to_string(),
            }),
            ("disconnect", []) => Ok(ShellCommand::Disconnect),
            ("interval", [secs]) => Ok(ShellCommand::SetInterval((*secs).to_string())),
            ("update", []) => Ok(ShellCommand::UpdateTemperature),
            ("status", []) => Ok(ShellCommand::Status),
            ("help" | "?", []) => Ok(ShellCommand::Help),
            ("quit" | "exit", []) => Ok(ShellCommand::Quit),
            _ => Err(format!("unrecognized command {line:?}; {}", Self::USAGE)),
        }
    }
}

// ── Bridge ────────────────────────────────────────────────────────────────────

/// String-level front end to the [`ConnectionManager`].
#[derive(Clone)]
pub struct ShellBridge {
    manager: Arc<ConnectionManager>,
}

impl ShellBridge {
    /// Wraps a connection manager.
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// The wrapped manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Parses the address and port fields and connects.
    ///
    /// # Errors
    ///
    /// [`NetworkError::InvalidAddress`] / [`NetworkError::InvalidPort`] for bad
    /// input, otherwise whatever [`ConnectionManager::connect`] returns.
    pub async fn connect(&self, address: &str, port: &str) -> Result<(), NetworkError> {
        let ip = match address.trim().parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(e) => {
                let err = NetworkError::InvalidAddress(address.trim().to_string());
                debug!("address parse failed: {e}");
                self.manager.log(LogLabel::IpAddress.line(&err));
                return Err(err);
            }
        };

        let port = match parse_port(port) {
            Some(port) => port,
            None => {
                let err = NetworkError::InvalidPort(port.trim().to_string());
                self.manager.log(LogLabel::Port.line(&err));
                return Err(err);
            }
        };

        self.manager.connect(ip, port).await
    }

    /// Closes the session, if any.
    pub async fn disconnect(&self) {
        self.manager.disconnect().await;
    }

    /// Parses the interval field and applies it.
    ///
    /// # Errors
    ///
    /// [`NetworkError::InvalidInterval`] if the text is not a whole number,
    /// [`NetworkError::Interval`] if it is out of range.
    pub async fn set_update_interval(&self, seconds: &str) -> Result<(), NetworkError> {
        match seconds.trim().parse::<i64>() {
            Ok(secs) => self.manager.set_update_interval(secs).await,
            Err(_) => {
                let err = NetworkError::InvalidInterval(seconds.trim().to_string());
                self.manager.log(LogLabel::UpdateInterval.line(&err));
                Err(err)
            }
        }
    }

    /// Generates a new reading immediately.
    pub fn force_temperature_update(&self) -> f64 {
        self.manager.force_temperature_update()
    }

    /// Current snapshot for display.
    pub fn status(&self) -> DeviceStatusDto {
        self.manager.status()
    }
}

/// Accepts only integers inside the registered-port range.
fn parse_port(text: &str) -> Option<u16> {
    let value: i64 = text.trim().parse().ok()?;
    if (i64::from(MIN_PORT)..=i64::from(MAX_PORT)).contains(&value) {
        u16::try_from(value).ok()
    } else {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
