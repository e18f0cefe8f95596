//! Network infrastructure for the thermometer.
//!
//! Owns the single TCP connection to the collector.  See
//! [`connection_manager`] for the state machine and the task layout.

pub mod connection_manager;

use std::net::SocketAddr;

use thermo_core::protocol::messages::DEVICE_TYPE;
use thermo_core::{ProtocolError, WireEncoding};
use thiserror::Error;

use crate::application::simulate_device::ThermometerError;
use crate::infrastructure::shell_bridge::ConnectionState;

pub use connection_manager::ConnectionManager;

/// Lowest port the device will connect to.
pub const MIN_PORT: u16 = 1024;
/// Highest port the device will connect to.
pub const MAX_PORT: u16 = 49151;

/// Errors that can occur in the device network layer.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The address field is not an IPv4 or IPv6 address.
    #[error("invalid IP address {0:?}")]
    InvalidAddress(String),

    /// The port is not an integer in [1024, 49151].
    #[error("incorrect port value {0:?}; [1024; 49151] ports are allowed")]
    InvalidPort(String),

    /// The interval field is not a whole number.
    #[error("{0:?} is not a whole number of seconds")]
    InvalidInterval(String),

    /// The interval is a number but out of range.
    #[error(transparent)]
    Interval(#[from] ThermometerError),

    /// `connect` was called while a session is being set up or running.
    #[error("cannot connect while the connection is {0}")]
    AlreadyActive(ConnectionState),

    /// The TCP handshake failed.
    #[error("failed to connect to collector at {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl NetworkError {
    /// `true` for rejected user input; the operation was aborted and no state
    /// changed.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            NetworkError::InvalidAddress(_)
                | NetworkError::InvalidPort(_)
                | NetworkError::InvalidInterval(_)
                | NetworkError::Interval(_)
                | NetworkError::AlreadyActive(_)
        )
    }

    /// `true` for socket failures.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, NetworkError::ConnectFailed { .. } | NetworkError::Io(_))
    }
}

/// Settings for the collector connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Announced in the `Device` fact after connecting.
    pub device_type: String,
    /// Text encoding of frames on the wire.
    pub encoding: WireEncoding,
    /// Size of the receive loop's read buffer.
    pub read_buffer_size: usize,
    /// Also emit detail log lines to the shell.
    pub verbose: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            device_type: DEVICE_TYPE.to_string(),
            encoding: WireEncoding::Utf16Le,
            read_buffer_size: 8192,
            verbose: false,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
