//! All thermometer protocol message types.
//!
//! Every frame on the wire carries exactly one fact or command of the form
//! `"<Key>: <Value>"`.  The set of keys is closed: decoding produces a
//! [`Message`] variant up front so that the dispatcher can `match` on it
//! exhaustively instead of searching the text for known prefixes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Terminates every frame.  There is no escaping, so the delimiter can never
/// appear inside a key or value.
pub const DELIMITER: char = ';';

/// Separates the key from the value inside a frame.
pub const KEY_SEPARATOR: &str = ": ";

/// Device type string announced in the `Device` fact.
pub const DEVICE_TYPE: &str = "Thermometer";

/// Health code carried by the `Status` fact when the device works normally.
pub const DEVICE_STATUS_UP: i32 = 42;

// ── Keys ──────────────────────────────────────────────────────────────────────

/// The fixed key vocabulary of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKey {
    Device,
    UpdateInterval,
    Temperature,
    Status,
    Method,
}

impl MessageKey {
    /// All keys, in the order the dispatcher gives them priority.
    pub const ALL: [MessageKey; 5] = [
        MessageKey::UpdateInterval,
        MessageKey::Method,
        MessageKey::Device,
        MessageKey::Temperature,
        MessageKey::Status,
    ];

    /// The label written on the wire in front of the separator.
    pub fn label(self) -> &'static str {
        match self {
            MessageKey::Device => "Device",
            MessageKey::UpdateInterval => "Update interval",
            MessageKey::Temperature => "Temperature",
            MessageKey::Status => "Status",
            MessageKey::Method => "Method",
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MessageKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKey::ALL
            .into_iter()
            .find(|key| key.label() == s)
            .ok_or_else(|| ProtocolError::UnknownKey(s.to_string()))
    }
}

// ── Methods ───────────────────────────────────────────────────────────────────

/// Commands that can be carried by a `Method` fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// Generate a new temperature reading immediately.
    UpdateTemp,
    /// Close the session.
    Disconnect,
    /// Reply with a `Status` fact.
    RequestStatus,
}

impl Method {
    /// Command name as written on the wire.
    pub fn name(self) -> &'static str {
        match self {
            Method::UpdateTemp => "UPDATE_TEMP",
            Method::Disconnect => "DISCONNECT",
            Method::RequestStatus => "REQUEST_STATUS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPDATE_TEMP" => Ok(Method::UpdateTemp),
            "DISCONNECT" => Ok(Method::Disconnect),
            "REQUEST_STATUS" => Ok(Method::RequestStatus),
            other => Err(ProtocolError::UnknownMethod(other.to_string())),
        }
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// A single decoded fact or command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Device identity, sent once after connecting.
    Device(String),
    /// Update interval in whole seconds.
    ///
    /// Signed so that a peer asking for `-3` is treated as an out-of-range
    /// request rather than a malformed frame.
    UpdateInterval(i64),
    /// Current temperature reading.
    Temperature(f64),
    /// Device health code.
    Status(i32),
    /// A command for the receiver to execute.
    Method(Method),
}

impl Message {
    /// Returns the key this message is written under.
    pub fn key(&self) -> MessageKey {
        match self {
            Message::Device(_) => MessageKey::Device,
            Message::UpdateInterval(_) => MessageKey::UpdateInterval,
            Message::Temperature(_) => MessageKey::Temperature,
            Message::Status(_) => MessageKey::Status,
            Message::Method(_) => MessageKey::Method,
        }
    }

    /// Returns the value as it appears on the wire.
    ///
    /// Temperatures are written with two decimals, the same precision the
    /// shell displays.
    pub fn value(&self) -> String {
        match self {
            Message::Device(name) => name.clone(),
            Message::UpdateInterval(secs) => secs.to_string(),
            Message::Temperature(t) => format_temperature(*t),
            Message::Status(code) => code.to_string(),
            Message::Method(method) => method.name().to_string(),
        }
    }

    /// Parses the text of one frame with its delimiter already removed.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::MissingSeparator`] when there is no `:` at all.
    /// - [`ProtocolError::UnknownKey`] for keys outside the vocabulary.
    /// - [`ProtocolError::MalformedField`] when the value does not parse.
    /// - [`ProtocolError::UnknownMethod`] for unrecognized command names.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let (raw_key, raw_value) = text
            .split_once(':')
            .ok_or_else(|| ProtocolError::MissingSeparator(text.to_string()))?;
        let key: MessageKey = raw_key.trim().parse()?;
        let value = raw_value.trim();

        let malformed = || ProtocolError::MalformedField {
            key,
            value: value.to_string(),
        };

        match key {
            MessageKey::Device => Ok(Message::Device(value.to_string())),
            MessageKey::UpdateInterval => value
                .parse()
                .map(Message::UpdateInterval)
                .map_err(|_| malformed()),
            MessageKey::Temperature => value
                .parse::<f64>()
                .ok()
                .filter(|t| t.is_finite())
                .map(Message::Temperature)
                .ok_or_else(malformed),
            MessageKey::Status => value.parse().map(Message::Status).map_err(|_| malformed()),
            MessageKey::Method => value.parse().map(Message::Method),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.key(), KEY_SEPARATOR, self.value())
    }
}

/// Formats a temperature with two decimals.
pub fn format_temperature(value: f64) -> String {
    format!("{value:.2}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
