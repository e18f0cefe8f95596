//! MessageDispatcher: reacts to frames received from the collector.
//!
//! The dispatcher never touches the socket.  It decodes a frame into a typed
//! [`Message`], applies local effects to the [`Thermometer`], and returns the
//! list of [`Action`]s (replies, teardown, log lines) for the connection
//! manager to carry out in order.
//!
//! | Inbound frame                  | Effect                                          |
//! |--------------------------------|-------------------------------------------------|
//! | `Update interval: N`           | apply N, or reply with the current interval     |
//! | `Method: UPDATE_TEMP`          | generate a new reading                          |
//! | `Method: DISCONNECT`           | end the session                                 |
//! | `Method: REQUEST_STATUS`       | reply `Status: 42`                              |
//! | `Method: <unknown>`            | ignored                                         |
//! | anything else                  | logged as unknown data                          |

use std::sync::Arc;

use thermo_core::protocol::{
    messages::DEVICE_STATUS_UP, strip_delimiter, Message, MessageKey, Method, ProtocolError,
};
use tracing::{debug, warn};

use crate::application::log_line::LogLabel;
use crate::application::simulate_device::Thermometer;

/// Something the connection manager must do in response to a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write a message to the collector.
    Send(Message),
    /// Tear down the session.
    Disconnect,
    /// The update interval was changed by the collector.
    IntervalChanged(u32),
    /// Show a line in the shell log.
    Log(String),
    /// Show a line in the shell log only when verbose logging is on.
    LogVerbose(String),
}

/// Interprets decoded frames against the device state.
pub struct MessageDispatcher {
    thermometer: Arc<Thermometer>,
}

impl MessageDispatcher {
    /// Creates a dispatcher acting on `thermometer`.
    pub fn new(thermometer: Arc<Thermometer>) -> Self {
        Self { thermometer }
    }

    /// Handles one frame as produced by the codec (delimiter included).
    ///
    /// Empty and whitespace-only frames produce no actions at all.
    pub fn dispatch(&self, frame: &str) -> Vec<Action> {
        let text = strip_delimiter(frame);
        if text.is_empty() {
            return Vec::new();
        }

        match Message::parse(text) {
            Ok(Message::UpdateInterval(secs)) => self.handle_update_interval(secs),
            Ok(Message::Method(method)) => self.handle_method(method),
            Ok(other) => {
                debug!(key = %other.key(), "ignoring fact the device does not consume");
                vec![unknown_data(text)]
            }
            Err(ProtocolError::UnknownMethod(name)) => {
                debug!(method = %name, "ignoring unrecognized method");
                Vec::new()
            }
            Err(ProtocolError::MalformedField {
                key: MessageKey::UpdateInterval,
                value,
            }) => {
                warn!(%value, "malformed update interval from collector");
                vec![Action::Log(
                    LogLabel::Network.line("Received incorrect update interval"),
                )]
            }
            Err(e) => {
                debug!("undecodable frame: {e}");
                vec![unknown_data(text)]
            }
        }
    }

    fn handle_update_interval(&self, secs: i64) -> Vec<Action> {
        let mut actions = vec![Action::Log(
            LogLabel::Network.line(format_args!("Received update interval: {secs}")),
        )];

        match self.thermometer.set_update_interval(secs) {
            Ok(()) => actions.push(Action::IntervalChanged(self.thermometer.update_interval())),
            Err(e) => {
                // Tell the collector which interval is actually in force.
                let current = i64::from(self.thermometer.update_interval());
                actions.push(Action::Send(Message::UpdateInterval(current)));
                actions.push(Action::Log(LogLabel::UpdateInterval.line(e)));
            }
        }
        actions
    }

    fn handle_method(&self, method: Method) -> Vec<Action> {
        match method {
            Method::UpdateTemp => {
                self.thermometer.update_temperature();
                vec![Action::Log(
                    LogLabel::Network.line("Temperature update was requested."),
                )]
            }
            Method::Disconnect => vec![
                Action::Log(LogLabel::Network.line("Disconnect was requested.")),
                Action::Disconnect,
            ],
            Method::RequestStatus => vec![
                Action::Send(Message::Status(DEVICE_STATUS_UP)),
                Action::LogVerbose(LogLabel::Network.line("Status was requested.")),
            ],
        }
    }
}

fn unknown_data(text: &str) -> Action {
    Action::Log(LogLabel::Network.line(format_args!("Received unknown data: \"{text}\"")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
