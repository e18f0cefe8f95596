//! Category prefixes for lines shown in the shell's log pane.

use std::fmt;

/// The category a shell log line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLabel {
    Connection,
    Network,
    UpdateInterval,
    IpAddress,
    Port,
    Thermometer,
}

impl LogLabel {
    /// Prefix written in front of the line text.
    pub fn prefix(self) -> &'static str {
        match self {
            LogLabel::Connection => "Connection: ",
            LogLabel::Network => "Network: ",
            LogLabel::UpdateInterval => "Update interval: ",
            LogLabel::IpAddress => "IP Address: ",
            LogLabel::Port => "Port: ",
            LogLabel::Thermometer => "Thermometer: ",
        }
    }

    /// Builds a full log line, e.g. `Network: Sent info`.
    pub fn line(self, text: impl fmt::Display) -> String {
        format!("{}{text}", self.prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_prepends_prefix() {
        assert_eq!(LogLabel::Network.line("Sent info"), "Network: Sent info");
        assert_eq!(LogLabel::UpdateInterval.line(format_args!("Set to {}", 3)), "Update interval: Set to 3");
    }
}
