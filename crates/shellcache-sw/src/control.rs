//! Control channel
//!
//! Commands posted to the worker by the page. They carry no reply; the
//! sender observes the effects (a new controller, a fuller cache) instead.

use std::fmt;

/// A recognized control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlMessage {
    /// Stop waiting and become the active worker now. Pages keep their
    /// current controller until they reload.
    SkipWaiting,
    /// Fetch every manifest resource that is not cached yet.
    DownloadOffline,
}

impl ControlMessage {
    /// Parse message data. Unrecognized data yields `None` and is ignored.
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "skipWaiting" => Some(Self::SkipWaiting),
            "downloadOffline" => Some(Self::DownloadOffline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SkipWaiting => "skipWaiting",
            Self::DownloadOffline => "downloadOffline",
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_commands() {
        assert_eq!(ControlMessage::parse("skipWaiting"), Some(ControlMessage::SkipWaiting));
        assert_eq!(
            ControlMessage::parse("downloadOffline"),
            Some(ControlMessage::DownloadOffline)
        );
    }

    #[test]
    fn test_parse_is_exact() {
        assert_eq!(ControlMessage::parse("SkipWaiting"), None);
        assert_eq!(ControlMessage::parse(" downloadOffline"), None);
        assert_eq!(ControlMessage::parse(""), None);
    }

    #[test]
    fn test_display_round_trip() {
        for msg in [ControlMessage::SkipWaiting, ControlMessage::DownloadOffline] {
            assert_eq!(ControlMessage::parse(&msg.to_string()), Some(msg));
        }
    }
}
