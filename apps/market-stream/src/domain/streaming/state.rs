use std::fmt;

/// Status of the exchange connection.
///
/// Observers receive every transition in the order it happens. A manager
/// that has never connected is [`ConnectionState::Disconnected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// A connection attempt is in flight.
    Connecting,
    /// The socket is open and frames are flowing.
    Connected,
    /// No socket is open.
    #[default]
    Disconnected,
    /// The socket reported an error; a close follows.
    Error,
}

impl ConnectionState {
    /// Lower-case name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    /// Numeric value for the connection state gauge.
    #[must_use]
    pub const fn gauge_value(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Error => 3.0,
        }
    }

    /// Whether the socket is open.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
