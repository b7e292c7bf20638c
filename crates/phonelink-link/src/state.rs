//! Connection lifecycle state.

/// Where the link is in its lifecycle.
///
/// `Connecting` only exists inside the accept handler and is never
/// published; it is kept so presentation layers that know the four numeric
/// codes keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not listening and not connected.
    #[default]
    None,
    /// Waiting for the accessory to connect.
    Listening,
    /// Accepting a channel (transient).
    Connecting,
    /// A session with the accessory is active.
    Connected,
}

impl ConnectionState {
    /// Numeric code used by presentation layers.
    pub const fn code(&self) -> u8 {
        match self {
            ConnectionState::None => 0,
            ConnectionState::Listening => 1,
            ConnectionState::Connecting => 2,
            ConnectionState::Connected => 3,
        }
    }

    /// Returns the state as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::None => "none",
            ConnectionState::Listening => "listening",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
