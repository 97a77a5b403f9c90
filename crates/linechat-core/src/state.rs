//! Connection state machine.

/// State of a chat connection.
///
/// ```text
/// Listening ──peer accepted──▶ Connected ──close / EOF / I/O error──▶ Closed
/// Connecting ──dial ok───────▶ Connected
/// Listening | Connecting ──close / failure──────────────────────────▶ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Bound (or binding) a passive socket, waiting for one peer.
    Listening,
    /// Dialing the remote peer.
    Connecting,
    /// Data socket established; lines flow both ways.
    Connected,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Re-entering `Closed` is allowed so that closing stays idempotent.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Listening | Self::Connecting, Self::Connected) | (_, Self::Closed)
        )
    }

    /// Whether the connection is still establishing.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Listening | Self::Connecting)
    }

    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Listening => write!(f, "Listening"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}
