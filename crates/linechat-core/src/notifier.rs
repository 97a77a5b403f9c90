//! Notification seam between a [`Connection`](crate::Connection) and the
//! program hosting it.
//!
//! The connection never renders anything itself. It reports transcript lines
//! through [`Notifier::notify`] and tells the host when sending becomes
//! possible ([`Notifier::on_established`]) or impossible again
//! ([`Notifier::on_closed`]). Calls arrive on the connection's background
//! task or on whatever context called `send`/`close`; implementations hand
//! the event off to their own context and return quickly.

use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;

/// A transcript line reported by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The passive socket is bound and waiting for a peer.
    Listening { addr: SocketAddr },
    /// A dial to the remote peer is starting.
    Connecting { host: String, port: u16 },
    /// A line was written to the peer.
    Sent(String),
    /// A line arrived from the peer, unmodified.
    Received(String),
    /// The peer closed its side of the connection.
    PeerClosed,
    /// Establishment or I/O failure not caused by a local close.
    Error(String),
    /// Writing to the peer failed; the connection is being closed.
    SendFailed(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listening { addr } => write!(f, "LISTENING ON PORT {}", addr.port()),
            Self::Connecting { host, port } => write!(f, "CONNECTING TO {host} ON PORT {port}"),
            Self::Sent(text) => write!(f, "SEND:  {text}"),
            Self::Received(text) => write!(f, "RECEIVE:  {text}"),
            Self::PeerClosed => write!(f, "CONNECTION CLOSED FROM OTHER SIDE"),
            Self::Error(detail) => write!(f, "ERROR:  {detail}"),
            Self::SendFailed(detail) => {
                write!(f, "ERROR OCCURRED WHILE TRYING TO SEND DATA: {detail}")
            }
        }
    }
}

/// Receives status and message events from a connection.
///
/// Implementations must not call back into the connection from these
/// methods; some of them run while the connection's state lock is held.
pub trait Notifier: Send + Sync + 'static {
    /// Deliver a transcript line.
    fn notify(&self, notice: Notice);

    /// The connection reached `Connected`: enable sending, disable
    /// "start connection" affordances.
    fn on_established(&self);

    /// The connection ended, whatever the cause. Fires exactly once per
    /// connection.
    fn on_closed(&self);
}

/// Every callback of a [`Notifier`] as one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Notice(Notice),
    Established,
    Closed,
}

impl fmt::Display for ChatEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Notice(notice) => notice.fmt(f),
            Self::Established => write!(f, "CONNECTION ESTABLISHED"),
            Self::Closed => write!(f, "*** CONNECTION CLOSED ***"),
        }
    }
}

/// Notifier that forwards every callback into an unbounded channel.
///
/// The receiving end is drained on whatever context the host renders from.
/// Events sent after the receiver is dropped are discarded.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ChatEvent) {
        let _ = self.tx.send(event);
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        self.forward(ChatEvent::Notice(notice));
    }

    fn on_established(&self) {
        self.forward(ChatEvent::Established);
    }

    fn on_closed(&self) {
        self.forward(ChatEvent::Closed);
    }
}
