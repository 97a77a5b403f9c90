//! Core of linechat: a two-user, line-oriented chat connection.
//!
//! One side listens for a single peer, the other dials it; once connected,
//! both exchange newline-terminated text lines until either side closes.
//! The [`Connection`] type owns the socket and its background task and
//! reports everything it sees through a [`Notifier`].

pub mod config;
pub mod connection;
pub mod error;
pub mod notifier;
pub mod setup;
pub mod state;

pub use config::Config;
pub use connection::{Connection, Endpoint, Mode};
pub use error::ChatError;
pub use notifier::{ChannelNotifier, ChatEvent, Notice, Notifier};
pub use state::ConnectionState;
