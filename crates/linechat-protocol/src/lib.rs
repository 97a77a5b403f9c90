//! TCP transport and wire protocol for linechat.
//!
//! This crate handles the socket side of a two-user chat: binding a
//! single-use listener, dialing a peer, and reading/writing the
//! newline-delimited text lines that make up the wire protocol.

pub mod error;
pub mod transport;
pub mod wire;

pub use error::ProtocolError;
pub use transport::{dial, split, TcpLineListener};
pub use wire::{LineReader, LineWriter};
