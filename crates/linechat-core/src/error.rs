//! Core errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] linechat_protocol::ProtocolError),
}
