//! TCP transport: single-use listener, dial, and stream splitting.

use std::net::SocketAddr;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::ProtocolError;
use crate::wire::{LineReader, LineWriter};

/// Passive socket that waits for a chat peer.
///
/// The chat only ever accepts one peer; callers drop the listener as soon as
/// [`accept`](Self::accept) returns, which closes the passive socket.
pub struct TcpLineListener {
    listener: TcpListener,
}

impl TcpLineListener {
    /// Bind a listening socket on `addr`.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ProtocolError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProtocolError::Bind { addr, source })?;

        info!(addr = %addr, "TCP listener bound");
        Ok(Self { listener })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ProtocolError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept an incoming connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ProtocolError> {
        let (stream, remote) = self.listener.accept().await.map_err(ProtocolError::Accept)?;

        // Chat lines are tiny; don't hold them back for coalescing
        stream.set_nodelay(true)?;

        debug!(remote = %remote, "accepted connection");
        Ok((stream, remote))
    }
}

/// Open a connection to `host` on `port`.
pub async fn dial(host: &str, port: u16) -> Result<TcpStream, ProtocolError> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|source| ProtocolError::Connect {
            host: host.to_string(),
            port,
            source,
        })?;
    stream.set_nodelay(true)?;

    debug!(host, port, "connected to peer");
    Ok(stream)
}

/// Split a connected stream into its line reader and line writer.
///
/// The socket is closed once both halves have been dropped.
pub fn split(stream: TcpStream) -> (LineReader<OwnedReadHalf>, LineWriter<OwnedWriteHalf>) {
    let (read, write) = stream.into_split();
    (LineReader::new(read), LineWriter::new(write))
}
