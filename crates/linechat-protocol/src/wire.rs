//! Wire format: newline-terminated UTF-8 text lines.
//!
//! Each message on the wire is:
//!   [UTF-8 text][`\n`]
//!
//! There is no length prefix and no escaping. Readers also accept `\r\n`
//! line endings and strip the terminator before handing the line out.

use std::io;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tracing::trace;

use crate::error::ProtocolError;

/// Line terminator written after every outgoing line.
pub const LINE_TERMINATOR: &[u8] = b"\n";

/// Maximum length of one incoming line in bytes, terminator excluded.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Split an outgoing message into the lines that go on the wire.
///
/// A message without `\n` is sent as exactly one line, even when empty.
/// A message with embedded line breaks becomes one wire line per embedded
/// line; a single trailing line break does not produce an extra empty line.
pub fn split_message(message: &str) -> Vec<&str> {
    if message.contains('\n') {
        message.lines().collect()
    } else {
        vec![message]
    }
}

/// Reads newline-delimited text lines from a byte stream.
pub struct LineReader<R> {
    inner: BufReader<R>,
    /// Bytes of the line currently being read.
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            pending: Vec::new(),
        }
    }

    /// Read the next line, without its terminator.
    ///
    /// Returns `None` once the peer has closed its write side. A final line
    /// without a terminator is still returned. Lines longer than
    /// [`MAX_LINE_LEN`] and lines that are not UTF-8 are read errors.
    ///
    /// This call is cancel safe: a partially read line is kept and completed
    /// by the next call.
    pub async fn next_line(&mut self) -> Result<Option<String>, ProtocolError> {
        // Room for the longest line plus `\r\n`
        let budget = (MAX_LINE_LEN + 2).saturating_sub(self.pending.len());
        (&mut self.inner)
            .take(budget as u64)
            .read_until(b'\n', &mut self.pending)
            .await
            .map_err(ProtocolError::Read)?;

        if self.pending.is_empty() {
            trace!("end of stream");
            return Ok(None);
        }

        let mut line = std::mem::take(&mut self.pending);
        let terminated = line.last() == Some(&b'\n');
        if terminated {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        if line.len() > MAX_LINE_LEN || (!terminated && line.len() >= MAX_LINE_LEN + 2) {
            return Err(ProtocolError::Read(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line longer than {MAX_LINE_LEN} bytes"),
            )));
        }

        let text = String::from_utf8(line)
            .map_err(|e| ProtocolError::Read(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        trace!(len = text.len(), "received line");
        Ok(Some(text))
    }
}

/// Writes newline-terminated text lines to a byte stream.
pub struct LineWriter<W> {
    stream: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            stream: BufWriter::new(inner),
        }
    }

    /// Write one line followed by the terminator, then flush.
    ///
    /// The caller is responsible for keeping `line` free of `\n`; see
    /// [`split_message`].
    pub async fn send_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        self.stream
            .write_all(line.as_bytes())
            .await
            .map_err(ProtocolError::Write)?;
        self.stream
            .write_all(LINE_TERMINATOR)
            .await
            .map_err(ProtocolError::Write)?;
        self.stream.flush().await.map_err(ProtocolError::Write)?;

        trace!(len = line.len(), "sent line");
        Ok(())
    }

    /// Flush and shut down the write side (signals end-of-stream to the peer).
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.stream.shutdown().await.map_err(ProtocolError::Write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_message_is_one_line() {
        assert_eq!(split_message("hello"), vec!["hello"]);
    }

    #[test]
    fn empty_message_is_still_sent() {
        assert_eq!(split_message(""), vec![""]);
    }

    #[test]
    fn embedded_breaks_become_separate_lines() {
        assert_eq!(split_message("one\ntwo\r\nthree"), vec!["one", "two", "three"]);
        assert_eq!(split_message("trailing\n"), vec!["trailing"]);
        assert_eq!(split_message("a\n\nb"), vec!["a", "", "b"]);
    }

    #[test]
    fn lone_carriage_return_is_kept() {
        assert_eq!(split_message("a\rb"), vec!["a\rb"]);
    }

    #[tokio::test]
    async fn writer_output_is_read_back_line_by_line() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = LineWriter::new(client);
        let mut reader = LineReader::new(server);

        writer.send_line("first").await.unwrap();
        writer.send_line("").await.unwrap();
        writer.send_line("  spaced  out  ").await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(
            reader.next_line().await.unwrap().as_deref(),
            Some("  spaced  out  ")
        );
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reader_strips_crlf() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = LineReader::new(server);

        client.write_all(b"dos line\r\nunix line\n").await.unwrap();
        drop(client);

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("dos line"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("unix line"));
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn line_at_the_limit_is_accepted() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = LineReader::new(server);

        let writer = tokio::spawn(async move {
            client.write_all(&vec![b'a'; MAX_LINE_LEN]).await.unwrap();
            client.write_all(b"\r\nnext\n").await.unwrap();
        });

        let line = reader.next_line().await.unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_LEN);
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("next"));
        writer.await.unwrap();
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn overlong_line_is_a_read_error() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut reader = LineReader::new(server);

        // No terminator and the stream stays open: must not wait for more
        let writer = tokio::spawn(async move {
            client.write_all(&vec![b'a'; MAX_LINE_LEN + 10]).await.unwrap();
            client
        });

        assert!(matches!(
            reader.next_line().await,
            Err(ProtocolError::Read(e)) if e.kind() == std::io::ErrorKind::InvalidData
        ));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn unterminated_last_line_is_returned() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = LineReader::new(server);

        client.write_all(b"no newline").await.unwrap();
        drop(client);

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("no newline"));
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_read_error() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = LineReader::new(server);

        client.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();
        drop(client);

        assert!(matches!(
            reader.next_line().await,
            Err(ProtocolError::Read(_))
        ));
    }
}
