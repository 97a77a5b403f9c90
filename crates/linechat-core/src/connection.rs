//! A single two-user chat session over TCP.
//!
//! A [`Connection`] owns one background task. That task binds and accepts
//! (listener) or dials (initiator), then reads lines from the peer until the
//! connection closes. The caller talks to it through [`Connection::send`] and
//! [`Connection::close`]; everything the task observes is reported through a
//! [`Notifier`].
//!
//! The connection state lives in a `watch` channel. Its lock is the single
//! point of synchronization between the caller and the task, and a change to
//! `Closed` doubles as the cancellation signal: every blocking accept, dial,
//! read and write is raced against it.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use linechat_protocol::wire::split_message;
use linechat_protocol::{dial, split, LineReader, LineWriter, ProtocolError, TcpLineListener};
use tokio::io::AsyncRead;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::error::ChatError;
use crate::notifier::{Notice, Notifier};
use crate::state::ConnectionState;

/// Which side of the session a connection plays. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Binds a port and waits for one peer.
    Listener,
    /// Dials a known host and port.
    Initiator,
}

/// Where a connection gets its peer from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Bind `addr` and accept exactly one peer.
    Listen { addr: SocketAddr },
    /// Dial `host` on `port`.
    Dial { host: String, port: u16 },
}

impl Endpoint {
    /// Listen on `port` on all IPv4 interfaces.
    pub fn listen(port: u16) -> Self {
        Self::Listen {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        }
    }

    pub fn dial(host: impl Into<String>, port: u16) -> Self {
        Self::Dial {
            host: host.into(),
            port,
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Self::Listen { .. } => Mode::Listener,
            Self::Dial { .. } => Mode::Initiator,
        }
    }

    fn initial_state(&self) -> ConnectionState {
        match self.mode() {
            Mode::Listener => ConnectionState::Listening,
            Mode::Initiator => ConnectionState::Connecting,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listen { addr } => write!(f, "listen {addr}"),
            Self::Dial { host, port } => write!(f, "dial {host}:{port}"),
        }
    }
}

type Writer = LineWriter<OwnedWriteHalf>;

/// How long cleanup waits for buffered output to drain before dropping the
/// data socket anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Handle to a chat connection.
///
/// Cloning yields another handle to the same connection. Dropping the last
/// handle closes the connection; the background task still runs its cleanup
/// and reports [`Notifier::on_closed`].
#[derive(Clone)]
pub struct Connection {
    handle: Arc<Handle>,
}

struct Handle {
    shared: Arc<Shared>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl Connection {
    /// Listen on `port` for a single peer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn listen(port: u16, notifier: impl Notifier) -> Self {
        Self::open(Endpoint::listen(port), notifier)
    }

    /// Dial `host` on `port`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(host: impl Into<String>, port: u16, notifier: impl Notifier) -> Self {
        Self::open(Endpoint::dial(host, port), notifier)
    }

    /// Start a connection towards `endpoint` and spawn its background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(endpoint: Endpoint, notifier: impl Notifier) -> Self {
        let shared = Arc::new(Shared::new(endpoint, Arc::new(notifier)));
        let span = info_span!(
            "connection",
            id = %shared.id,
            mode = ?shared.endpoint.mode(),
        );
        info!(parent: &span, endpoint = %shared.endpoint, "starting connection");
        tokio::spawn(Arc::clone(&shared).run().instrument(span));

        Self {
            handle: Arc::new(Handle { shared }),
        }
    }

    fn shared(&self) -> &Shared {
        &self.handle.shared
    }

    /// Session id used in log output.
    pub fn id(&self) -> Uuid {
        self.shared().id
    }

    pub fn mode(&self) -> Mode {
        self.shared().endpoint.mode()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared().endpoint
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.shared().state()
    }

    /// Address the listening socket was bound to, once bound.
    ///
    /// Always `None` for initiators.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared().local_addr.get().copied()
    }

    /// Send one message to the peer.
    ///
    /// Does nothing unless the connection is `Connected`. A message containing
    /// `\n` goes out as one line per embedded line, each reported with its own
    /// [`Notice::Sent`]. A write failure is reported through the notifier and
    /// closes the connection; no error is returned to the caller.
    pub async fn send(&self, message: &str) {
        let shared = self.shared();
        let mut closing = shared.state.subscribe();
        let mut writer = shared.writer.lock().await;

        for line in split_message(message) {
            // Present exactly while established and not yet cleaned up
            let Some(stream) = writer.as_mut() else {
                trace!("send ignored, no open stream");
                return;
            };
            if !shared.notify_if_connected(Notice::Sent(line.to_string())) {
                trace!("send ignored, not connected");
                return;
            }

            let result = tokio::select! {
                result = stream.send_line(line) => result,
                () = closed(&mut closing) => {
                    debug!("send interrupted by close");
                    return;
                }
            };

            if let Err(e) = result {
                drop(writer);
                shared.send_failed(&e);
                return;
            }
        }
    }

    /// Close the connection.
    ///
    /// Safe to call any number of times, from any context, in any state.
    /// Interrupts a pending accept, dial or read; the background task then
    /// cleans up and reports [`Notifier::on_closed`] exactly once.
    pub fn close(&self) {
        self.shared().close();
    }

    /// Wait until the background task has finished its cleanup.
    pub async fn closed(&self) {
        let mut done = self.shared().done.subscribe();
        let _ = done.wait_for(|finished| *finished).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("endpoint", self.endpoint())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// State shared between the handles and the background task.
struct Shared {
    id: Uuid,
    endpoint: Endpoint,
    state: watch::Sender<ConnectionState>,
    /// Write side of the data socket; installed on establishment and taken
    /// during cleanup.
    writer: Mutex<Option<Writer>>,
    local_addr: OnceLock<SocketAddr>,
    /// Flips to `true` once cleanup has finished.
    done: watch::Sender<bool>,
    notifier: Arc<dyn Notifier>,
}

impl Shared {
    fn new(endpoint: Endpoint, notifier: Arc<dyn Notifier>) -> Self {
        let (state, _) = watch::channel(endpoint.initial_state());
        let (done, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            endpoint,
            state,
            writer: Mutex::new(None),
            local_addr: OnceLock::new(),
            done,
            notifier,
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn close(&self) {
        self.state.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }
            debug!(from = %state, "close requested");
            transition(state, ConnectionState::Closed);
            true
        });
    }

    /// Deliver `notice` unless the connection has already closed.
    fn notify_unless_closed(&self, notice: Notice) {
        let state = self.state.borrow();
        if !state.is_closed() {
            self.notifier.notify(notice);
        }
    }

    /// Deliver `notice` only while connected. Returns whether it was delivered.
    fn notify_if_connected(&self, notice: Notice) -> bool {
        let state = self.state.borrow();
        let connected = *state == ConnectionState::Connected;
        if connected {
            self.notifier.notify(notice);
        }
        connected
    }

    async fn run(self: Arc<Self>) {
        let mut closing = self.state.subscribe();

        if let Err(e) = self.session(&mut closing).await {
            self.report_failure(&e);
        }
        self.clean_up().await;
    }

    async fn session(
        &self,
        closing: &mut watch::Receiver<ConnectionState>,
    ) -> Result<(), ChatError> {
        let stream = match &self.endpoint {
            Endpoint::Listen { addr } => self.accept_peer(*addr, closing).await?,
            Endpoint::Dial { host, port } => self.dial_peer(host, *port, closing).await?,
        };
        let Some(stream) = stream else {
            debug!("closed before a peer was reached");
            return Ok(());
        };

        let (reader, writer) = split(stream);
        if !self.opened(writer).await {
            return Ok(());
        }
        self.read_loop(reader, closing).await
    }

    async fn accept_peer(
        &self,
        addr: SocketAddr,
        closing: &mut watch::Receiver<ConnectionState>,
    ) -> Result<Option<TcpStream>, ChatError> {
        let listener = TcpLineListener::bind(addr).await?;
        let local = listener.local_addr()?;
        let _ = self.local_addr.set(local);
        self.notify_unless_closed(Notice::Listening { addr: local });

        let (stream, remote) = tokio::select! {
            result = listener.accept() => result?,
            () = closed(closing) => return Ok(None),
        };
        // One peer per session; release the passive socket right away
        drop(listener);

        info!(remote = %remote, "peer accepted");
        Ok(Some(stream))
    }

    async fn dial_peer(
        &self,
        host: &str,
        port: u16,
        closing: &mut watch::Receiver<ConnectionState>,
    ) -> Result<Option<TcpStream>, ChatError> {
        self.notify_unless_closed(Notice::Connecting {
            host: host.to_string(),
            port,
        });

        let stream = tokio::select! {
            result = dial(host, port) => result?,
            () = closed(closing) => return Ok(None),
        };

        info!(host, port, "dial succeeded");
        Ok(Some(stream))
    }

    /// Install the writer and move to `Connected`, unless a close won the race.
    async fn opened(&self, writer: Writer) -> bool {
        *self.writer.lock().await = Some(writer);

        let established = self.state.send_if_modified(|state| {
            if !state.is_pending() {
                return false;
            }
            transition(state, ConnectionState::Connected);
            self.notifier.on_established();
            true
        });

        if established {
            info!("connection established");
        } else {
            debug!("closed before the connection was established");
        }
        established
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        &self,
        mut reader: LineReader<R>,
        closing: &mut watch::Receiver<ConnectionState>,
    ) -> Result<(), ChatError> {
        while self.state() == ConnectionState::Connected {
            let line = tokio::select! {
                result = reader.next_line() => result?,
                () = closed(closing) => break,
            };

            match line {
                Some(text) => self.received(text),
                None => self.closed_by_peer(),
            }
        }
        Ok(())
    }

    fn received(&self, text: String) {
        if !self.notify_if_connected(Notice::Received(text)) {
            trace!("discarding line received after close");
        }
    }

    fn closed_by_peer(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state != ConnectionState::Connected {
                return false;
            }
            self.notifier.notify(Notice::PeerClosed);
            transition(state, ConnectionState::Closed);
            true
        });
        if changed {
            info!("connection closed by peer");
        }
    }

    /// Surface `error` and close, unless the connection already closed.
    fn report_failure(&self, error: &ChatError) {
        let reported = self.state.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }
            warn!(error = %error, state = %state, "connection failed");
            self.notifier.notify(Notice::Error(error.to_string()));
            transition(state, ConnectionState::Closed);
            true
        });
        if !reported {
            // Expected fallout of a deliberate close
            debug!(error = %error, "suppressed error after close");
        }
    }

    fn send_failed(&self, error: &ProtocolError) {
        let reported = self.state.send_if_modified(|state| {
            if *state != ConnectionState::Connected {
                return false;
            }
            warn!(error = %error, "send failed");
            self.notifier.notify(Notice::SendFailed(error.to_string()));
            transition(state, ConnectionState::Closed);
            true
        });
        if !reported {
            debug!(error = %error, "suppressed send error after close");
        }
    }

    async fn clean_up(&self) {
        self.state.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }
            transition(state, ConnectionState::Closed);
            true
        });

        self.notifier.on_closed();

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            // A peer that stopped reading never lets the flush finish
            match tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => trace!(error = %e, "shutdown of write side failed"),
                Err(_) => debug!("peer not draining, dropping data socket"),
            }
            drop(writer);
        }

        self.done.send_replace(true);
        info!("connection closed");
    }
}

fn transition(state: &mut ConnectionState, next: ConnectionState) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal transition {state} -> {next}"
    );
    trace!(from = %state, to = %next, "state transition");
    *state = next;
}

/// Resolves once the watched state is `Closed`.
async fn closed(rx: &mut watch::Receiver<ConnectionState>) {
    // The sender lives as long as the connection, so this only returns early
    // if the whole connection is gone.
    let _ = rx.wait_for(|state| state.is_closed()).await;
}
