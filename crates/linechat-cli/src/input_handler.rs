//! Maps lines typed on stdin to chat commands.

use std::io::BufRead;

use tokio::sync::mpsc;

/// What a line of user input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send the line to the peer as-is.
    Message(String),
    /// Close the connection and exit once it is closed.
    Quit,
}

impl Command {
    /// Interpret one input line.
    ///
    /// `/quit`, `/close` and `/disconnect` end the session. A line starting
    /// with `//` sends the rest of it with one leading slash, so messages
    /// that look like commands can still be sent.
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "/quit" | "/close" | "/disconnect" => Self::Quit,
            _ => match line.strip_prefix("//") {
                Some(rest) => Self::Message(format!("/{rest}")),
                None => Self::Message(line.to_string()),
            },
        }
    }
}

/// Read stdin on a dedicated thread and forward each line.
///
/// A plain thread is used so that a blocked terminal read never holds up
/// process exit. The channel closes at end of input.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
