//! The `client` module defines the broker-side representation of a
//! connected client session.
//!
//! It provides the `ClientHandle` struct, which encapsulates what the broker
//! needs to reach a locally connected publisher or subscriber: its announced
//! name and the channel feeding that connection's socket writer task.

use tokio::sync::mpsc::UnboundedSender;

/// Handle to a locally connected client session.
///
/// The broker core pushes frames by sending serialized lines into `sender`;
/// a dedicated writer task drains the channel onto the socket. Names are
/// trusted: a second session announcing an existing name silently replaces
/// the previous handle, and the orphaned channel drops whatever was queued.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    /// The name the client announced on connect.
    pub name: String,

    /// FIFO channel into the session's socket writer task.
    pub sender: UnboundedSender<String>,
}

impl ClientHandle {
    pub fn new(name: String, sender: UnboundedSender<String>) -> Self {
        Self { name, sender }
    }

    /// Queues one frame line for delivery. Returns `false` when the session's
    /// writer task is gone (the connection is closing or already closed).
    pub fn send(&self, line: &str) -> bool {
        self.sender.send(line.to_string()).is_ok()
    }
}
