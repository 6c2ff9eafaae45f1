//! Outbound peer links and mesh bootstrap.
//!
//! Every broker-to-broker link is a pair of one-directional TCP
//! connections: sync records always travel over the connection the emitting
//! broker dialed, and the receiving side reads them in its inbound session
//! handler. This module owns the outbound half: dialing a peer, announcing
//! our listen address, deduplicating links, and the writer task that drains
//! the link's queue onto the socket.
//!
//! Links come into existence three ways, and all of them funnel through
//! [`connect_to_peer`]:
//! - directory bootstrap: register, then dial every non-self entry
//! - `-b` bootstrap addresses: dial each directly
//! - reverse dial: an inbound peer announce for an address we do not hold
//!
//! A link dies only on write failure; there is no reconnect loop. Records
//! bound for a dead link are dropped and the mesh stays partitioned until
//! an operator or a re-registration re-establishes the link. State learned
//! over a link is never evicted when the link closes.

use std::sync::{Arc, Mutex};

use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

use crate::broker::engine::Broker;
use crate::directory;
use crate::transport::message::Announce;
use crate::transport::tcp;
use crate::utils::Error;

/// The address this broker accepts connections on, as announced to peers
/// and to the directory.
#[derive(Debug, Clone)]
pub struct BrokerIdentity {
    pub host: String,
    pub port: u16,
}

impl BrokerIdentity {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }

    /// The announce frame sent as the first line of every outbound link.
    pub fn announce(&self) -> Announce {
        Announce::Broker {
            ip: self.host.clone(),
            port: self.port.to_string(),
        }
    }

    /// Whether the given advertised address is this broker itself. Used to
    /// filter self-entries out of the directory response.
    pub fn matches(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }
}

/// One outbound link to a peer broker, keyed by the address the peer
/// advertises (its listen address, not the socket's ephemeral endpoint).
#[derive(Debug, Clone)]
pub struct PeerLink {
    pub host: String,
    pub port: u16,
    /// FIFO channel into the link's socket writer task.
    pub sender: UnboundedSender<String>,
}

impl PeerLink {
    pub fn new(host: String, port: u16, sender: UnboundedSender<String>) -> Self {
        Self { host, port, sender }
    }

    /// Queues one frame line. Returns `false` when the writer task is gone.
    pub fn send(&self, line: &str) -> bool {
        self.sender.send(line.to_string()).is_ok()
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Registers with the directory service and dials every broker it returns,
/// skipping our own entry. An unreachable directory is a startup failure;
/// an unreachable individual peer is not.
pub async fn bootstrap_from_directory(
    broker: &Arc<Mutex<Broker>>,
    directory_addr: &str,
    identity: &BrokerIdentity,
) -> Result<(), Error> {
    let entries =
        directory::register_with_directory(directory_addr, &identity.host, identity.port).await?;
    for entry in entries {
        let port = match entry.port_number() {
            Ok(port) => port,
            Err(_) => {
                warn!("directory returned unparseable port for {}", entry.ip);
                continue;
            }
        };
        if identity.matches(&entry.ip, port) {
            continue;
        }
        if let Err(e) = connect_to_peer(broker.clone(), &entry.ip, port, identity).await {
            warn!("failed to dial broker {}:{port}: {e}", entry.ip);
        }
    }
    Ok(())
}

/// Dials a peer broker, announces our listen address, and inserts the link
/// into the peer set. Dialing ourselves or an already-linked address is a
/// no-op; a concurrent dial that loses the insertion race drops its socket.
pub async fn connect_to_peer(
    broker: Arc<Mutex<Broker>>,
    host: &str,
    port: u16,
    identity: &BrokerIdentity,
) -> Result<(), Error> {
    if identity.matches(host, port) {
        return Ok(());
    }
    if broker.lock().unwrap().has_peer(host, port) {
        return Ok(());
    }

    let stream = TcpStream::connect((host, port)).await?;
    let (read_half, mut write_half) = stream.into_split();
    tcp::write_frame(&mut write_half, &identity.announce()).await?;
    // The peer never writes back on this connection; its sync records for us
    // arrive on the connection it dials in the other direction.
    drop(read_half);

    let (sender, receiver) = mpsc::unbounded_channel::<String>();
    let link = PeerLink::new(host.to_string(), port, sender);
    if !broker.lock().unwrap().add_peer(link) {
        return Ok(());
    }
    info!("peer link established to {host}:{port}");

    tokio::spawn(run_link_writer(
        write_half,
        receiver,
        broker,
        host.to_string(),
        port,
    ));
    Ok(())
}

/// Drains the link's queue onto the socket. The first failed write is how a
/// dead peer is discovered; the link is removed and the task exits.
async fn run_link_writer(
    mut write_half: OwnedWriteHalf,
    mut receiver: UnboundedReceiver<String>,
    broker: Arc<Mutex<Broker>>,
    host: String,
    port: u16,
) {
    while let Some(line) = receiver.recv().await {
        if let Err(e) = tcp::write_line(&mut write_half, &line).await {
            warn!("peer link to {host}:{port} failed: {e}");
            break;
        }
    }
    broker.lock().unwrap().remove_peer(&host, port);
    info!("peer link to {host}:{port} removed");
}
