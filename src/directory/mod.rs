//! The `directory` module implements the bootstrap registry and its client
//! side.
//!
//! The directory service is a single process holding an append-only list of
//! broker addresses. Brokers register on startup and receive the current
//! list back (including themselves); publishers and subscribers query the
//! list and pick a broker at random. There is no liveness checking and no
//! removal: a broker that restarts and re-registers appears twice, and
//! clients that draw a dead entry simply fail to connect.
//!
//! Every exchange is one request frame and one response frame on a fresh
//! connection.

use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::transport::message::{BrokerAddr, DirectoryRequest, DirectoryResponse};
use crate::transport::tcp;
use crate::utils::Error;

/// Append-only broker registry.
#[derive(Debug, Default)]
pub struct Registry {
    brokers: Vec<BrokerAddr>,
}

impl Registry {
    /// Appends an entry. Duplicates are allowed: re-registration after a
    /// broker restart produces a second copy of the same address.
    pub fn register(&mut self, addr: BrokerAddr) {
        self.brokers.push(addr);
    }

    pub fn brokers(&self) -> Vec<BrokerAddr> {
        self.brokers.clone()
    }
}

/// Serves the registry forever, one task per connection.
pub async fn serve(listener: TcpListener) {
    let registry = Arc::new(Mutex::new(Registry::default()));
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                debug!("directory client connected from {remote}");
                tokio::spawn(handle_connection(stream, registry.clone()));
            }
            Err(e) => warn!("directory accept failed: {e}"),
        }
    }
}

async fn handle_connection(stream: TcpStream, registry: Arc<Mutex<Registry>>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    while let Ok(Some(line)) = tcp::read_frame(&mut reader).await {
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<DirectoryRequest>(&line) {
            Ok(DirectoryRequest::Register { ip, port }) => {
                info!("registering broker {ip}:{port}");
                let mut registry = registry.lock().unwrap();
                registry.register(BrokerAddr { ip, port });
                DirectoryResponse {
                    user_type: Some("directory".to_string()),
                    brokers: registry.brokers(),
                }
            }
            Ok(DirectoryRequest::FromPublisher) | Ok(DirectoryRequest::FromSubscriber) => {
                DirectoryResponse {
                    user_type: None,
                    brokers: registry.lock().unwrap().brokers(),
                }
            }
            Err(e) => {
                debug!("skipping malformed directory request: {e}");
                continue;
            }
        };
        if let Err(e) = tcp::write_frame(&mut write_half, &response).await {
            debug!("directory reply failed: {e}");
            break;
        }
    }
}

// ── client side ─────────────────────────────────────────────────────

/// How a publisher or subscriber locates its broker.
#[derive(Debug, Clone)]
pub enum BrokerTarget {
    /// Explicit `host:port`.
    Direct(String),
    /// Ask the directory service at this address and pick at random.
    ViaDirectory(String),
}

/// Registers a broker with the directory and returns the full broker list,
/// including the entry just added.
pub async fn register_with_directory(
    directory_addr: &str,
    host: &str,
    port: u16,
) -> Result<Vec<BrokerAddr>, Error> {
    let request = DirectoryRequest::Register {
        ip: host.to_string(),
        port: port.to_string(),
    };
    let response = roundtrip(directory_addr, &request).await?;
    Ok(response.brokers)
}

/// Fetches the current broker list on behalf of a publisher or subscriber.
pub async fn fetch_brokers(
    directory_addr: &str,
    request: DirectoryRequest,
) -> Result<Vec<BrokerAddr>, Error> {
    let response = roundtrip(directory_addr, &request).await?;
    Ok(response.brokers)
}

/// Resolves the target to one broker endpoint, drawing at random from the
/// directory when asked to.
pub async fn resolve_broker(
    target: &BrokerTarget,
    request: DirectoryRequest,
) -> Result<String, Error> {
    match target {
        BrokerTarget::Direct(addr) => {
            println!("Connecting to specified broker: {addr}");
            Ok(addr.clone())
        }
        BrokerTarget::ViaDirectory(directory_addr) => {
            let brokers = fetch_brokers(directory_addr, request).await?;
            let pick = brokers
                .choose(&mut rand::thread_rng())
                .ok_or(Error::NoBrokers)?;
            let endpoint = pick.endpoint();
            println!("Connecting to broker: {endpoint}");
            Ok(endpoint)
        }
    }
}

async fn roundtrip(
    directory_addr: &str,
    request: &DirectoryRequest,
) -> Result<DirectoryResponse, Error> {
    let stream = TcpStream::connect(directory_addr)
        .await
        .map_err(|_| Error::DirectoryUnreachable(directory_addr.to_string()))?;
    let (read_half, mut write_half) = stream.into_split();
    tcp::write_frame(&mut write_half, request).await?;

    let mut reader = BufReader::new(read_half);
    let line = tcp::read_frame(&mut reader)
        .await?
        .ok_or_else(|| Error::DirectoryUnreachable(directory_addr.to_string()))?;
    Ok(serde_json::from_str(&line)?)
}
