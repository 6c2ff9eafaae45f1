//! CLI for MeshPub
//!
//! Subcommands:
//! - `broker`: run a broker node, optionally bootstrapped via a directory
//!   service or a list of peer addresses
//! - `directory`: run the directory service
//! - `publisher` / `subscriber`: run the interactive clients

use std::sync::{Arc, Mutex};

use clap::Parser;
use meshpub::broker::peer::{self, BrokerIdentity};
use meshpub::broker::{session, Broker};
use meshpub::config::load_config;
use meshpub::directory::{self, BrokerTarget};
use meshpub::utils::{logging, Error};
use meshpub::{publisher, subscriber};
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "meshpub")]
enum Command {
    /// Run a broker node
    Broker {
        /// Port to listen on
        port: u16,
        /// Directory service address (host:port) to register with
        #[arg(short = 'd', long = "directory")]
        directory: Option<String>,
        /// Peer broker addresses (host:port) to dial directly
        #[arg(short = 'b', long = "bootstrap", num_args = 1..)]
        bootstrap: Vec<String>,
    },
    /// Run the directory service
    Directory {
        /// Port to listen on
        port: u16,
    },
    /// Run the interactive publisher client
    Publisher {
        /// Name announced to the broker
        name: String,
        /// Broker address (host:port); omit when using --directory
        #[arg(required_unless_present = "directory")]
        broker: Option<String>,
        /// Directory service address (host:port) to pick a broker from
        #[arg(short = 'd', long = "directory", conflicts_with = "broker")]
        directory: Option<String>,
    },
    /// Run the interactive subscriber client
    Subscriber {
        /// Name announced to the broker
        name: String,
        /// Broker address (host:port); omit when using --directory
        #[arg(required_unless_present = "directory")]
        broker: Option<String>,
        /// Directory service address (host:port) to pick a broker from
        #[arg(short = 'd', long = "directory", conflicts_with = "broker")]
        directory: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cmd = Command::parse();
    if let Err(e) = run(cmd).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(cmd: Command) -> Result<(), Error> {
    let settings = load_config()?;
    logging::init(&settings.log);

    match cmd {
        Command::Broker {
            port,
            directory,
            bootstrap,
        } => run_broker(&settings.server.host, port, directory, bootstrap).await,
        Command::Directory { port } => run_directory(&settings.server.host, port).await,
        Command::Publisher {
            name,
            broker,
            directory,
        } => publisher::run(name, target_of(broker, directory)).await,
        Command::Subscriber {
            name,
            broker,
            directory,
        } => subscriber::run(name, target_of(broker, directory)).await,
    }
}

fn target_of(broker: Option<String>, directory: Option<String>) -> BrokerTarget {
    match directory {
        Some(addr) => BrokerTarget::ViaDirectory(addr),
        // clap guarantees the broker address is present when no directory is.
        None => BrokerTarget::Direct(broker.unwrap_or_default()),
    }
}

async fn run_broker(
    host: &str,
    port: u16,
    directory: Option<String>,
    bootstrap: Vec<String>,
) -> Result<(), Error> {
    let identity = BrokerIdentity::new(host.to_string(), port);
    let broker = Arc::new(Mutex::new(Broker::new()));

    // Listen before dialing anyone, so peers can dial back immediately.
    let listener = TcpListener::bind((host, port)).await?;
    info!("Broker is listening on port {port}");

    if let Some(directory_addr) = directory {
        peer::bootstrap_from_directory(&broker, &directory_addr, &identity).await?;
    }
    for addr in bootstrap {
        let (peer_host, peer_port) = split_host_port(&addr)?;
        peer::connect_to_peer(broker.clone(), &peer_host, peer_port, &identity).await?;
    }

    tokio::select! {
        _ = session::serve(listener, broker, identity) => {
            error!("Broker server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }
    Ok(())
}

async fn run_directory(host: &str, port: u16) -> Result<(), Error> {
    let listener = TcpListener::bind((host, port)).await?;
    info!("Directory Service is listening on port {port}");

    tokio::select! {
        _ = directory::serve(listener) => {
            error!("Directory service exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }
    Ok(())
}

fn split_host_port(addr: &str) -> Result<(String, u16), Error> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidAddress(addr.to_string()))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::InvalidAddress(addr.to_string()))?;
    Ok((host.to_string(), port))
}
