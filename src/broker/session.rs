//! Per-connection session handling and the broker accept loop.
//!
//! Every inbound socket gets one task. The first frame must be an announce
//! naming the role; the session then runs until EOF or an I/O error:
//!
//! - publisher / subscriber sessions loop over request frames, dispatch to
//!   the broker core under the lock, and queue exactly one response line
//!   for each response-bearing command. The queue is drained by a dedicated
//!   writer task that also carries asynchronous pushes, so responses and
//!   pushes share one FIFO per socket.
//! - peer sessions apply `sync` frames and write nothing back. An announce
//!   from an address we hold no link to triggers a reverse dial so the mesh
//!   link becomes bidirectional.
//!
//! Disconnect cleanup runs exactly once per session, whether the read loop
//! or the writer task notices the closed socket first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::engine::Broker;
use crate::broker::peer::{self, BrokerIdentity};
use crate::client::ClientHandle;
use crate::transport::message::{Announce, Request, Response};
use crate::transport::tcp;

#[derive(Debug, Clone, Copy)]
enum Role {
    Publisher,
    Subscriber,
}

/// Accepts connections forever, spawning one session task per socket.
pub async fn serve(listener: TcpListener, broker: Arc<Mutex<Broker>>, identity: BrokerIdentity) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                debug!("accepted connection from {remote}");
                tokio::spawn(handle_session(stream, broker.clone(), identity.clone()));
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
}

async fn handle_session(stream: TcpStream, broker: Arc<Mutex<Broker>>, identity: BrokerIdentity) {
    let session_id = Uuid::new_v4();
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let line = match tcp::read_frame(&mut reader).await {
        Ok(Some(line)) => line,
        Ok(None) => return,
        Err(e) => {
            debug!(%session_id, "read failed before announce: {e}");
            return;
        }
    };
    let announce = match serde_json::from_str::<Announce>(&line) {
        Ok(announce) => announce,
        Err(e) => {
            warn!(%session_id, "unparseable announce frame: {e}");
            return;
        }
    };

    match announce {
        Announce::Publisher { name } => {
            run_client_session(Role::Publisher, name, reader, write_half, broker, session_id).await;
        }
        Announce::Subscriber { name } => {
            run_client_session(Role::Subscriber, name, reader, write_half, broker, session_id)
                .await;
        }
        Announce::Broker { ip, port } => {
            drop(write_half); // peer links are read-only on the inbound side
            run_peer_session(ip, port, reader, broker, identity, session_id).await;
        }
    }
}

/// Request loop for a publisher or subscriber session.
async fn run_client_session(
    role: Role,
    name: String,
    mut reader: BufReader<OwnedReadHalf>,
    write_half: OwnedWriteHalf,
    broker: Arc<Mutex<Broker>>,
    session_id: Uuid,
) {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    {
        let mut broker = broker.lock().unwrap();
        let handle = ClientHandle::new(name.clone(), tx.clone());
        match role {
            Role::Publisher => broker.register_publisher(handle),
            Role::Subscriber => broker.register_subscriber(handle),
        }
    }
    info!(%session_id, ?role, name = %name, "client connected");

    let cleanup_done = Arc::new(AtomicBool::new(false));
    let do_cleanup = {
        let broker = broker.clone();
        let name = name.clone();
        let cleanup_done = cleanup_done.clone();

        move || {
            if !cleanup_done.swap(true, Ordering::SeqCst) {
                let mut broker = broker.lock().unwrap();
                match role {
                    Role::Publisher => {
                        broker.unregister_publisher(&name);
                        broker.on_publisher_disconnect(&name);
                    }
                    Role::Subscriber => {
                        broker.unregister_subscriber(&name);
                        broker.on_subscriber_disconnect(&name);
                    }
                }
            }
        }
    };

    {
        let do_cleanup = do_cleanup.clone();
        tokio::spawn(async move {
            run_session_writer(write_half, rx).await;
            do_cleanup();
        });
    }

    loop {
        let line = match tcp::read_frame(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        if line.is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<Request>(&line) {
            Ok(request) => request,
            Err(e) => {
                debug!(%session_id, "skipping malformed frame: {e}");
                queue_response(&tx, &Response::failed("Invalid command."));
                continue;
            }
        };

        // One critical section per command: the mutation, its local push
        // enqueues, its peer forward enqueues, and the response enqueue all
        // land in lock-acquisition order.
        let mut broker_lock = broker.lock().unwrap();
        let response = match request {
            Request::Sync(record) => {
                broker_lock.apply_sync(record);
                None
            }
            Request::List => Some(broker_lock.list_topics()),
            Request::Create {
                topic_id,
                topic_name,
            } => Some(broker_lock.create_topic(&topic_id, &topic_name, &name)),
            Request::Publish { topic_id, message } => {
                Some(broker_lock.publish_message(&topic_id, &message, &name))
            }
            Request::Delete { topic_id } => Some(broker_lock.delete_topic(&topic_id, &name)),
            Request::CountSubscriber => Some(broker_lock.count_subscribers(&name)),
            Request::Subscribe { topic_id } => Some(broker_lock.subscribe(&topic_id, &name)),
            Request::Unsubscribe { topic_id } => Some(broker_lock.unsubscribe(&topic_id, &name)),
            Request::ShowCurrentSubscription => {
                Some(broker_lock.show_current_subscription(&name))
            }
        };
        if let Some(response) = response {
            queue_response(&tx, &response);
        }
        drop(broker_lock);
    }

    do_cleanup();
    info!(%session_id, name = %name, "client disconnected");
}

fn queue_response(tx: &mpsc::UnboundedSender<String>, response: &Response) {
    match serde_json::to_string(response) {
        Ok(line) => {
            let _ = tx.send(line);
        }
        Err(e) => warn!("failed to serialize response: {e}"),
    }
}

/// Drains queued frames onto the socket until the channel or socket closes.
async fn run_session_writer(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = tcp::write_line(&mut write_half, &line).await {
            debug!("session write failed: {e}");
            break;
        }
    }
}

/// Sync-only loop for an inbound peer connection.
async fn run_peer_session(
    ip: String,
    port: String,
    mut reader: BufReader<OwnedReadHalf>,
    broker: Arc<Mutex<Broker>>,
    identity: BrokerIdentity,
    session_id: Uuid,
) {
    let port: u16 = match port.parse() {
        Ok(port) => port,
        Err(_) => {
            warn!(%session_id, "peer announced unparseable port {port:?}");
            return;
        }
    };
    info!(%session_id, "peer broker announced {ip}:{port}");

    let should_dial = {
        let broker = broker.lock().unwrap();
        !identity.matches(&ip, port) && !broker.has_peer(&ip, port)
    };
    if should_dial {
        if let Err(e) = peer::connect_to_peer(broker.clone(), &ip, port, &identity).await {
            warn!("reverse dial to {ip}:{port} failed: {e}");
        }
    }

    loop {
        let line = match tcp::read_frame(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Request>(&line) {
            Ok(Request::Sync(record)) => {
                broker.lock().unwrap().apply_sync(record);
            }
            Ok(_) => debug!(%session_id, "ignoring non-sync command on peer link"),
            Err(e) => debug!(%session_id, "dropping malformed sync frame: {e}"),
        }
    }
    info!(%session_id, "peer link from {ip}:{port} closed");
}
