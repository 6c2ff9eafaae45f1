//! Receiver task for a subscriber connection.
//!
//! The broker multiplexes three kinds of frames onto a subscriber's socket:
//! synchronous command responses, broadcasts, and deleteNotify pushes. This
//! task owns the read half, prints pushes the moment they arrive, and
//! forwards response-class frames (`message type` ∈ {response, list,
//! current}) over an internal channel to the menu loop, which is blocked
//! waiting for exactly one of them per issued command.

use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::transport::message::{Push, Response};
use crate::transport::tcp;

/// Reads frames until the socket closes, demultiplexing pushes from
/// responses. Returns when the broker disconnects or the menu loop drops
/// its end of the channel.
pub async fn run(mut reader: BufReader<OwnedReadHalf>, responses: UnboundedSender<Response>) {
    loop {
        let line = match tcp::read_frame(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        if line.is_empty() {
            continue;
        }

        // Pushes carry "message type": "broadcast" | "deleteNotify"; any
        // other tagged frame is the answer to a pending request.
        if let Ok(push) = serde_json::from_str::<Push>(&line) {
            print_push(&push);
            continue;
        }
        match serde_json::from_str::<Response>(&line) {
            Ok(response) => {
                if responses.send(response).is_err() {
                    break;
                }
            }
            Err(e) => debug!("skipping unrecognized frame: {e}"),
        }
    }
}

fn print_push(push: &Push) {
    match push {
        Push::Broadcast {
            publisher,
            title,
            topic_id,
            message,
        } => {
            println!();
            println!("You have received a message");
            println!(
                "Publisher: {publisher} | Topic ID: {topic_id} | Title: {title} | Message: \"{message}\""
            );
        }
        Push::DeleteNotify { deleted } => {
            println!();
            println!("Deleted topics:");
            for topic in deleted {
                println!(
                    "ID {}: {} from {} was deleted.",
                    topic.topic_id, topic.title, topic.publisher
                );
            }
        }
    }
}
