//! Interactive subscriber client.
//!
//! A subscriber holds one connection to one broker, announced with
//! `{"user type": "subscriber"}`. Because the broker pushes broadcasts and
//! deletion notices on the same socket that carries command responses, the
//! socket's read half lives in a separate receiver task
//! ([`receiver`]) and the menu loop rendezvouses with it over a channel:
//! issue one request, then take exactly one response-class frame off the
//! channel. Pushes are printed by the receiver as they arrive and never
//! satisfy a pending request.

pub mod receiver;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::directory::{self, BrokerTarget};
use crate::transport::message::{
    Announce, Detail, DirectoryRequest, Request, Response, ResponseClass,
};
use crate::transport::tcp;
use crate::utils::Error;

/// Runs the interactive subscriber until `exit`, EOF, or a dead broker.
pub async fn run(name: String, target: BrokerTarget) -> Result<(), Error> {
    let endpoint = directory::resolve_broker(&target, DirectoryRequest::FromSubscriber).await?;
    let stream = TcpStream::connect(&endpoint).await?;
    let (read_half, mut write_half) = stream.into_split();

    tcp::write_frame(&mut write_half, &Announce::Subscriber { name }).await?;
    println!("Connected to the broker");

    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<Response>();
    tokio::spawn(receiver::run(BufReader::new(read_half), response_tx));

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!();
        print_menu();
        println!();

        let Some(line) = input.next_line().await? else {
            break;
        };
        let parts: Vec<&str> = line.split_whitespace().collect();

        let request = match parts.first().copied() {
            Some("list") => Request::List,
            Some("current") => Request::ShowCurrentSubscription,
            Some("sub") => {
                let Some(topic_id) = subscription_topic_id(&parts) else {
                    continue;
                };
                Request::Subscribe { topic_id }
            }
            Some("unsub") => {
                let Some(topic_id) = subscription_topic_id(&parts) else {
                    continue;
                };
                Request::Unsubscribe { topic_id }
            }
            Some("exit") => {
                println!("Program terminated.");
                break;
            }
            _ => {
                println!("Invalid command. Please re-enter.");
                continue;
            }
        };

        if tcp::write_frame(&mut write_half, &request).await.is_err() {
            println!("The server seems to be down. Terminating the program.");
            break;
        }
        // Block until the receiver hands over the one response-class frame
        // this request produces; pushes printed meanwhile don't wake us.
        match response_rx.recv().await {
            Some(response) => print_response(&response),
            None => {
                println!("The server seems to be down. Terminating the program.");
                break;
            }
        }
    }
    Ok(())
}

/// Extracts and validates the topic id of a `sub`/`unsub` command.
fn subscription_topic_id(parts: &[&str]) -> Option<String> {
    let Some(raw) = parts.get(1) else {
        println!("Invalid command. Please re-enter.");
        return None;
    };
    if raw.parse::<i64>().is_err() {
        println!("ID accepts only number.");
        return None;
    }
    Some(raw.to_string())
}

fn print_response(response: &Response) {
    match &response.detail {
        Detail::Topics(topics) if response.is_success() => {
            match response.message_type {
                Some(ResponseClass::Current) => println!("Subscribed Topics:"),
                Some(ResponseClass::List) => println!("Available Topics:"),
                _ => {}
            }
            for topic in topics {
                println!(
                    "Topic ID: {} | Title: {} | Publisher: {}",
                    topic.topic_id, topic.title, topic.publisher
                );
            }
        }
        Detail::Text(text) => println!("{text}"),
        _ => {}
    }
}

fn print_menu() {
    println!("Please select command: list, sub, current, unsub.");
    println!("1. list #all topics");
    println!("2. sub {{topic_id}} #subscribe to a topic");
    println!("3. current # show the current subscriptions of the subscriber");
    println!("4. unsub {{topic_id}} #unsubscribe from a topic");
    println!("5. exit");
}
