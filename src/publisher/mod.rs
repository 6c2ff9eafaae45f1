//! Interactive publisher client.
//!
//! A publisher holds one connection to one broker, announced with
//! `{"user type": "publisher"}`. It owns topics: it can create them,
//! publish to them, count their subscribers, and delete them. Nothing is
//! ever pushed to a publisher asynchronously, so the menu loop can read
//! each command's response directly off the socket.
//!
//! Validation happens here, before anything reaches the wire: topic ids
//! must parse as signed integers, and messages longer than
//! [`MAX_MESSAGE_UNITS`] UTF-16 code units are rejected locally. The
//! broker never re-checks either.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::directory::{self, BrokerTarget};
use crate::transport::message::{Announce, Detail, DirectoryRequest, Request, Response};
use crate::transport::tcp;
use crate::utils::Error;

/// Longest message a publisher may send, in UTF-16 code units.
pub const MAX_MESSAGE_UNITS: usize = 100;

/// Runs the interactive publisher until `exit`, EOF, or a dead broker.
pub async fn run(name: String, target: BrokerTarget) -> Result<(), Error> {
    let endpoint = directory::resolve_broker(&target, DirectoryRequest::FromPublisher).await?;
    let stream = TcpStream::connect(&endpoint).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    tcp::write_frame(&mut write_half, &Announce::Publisher { name }).await?;
    println!("Connected to the broker");

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
            Some("create") => {
                if parts.len() < 3 {
                    println!("Invalid command. Please provide topic id and name.");
                    continue;
                }
                let Some(topic_id) = numeric_topic_id(parts[1]) else {
                    continue;
                };
                Request::Create {
                    topic_id,
                    topic_name: parts[2..].join(" "),
                }
            }
            Some("publish") => {
                if parts.len() < 3 {
                    println!("Invalid command. Please provide topic id and message.");
                    continue;
                }
                let Some(topic_id) = numeric_topic_id(parts[1]) else {
                    continue;
                };
                let message = parts[2..].join(" ");
                if exceeds_message_cap(&message) {
                    println!("Message exceeds the maximum length of 100 characters.");
                    continue;
                }
                Request::Publish { topic_id, message }
            }
            Some("show") => Request::CountSubscriber,
            Some("delete") => {
                if parts.len() < 2 {
                    println!("Invalid command. Please provide topic id.");
                    continue;
                }
                let Some(topic_id) = numeric_topic_id(parts[1]) else {
                    continue;
                };
                Request::Delete { topic_id }
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

        match exchange(&mut write_half, &mut reader, &request).await {
            Ok(response) => print_response(&response),
            Err(_) => {
                println!("The server seems to be down. Terminating the program.");
                break;
            }
        }
    }
    Ok(())
}

/// Validates a topic id the way the wire demands: a string of decimal
/// digits that parses as a signed integer.
fn numeric_topic_id(raw: &str) -> Option<String> {
    if raw.parse::<i64>().is_err() {
        println!("Topic id must be a number.");
        return None;
    }
    Some(raw.to_string())
}

/// The cap counts UTF-16 code units, so a multibyte character can weigh
/// more than one unit.
fn exceeds_message_cap(message: &str) -> bool {
    message.encode_utf16().count() > MAX_MESSAGE_UNITS
}

async fn exchange(
    write_half: &mut OwnedWriteHalf,
    reader: &mut BufReader<OwnedReadHalf>,
    request: &Request,
) -> Result<Response, Error> {
    tcp::write_frame(write_half, request).await?;
    let line = tcp::read_frame(reader).await?.ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "broker closed the connection",
        ))
    })?;
    Ok(serde_json::from_str(&line)?)
}

fn print_response(response: &Response) {
    match &response.detail {
        Detail::Counts(counts) if response.is_success() => {
            for row in counts {
                println!("{} {} {}", row.topic_id, row.title, row.count);
            }
        }
        Detail::Text(text) => println!("{text}"),
        _ => {}
    }
}

fn print_menu() {
    println!("Please select command: create, publish, show, delete.");
    println!("1. create {{topic_id}} {{topic_name}} #create a new topic");
    println!("2. publish {{topic_id}} {{message}} # publish a message to an existing topic");
    println!("3. show  #show subscriber count for current publisher");
    println!("4. delete {{topic_id}} #delete a topic");
    println!("5. exit");
}
