//! Wire frame definitions for the mesh protocol.
//!
//! Every frame on every socket is one JSON object per newline-terminated
//! line, UTF-8, with lowercase keys that may contain spaces (`"user type"`,
//! `"topic id"`, `"message type"`). The types here express that shape with
//! serde renames and internally tagged enums, so the rest of the crate never
//! touches raw JSON keys:
//!
//! - [`Announce`]: first frame on any new broker connection, tagged by
//!   `user type`.
//! - [`Request`]: client/peer command frames, tagged by `command`. The
//!   `sync` command nests a [`SyncRecord`] tagged by `syncAction`.
//! - [`Response`]: synchronous reply frames, with an optional
//!   `message type` class tag.
//! - [`Push`]: asynchronous broker-to-subscriber frames (broadcast and
//!   deleteNotify), tagged by `message type`.
//! - [`DirectoryRequest`] / [`DirectoryResponse`]: the bootstrap registry
//!   protocol.

use serde::{Deserialize, Serialize};

/// First frame on any new connection to a broker: who is talking and,
/// for a peer broker, the address it accepts connections on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "user type")]
pub enum Announce {
    #[serde(rename = "subscriber")]
    Subscriber {
        #[serde(rename = "user name")]
        name: String,
    },
    #[serde(rename = "publisher")]
    Publisher {
        #[serde(rename = "user name")]
        name: String,
    },
    /// A peer broker announces the address it listens on (not the ephemeral
    /// port of this socket) so the receiver can deduplicate and dial back.
    #[serde(rename = "broker")]
    Broker {
        #[serde(rename = "ip address")]
        ip: String,
        #[serde(rename = "port number")]
        port: String,
    },
}

/// A command frame sent by a client or peer, dispatched on the `command` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Request {
    #[serde(rename = "list")]
    List,
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(rename = "topic id")]
        topic_id: String,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        #[serde(rename = "topic id")]
        topic_id: String,
    },
    #[serde(rename = "showCurrentSubscription")]
    ShowCurrentSubscription,
    #[serde(rename = "create")]
    Create {
        #[serde(rename = "topic id")]
        topic_id: String,
        #[serde(rename = "topic name")]
        topic_name: String,
    },
    #[serde(rename = "publish")]
    Publish {
        #[serde(rename = "topic id")]
        topic_id: String,
        message: String,
    },
    #[serde(rename = "delete")]
    Delete {
        #[serde(rename = "topic id")]
        topic_id: String,
    },
    #[serde(rename = "countSubscriber")]
    CountSubscriber,
    /// Broker-to-broker replication; the record's own fields flatten into
    /// the same JSON object next to `"command": "sync"`.
    #[serde(rename = "sync")]
    Sync(SyncRecord),
}

/// One replicated state mutation, shipped to every peer link exactly once
/// and never re-propagated (one-hop flood over a full mesh).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "syncAction")]
pub enum SyncRecord {
    #[serde(rename = "create")]
    Create {
        #[serde(rename = "topic id")]
        topic_id: String,
        #[serde(rename = "topic name")]
        title: String,
        publisher: String,
    },
    #[serde(rename = "delete")]
    Delete {
        #[serde(rename = "topic id")]
        topic_id: String,
        publisher: String,
    },
    #[serde(rename = "publish")]
    Publish {
        #[serde(rename = "topic id")]
        topic_id: String,
        message: String,
        publisher: String,
    },
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(rename = "topic id")]
        topic_id: String,
        subscriber: String,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        #[serde(rename = "topic id")]
        topic_id: String,
        subscriber: String,
    },
    #[serde(rename = "deleteAllTopicsByPublisher")]
    DeleteAllTopicsByPublisher {
        #[serde(rename = "deleted topics")]
        topic_ids: Vec<String>,
        publisher: String,
    },
    #[serde(rename = "deleteAllTopicsBySubscriber")]
    DeleteAllTopicsBySubscriber { subscriber: String },
}

/// One row of a topic listing: id, human title, and owning publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSummary {
    #[serde(rename = "topic id")]
    pub topic_id: String,
    pub title: String,
    pub publisher: String,
}

/// One row of a `countSubscriber` reply. The count travels as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberCount {
    #[serde(rename = "topic id")]
    pub topic_id: String,
    pub title: String,
    pub count: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed")]
    Failed,
}

/// The reply classes a subscriber's receiver treats as "the answer to my
/// request" when demultiplexing them from asynchronous pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseClass {
    Response,
    List,
    Current,
}

/// Payload of a response: either a human-readable string or a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Detail {
    Text(String),
    Topics(Vec<TopicSummary>),
    Counts(Vec<SubscriberCount>),
}

/// Synchronous reply to a request, written on the same socket the request
/// arrived on. `message type` is present only on the reply classes the
/// subscriber receiver must recognize; publisher-bound replies omit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub result: Outcome,
    pub detail: Detail,
    #[serde(rename = "message type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<ResponseClass>,
}

impl Response {
    pub fn success(detail: Detail) -> Self {
        Response {
            result: Outcome::Success,
            detail,
            message_type: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Response {
            result: Outcome::Failed,
            detail: Detail::Text(detail.into()),
            message_type: None,
        }
    }

    pub fn tagged(mut self, class: ResponseClass) -> Self {
        self.message_type = Some(class);
        self
    }

    pub fn is_success(&self) -> bool {
        self.result == Outcome::Success
    }
}

/// Asynchronous frame pushed to a subscriber outside the request/response
/// cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message type")]
pub enum Push {
    #[serde(rename = "broadcast")]
    Broadcast {
        publisher: String,
        title: String,
        #[serde(rename = "topic id")]
        topic_id: String,
        message: String,
    },
    #[serde(rename = "deleteNotify")]
    DeleteNotify {
        #[serde(rename = "deleted topic")]
        deleted: Vec<TopicSummary>,
    },
}

/// Single request frame of the directory protocol, one per connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "user type")]
pub enum DirectoryRequest {
    /// A broker registering itself; the reply includes the full registry.
    #[serde(rename = "broker")]
    Register {
        #[serde(rename = "brokerIp")]
        ip: String,
        #[serde(rename = "brokerPort")]
        port: String,
    },
    #[serde(rename = "publisher")]
    FromPublisher,
    #[serde(rename = "subscriber")]
    FromSubscriber,
}

/// One registry entry. The port travels as a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAddr {
    #[serde(rename = "brokerIp")]
    pub ip: String,
    #[serde(rename = "brokerPort")]
    pub port: String,
}

impl BrokerAddr {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn port_number(&self) -> Result<u16, std::num::ParseIntError> {
        self.port.parse()
    }
}

/// Reply to any directory request. Registration replies carry
/// `"user type": "directory"`; plain queries omit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryResponse {
    #[serde(rename = "user type", default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    pub brokers: Vec<BrokerAddr>,
}
