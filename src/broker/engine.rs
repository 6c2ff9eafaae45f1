//! Broker engine
//!
//! This module contains the in-memory broker core responsible for:
//! - managing the topic table, subscription table, and local session maps
//! - fanning published messages out to locally connected subscribers
//! - notifying subscribers when topics they hold are deleted
//! - emitting one sync record per state mutation to every peer link, and
//!   applying records received from peers
//!
//! Concurrency and usage notes:
//! - The public API here is synchronous and designed to be held behind a
//!   lock (`Arc<Mutex<Broker>>`) by the session layer. Callers must not hold
//!   the broker lock across network I/O: pushes and peer forwards are
//!   *queued* onto per-connection channels inside the critical section and
//!   written by dedicated tasks, so each connection observes mutations in
//!   lock-acquisition order without the mesh stalling on a slow socket. In
//!   particular a subscriber can never see a broadcast for a topic after the
//!   deleteNotify that removed it.
//! - Everything is in memory; nothing survives a restart.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::broker::peer::PeerLink;
use crate::broker::topic::Topic;
use crate::client::ClientHandle;
use crate::transport::message::{
    Detail, Push, Request, Response, ResponseClass, SubscriberCount, SyncRecord, TopicSummary,
};

#[derive(Debug, Default)]
pub struct Broker {
    /// Topic id -> title and owning publisher.
    pub(crate) topics: HashMap<String, Topic>,

    /// Subscriber name -> the topic ids it holds. Entries may be empty
    /// transiently; they are never exposed to clients.
    pub(crate) subscriptions: HashMap<String, HashSet<String>>,

    /// Subscribers physically connected to this broker.
    pub(crate) subscribers: HashMap<String, ClientHandle>,

    /// Publishers physically connected to this broker; tracked only so
    /// disconnect cleanup can find the name.
    pub(crate) publishers: HashMap<String, ClientHandle>,

    /// Outbound links to peer brokers, at most one per advertised address.
    pub(crate) peers: Vec<PeerLink>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    // ── local sessions ──────────────────────────────────────────────

    /// Registers a subscriber session. A colliding name silently replaces
    /// the previous handle; names are trusted.
    pub fn register_subscriber(&mut self, handle: ClientHandle) {
        self.subscribers.insert(handle.name.clone(), handle);
    }

    pub fn register_publisher(&mut self, handle: ClientHandle) {
        self.publishers.insert(handle.name.clone(), handle);
    }

    pub fn unregister_subscriber(&mut self, name: &str) {
        self.subscribers.remove(name);
    }

    pub fn unregister_publisher(&mut self, name: &str) {
        self.publishers.remove(name);
    }

    // ── peer links ──────────────────────────────────────────────────

    /// Adds an outbound peer link unless one already exists for the same
    /// advertised address. Returns whether the link was inserted.
    pub fn add_peer(&mut self, link: PeerLink) -> bool {
        if self.has_peer(&link.host, link.port) {
            return false;
        }
        self.peers.push(link);
        true
    }

    pub fn has_peer(&self, host: &str, port: u16) -> bool {
        self.peers.iter().any(|p| p.host == host && p.port == port)
    }

    pub fn remove_peer(&mut self, host: &str, port: u16) {
        self.peers.retain(|p| !(p.host == host && p.port == port));
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    // ── publisher operations ────────────────────────────────────────

    /// Creates a topic owned by `publisher`. Topic ids are globally unique;
    /// a second create with the same id fails.
    pub fn create_topic(&mut self, topic_id: &str, title: &str, publisher: &str) -> Response {
        if self.topics.contains_key(topic_id) {
            return Response::failed("Topic ID already exists.. use another one");
        }
        self.topics
            .insert(topic_id.to_string(), Topic::new(title, publisher));
        self.emit_sync(&SyncRecord::Create {
            topic_id: topic_id.to_string(),
            title: title.to_string(),
            publisher: publisher.to_string(),
        });
        Response::success(Detail::Text("Topic created successfully.".to_string()))
    }

    /// Publishes a message on a topic `publisher` owns, broadcasting to
    /// every locally connected subscriber that holds the topic. The message
    /// length cap is enforced by the publisher client, not re-checked here.
    pub fn publish_message(&mut self, topic_id: &str, message: &str, publisher: &str) -> Response {
        let title = match self.topics.get(topic_id) {
            Some(topic) if topic.publisher == publisher => topic.title.clone(),
            _ => return Response::failed("you don't have this topic id"),
        };
        self.broadcast_local(topic_id, &title, message, publisher);
        self.emit_sync(&SyncRecord::Publish {
            topic_id: topic_id.to_string(),
            message: message.to_string(),
            publisher: publisher.to_string(),
        });
        Response::success(Detail::Text("message has been published!".to_string()))
    }

    /// Deletes a topic `publisher` owns, stripping it from every
    /// subscription set and notifying affected local subscribers.
    pub fn delete_topic(&mut self, topic_id: &str, publisher: &str) -> Response {
        if !self.owns(topic_id, publisher) {
            return Response::failed("you do not have this topic id.");
        }
        self.delete_topics_and_notify(&[topic_id.to_string()]);
        self.emit_sync(&SyncRecord::Delete {
            topic_id: topic_id.to_string(),
            publisher: publisher.to_string(),
        });
        Response::success(Detail::Text(format!(
            "id: {topic_id} has successfully been deleted."
        )))
    }

    /// Counts, for each topic owned by `publisher`, how many subscription
    /// sets contain it anywhere in this broker's view.
    pub fn count_subscribers(&self, publisher: &str) -> Response {
        let counts: Vec<SubscriberCount> = self
            .topics
            .iter()
            .filter(|(_, topic)| topic.publisher == publisher)
            .map(|(topic_id, topic)| {
                let count = self
                    .subscriptions
                    .values()
                    .filter(|held| held.contains(topic_id))
                    .count();
                SubscriberCount {
                    topic_id: topic_id.clone(),
                    title: topic.title.clone(),
                    count: count.to_string(),
                }
            })
            .collect();

        if counts.is_empty() {
            Response::failed("you have not created any topic")
        } else {
            Response::success(Detail::Counts(counts))
        }
    }

    // ── subscriber operations ───────────────────────────────────────

    pub fn subscribe(&mut self, topic_id: &str, subscriber: &str) -> Response {
        let already = self
            .subscriptions
            .get(subscriber)
            .is_some_and(|held| held.contains(topic_id));

        let response = if already {
            Response::failed(format!("you are already subscribed to {topic_id}"))
        } else if !self.topics.contains_key(topic_id) {
            Response::failed(format!("topic id: {topic_id} does not exist"))
        } else {
            self.subscriptions
                .entry(subscriber.to_string())
                .or_default()
                .insert(topic_id.to_string());
            self.emit_sync(&SyncRecord::Subscribe {
                topic_id: topic_id.to_string(),
                subscriber: subscriber.to_string(),
            });
            Response::success(Detail::Text(format!("successfully subscribed to {topic_id}")))
        };
        response.tagged(ResponseClass::Response)
    }

    pub fn unsubscribe(&mut self, topic_id: &str, subscriber: &str) -> Response {
        let held = self
            .subscriptions
            .get_mut(subscriber)
            .is_some_and(|held| held.remove(topic_id));

        let response = if held {
            self.emit_sync(&SyncRecord::Unsubscribe {
                topic_id: topic_id.to_string(),
                subscriber: subscriber.to_string(),
            });
            Response::success(Detail::Text(format!(
                "successfully unsubscribed from {topic_id}"
            )))
        } else {
            Response::failed(format!("you are not originally subscribed to {topic_id}"))
        };
        response.tagged(ResponseClass::Response)
    }

    /// Lists every topic in this broker's view.
    pub fn list_topics(&self) -> Response {
        let topics: Vec<TopicSummary> = self
            .topics
            .iter()
            .map(|(topic_id, topic)| TopicSummary {
                topic_id: topic_id.clone(),
                title: topic.title.clone(),
                publisher: topic.publisher.clone(),
            })
            .collect();

        let response = if topics.is_empty() {
            Response::failed("there is no topic")
        } else {
            Response::success(Detail::Topics(topics))
        };
        response.tagged(ResponseClass::List)
    }

    /// Returns the subscriber's topic set joined with the topic table.
    pub fn show_current_subscription(&self, subscriber: &str) -> Response {
        let entries: Vec<TopicSummary> = self
            .subscriptions
            .get(subscriber)
            .map(|held| {
                held.iter()
                    .filter_map(|topic_id| {
                        self.topics.get(topic_id).map(|topic| TopicSummary {
                            topic_id: topic_id.clone(),
                            title: topic.title.clone(),
                            publisher: topic.publisher.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let response = if entries.is_empty() {
            Response::failed("you are not subscribed to any topic.")
        } else {
            Response::success(Detail::Topics(entries))
        };
        response.tagged(ResponseClass::Current)
    }

    // ── disconnect cleanup ──────────────────────────────────────────

    /// Deletes every topic the publisher owns, batching the deletions into
    /// a single deleteNotify per affected subscriber and a single sync
    /// record for the peers.
    pub fn on_publisher_disconnect(&mut self, publisher: &str) {
        let removed: Vec<String> = self
            .topics
            .iter()
            .filter(|(_, topic)| topic.publisher == publisher)
            .map(|(topic_id, _)| topic_id.clone())
            .collect();

        self.delete_topics_and_notify(&removed);
        self.emit_sync(&SyncRecord::DeleteAllTopicsByPublisher {
            topic_ids: removed,
            publisher: publisher.to_string(),
        });
    }

    /// Drops the subscriber's subscription set. No local notification: the
    /// session is gone; only the peers need to know.
    pub fn on_subscriber_disconnect(&mut self, subscriber: &str) {
        self.subscriptions.remove(subscriber);
        self.emit_sync(&SyncRecord::DeleteAllTopicsBySubscriber {
            subscriber: subscriber.to_string(),
        });
    }

    // ── peer synchronization ────────────────────────────────────────

    /// Applies a sync record received from a peer. Never re-emits: records
    /// flood exactly one hop over the full mesh.
    pub fn apply_sync(&mut self, record: SyncRecord) {
        match record {
            SyncRecord::Create {
                topic_id,
                title,
                publisher,
            } => {
                // Last-writer-wins on concurrent creates of the same id.
                self.topics.insert(topic_id, Topic::new(&title, &publisher));
            }
            SyncRecord::Delete {
                topic_id,
                publisher,
            } => {
                if self.owns(&topic_id, &publisher) {
                    self.delete_topics_and_notify(&[topic_id]);
                }
            }
            SyncRecord::Publish {
                topic_id,
                message,
                publisher,
            } => {
                if let Some(topic) = self.topics.get(&topic_id) {
                    let title = topic.title.clone();
                    self.broadcast_local(&topic_id, &title, &message, &publisher);
                }
            }
            SyncRecord::Subscribe {
                topic_id,
                subscriber,
            } => {
                // The record may outrun the create on another link; a
                // subscription for an unknown topic is dropped silently.
                if self.topics.contains_key(&topic_id) {
                    self.subscriptions.entry(subscriber).or_default().insert(topic_id);
                }
            }
            SyncRecord::Unsubscribe {
                topic_id,
                subscriber,
            } => {
                if let Some(held) = self.subscriptions.get_mut(&subscriber) {
                    held.remove(&topic_id);
                }
            }
            SyncRecord::DeleteAllTopicsByPublisher {
                topic_ids,
                publisher,
            } => {
                let owned: Vec<String> = topic_ids
                    .into_iter()
                    .filter(|topic_id| self.owns(topic_id, &publisher))
                    .collect();
                self.delete_topics_and_notify(&owned);
            }
            SyncRecord::DeleteAllTopicsBySubscriber { subscriber } => {
                self.subscriptions.remove(&subscriber);
            }
        }
    }

    /// Ships one record to every peer link. A record bound for a dead link
    /// is dropped; the writer task tears the link down on write failure.
    fn emit_sync(&self, record: &SyncRecord) {
        let frame = Request::Sync(record.clone());
        let line = match serde_json::to_string(&frame) {
            Ok(line) => line,
            Err(e) => {
                warn!("failed to serialize sync record: {e}");
                return;
            }
        };
        for peer in &self.peers {
            if !peer.send(&line) {
                debug!("dropping sync record for closing peer link {}", peer.endpoint());
            }
        }
    }

    // ── fan-out helpers ─────────────────────────────────────────────

    fn owns(&self, topic_id: &str, publisher: &str) -> bool {
        self.topics
            .get(topic_id)
            .is_some_and(|topic| topic.publisher == publisher)
    }

    /// Queues a broadcast frame for every locally connected subscriber
    /// holding `topic_id`.
    fn broadcast_local(&self, topic_id: &str, title: &str, message: &str, publisher: &str) {
        let push = Push::Broadcast {
            publisher: publisher.to_string(),
            title: title.to_string(),
            topic_id: topic_id.to_string(),
            message: message.to_string(),
        };
        let line = match serde_json::to_string(&push) {
            Ok(line) => line,
            Err(e) => {
                warn!("failed to serialize broadcast: {e}");
                return;
            }
        };
        for (subscriber, held) in &self.subscriptions {
            if held.contains(topic_id) {
                self.push_to_subscriber(subscriber, &line);
            }
        }
    }

    /// Removes the given topics from the table and from every subscription
    /// set, queueing one batched deleteNotify per affected local subscriber.
    /// Callers have already verified ownership for each id.
    fn delete_topics_and_notify(&mut self, topic_ids: &[String]) {
        let mut notifications: Vec<(String, Vec<TopicSummary>)> = Vec::new();
        for (subscriber, held) in self.subscriptions.iter_mut() {
            let mut deleted = Vec::new();
            for topic_id in topic_ids {
                if held.remove(topic_id) {
                    if let Some(topic) = self.topics.get(topic_id) {
                        deleted.push(TopicSummary {
                            topic_id: topic_id.clone(),
                            title: topic.title.clone(),
                            publisher: topic.publisher.clone(),
                        });
                    }
                }
            }
            if !deleted.is_empty() {
                notifications.push((subscriber.clone(), deleted));
            }
        }

        for (subscriber, deleted) in notifications {
            match serde_json::to_string(&Push::DeleteNotify { deleted }) {
                Ok(line) => self.push_to_subscriber(&subscriber, &line),
                Err(e) => warn!("failed to serialize deleteNotify: {e}"),
            }
        }

        for topic_id in topic_ids {
            self.topics.remove(topic_id);
        }
    }

    fn push_to_subscriber(&self, subscriber: &str, line: &str) {
        if let Some(handle) = self.subscribers.get(subscriber) {
            if !handle.send(line) {
                debug!("push to {subscriber} dropped, session closing");
            }
        }
    }
}
