use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use super::engine::Broker;
use super::peer::PeerLink;
use crate::client::ClientHandle;
use crate::transport::message::{Detail, Outcome, ResponseClass, SyncRecord};

fn connect_subscriber(broker: &mut Broker, name: &str) -> UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    broker.register_subscriber(ClientHandle::new(name.to_string(), tx));
    rx
}

fn connect_peer(broker: &mut Broker, host: &str, port: u16) -> UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    assert!(broker.add_peer(PeerLink::new(host.to_string(), port, tx)));
    rx
}

fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(line) = rx.try_recv() {
        frames.push(serde_json::from_str(&line).expect("frame is valid JSON"));
    }
    frames
}

#[test]
fn create_topic_rejects_duplicate_id() {
    let mut broker = Broker::new();
    assert!(broker.create_topic("10", "weather", "pub1").is_success());
    let response = broker.create_topic("10", "traffic", "pub2");
    assert_eq!(response.result, Outcome::Failed);
    // The first creator keeps the topic.
    assert_eq!(broker.topics["10"].publisher, "pub1");
}

#[test]
fn create_topic_emits_sync_record() {
    let mut broker = Broker::new();
    let mut peer_rx = connect_peer(&mut broker, "10.0.0.2", 7777);

    broker.create_topic("10", "weather", "pub1");

    let frames = drain(&mut peer_rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["command"], "sync");
    assert_eq!(frames[0]["syncAction"], "create");
    assert_eq!(frames[0]["topic id"], "10");
    assert_eq!(frames[0]["topic name"], "weather");
    assert_eq!(frames[0]["publisher"], "pub1");
}

#[test]
fn publish_rejects_foreign_topic() {
    let mut broker = Broker::new();
    broker.create_topic("30", "news", "pub1");

    let response = broker.publish_message("30", "x", "pub2");
    assert_eq!(response.result, Outcome::Failed);
    assert_eq!(
        response.detail,
        Detail::Text("you don't have this topic id".to_string())
    );
}

#[test]
fn publish_rejects_unknown_topic() {
    let mut broker = Broker::new();
    let response = broker.publish_message("99", "x", "pub1");
    assert_eq!(response.result, Outcome::Failed);
}

#[test]
fn publish_broadcasts_to_subscribed_local_clients() {
    let mut broker = Broker::new();
    let mut sub_rx = connect_subscriber(&mut broker, "sub1");
    let mut other_rx = connect_subscriber(&mut broker, "sub2");
    broker.create_topic("10", "weather", "pub1");
    broker.subscribe("10", "sub1");
    drain(&mut sub_rx);

    assert!(broker.publish_message("10", "hello", "pub1").is_success());

    let frames = drain(&mut sub_rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["message type"], "broadcast");
    assert_eq!(frames[0]["publisher"], "pub1");
    assert_eq!(frames[0]["title"], "weather");
    assert_eq!(frames[0]["topic id"], "10");
    assert_eq!(frames[0]["message"], "hello");

    // sub2 never subscribed and receives nothing.
    assert!(drain(&mut other_rx).is_empty());
}

#[test]
fn subscribe_unknown_topic_fails() {
    let mut broker = Broker::new();
    let response = broker.subscribe("10", "sub1");
    assert_eq!(response.result, Outcome::Failed);
    assert_eq!(
        response.detail,
        Detail::Text("topic id: 10 does not exist".to_string())
    );
    assert_eq!(response.message_type, Some(ResponseClass::Response));
}

#[test]
fn subscribe_twice_fails_and_set_stays_unique() {
    let mut broker = Broker::new();
    broker.create_topic("10", "weather", "pub1");
    assert!(broker.subscribe("10", "sub1").is_success());

    let response = broker.subscribe("10", "sub1");
    assert_eq!(response.result, Outcome::Failed);
    assert_eq!(broker.subscriptions["sub1"].len(), 1);
}

#[test]
fn unsubscribe_requires_existing_subscription() {
    let mut broker = Broker::new();
    broker.create_topic("10", "weather", "pub1");

    let response = broker.unsubscribe("10", "sub1");
    assert_eq!(response.result, Outcome::Failed);
    assert_eq!(
        response.detail,
        Detail::Text("you are not originally subscribed to 10".to_string())
    );
}

#[test]
fn subscribe_then_unsubscribe_roundtrips() {
    let mut broker = Broker::new();
    broker.create_topic("10", "weather", "pub1");

    broker.subscribe("10", "sub1");
    assert!(broker.unsubscribe("10", "sub1").is_success());
    assert!(!broker.subscriptions["sub1"].contains("10"));
}

#[test]
fn delete_topic_strips_subscriptions_and_notifies() {
    let mut broker = Broker::new();
    let mut sub_rx = connect_subscriber(&mut broker, "sub1");
    broker.create_topic("10", "weather", "pub1");
    broker.subscribe("10", "sub1");
    drain(&mut sub_rx);

    assert!(broker.delete_topic("10", "pub1").is_success());

    let frames = drain(&mut sub_rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["message type"], "deleteNotify");
    assert_eq!(frames[0]["deleted topic"][0]["topic id"], "10");
    assert_eq!(frames[0]["deleted topic"][0]["title"], "weather");

    assert!(broker.topics.is_empty());
    assert!(!broker.subscriptions["sub1"].contains("10"));

    // A second delete finds nothing to own.
    assert_eq!(broker.delete_topic("10", "pub1").result, Outcome::Failed);
}

#[test]
fn delete_topic_rejects_foreign_publisher() {
    let mut broker = Broker::new();
    broker.create_topic("10", "weather", "pub1");
    let response = broker.delete_topic("10", "pub2");
    assert_eq!(response.result, Outcome::Failed);
    assert!(broker.topics.contains_key("10"));
}

#[test]
fn create_then_delete_leaves_table_unchanged() {
    let mut broker = Broker::new();
    broker.create_topic("10", "weather", "pub1");
    broker.delete_topic("10", "pub1");
    assert!(broker.topics.is_empty());
}

#[test]
fn list_topics_reports_empty_table_as_failure() {
    let broker = Broker::new();
    let response = broker.list_topics();
    assert_eq!(response.result, Outcome::Failed);
    assert_eq!(response.message_type, Some(ResponseClass::List));
}

#[test]
fn list_topics_returns_triples() {
    let mut broker = Broker::new();
    broker.create_topic("20", "news", "pub1");

    let response = broker.list_topics();
    assert!(response.is_success());
    let Detail::Topics(topics) = response.detail else {
        panic!("expected a topic listing");
    };
    assert_eq!(topics.len(), 1);
    assert_eq!(topics[0].topic_id, "20");
    assert_eq!(topics[0].title, "news");
    assert_eq!(topics[0].publisher, "pub1");
}

#[test]
fn count_subscribers_counts_per_owned_topic() {
    let mut broker = Broker::new();
    broker.create_topic("10", "weather", "pub1");
    broker.create_topic("11", "sport", "pub1");
    broker.create_topic("12", "other", "pub2");
    broker.subscribe("10", "sub1");
    broker.subscribe("10", "sub2");
    broker.subscribe("12", "sub1");

    let response = broker.count_subscribers("pub1");
    assert!(response.is_success());
    let Detail::Counts(mut counts) = response.detail else {
        panic!("expected subscriber counts");
    };
    counts.sort_by(|a, b| a.topic_id.cmp(&b.topic_id));
    assert_eq!(counts.len(), 2);
    assert_eq!(counts[0].topic_id, "10");
    assert_eq!(counts[0].count, "2");
    assert_eq!(counts[1].topic_id, "11");
    assert_eq!(counts[1].count, "0");
}

#[test]
fn count_subscribers_fails_without_owned_topics() {
    let broker = Broker::new();
    let response = broker.count_subscribers("pub1");
    assert_eq!(response.result, Outcome::Failed);
    assert_eq!(
        response.detail,
        Detail::Text("you have not created any topic".to_string())
    );
}

#[test]
fn show_current_subscription_joins_topic_table() {
    let mut broker = Broker::new();
    broker.create_topic("10", "weather", "pub1");
    broker.subscribe("10", "sub1");

    let response = broker.show_current_subscription("sub1");
    assert!(response.is_success());
    assert_eq!(response.message_type, Some(ResponseClass::Current));
    let Detail::Topics(topics) = response.detail else {
        panic!("expected a topic listing");
    };
    assert_eq!(topics[0].title, "weather");
    assert_eq!(topics[0].publisher, "pub1");
}

#[test]
fn show_current_subscription_fails_when_empty() {
    let broker = Broker::new();
    let response = broker.show_current_subscription("sub1");
    assert_eq!(response.result, Outcome::Failed);
}

#[test]
fn publisher_disconnect_batches_one_notify_per_subscriber() {
    let mut broker = Broker::new();
    let mut sub_rx = connect_subscriber(&mut broker, "sub1");
    let mut peer_rx = connect_peer(&mut broker, "10.0.0.2", 7777);
    broker.create_topic("20", "news", "pub1");
    broker.create_topic("21", "sport", "pub1");
    broker.subscribe("20", "sub1");
    broker.subscribe("21", "sub1");
    drain(&mut sub_rx);
    drain(&mut peer_rx);

    broker.on_publisher_disconnect("pub1");

    // One deleteNotify listing both topics, not two frames.
    let frames = drain(&mut sub_rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["message type"], "deleteNotify");
    let deleted = frames[0]["deleted topic"].as_array().unwrap();
    let mut ids: Vec<&str> = deleted
        .iter()
        .map(|t| t["topic id"].as_str().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, ["20", "21"]);

    assert!(broker.topics.is_empty());

    // One sync record carrying every deleted id.
    let sync_frames = drain(&mut peer_rx);
    assert_eq!(sync_frames.len(), 1);
    assert_eq!(sync_frames[0]["syncAction"], "deleteAllTopicsByPublisher");
    assert_eq!(sync_frames[0]["publisher"], "pub1");
    let mut sync_ids: Vec<&str> = sync_frames[0]["deleted topics"]
        .as_array()
        .unwrap()
        .iter()
        .map(|id| id.as_str().unwrap())
        .collect();
    sync_ids.sort_unstable();
    assert_eq!(sync_ids, ["20", "21"]);
}

#[test]
fn subscriber_disconnect_drops_set_and_tells_peers() {
    let mut broker = Broker::new();
    let mut peer_rx = connect_peer(&mut broker, "10.0.0.2", 7777);
    broker.create_topic("10", "weather", "pub1");
    broker.subscribe("10", "sub1");
    drain(&mut peer_rx);

    broker.on_subscriber_disconnect("sub1");

    assert!(!broker.subscriptions.contains_key("sub1"));
    let frames = drain(&mut peer_rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["syncAction"], "deleteAllTopicsBySubscriber");
    assert_eq!(frames[0]["subscriber"], "sub1");
}

#[test]
fn apply_sync_create_overwrites_last_writer_wins() {
    let mut broker = Broker::new();
    broker.create_topic("10", "weather", "pub1");

    broker.apply_sync(SyncRecord::Create {
        topic_id: "10".to_string(),
        title: "traffic".to_string(),
        publisher: "pub2".to_string(),
    });

    assert_eq!(broker.topics["10"].title, "traffic");
    assert_eq!(broker.topics["10"].publisher, "pub2");
}

#[test]
fn apply_sync_delete_requires_matching_owner() {
    let mut broker = Broker::new();
    broker.create_topic("10", "weather", "pub1");

    broker.apply_sync(SyncRecord::Delete {
        topic_id: "10".to_string(),
        publisher: "pub2".to_string(),
    });
    assert!(broker.topics.contains_key("10"));

    broker.apply_sync(SyncRecord::Delete {
        topic_id: "10".to_string(),
        publisher: "pub1".to_string(),
    });
    assert!(broker.topics.is_empty());
}

#[test]
fn apply_sync_delete_notifies_local_holders() {
    let mut broker = Broker::new();
    let mut sub_rx = connect_subscriber(&mut broker, "sub1");
    broker.apply_sync(SyncRecord::Create {
        topic_id: "20".to_string(),
        title: "news".to_string(),
        publisher: "pub1".to_string(),
    });
    broker.subscribe("20", "sub1");
    drain(&mut sub_rx);

    broker.apply_sync(SyncRecord::Delete {
        topic_id: "20".to_string(),
        publisher: "pub1".to_string(),
    });

    let frames = drain(&mut sub_rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["message type"], "deleteNotify");
    assert!(!broker.subscriptions["sub1"].contains("20"));
}

#[test]
fn apply_sync_publish_fans_out_without_reemitting() {
    let mut broker = Broker::new();
    let mut sub_rx = connect_subscriber(&mut broker, "sub1");
    let mut peer_rx = connect_peer(&mut broker, "10.0.0.2", 7777);
    broker.apply_sync(SyncRecord::Create {
        topic_id: "20".to_string(),
        title: "news".to_string(),
        publisher: "pub1".to_string(),
    });
    broker.subscribe("20", "sub1");
    drain(&mut sub_rx);
    drain(&mut peer_rx);

    broker.apply_sync(SyncRecord::Publish {
        topic_id: "20".to_string(),
        message: "hi".to_string(),
        publisher: "pub1".to_string(),
    });

    let frames = drain(&mut sub_rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["message type"], "broadcast");
    assert_eq!(frames[0]["message"], "hi");

    // Applying a record never re-propagates it.
    assert!(drain(&mut peer_rx).is_empty());
}

#[test]
fn apply_sync_subscribe_ignores_unknown_topic() {
    let mut broker = Broker::new();
    broker.apply_sync(SyncRecord::Subscribe {
        topic_id: "99".to_string(),
        subscriber: "sub1".to_string(),
    });
    assert!(broker.subscriptions.get("sub1").is_none());
}

#[test]
fn apply_sync_unsubscribe_ignores_missing_subscription() {
    let mut broker = Broker::new();
    broker.apply_sync(SyncRecord::Unsubscribe {
        topic_id: "99".to_string(),
        subscriber: "sub1".to_string(),
    });
    assert!(broker.subscriptions.get("sub1").is_none());
}

#[test]
fn apply_sync_delete_all_by_publisher_batches_notify() {
    let mut broker = Broker::new();
    let mut sub_rx = connect_subscriber(&mut broker, "sub1");
    for (id, title) in [("20", "news"), ("21", "sport")] {
        broker.apply_sync(SyncRecord::Create {
            topic_id: id.to_string(),
            title: title.to_string(),
            publisher: "pub1".to_string(),
        });
        broker.subscribe(id, "sub1");
    }
    drain(&mut sub_rx);

    broker.apply_sync(SyncRecord::DeleteAllTopicsByPublisher {
        topic_ids: vec!["20".to_string(), "21".to_string()],
        publisher: "pub1".to_string(),
    });

    let frames = drain(&mut sub_rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["deleted topic"].as_array().unwrap().len(), 2);
    assert!(broker.topics.is_empty());
}

#[test]
fn apply_sync_delete_all_by_publisher_skips_foreign_topics() {
    let mut broker = Broker::new();
    broker.create_topic("10", "weather", "pub2");

    broker.apply_sync(SyncRecord::DeleteAllTopicsByPublisher {
        topic_ids: vec!["10".to_string()],
        publisher: "pub1".to_string(),
    });
    assert!(broker.topics.contains_key("10"));
}

#[test]
fn apply_sync_delete_all_by_subscriber_drops_set() {
    let mut broker = Broker::new();
    broker.create_topic("10", "weather", "pub1");
    broker.subscribe("10", "sub1");

    broker.apply_sync(SyncRecord::DeleteAllTopicsBySubscriber {
        subscriber: "sub1".to_string(),
    });
    assert!(!broker.subscriptions.contains_key("sub1"));
}

#[test]
fn peer_links_deduplicate_by_advertised_address() {
    let mut broker = Broker::new();
    let (tx_a, _rx_a) = mpsc::unbounded_channel();
    let (tx_b, _rx_b) = mpsc::unbounded_channel();

    assert!(broker.add_peer(PeerLink::new("10.0.0.2".to_string(), 7777, tx_a)));
    assert!(!broker.add_peer(PeerLink::new("10.0.0.2".to_string(), 7777, tx_b)));
    assert_eq!(broker.peer_count(), 1);

    broker.remove_peer("10.0.0.2", 7777);
    assert_eq!(broker.peer_count(), 0);
}

#[test]
fn sync_to_closed_peer_link_is_dropped_silently() {
    let mut broker = Broker::new();
    let mut peer_rx = connect_peer(&mut broker, "10.0.0.2", 7777);
    peer_rx.close();

    // Must not panic; the record is simply lost for that peer.
    broker.create_topic("10", "weather", "pub1");
    assert!(broker.topics.contains_key("10"));
}

#[test]
fn name_collision_overwrites_subscriber_session() {
    let mut broker = Broker::new();
    let mut old_rx = connect_subscriber(&mut broker, "sub1");
    let mut new_rx = connect_subscriber(&mut broker, "sub1");
    broker.create_topic("10", "weather", "pub1");
    broker.subscribe("10", "sub1");
    drain(&mut old_rx);
    drain(&mut new_rx);

    broker.publish_message("10", "hello", "pub1");

    // Only the most recent session under the name gets the push.
    assert!(drain(&mut old_rx).is_empty());
    assert_eq!(drain(&mut new_rx).len(), 1);
}
