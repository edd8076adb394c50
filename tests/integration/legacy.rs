use crate::*;

use introducer_client::testing::{IntroducerFlavor, MemoryIntroducer};
use introducer_client::{Counter, InboundCall};
use introducer_core::LegacyAnnouncement;
use introducer_core::wire::{
    APPLICATION_VERSION_KEY, INTRODUCER_PROTOCOL_V1, STUB_CLIENT_SERVICE,
    SUBSCRIBER_CLIENT_V1_INTERFACE,
};
use serde_json::json;

#[tokio::test]
async fn v1_introducer_gets_legacy_calls_and_one_stub() -> Result<()> {
    let node = Node::start(IntroducerFlavor::V1)?;
    node.connected().await?;

    node.client
        .publish("pb://mytub@tcp:10.0.0.2:1/storage", STORAGE, STORAGE_INTERFACE, None)?;
    let _storage = record_deliveries(&node.client, STORAGE, Vec::new())?;
    let _helper = record_deliveries(&node.client, HELPER, Vec::new())?;
    node.settle().await?;

    // Both subscriptions fell back, but the stub was registered once.
    let rejected = node.introducer.calls_to("subscribe_v2");
    assert_eq!(rejected.len(), 2);
    assert!(rejected.iter().all(|c| !c.accepted));
    let mut legacy: Vec<_> = node
        .introducer
        .calls_to("subscribe")
        .iter()
        .filter_map(|c| c.service_name())
        .collect();
    legacy.sort();
    assert_eq!(legacy, [HELPER, STORAGE]);
    assert!(node
        .introducer
        .subscriptions()
        .iter()
        .all(|(_, interface)| *interface == SUBSCRIBER_CLIENT_V1_INTERFACE));
    assert_eq!(node.introducer.registered_count(), 1);

    let legacy_publishes: Vec<_> = node
        .introducer
        .calls_to("publish")
        .iter()
        .filter(|c| c.accepted)
        .filter_map(|c| c.service_name())
        .collect();
    assert!(legacy_publishes.iter().any(|s| s == STORAGE));
    assert_eq!(
        legacy_publishes.iter().filter(|s| *s == STUB_CLIENT_SERVICE).count(),
        1
    );
    assert!(node.client.connected_to_introducer());
    Ok(())
}

#[tokio::test]
async fn stub_is_not_registered_again_after_reconnect() -> Result<()> {
    let node = Node::start(IntroducerFlavor::V1)?;
    let _seen = record_deliveries(&node.client, STORAGE, Vec::new())?;
    node.connected().await?;
    assert_eq!(node.introducer.registered_count(), 1);

    node.introducer.disconnect();
    node.disconnected().await?;
    node.introducer.reconnect();
    node.connected().await?;

    assert_eq!(node.introducer.registered_count(), 1);
    // The stub's announcement is part of the published set, so it is resent.
    let resent = node
        .introducer
        .calls_to("publish")
        .iter()
        .filter(|c| c.connection == 2)
        .filter_map(|c| c.service_name())
        .any(|s| s == STUB_CLIENT_SERVICE);
    assert!(resent);
    Ok(())
}

#[tokio::test]
async fn v1_announcements_arrive_unsigned_and_keyed_by_tubid() -> Result<()> {
    let node = Node::start(IntroducerFlavor::V1)?;
    let seen = record_deliveries(&node.client, STORAGE, Vec::new())?;
    node.connected().await?;

    // A v1 introducer strips the signature on the way through.
    let key = SigningKey::generate();
    let ann = announcement(STORAGE, "TubOne", "1.0", Some(&key))?;
    assert_eq!(node.introducer.announce(STORAGE, &[ann.clone()]), 1);
    assert_eq!(node.introducer.announce(STORAGE, &[ann]), 1);
    node.settle().await?;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].node_id, "tubone");
    assert_eq!(seen[0].announcement.nickname, "TubOne");
    assert!(seen[0].announcement.app_versions.is_empty());
    assert_eq!(node.counters.get(Counter::DuplicateAnnouncement), 1);
    let table = node.client.announcements();
    assert!(table[0].1.verifying_key.is_none());
    Ok(())
}

#[tokio::test]
async fn v1_tuple_with_undecodable_nickname_is_counted_as_rejected() -> Result<()> {
    let node = Node::start(IntroducerFlavor::V1)?;
    let seen = record_deliveries(&node.client, STORAGE, Vec::new())?;
    node.connected().await?;

    let tuple = |tubid: &str, nickname: &[u8]| LegacyAnnouncement {
        furl: format!("pb://{tubid}@tcp:10.0.0.1:4567/storage"),
        service_name: STORAGE.to_string(),
        remote_interface_name: STORAGE_INTERFACE.to_string(),
        nickname: nickname.to_vec(),
        my_version: "1.0".to_string(),
        oldest_supported: "1.0".to_string(),
    };
    let batch = vec![tuple("tub1", b"one"), tuple("tub2", &[0xff, 0xfe])];
    assert_eq!(node.introducer.send_to_subscribers(STORAGE, InboundCall::Announce(batch)), 1);
    node.settle().await?;

    assert_eq!(node_ids(&seen), ["tub1"]);
    assert_eq!(node.counters.get(Counter::RejectedAnnouncement), 1);
    assert_eq!(node.counters.get(Counter::NewAnnouncement), 1);
    Ok(())
}

#[tokio::test]
async fn introducer_without_get_version_is_treated_as_v1() -> Result<()> {
    let introducer = MemoryIntroducer::new(IntroducerFlavor::V1);
    introducer.remove_get_version();
    let node = Node::start_with(introducer)?;
    node.connected().await?;

    let version = node.client.status().introducer_version.unwrap();
    assert!(version.contains_key(INTRODUCER_PROTOCOL_V1));
    assert_eq!(version[APPLICATION_VERSION_KEY], "unknown: no get_version()");
    Ok(())
}

#[tokio::test]
async fn introducer_without_v1_protocol_is_refused() -> Result<()> {
    let introducer = MemoryIntroducer::new(IntroducerFlavor::V2);
    let mut version = serde_json::Map::new();
    version.insert("http://example.org/protocols/other/v3".into(), json!({}));
    introducer.set_version(version);
    let node = Node::start_with(introducer)?;

    node.client
        .publish("pb://mytub@tcp:10.0.0.2:1/storage", STORAGE, STORAGE_INTERFACE, None)?;
    let _seen = record_deliveries(&node.client, STORAGE, Vec::new())?;
    assert!(introducer_client::testing::wait_for(|| node.client.introducer_error().is_some()).await);
    node.settle().await?;

    let error = node.client.introducer_error().unwrap();
    assert!(error.contains(INTRODUCER_PROTOCOL_V1), "{error}");
    assert!(!node.client.connected_to_introducer());
    assert!(node.introducer.calls().is_empty());
    Ok(())
}
