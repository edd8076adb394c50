use crate::*;

use introducer_client::testing::{IntroducerFlavor, MemoryIntroducer};
use introducer_client::{Counter, IntroducerCall};

fn published(call: &IntroducerCall) -> Option<&SignedAnnouncement> {
    match call {
        IntroducerCall::PublishV2 { announcement, .. } => Some(announcement),
        _ => None,
    }
}

#[tokio::test]
async fn publish_before_connect_goes_out_on_connect() -> Result<()> {
    let introducer = MemoryIntroducer::new(IntroducerFlavor::V2);
    introducer.set_reachable(false);
    let node = Node::start_with(introducer)?;

    node.client
        .publish("pb://mytub@tcp:10.0.0.2:1/storage", STORAGE, STORAGE_INTERFACE, None)?;
    node.settle().await?;
    assert!(node.introducer.calls().is_empty());
    assert!(!node.client.connected_to_introducer());

    node.introducer.set_reachable(true);
    node.introducer.reconnect();
    node.connected().await?;

    let calls = node.introducer.calls_to("publish_v2");
    assert_eq!(calls.len(), 1);
    assert!(calls[0].accepted);
    assert_eq!(calls[0].service_name().as_deref(), Some(STORAGE));
    Ok(())
}

#[tokio::test]
async fn resending_the_same_announcement_is_byte_identical() -> Result<()> {
    let node = Node::start(IntroducerFlavor::V2)?;
    node.connected().await?;

    let key = SigningKey::from_seed([7u8; 32]);
    let furl = "pb://mytub@tcp:10.0.0.2:1/storage";
    node.client.publish(furl, STORAGE, STORAGE_INTERFACE, Some(&key))?;
    node.settle().await?;
    node.client.publish(furl, STORAGE, STORAGE_INTERFACE, Some(&key))?;
    node.settle().await?;

    let calls = node.introducer.calls_to("publish_v2");
    assert_eq!(calls.len(), 2);
    let first = published(&calls[0].call).unwrap();
    let second = published(&calls[1].call).unwrap();
    assert_eq!(first, second);
    assert!(first.is_signed());
    assert_eq!(node.counters.get(Counter::OutboundMessage), 2);

    // What the introducer would store is the same either way.
    let (record, key_token) = codec::unsign(first)?;
    assert_eq!(record.furl, furl);
    assert_eq!(key_token, Some(key.verifying_key().to_token()));
    Ok(())
}

#[tokio::test]
async fn republishing_a_service_replaces_its_announcement() -> Result<()> {
    let node = Node::start(IntroducerFlavor::V2)?;
    node.connected().await?;

    node.client
        .publish("pb://mytub@tcp:10.0.0.2:1/old", STORAGE, STORAGE_INTERFACE, None)?;
    node.settle().await?;
    node.client
        .publish("pb://mytub@tcp:10.0.0.2:1/new", STORAGE, STORAGE_INTERFACE, None)?;
    node.settle().await?;

    let calls = node.introducer.calls_to("publish_v2");
    assert_eq!(calls.len(), 2);
    let (latest, _) = codec::unsign(published(&calls[1].call).unwrap())?;
    assert_eq!(latest.furl, "pb://mytub@tcp:10.0.0.2:1/new");
    Ok(())
}

#[tokio::test]
async fn publishes_carry_the_node_identity() -> Result<()> {
    let node = Node::start(IntroducerFlavor::V2)?;
    node.connected().await?;

    node.client
        .publish("pb://mytub@tcp:10.0.0.2:1/storage", STORAGE, STORAGE_INTERFACE, None)?;
    node.settle().await?;

    let calls = node.introducer.calls_to("publish_v2");
    let (record, _) = codec::unsign(published(&calls[0].call).unwrap())?;
    assert_eq!(record.nickname, "alice");
    assert_eq!(record.my_version, "1.0");
    assert_eq!(record.remote_interface_name, STORAGE_INTERFACE);
    assert_eq!(record.version, 0);
    Ok(())
}

#[tokio::test]
async fn failed_publish_is_not_retried_as_legacy() -> Result<()> {
    let introducer = MemoryIntroducer::new(IntroducerFlavor::V2);
    introducer.fail_method("publish_v2");
    let node = Node::start_with(introducer)?;
    node.connected().await?;

    node.client
        .publish("pb://mytub@tcp:10.0.0.2:1/storage", STORAGE, STORAGE_INTERFACE, None)?;
    node.client
        .publish("pb://mytub@tcp:10.0.0.2:1/helper", HELPER, STORAGE_INTERFACE, None)?;
    node.settle().await?;

    let calls = node.introducer.calls_to("publish_v2");
    assert!(!calls.is_empty());
    assert!(calls.iter().all(|c| !c.accepted));
    assert!(node.introducer.calls_to("publish").is_empty());
    assert!(node.client.connected_to_introducer());
    Ok(())
}
