use crate::*;

use introducer_client::testing::IntroducerFlavor;
use introducer_client::{Counter, InboundCall};
use serde_json::json;

#[tokio::test]
async fn identical_announcement_is_delivered_once() -> Result<()> {
    let node = Node::start(IntroducerFlavor::V2)?;
    let seen = record_deliveries(&node.client, STORAGE, Vec::new())?;
    node.connected().await?;

    let key = SigningKey::generate();
    let ann = announcement(STORAGE, "tub1", "1.0", Some(&key))?;
    assert_eq!(node.introducer.announce(STORAGE, &[ann.clone()]), 1);
    assert_eq!(node.introducer.announce(STORAGE, &[ann]), 1);
    node.settle().await?;

    assert_eq!(node_ids(&seen), vec![key.verifying_key().to_token()]);
    assert_eq!(node.counters.get(Counter::NewAnnouncement), 1);
    assert_eq!(node.counters.get(Counter::DuplicateAnnouncement), 1);
    assert_eq!(node.counters.get(Counter::InboundMessage), 2);
    Ok(())
}

#[tokio::test]
async fn changed_version_is_an_update() -> Result<()> {
    let node = Node::start(IntroducerFlavor::V2)?;
    let seen = record_deliveries(&node.client, STORAGE, Vec::new())?;
    node.connected().await?;

    let key = SigningKey::generate();
    node.introducer
        .announce(STORAGE, &[announcement(STORAGE, "tub1", "1.0", Some(&key))?]);
    node.introducer
        .announce(STORAGE, &[announcement(STORAGE, "tub1", "1.1", Some(&key))?]);
    node.settle().await?;

    let versions: Vec<_> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|d| d.announcement.my_version.clone())
        .collect();
    assert_eq!(versions, ["1.0", "1.1"]);
    assert_eq!(node.counters.get(Counter::Update), 1);

    let table = node.client.announcements();
    assert_eq!(table.len(), 1);
    assert_eq!(table[0].1.announcement.my_version, "1.1");
    assert_eq!(table[0].1.verifying_key.as_deref(), Some(key.verifying_key().to_token().as_str()));
    Ok(())
}

#[tokio::test]
async fn late_subscriber_gets_known_announcements_in_arrival_order() -> Result<()> {
    let node = Node::start(IntroducerFlavor::V2)?;
    let early = record_deliveries(&node.client, STORAGE, Vec::new())?;
    node.connected().await?;

    for tubid in ["tub3", "tub1", "tub2"] {
        node.introducer
            .announce(STORAGE, &[announcement(STORAGE, tubid, "1.0", None)?]);
    }
    node.settle().await?;

    let late = record_deliveries(&node.client, STORAGE, vec![json!("late")])?;
    node.settle().await?;

    assert_eq!(node_ids(&late), ["tub3", "tub1", "tub2"]);
    assert!(late.lock().unwrap().iter().all(|d| d.extra_args == vec![json!("late")]));
    assert_eq!(node_ids(&early), ["tub3", "tub1", "tub2"]);
    assert_eq!(node.counters.get(Counter::NewAnnouncement), 3);
    assert_eq!(node.counters.get(Counter::DuplicateAnnouncement), 0);
    Ok(())
}

#[tokio::test]
async fn bad_signature_only_drops_that_announcement() -> Result<()> {
    let node = Node::start(IntroducerFlavor::V2)?;
    let seen = record_deliveries(&node.client, STORAGE, Vec::new())?;
    node.connected().await?;

    let key = SigningKey::generate();
    let mut forged = announcement(STORAGE, "tub2", "2.0", Some(&key))?;
    forged.message = forged.message.replace("tub2@", "evil@");
    let batch = vec![
        announcement(STORAGE, "tub1", "1.0", None)?,
        forged,
        announcement(STORAGE, "tub3", "3.0", None)?,
    ];
    node.introducer.announce(STORAGE, &batch);
    node.settle().await?;

    assert_eq!(node_ids(&seen), ["tub1", "tub3"]);
    assert_eq!(node.counters.get(Counter::RejectedAnnouncement), 1);
    assert_eq!(node.counters.get(Counter::InboundAnnouncement), 2);
    Ok(())
}

#[tokio::test]
async fn unknown_key_version_is_rejected() -> Result<()> {
    let node = Node::start(IntroducerFlavor::V2)?;
    let seen = record_deliveries(&node.client, STORAGE, Vec::new())?;
    node.connected().await?;

    let key = SigningKey::generate();
    let mut future = announcement(STORAGE, "tub1", "1.0", Some(&key))?;
    future.verifying_key = future.verifying_key.map(|k| k.replacen("v0-", "v9-", 1));
    node.introducer.announce(STORAGE, &[future]);
    node.settle().await?;

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(node.counters.get(Counter::RejectedAnnouncement), 1);
    Ok(())
}

#[tokio::test]
async fn announcements_for_unwanted_services_are_dropped() -> Result<()> {
    let node = Node::start(IntroducerFlavor::V2)?;
    let seen = record_deliveries(&node.client, STORAGE, Vec::new())?;
    node.connected().await?;

    let stray = announcement(HELPER, "tub1", "1.0", None)?;
    node.introducer
        .send_to_subscribers(STORAGE, InboundCall::AnnounceV2(vec![stray]));
    node.settle().await?;

    assert!(seen.lock().unwrap().is_empty());
    assert!(node.client.announcements().is_empty());
    assert_eq!(node.counters.get(Counter::WrongService), 1);
    Ok(())
}

#[tokio::test]
async fn every_subscriber_of_a_service_is_notified() -> Result<()> {
    let node = Node::start(IntroducerFlavor::V2)?;
    let first = record_deliveries(&node.client, STORAGE, vec![json!(1)])?;
    let second = record_deliveries(&node.client, STORAGE, vec![json!(2)])?;
    let other = record_deliveries(&node.client, HELPER, Vec::new())?;
    node.connected().await?;

    node.introducer
        .announce(STORAGE, &[announcement(STORAGE, "tub1", "1.0", None)?]);
    node.settle().await?;

    assert_eq!(first.lock().unwrap()[0].extra_args, vec![json!(1)]);
    assert_eq!(second.lock().unwrap()[0].extra_args, vec![json!(2)]);
    assert!(other.lock().unwrap().is_empty());

    // One subscription per service on the wire, however many local callbacks.
    assert_eq!(node.introducer.calls_to("subscribe_v2").len(), 2);
    Ok(())
}

#[tokio::test]
async fn encoding_parameters_are_exposed() -> Result<()> {
    let node = Node::start(IntroducerFlavor::V2)?;
    let _seen = record_deliveries(&node.client, STORAGE, Vec::new())?;
    node.connected().await?;
    assert!(node.client.encoding_parameters().is_none());

    let params = json!({"k": 3, "happy": 7, "n": 10, "max_segment_size": 131072});
    assert_eq!(node.introducer.set_encoding_parameters(params.clone()), 1);
    node.settle().await?;

    assert_eq!(node.client.encoding_parameters(), Some(params));
    Ok(())
}
