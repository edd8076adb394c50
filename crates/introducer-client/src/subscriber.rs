//! Subscription engine: what this node wants to hear about, and what it
//! has heard.
//!
//! Inbound batches from either protocol arrive here as v2 announcements.
//! Each element is verified, filtered by the wanted set, deduplicated
//! against the [`AnnouncementTable`], and handed to matching local
//! subscribers through the [`Notifier`]. One bad element never spoils the
//! rest of its batch.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use introducer_core::codec;
use introducer_core::wire::{IntroducerProtocol, SubscriberInfo};
use introducer_core::{AnnouncementRecord, SignedAnnouncement};

use crate::client::Event;
use crate::connection::ConnectionManager;
use crate::counters::{Counter, IntroducerMetrics, OutstandingRpc};
use crate::notify::Notifier;
use crate::table::{AnnouncementTable, UpsertOutcome};
use crate::transport::{IntroducerCall, RemoteReference, SubscriberEndpoint};

/// Called with (node id, announcement, extra args).
pub type AnnouncementCallback = Arc<dyn Fn(&str, &AnnouncementRecord, &[Value]) + Send + Sync>;

/// A local interest in one service. Lives as long as the client.
pub struct LocalSubscription {
    pub service_name: String,
    pub callback: AnnouncementCallback,
    pub extra_args: Vec<Value>,
}

/// The two faces this node shows the introducer.
#[derive(Clone)]
pub struct Endpoints {
    pub v2: Arc<dyn SubscriberEndpoint>,
    pub v1: Arc<dyn SubscriberEndpoint>,
}

pub struct Subscriber {
    local: Vec<Arc<LocalSubscription>>,
    wanted: BTreeSet<String>,
    table: AnnouncementTable,
    info: SubscriberInfo,
    endpoints: Endpoints,
    notifier: Notifier,
    metrics: Arc<dyn IntroducerMetrics>,
}

impl Subscriber {
    pub fn new(
        table: AnnouncementTable,
        info: SubscriberInfo,
        endpoints: Endpoints,
        notifier: Notifier,
        metrics: Arc<dyn IntroducerMetrics>,
    ) -> Self {
        Self {
            local: Vec::new(),
            wanted: BTreeSet::new(),
            table,
            info,
            endpoints,
            notifier,
            metrics,
        }
    }

    pub fn is_wanted(&self, service_name: &str) -> bool {
        self.wanted.contains(service_name)
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Register `subscription` and replay what is already known for its
    /// service, in arrival order. The caller resyncs afterwards.
    pub fn add(&mut self, subscription: Arc<LocalSubscription>) {
        self.wanted.insert(subscription.service_name.clone());
        self.local.push(subscription.clone());
        for (index, entry) in self.table.matching(&subscription.service_name) {
            self.notifier
                .deliver(subscription.clone(), index.node_id, entry.announcement);
        }
    }

    /// Subscribe to every wanted service not yet subscribed on the current
    /// connection.
    pub fn resync(&self, connection: &mut ConnectionManager, events: &UnboundedSender<Event>) {
        let Some(publisher) = connection.publisher().cloned() else {
            tracing::debug!("want to subscribe, but no introducer yet");
            return;
        };
        let generation = connection.generation();
        for service_name in &self.wanted {
            if !connection.mark_subscribed(service_name) {
                continue;
            }
            tokio::spawn(subscribe_one(SubscribeTask {
                publisher: publisher.clone(),
                service_name: service_name.clone(),
                info: self.info.clone(),
                endpoints: self.endpoints.clone(),
                events: events.clone(),
                generation,
                _rpc: OutstandingRpc::start(&self.metrics),
            }));
        }
    }

    /// Shared entry point for inbound batches of both protocols.
    pub fn got_announcements(&self, batch: Vec<SignedAnnouncement>, protocol: IntroducerProtocol) {
        self.metrics.increment(Counter::InboundMessage);
        tracing::debug!(count = batch.len(), protocol = ?protocol, "processing announcements");
        for signed in &batch {
            match codec::unsign(signed) {
                Ok((record, key)) => self.process(record, key),
                Err(e) => {
                    self.metrics.increment(Counter::RejectedAnnouncement);
                    tracing::warn!(
                        error = %e,
                        message = %signed.message,
                        "rejected inbound announcement"
                    );
                }
            }
        }
    }

    /// Count elements dropped before they reached [`Self::got_announcements`].
    pub fn rejected(&self, count: usize) {
        for _ in 0..count {
            self.metrics.increment(Counter::RejectedAnnouncement);
        }
    }

    fn process(&self, record: AnnouncementRecord, key: Option<String>) {
        self.metrics.increment(Counter::InboundAnnouncement);
        if !self.is_wanted(&record.service_name) {
            self.metrics.increment(Counter::WrongService);
            tracing::info!(
                service = %record.service_name,
                "announcement for a service we don't care about"
            );
            return;
        }

        let index = match codec::make_index(&record, key.as_deref()) {
            Ok(index) => index,
            Err(e) => {
                self.metrics.increment(Counter::RejectedAnnouncement);
                tracing::warn!(service = %record.service_name, error = %e, "cannot index announcement");
                return;
            }
        };

        tracing::debug!(
            nickname = %record.nickname,
            service = %record.service_name,
            furl = %record.furl,
            "announcement"
        );
        let record = Arc::new(record);
        match self.table.upsert(index.clone(), record.clone(), key) {
            UpsertOutcome::Duplicate => {
                self.metrics.increment(Counter::DuplicateAnnouncement);
                tracing::debug!(index = %index, "reannouncement, ignoring");
                return;
            }
            UpsertOutcome::Updated => {
                self.metrics.increment(Counter::Update);
                tracing::debug!(index = %index, version = %record.my_version, "replacing old announcement");
            }
            UpsertOutcome::New => {
                self.metrics.increment(Counter::NewAnnouncement);
                tracing::debug!(index = %index, "new announcement");
            }
        }

        for subscription in self.local.iter().filter(|s| s.service_name == index.service_name) {
            self.notifier
                .deliver(subscription.clone(), index.node_id.clone(), record.clone());
        }
    }
}

struct SubscribeTask {
    publisher: Arc<dyn RemoteReference>,
    service_name: String,
    info: SubscriberInfo,
    endpoints: Endpoints,
    events: UnboundedSender<Event>,
    generation: u64,
    /// Released when the task, fallback included, is done.
    _rpc: OutstandingRpc,
}

async fn subscribe_one(task: SubscribeTask) {
    let SubscribeTask {
        publisher,
        service_name,
        info,
        endpoints,
        events,
        generation,
        _rpc,
    } = task;

    let result = publisher
        .call_remote(IntroducerCall::SubscribeV2 {
            subscriber: endpoints.v2,
            service_name: service_name.clone(),
            info,
        })
        .await;

    let e = match result {
        Ok(()) => {
            tracing::debug!(service = %service_name, "subscribed");
            return;
        }
        Err(e) => e,
    };
    if !e.is_capability_mismatch() {
        tracing::warn!(service = %service_name, error = %e, "subscribe_v2 failed");
        return;
    }

    tracing::info!(service = %service_name, "introducer lacks subscribe_v2, falling back to subscribe");
    let result = publisher
        .call_remote(IntroducerCall::Subscribe {
            subscriber: endpoints.v1,
            service_name: service_name.clone(),
        })
        .await;
    match result {
        Ok(()) => {
            if events.send(Event::LegacySubscribed { generation }).is_err() {
                tracing::debug!(service = %service_name, "client stopped before legacy subscribe finished");
            }
        }
        Err(e) => {
            tracing::warn!(service = %service_name, error = %e, "legacy subscribe failed");
        }
    }
}
