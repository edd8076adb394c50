//! Publication engine: this node's own announcements.
//!
//! Every resync resends the whole set; the introducer ignores repeats. Each
//! announcement goes out as its own task and fails on its own.

use std::collections::BTreeMap;
use std::sync::Arc;

use introducer_core::codec;
use introducer_core::SignedAnnouncement;

use crate::counters::{Counter, IntroducerMetrics, OutstandingRpc};
use crate::transport::{Canary, IntroducerCall, RemoteReference};

pub struct Publisher {
    /// service name → latest announcement for it
    published: BTreeMap<String, SignedAnnouncement>,
    canary: Canary,
    metrics: Arc<dyn IntroducerMetrics>,
}

impl Publisher {
    pub fn new(metrics: Arc<dyn IntroducerMetrics>) -> Self {
        Self {
            published: BTreeMap::new(),
            canary: Canary::new(),
            metrics,
        }
    }

    /// Replace the announcement for `service_name`.
    pub fn insert(&mut self, service_name: String, announcement: SignedAnnouncement) {
        self.published.insert(service_name, announcement);
    }

    /// Send everything to `publisher`.
    pub fn resync(&self, publisher: &Arc<dyn RemoteReference>) {
        for (service_name, announcement) in &self.published {
            self.metrics.increment(Counter::OutboundMessage);
            tokio::spawn(publish_one(
                publisher.clone(),
                service_name.clone(),
                announcement.clone(),
                self.canary.clone(),
                OutstandingRpc::start(&self.metrics),
            ));
        }
    }
}

async fn publish_one(
    publisher: Arc<dyn RemoteReference>,
    service_name: String,
    announcement: SignedAnnouncement,
    canary: Canary,
    _rpc: OutstandingRpc,
) {
    let result = publisher
        .call_remote(IntroducerCall::PublishV2 {
            announcement: announcement.clone(),
            canary,
        })
        .await;

    let e = match result {
        Ok(()) => {
            tracing::debug!(service = %service_name, "published");
            return;
        }
        Err(e) => e,
    };
    if !e.is_capability_mismatch() {
        tracing::warn!(service = %service_name, error = %e, "publish_v2 failed");
        return;
    }

    tracing::info!(service = %service_name, error = %e, "falling back to publish_v1");
    let legacy = match codec::convert_v2_to_v1(&announcement) {
        Ok(legacy) => legacy,
        Err(e) => {
            tracing::warn!(service = %service_name, error = %e, "cannot express announcement as v1");
            return;
        }
    };
    let result = publisher
        .call_remote(IntroducerCall::Publish { announcement: legacy })
        .await;
    if let Err(e) = result {
        tracing::warn!(service = %service_name, error = %e, "legacy publish failed");
    }
}
