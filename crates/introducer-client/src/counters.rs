//! Protocol counters: what the client decided about each inbound
//! announcement and how many RPCs are in flight.
//!
//! The client reports through the [`IntroducerMetrics`] trait so hosts can
//! route counts wherever they like. [`DebugCounters`] is the in-process
//! default and what the tests read.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Events the client counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Counter {
    /// One inbound `announce`/`announce_v2` batch.
    InboundMessage,
    /// One announcement that decoded successfully.
    InboundAnnouncement,
    /// Failed signature or key-version check, or undecodable message.
    RejectedAnnouncement,
    /// Announcement for a service nobody subscribed to.
    WrongService,
    /// Identical to what the table already holds.
    DuplicateAnnouncement,
    /// Replaced a different record at an existing index.
    Update,
    /// First announcement at its index.
    NewAnnouncement,
    /// One `publish_v2` attempt.
    OutboundMessage,
}

impl Counter {
    pub const ALL: [Counter; 8] = [
        Counter::InboundMessage,
        Counter::InboundAnnouncement,
        Counter::RejectedAnnouncement,
        Counter::WrongService,
        Counter::DuplicateAnnouncement,
        Counter::Update,
        Counter::NewAnnouncement,
        Counter::OutboundMessage,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::InboundMessage => "inbound_message",
            Counter::InboundAnnouncement => "inbound_announcement",
            Counter::RejectedAnnouncement => "rejected_announcement",
            Counter::WrongService => "wrong_service",
            Counter::DuplicateAnnouncement => "duplicate_announcement",
            Counter::Update => "update",
            Counter::NewAnnouncement => "new_announcement",
            Counter::OutboundMessage => "outbound_message",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Sink for client counters. Implementations must be cheap; they are called
/// on the event loop.
pub trait IntroducerMetrics: Send + Sync {
    fn increment(&self, counter: Counter);

    /// An outbound RPC was issued.
    fn rpc_started(&self) {}

    /// An outbound RPC completed, successfully or not.
    fn rpc_retired(&self) {}
}

/// Holds one outstanding RPC on a metrics sink until dropped.
pub struct OutstandingRpc(Arc<dyn IntroducerMetrics>);

impl OutstandingRpc {
    pub fn start(metrics: &Arc<dyn IntroducerMetrics>) -> Self {
        metrics.rpc_started();
        Self(metrics.clone())
    }
}

impl Drop for OutstandingRpc {
    fn drop(&mut self) {
        self.0.rpc_retired();
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl IntroducerMetrics for NoopMetrics {
    fn increment(&self, _counter: Counter) {}
}

/// Atomic in-memory counters.
#[derive(Debug, Default)]
pub struct DebugCounters {
    counts: [AtomicU64; Counter::ALL.len()],
    outstanding: AtomicI64,
}

impl DebugCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counts[counter.slot()].load(Ordering::Relaxed)
    }

    /// RPCs issued but not yet completed.
    pub fn outstanding(&self) -> i64 {
        self.outstanding.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        Counter::ALL
            .iter()
            .map(|c| (c.name(), self.get(*c)))
            .collect()
    }
}

impl IntroducerMetrics for DebugCounters {
    fn increment(&self, counter: Counter) {
        self.counts[counter.slot()].fetch_add(1, Ordering::Relaxed);
    }

    fn rpc_started(&self) {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
    }

    fn rpc_retired(&self) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
    }
}
