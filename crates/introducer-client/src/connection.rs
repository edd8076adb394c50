//! Connection lifecycle: which connection to the introducer is current and
//! what has been sent on it.
//!
//! ```text
//! Disconnected → Connecting → VersionChecking → Connected → Disconnected → ...
//! ```
//!
//! The transport owns reconnection. This module only reacts: every raw
//! connection it hears about starts a new generation, and any continuation
//! tagged with an older generation is stale.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use introducer_core::wire::{default_introducer_version, VersionMap, INTRODUCER_PROTOCOL_V1};

use crate::error::ClientError;
use crate::transport::RemoteReference;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    /// Reconnector started, no connection yet.
    Connecting,
    /// Connected, waiting for the peer's version map.
    VersionChecking,
    Connected,
}

#[derive(Default)]
pub struct ConnectionManager {
    phase: ConnectionPhase,
    generation: u64,
    publisher: Option<Arc<dyn RemoteReference>>,
    /// Service names subscribed on the current connection.
    in_flight: HashSet<String>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn begin_connecting(&mut self) {
        self.phase = ConnectionPhase::Connecting;
    }

    /// A new raw connection supersedes whatever came before it.
    pub fn raw_connected(&mut self) -> u64 {
        self.generation += 1;
        self.publisher = None;
        self.in_flight.clear();
        self.phase = ConnectionPhase::VersionChecking;
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    /// Version check passed. Returns false for a stale generation.
    pub fn established(&mut self, generation: u64, publisher: Arc<dyn RemoteReference>) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.publisher = Some(publisher);
        self.phase = ConnectionPhase::Connected;
        true
    }

    /// Version check failed. The connection is abandoned until the
    /// transport hands over a new one.
    pub fn version_rejected(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.publisher = None;
        self.phase = ConnectionPhase::Disconnected;
        true
    }

    /// Only the in-flight set is lost; the caller keeps its tables.
    pub fn disconnected(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.publisher = None;
        self.in_flight.clear();
        self.phase = ConnectionPhase::Disconnected;
        true
    }

    pub fn publisher(&self) -> Option<&Arc<dyn RemoteReference>> {
        self.publisher.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.publisher.is_some()
    }

    /// Record that `service_name` is being subscribed on this connection.
    /// Returns false if it already was.
    pub fn mark_subscribed(&mut self, service_name: &str) -> bool {
        self.in_flight.insert(service_name.to_string())
    }

    pub fn in_flight(&self) -> &HashSet<String> {
        &self.in_flight
    }
}

/// Fetch the peer's version map and require the v1 introducer protocol.
///
/// Peers too old to answer `get_version` are assumed to be plain v1
/// introducers.
pub async fn check_version(publisher: &Arc<dyn RemoteReference>) -> Result<VersionMap, ClientError> {
    let version = match publisher.get_version().await {
        Ok(version) => version,
        Err(e) if e.is_capability_mismatch() => {
            tracing::debug!(error = %e, "introducer has no get_version, assuming v1");
            default_introducer_version()
        }
        Err(e) => return Err(e.into()),
    };
    if !version.contains_key(INTRODUCER_PROTOCOL_V1) {
        return Err(ClientError::InsufficientVersion {
            needed: INTRODUCER_PROTOCOL_V1.to_string(),
            offered: version.keys().cloned().collect(),
        });
    }
    Ok(version)
}
