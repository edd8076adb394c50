//! Transport seam: what the client needs from the RPC layer.
//!
//! The client never opens sockets itself. A transport provides reconnecting
//! connections to the introducer, remote calls that fail distinguishably when
//! the peer lacks a method, local object registration, and disconnect
//! notification. Everything the client sends or receives is spelled out in
//! [`IntroducerCall`] and [`InboundCall`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use introducer_core::wire::{method, SubscriberInfo, VersionMap};
use introducer_core::{LegacyAnnouncement, SignedAnnouncement};

/// An object that can be handed to the introducer by reference.
pub trait Referenceable: Send + Sync {
    fn remote_interface_name(&self) -> &'static str;
}

/// A local object the introducer calls back with announcements.
pub trait SubscriberEndpoint: Referenceable {
    /// Handle one inbound call. Unknown methods fail with
    /// [`RemoteError::MethodNotFound`].
    fn receive(&self, call: InboundCall) -> Result<(), RemoteError>;
}

/// Invoked once when the connection behind a reference dies.
pub type DisconnectNotice = Box<dyn FnOnce() + Send>;

/// Receives every connection the reconnector establishes.
pub type ConnectionSink = Arc<dyn Fn(Arc<dyn RemoteReference>) + Send + Sync>;

/// A live reference to the introducer over one connection.
#[async_trait]
pub trait RemoteReference: Send + Sync {
    /// The peer's advertised protocol map.
    async fn get_version(&self) -> Result<VersionMap, RemoteError>;

    async fn call_remote(&self, call: IntroducerCall) -> Result<(), RemoteError>;

    /// Register a notice fired when this connection is lost. A notice
    /// registered on an already-dead reference fires immediately.
    fn notify_on_disconnect(&self, notice: DisconnectNotice);
}

/// Handle on a persistent reconnecting connection.
pub trait Reconnector: Send + Sync {
    /// Stop reconnecting. Existing connections are left to die on their own.
    fn stop(&self);
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Keep a connection to `furl` up, handing each new connection to `sink`.
    fn connect_to(&self, furl: &str, sink: ConnectionSink)
        -> Result<Box<dyn Reconnector>, TransportError>;

    /// One-shot reference fetch.
    async fn get_reference(&self, furl: &str) -> Result<Arc<dyn RemoteReference>, TransportError>;

    /// Make `object` remotely callable and return its FURL.
    fn register_reference(&self, object: Arc<dyn Referenceable>) -> Result<String, TransportError>;
}

// ── Calls ─────────────────────────────────────────────────────────────────────

/// The canary a publisher hands the introducer with `publish_v2`. Its
/// disconnection tells the introducer the publisher went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canary {
    id: u64,
}

impl Canary {
    pub fn new() -> Self {
        Self {
            id: rand::random(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Default for Canary {
    fn default() -> Self {
        Self::new()
    }
}

impl Referenceable for Canary {
    fn remote_interface_name(&self) -> &'static str {
        "Canary"
    }
}

/// Calls the client makes on the introducer.
#[derive(Clone)]
pub enum IntroducerCall {
    PublishV2 {
        announcement: SignedAnnouncement,
        canary: Canary,
    },
    Publish {
        announcement: LegacyAnnouncement,
    },
    SubscribeV2 {
        subscriber: Arc<dyn SubscriberEndpoint>,
        service_name: String,
        info: SubscriberInfo,
    },
    Subscribe {
        subscriber: Arc<dyn SubscriberEndpoint>,
        service_name: String,
    },
}

impl IntroducerCall {
    pub fn method_name(&self) -> &'static str {
        match self {
            IntroducerCall::PublishV2 { .. } => method::PUBLISH_V2,
            IntroducerCall::Publish { .. } => method::PUBLISH,
            IntroducerCall::SubscribeV2 { .. } => method::SUBSCRIBE_V2,
            IntroducerCall::Subscribe { .. } => method::SUBSCRIBE,
        }
    }
}

impl fmt::Debug for IntroducerCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntroducerCall::PublishV2 { announcement, canary } => f
                .debug_struct("PublishV2")
                .field("announcement", announcement)
                .field("canary", canary)
                .finish(),
            IntroducerCall::Publish { announcement } => f
                .debug_struct("Publish")
                .field("announcement", announcement)
                .finish(),
            IntroducerCall::SubscribeV2 { service_name, info, .. } => f
                .debug_struct("SubscribeV2")
                .field("service_name", service_name)
                .field("info", info)
                .finish_non_exhaustive(),
            IntroducerCall::Subscribe { service_name, .. } => f
                .debug_struct("Subscribe")
                .field("service_name", service_name)
                .finish_non_exhaustive(),
        }
    }
}

/// Calls the introducer makes on a subscriber endpoint.
#[derive(Debug, Clone)]
pub enum InboundCall {
    AnnounceV2(Vec<SignedAnnouncement>),
    Announce(Vec<LegacyAnnouncement>),
    SetEncodingParameters(Value),
}

impl InboundCall {
    pub fn method_name(&self) -> &'static str {
        match self {
            InboundCall::AnnounceV2(_) => method::ANNOUNCE_V2,
            InboundCall::Announce(_) => method::ANNOUNCE,
            InboundCall::SetEncodingParameters(_) => method::SET_ENCODING_PARAMETERS,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failure of a single remote call.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("remote object has no method {0:?}")]
    MethodNotFound(String),

    #[error("call violated the remote schema: {0}")]
    Violation(String),

    #[error("connection lost")]
    ConnectionLost,

    #[error("remote call failed: {0}")]
    Failed(String),
}

impl RemoteError {
    /// True when the peer speaks an older protocol that lacks the call.
    /// These trigger the legacy fallbacks.
    pub fn is_capability_mismatch(&self) -> bool {
        matches!(self, RemoteError::MethodNotFound(_) | RemoteError::Violation(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to connect to {furl}: {reason}")]
    ConnectFailed { furl: String, reason: String },

    #[error("failed to register local reference: {0}")]
    RegistrationFailed(String),
}
