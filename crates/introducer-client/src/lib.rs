//! Client side of the introducer announcement protocol.
//!
//! Connects to an introducer through a pluggable [`Transport`], publishes this
//! node's announcements and delivers other nodes' announcements to local
//! subscribers, speaking the signed v2 protocol and falling back to v1 where
//! the introducer is older.

pub mod client;
pub mod connection;
pub mod counters;
mod endpoint;
pub mod error;
mod notify;
mod publisher;
mod subscriber;
pub mod table;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{ClientSettings, ClientStatus, IntroducerClient};
pub use connection::ConnectionPhase;
pub use counters::{Counter, DebugCounters, IntroducerMetrics, NoopMetrics};
pub use error::ClientError;
pub use subscriber::AnnouncementCallback;
pub use table::{AnnouncementEntry, AnnouncementTable};
pub use transport::{
    InboundCall, IntroducerCall, RemoteError, RemoteReference, SubscriberEndpoint, Transport,
    TransportError,
};
