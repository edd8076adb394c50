//! Introducer wire protocol: identifiers, method names, and payload records.
//!
//! The names in this module ARE the protocol. The introducer dispatches on
//! method names and checks for protocol identifiers in the version map;
//! changing any string here breaks interop with deployed introducers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol identifier every usable introducer advertises. Both v1-only and
/// v2-capable introducers carry it.
pub const INTRODUCER_PROTOCOL_V1: &str = "http://allmydata.org/tahoe/protocols/introducer/v1";

/// Advertised alongside the v1 identifier by introducers that accept signed
/// announcements.
pub const INTRODUCER_PROTOCOL_V2: &str = "http://allmydata.org/tahoe/protocols/introducer/v2";

/// Version map key carrying the peer's application version string.
pub const APPLICATION_VERSION_KEY: &str = "application-version";

/// Remote interface names of the objects this client exposes.
pub const SUBSCRIBER_CLIENT_V1_INTERFACE: &str =
    "RIIntroducerSubscriberClient.tahoe.allmydata.com";
pub const SUBSCRIBER_CLIENT_V2_INTERFACE: &str =
    "RIIntroducerSubscriberClient_v2.tahoe.allmydata.com";
pub const STUB_CLIENT_INTERFACE: &str = "RIStubClient.tahoe.allmydata.com";

/// Service name under which the placeholder stub object is published to v1
/// introducers, so they can count connected clients.
pub const STUB_CLIENT_SERVICE: &str = "stub_client";

/// Outbound method names.
pub mod method {
    pub const GET_VERSION: &str = "get_version";
    pub const PUBLISH_V2: &str = "publish_v2";
    pub const PUBLISH: &str = "publish";
    pub const SUBSCRIBE_V2: &str = "subscribe_v2";
    pub const SUBSCRIBE: &str = "subscribe";

    /// Inbound, called by the introducer on our subscriber object.
    pub const ANNOUNCE_V2: &str = "announce_v2";
    pub const ANNOUNCE: &str = "announce";
    pub const SET_ENCODING_PARAMETERS: &str = "set_encoding_parameters";
}

/// Which of the two wire dialects a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntroducerProtocol {
    V1,
    V2,
}

/// A peer's advertised protocol/capability map.
pub type VersionMap = Map<String, Value>;

/// The version map assumed for a peer that cannot answer `get_version`.
/// Such peers are old v1 introducers.
pub fn default_introducer_version() -> VersionMap {
    let mut map = Map::new();
    map.insert(INTRODUCER_PROTOCOL_V1.to_string(), Value::Object(Map::new()));
    map.insert(
        APPLICATION_VERSION_KEY.to_string(),
        Value::String("unknown: no get_version()".to_string()),
    );
    map
}

/// Who this node is. Stamped into every announcement and subscription.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeIdentity {
    pub nickname: String,
    pub my_version: String,
    pub oldest_supported: String,
    pub app_versions: Map<String, Value>,
}

/// Sent with `subscribe_v2` so the introducer can report on its subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberInfo {
    pub version: u64,
    pub nickname: String,
    #[serde(rename = "app-versions")]
    pub app_versions: Map<String, Value>,
    #[serde(rename = "my-version")]
    pub my_version: String,
    #[serde(rename = "oldest-supported")]
    pub oldest_supported: String,
}

impl From<&NodeIdentity> for SubscriberInfo {
    fn from(node: &NodeIdentity) -> Self {
        Self {
            version: 0,
            nickname: node.nickname.clone(),
            app_versions: node.app_versions.clone(),
            my_version: node.my_version.clone(),
            oldest_supported: node.oldest_supported.clone(),
        }
    }
}
