//! Announcement data model.
//!
//! An announcement claims that a service is reachable at a FURL. It exists in
//! three shapes:
//!   - `AnnouncementRecord`: the canonical, decoded form
//!   - `SignedAnnouncement`: the v2 wire form: JSON message + optional signature
//!   - `LegacyAnnouncement`: the v1 wire form: an unsigned 6-tuple

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Format version carried in every record. The only one that exists.
pub const ANNOUNCEMENT_FORMAT_VERSION: u64 = 0;

/// Canonical announcement. Serializes to the JSON message that gets signed.
///
/// Field order here is the key order of the signed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncementRecord {
    pub version: u64,

    #[serde(rename = "service-name")]
    pub service_name: String,

    /// Locator of the remote service. Embeds the publisher's tub id.
    #[serde(rename = "FURL")]
    pub furl: String,

    #[serde(rename = "remoteinterface-name")]
    pub remote_interface_name: String,

    #[serde(default)]
    pub nickname: String,

    /// Opaque application version info of the publisher.
    #[serde(rename = "app-versions", default)]
    pub app_versions: Map<String, Value>,

    #[serde(rename = "my-version")]
    pub my_version: String,

    #[serde(rename = "oldest-supported")]
    pub oldest_supported: String,

    /// Keys this client does not interpret. Kept so they reach subscribers
    /// and count toward update detection.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// v2 wire form: `[message, signature, verifying_key]`.
///
/// `message` is the exact UTF-8 JSON text the signature covers. Signature and
/// key are `"v0-"`-prefixed base32 strings, both absent for unsigned
/// announcements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SignedTriple", into = "SignedTriple")]
pub struct SignedAnnouncement {
    pub message: String,
    pub signature: Option<String>,
    pub verifying_key: Option<String>,
}

type SignedTriple = (String, Option<String>, Option<String>);

impl From<SignedTriple> for SignedAnnouncement {
    fn from((message, signature, verifying_key): SignedTriple) -> Self {
        Self {
            message,
            signature,
            verifying_key,
        }
    }
}

impl From<SignedAnnouncement> for SignedTriple {
    fn from(ann: SignedAnnouncement) -> Self {
        (ann.message, ann.signature, ann.verifying_key)
    }
}

impl SignedAnnouncement {
    pub fn is_signed(&self) -> bool {
        self.signature.is_some() || self.verifying_key.is_some()
    }

    pub fn message_bytes(&self) -> &[u8] {
        self.message.as_bytes()
    }
}

/// v1 wire form, spoken by introducers that predate `publish_v2`.
///
/// Wire: `(furl, service_name, remoteinterface_name, nickname, my_version, oldest_supported)`,
/// with the nickname carried as UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LegacyTuple", into = "LegacyTuple")]
pub struct LegacyAnnouncement {
    pub furl: String,
    pub service_name: String,
    pub remote_interface_name: String,
    pub nickname: Vec<u8>,
    pub my_version: String,
    pub oldest_supported: String,
}

type LegacyTuple = (String, String, String, Vec<u8>, String, String);

impl From<LegacyTuple> for LegacyAnnouncement {
    fn from(t: LegacyTuple) -> Self {
        let (furl, service_name, remote_interface_name, nickname, my_version, oldest_supported) = t;
        Self {
            furl,
            service_name,
            remote_interface_name,
            nickname,
            my_version,
            oldest_supported,
        }
    }
}

impl From<LegacyAnnouncement> for LegacyTuple {
    fn from(a: LegacyAnnouncement) -> Self {
        (
            a.furl,
            a.service_name,
            a.remote_interface_name,
            a.nickname,
            a.my_version,
            a.oldest_supported,
        )
    }
}

/// Identity of "one service instance" for dedup and update detection.
///
/// `node_id` is the verifying key token for signed announcements and the
/// locator's tub id for unsigned ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AnnouncementIndex {
    pub service_name: String,
    pub node_id: String,
}

impl AnnouncementIndex {
    pub fn new(service_name: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            node_id: node_id.into(),
        }
    }
}

impl fmt::Display for AnnouncementIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]:{}", self.service_name, self.node_id)
    }
}
