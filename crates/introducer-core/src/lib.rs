//! introducer-core: announcement types, codec, keys, and wire constants.
//! The client crate depends on this one; nothing here touches the network.

pub mod announcement;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod wire;

pub use announcement::{
    AnnouncementIndex, AnnouncementRecord, LegacyAnnouncement, SignedAnnouncement,
};
pub use codec::CodecError;
pub use crypto::{SigningKey, VerifyingKey};
