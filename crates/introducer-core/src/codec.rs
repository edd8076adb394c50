//! Announcement codec: pure conversions between the canonical record and
//! its two wire forms, plus identity derivation for dedup.
//!
//! Nothing in here logs or touches shared state. Callers decide what a
//! failure means for the announcement at hand.

use thiserror::Error;

use crate::announcement::{
    AnnouncementIndex, AnnouncementRecord, LegacyAnnouncement, SignedAnnouncement,
    ANNOUNCEMENT_FORMAT_VERSION,
};
use crate::crypto::{self, SigningKey, VerifyingKey, KEY_VERSION_PREFIX};
use crate::wire::NodeIdentity;

/// Locator scheme that carries a tub id: `pb://<tubid>@<hints>/<name>`.
const FURL_SCHEME: &str = "pb://";

// ── Signing ───────────────────────────────────────────────────────────────────

/// Serialize `record` and, when a key is given, sign the exact bytes.
pub fn sign(
    record: &AnnouncementRecord,
    signing_key: Option<&SigningKey>,
) -> Result<SignedAnnouncement, CodecError> {
    let message = serde_json::to_string(record)?;
    let Some(key) = signing_key else {
        return Ok(SignedAnnouncement {
            message,
            signature: None,
            verifying_key: None,
        });
    };
    let signature = key.sign_to_string(message.as_bytes());
    let verifying_key = key.verifying_key().to_prefixed_string();
    Ok(SignedAnnouncement {
        message,
        signature: Some(signature),
        verifying_key: Some(verifying_key),
    })
}

/// Verify (if signed) and decode.
///
/// Returns the record and the verifying key token without its version prefix,
/// or `None` for an unsigned announcement. A present key makes verification
/// mandatory: a bad signature is an error, never a downgrade to unsigned.
pub fn unsign(signed: &SignedAnnouncement) -> Result<(AnnouncementRecord, Option<String>), CodecError> {
    let key_token = match (&signed.signature, &signed.verifying_key) {
        (None, None) => None,
        (Some(sig), Some(key)) => {
            let sig = strip_key_version(sig)?;
            let token = strip_key_version(key)?;
            let verifying_key = VerifyingKey::from_token(token).map_err(|_| CodecError::BadSignature)?;
            let sig_bytes = crypto::a2b(sig).map_err(|_| CodecError::BadSignature)?;
            verifying_key
                .verify(signed.message_bytes(), &sig_bytes)
                .map_err(|_| CodecError::BadSignature)?;
            Some(token.to_string())
        }
        // Half-signed: a key without a signature (or vice versa) cannot be
        // verified, so it cannot be trusted as signed or unsigned. Older
        // peers index these by tub id as if unsigned; this side refuses them.
        (Some(sig), None) => {
            strip_key_version(sig)?;
            return Err(CodecError::BadSignature);
        }
        (None, Some(key)) => {
            strip_key_version(key)?;
            return Err(CodecError::BadSignature);
        }
    };
    let record = serde_json::from_str(&signed.message)?;
    Ok((record, key_token))
}

fn strip_key_version(value: &str) -> Result<&str, CodecError> {
    value
        .strip_prefix(KEY_VERSION_PREFIX)
        .ok_or_else(|| CodecError::UnsupportedKeyVersion(prefix_of(value)))
}

fn prefix_of(value: &str) -> String {
    value.chars().take(KEY_VERSION_PREFIX.len()).collect()
}

/// Build this node's announcement for one service and sign it.
pub fn create_announcement(
    furl: &str,
    service_name: &str,
    remote_interface_name: &str,
    node: &NodeIdentity,
    signing_key: Option<&SigningKey>,
) -> Result<SignedAnnouncement, CodecError> {
    let record = AnnouncementRecord {
        version: ANNOUNCEMENT_FORMAT_VERSION,
        service_name: service_name.to_string(),
        furl: furl.to_string(),
        remote_interface_name: remote_interface_name.to_string(),
        nickname: node.nickname.clone(),
        app_versions: node.app_versions.clone(),
        my_version: node.my_version.clone(),
        oldest_supported: node.oldest_supported.clone(),
        extra: Default::default(),
    };
    sign(&record, signing_key)
}

// ── Identity ──────────────────────────────────────────────────────────────────

/// Index under which an announcement is deduplicated.
///
/// Signed announcements are keyed by (service, verifying key); unsigned ones
/// by (service, tub id of the locator). Both wire versions of the same
/// unsigned announcement therefore land on the same index.
pub fn make_index(
    record: &AnnouncementRecord,
    key_token: Option<&str>,
) -> Result<AnnouncementIndex, CodecError> {
    let node_id = match key_token {
        Some(token) => token.to_string(),
        None => tubid_from_furl(&record.furl)?,
    };
    Ok(AnnouncementIndex::new(record.service_name.clone(), node_id))
}

/// Extract the lower-cased tub id from `pb://<tubid>@...`.
pub fn tubid_from_furl(furl: &str) -> Result<String, CodecError> {
    let bad = || CodecError::LocatorFormat(furl.to_string());
    let rest = furl.strip_prefix(FURL_SCHEME).ok_or_else(bad)?;
    let (tubid, _) = rest.split_once('@').ok_or_else(bad)?;
    if tubid.is_empty() || !tubid.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(bad());
    }
    Ok(tubid.to_ascii_lowercase())
}

// ── v1 <-> v2 ─────────────────────────────────────────────────────────────────

/// Wrap a legacy tuple as an unsigned v2 announcement with empty app-versions.
pub fn convert_v1_to_v2(legacy: &LegacyAnnouncement) -> Result<SignedAnnouncement, CodecError> {
    let nickname = String::from_utf8(legacy.nickname.clone())?;
    let record = AnnouncementRecord {
        version: ANNOUNCEMENT_FORMAT_VERSION,
        service_name: legacy.service_name.clone(),
        furl: legacy.furl.clone(),
        remote_interface_name: legacy.remote_interface_name.clone(),
        nickname,
        app_versions: Default::default(),
        my_version: legacy.my_version.clone(),
        oldest_supported: legacy.oldest_supported.clone(),
        extra: Default::default(),
    };
    sign(&record, None)
}

/// Flatten a v2 announcement into a legacy tuple. Signatures are dropped;
/// v1 introducers cannot carry them.
pub fn convert_v2_to_v1(signed: &SignedAnnouncement) -> Result<LegacyAnnouncement, CodecError> {
    let record: AnnouncementRecord = serde_json::from_str(&signed.message)?;
    if record.version != ANNOUNCEMENT_FORMAT_VERSION {
        return Err(CodecError::UnsupportedFormatVersion(record.version));
    }
    Ok(LegacyAnnouncement {
        furl: record.furl,
        service_name: record.service_name,
        remote_interface_name: record.remote_interface_name,
        nickname: record.nickname.into_bytes(),
        my_version: record.my_version,
        oldest_supported: record.oldest_supported,
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported key version {0:?} (only \"v0-\" is recognized)")]
    UnsupportedKeyVersion(String),

    #[error("bad signature on announcement")]
    BadSignature,

    #[error("malformed announcement message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    #[error("locator {0:?} does not match pb://<tubid>@...")]
    LocatorFormat(String),

    #[error("unsupported announcement format version {0}")]
    UnsupportedFormatVersion(u64),

    #[error("legacy nickname is not UTF-8: {0}")]
    InvalidNickname(#[from] std::string::FromUtf8Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
