//! Announcement signing keys.
//!
//! Provides two things:
//!   1. Base32 text encoding: lowercase RFC 4648, unpadded
//!   2. Ed25519 signing/verifying keys with versioned string forms
//!
//! Key strings on the wire are `"v0-" + base32(bytes)`. The private key is
//! stored on disk as `"priv-v0-" + base32(seed)`. Signatures are
//! deterministic: the same key over the same bytes yields the same signature.

use std::path::Path;

use ed25519_dalek::{Signer, Verifier};
use thiserror::Error;
use zeroize::Zeroizing;

/// Version prefix on signature and verifying-key strings.
pub const KEY_VERSION_PREFIX: &str = "v0-";

/// Version prefix on serialized private keys.
pub const PRIVATE_KEY_PREFIX: &str = "priv-v0-";

// ── Base32 ────────────────────────────────────────────────────────────────────

const ALPHABET: base32::Alphabet = base32::Alphabet::Rfc4648 { padding: false };

/// Encode bytes as lowercase unpadded base32.
pub fn b2a(data: &[u8]) -> String {
    base32::encode(ALPHABET, data).to_ascii_lowercase()
}

/// Decode lowercase (or uppercase) unpadded base32.
pub fn a2b(text: &str) -> Result<Vec<u8>, CryptoError> {
    base32::decode(ALPHABET, &text.to_ascii_uppercase()).ok_or(CryptoError::InvalidEncoding)
}

// ── Signing key ───────────────────────────────────────────────────────────────

/// A node's announcement signing key.
///
/// The secret half is zeroized on drop by ed25519-dalek.
#[derive(Clone)]
pub struct SigningKey(ed25519_dalek::SigningKey);

impl SigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Reconstruct a key from its 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&seed))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key())
    }

    /// Sign `message`, returning the raw 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.0.sign(message).to_bytes()
    }

    /// `"v0-"`-prefixed signature string, as carried in a SignedAnnouncement.
    pub fn sign_to_string(&self, message: &[u8]) -> String {
        format!("{KEY_VERSION_PREFIX}{}", b2a(&self.sign(message)))
    }

    /// Serialize for storage. Keep the file private.
    pub fn to_private_string(&self) -> Zeroizing<String> {
        let seed = Zeroizing::new(self.0.to_bytes());
        Zeroizing::new(format!("{PRIVATE_KEY_PREFIX}{}", b2a(&seed[..])))
    }

    /// Parse the output of [`SigningKey::to_private_string`].
    pub fn from_private_string(text: &str) -> Result<Self, CryptoError> {
        let encoded = text
            .trim()
            .strip_prefix(PRIVATE_KEY_PREFIX)
            .ok_or(CryptoError::UnknownKeyVersion)?;
        let bytes = Zeroizing::new(a2b(encoded)?);
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self::from_seed(seed))
    }

    /// Load a key file, generating and writing a new key if none exists.
    pub fn load_or_generate(path: &Path) -> Result<Self, CryptoError> {
        if path.exists() {
            let text = Zeroizing::new(std::fs::read_to_string(path)?);
            return Self::from_private_string(&text);
        }
        let key = Self::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, key.to_private_string().as_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(key)
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKey({})", self.verifying_key().to_token())
    }
}

// ── Verifying key ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

impl VerifyingKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidKey)
    }

    /// Parse an unprefixed base32 token.
    pub fn from_token(token: &str) -> Result<Self, CryptoError> {
        Self::from_bytes(&a2b(token)?)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Base32 of the key bytes, without version prefix. This is the node id
    /// of a signed announcement.
    pub fn to_token(&self) -> String {
        b2a(self.as_bytes())
    }

    /// `"v0-"`-prefixed form, as carried in a SignedAnnouncement.
    pub fn to_prefixed_string(&self) -> String {
        format!("{KEY_VERSION_PREFIX}{}", self.to_token())
    }

    /// Verify a raw signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let signature =
            ed25519_dalek::Signature::from_slice(signature).map_err(|_| CryptoError::BadSignature)?;
        self.0
            .verify(message, &signature)
            .map_err(|_| CryptoError::BadSignature)
    }
}

impl std::fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VerifyingKey({})", self.to_token())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid base32 encoding")]
    InvalidEncoding,

    #[error("invalid key bytes")]
    InvalidKey,

    #[error("unrecognized key version prefix")]
    UnknownKeyVersion,

    #[error("signature verification failed")]
    BadSignature,

    #[error("key file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
