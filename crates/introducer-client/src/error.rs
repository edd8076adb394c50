use thiserror::Error;

use introducer_core::CodecError;

use crate::transport::{RemoteError, TransportError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("introducer client is stopped")]
    Stopped,

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The introducer does not speak a protocol this client understands.
    #[error("introducer does not advertise {needed}; offered {offered:?}")]
    InsufficientVersion { needed: String, offered: Vec<String> },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}
