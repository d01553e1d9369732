//! Client-facing error type.

use crate::protocol::ProtocolError;
use crate::transport::TransportError;
use crate::wire::CodecError;

/// Why a client call produced no result.
///
/// Remote failures are not errors: they come back as EXCEPTION handles.
#[derive(Debug, thiserror::Error)]
pub enum ReflectError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("bad response envelope: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ReflectError {
    /// Rejected locally, before anything was sent.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}
