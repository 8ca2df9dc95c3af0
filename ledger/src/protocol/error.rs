use std::fmt;

use crate::codec::CodecError;
use crate::network::TransportError;
use crate::store::StoreError;

/// High-level errors of the chain protocol.
///
/// The engine recovers locally from [`EngineBusy`], [`Timeout`] and
/// [`NoCandidate`]; [`SignatureInvalid`] and [`Codec`] surface as log
/// warnings only; [`Store`] is fatal for the current operation.
///
/// [`EngineBusy`]: ProtocolError::EngineBusy
/// [`Timeout`]: ProtocolError::Timeout
/// [`NoCandidate`]: ProtocolError::NoCandidate
/// [`SignatureInvalid`]: ProtocolError::SignatureInvalid
/// [`Codec`]: ProtocolError::Codec
/// [`Store`]: ProtocolError::Store
#[derive(Debug)]
pub enum ProtocolError {
    /// A signature failed verification or a response did not match the
    /// outstanding request.
    SignatureInvalid,
    /// The requester waited past the configured request timeout.
    Timeout,
    /// A chain operation is already in flight on this peer.
    EngineBusy,
    /// Discovery knows no live candidate for the peer.
    NoCandidate,
    /// A buffer could not be decoded.
    Codec(CodecError),
    /// Persistence failed.
    Store(StoreError),
    /// The overlay refused the outbound message.
    Transport(TransportError),
    /// The chain actor is gone.
    Closed,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::SignatureInvalid => write!(f, "signature verification failed"),
            ProtocolError::Timeout => write!(f, "signature request timed out"),
            ProtocolError::EngineBusy => write!(f, "a chain operation is already in flight"),
            ProtocolError::NoCandidate => write!(f, "no live candidate for peer"),
            ProtocolError::Codec(e) => write!(f, "{e}"),
            ProtocolError::Store(e) => write!(f, "store error: {e}"),
            ProtocolError::Transport(e) => write!(f, "transport error: {e}"),
            ProtocolError::Closed => write!(f, "chain actor is not running"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<CodecError> for ProtocolError {
    fn from(e: CodecError) -> Self {
        ProtocolError::Codec(e)
    }
}

impl From<StoreError> for ProtocolError {
    fn from(e: StoreError) -> Self {
        ProtocolError::Store(e)
    }
}

impl From<TransportError> for ProtocolError {
    fn from(e: TransportError) -> Self {
        ProtocolError::Transport(e)
    }
}
