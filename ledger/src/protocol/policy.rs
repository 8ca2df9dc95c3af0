//! Responder-side signing policy.

use crate::types::{PublicKey, RequestHalf};

/// Pluggable accept/reject predicate consulted before counter-signing.
///
/// The predicate runs after the structural validity checks, so
/// implementations see a well-formed half whose signature already
/// verified. Rejection drops the request without a reply; the requester
/// retries via its scheduler once more bytes accumulate.
pub trait SignaturePolicy: Send + Sync {
    fn should_sign(&self, requester: &PublicKey, half: &RequestHalf) -> bool;
}

/// Signs every valid request.
///
/// Useful as the default and for isolating protocol logic in tests while
/// real policies are being developed.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl SignaturePolicy for AcceptAll {
    fn should_sign(&self, _requester: &PublicKey, _half: &RequestHalf) -> bool {
        true
    }
}
