//! Signing primitives behind a small seam.
//!
//! The protocol layer only needs three capabilities from the key
//! material: the local public key, detached signing, and verification of
//! foreign signatures. [`Signer`] captures the first two so tests can
//! substitute deterministic keys; verification is a free function
//! because it needs no local state.

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::types::{PublicKey, Signature};

/// Local signing identity used by the protocol engine.
pub trait Signer: Send + Sync {
    /// Canonical byte encoding of the public half of this identity.
    fn public_key(&self) -> PublicKey;

    /// Produces a detached signature over `message`.
    fn sign(&self, message: &[u8]) -> Signature;
}

/// Ed25519-backed implementation of [`Signer`].
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Generates a fresh random identity.
    pub fn generate() -> Self {
        Ed25519Signer {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Builds a deterministic identity from a 32-byte seed. Intended for
    /// tests and demos that need reproducible keys.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Ed25519Signer {
            key: SigningKey::from_bytes(&seed),
        }
    }
}

impl Signer for Ed25519Signer {
    fn public_key(&self) -> PublicKey {
        PublicKey(self.key.verifying_key().to_bytes().to_vec())
    }

    fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.key.sign(message).to_bytes().to_vec())
    }
}

/// Verifies a detached signature over `message` under `public_key`.
///
/// Returns `false` for malformed keys or signatures as well as for
/// verification failures; callers treat all three the same way (drop the
/// message).
pub fn verify_signature(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    let Ok(key_bytes) = <&[u8; 32]>::try_from(public_key.as_bytes()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = <&[u8; 64]>::try_from(signature.as_bytes()) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(sig_bytes);
    verifying_key.verify_strict(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, REQUEST_HALF_LEN};
    use crate::types::{BlockId, Payload};

    fn dummy_payload() -> Payload {
        Payload {
            up: 100,
            down: 0,
            total_up_requester: 100,
            total_down_requester: 0,
            sequence_number_requester: 1,
            previous_hash_requester: BlockId::GENESIS,
            total_up_responder: 0,
            total_down_responder: 100,
            sequence_number_responder: 1,
            previous_hash_responder: BlockId::GENESIS,
        }
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let signer = Ed25519Signer::from_seed([7u8; 32]);
        let message = b"some message";
        let signature = signer.sign(message);

        assert!(verify_signature(&signer.public_key(), message, &signature));
        assert!(!verify_signature(&signer.public_key(), b"other message", &signature));
    }

    #[test]
    fn verify_rejects_malformed_keys_and_signatures() {
        let signer = Ed25519Signer::from_seed([7u8; 32]);
        let signature = signer.sign(b"msg");

        assert!(!verify_signature(&PublicKey(vec![1; 31]), b"msg", &signature));
        assert!(!verify_signature(
            &signer.public_key(),
            b"msg",
            &Signature(vec![1; 63])
        ));
    }

    #[test]
    fn requester_signature_covers_only_the_prefix() {
        // The requester signs the 40-byte prefix; flipping any byte of
        // the responder suffix must not invalidate that signature.
        let signer = Ed25519Signer::from_seed([9u8; 32]);
        let payload = dummy_payload();
        let mut bytes = codec::encode_payload(&payload);

        let (prefix, _) = codec::split_signable(&bytes);
        let signature = signer.sign(prefix);

        for i in REQUEST_HALF_LEN..bytes.len() {
            bytes[i] ^= 0xFF;
            let (prefix, _) = codec::split_signable(&bytes);
            assert!(verify_signature(&signer.public_key(), prefix, &signature));
            bytes[i] ^= 0xFF;
        }

        // Flipping a prefix byte does invalidate it.
        bytes[0] ^= 0xFF;
        let (prefix, _) = codec::split_signable(&bytes);
        assert!(!verify_signature(&signer.public_key(), prefix, &signature));
    }
}
