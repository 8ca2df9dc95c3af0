//! The chain protocol: the two-party signature handshake.
//!
//! This module provides a modular, testable protocol layer consisting
//! of:
//!
//! - the requester/responder state machine ([`engine::ChainEngine`]),
//! - the chain actor wrapping it in a tokio task ([`actor`]),
//! - the responder-side signing policy seam ([`policy`]),
//! - protocol-level errors ([`error::ProtocolError`]).

use std::time::Duration;

pub mod actor;
pub mod engine;
pub mod error;
pub mod policy;

pub use actor::{ChainCommand, ChainEvent, ChainHandle, spawn_chain_actor};
pub use engine::{ChainEngine, RequestOutcome};
pub use error::ProtocolError;
pub use policy::{AcceptAll, SignaturePolicy};

/// Protocol configuration parameters.
#[derive(Clone, Debug)]
pub struct ProtocolConfig {
    /// How long a requester waits for the counter-signed response
    /// before abandoning the attempt.
    pub request_timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
        }
    }
}
