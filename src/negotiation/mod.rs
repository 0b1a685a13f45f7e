//! Negotiation module for carrier rate discovery

pub mod engine;
pub mod policy;
pub mod session;
pub mod types;

pub use engine::NegotiationEngine;
pub use policy::{round_to_cents, NegotiationPolicy, DEFAULT_EPSILON};
pub use session::NegotiationSession;
pub use types::{Decision, NegotiationStatus, RawOffer, NEEDS_NUMERIC_OFFER};
