//! Load Broker
//!
//! Negotiates freight-load rates with truck carriers on behalf of an
//! automated voice agent. The core is a per-call negotiation engine that
//! decides whether to accept, counter, or reject each carrier offer:
//! - `negotiation`: session state machine and the engine that owns it
//! - `broker`: request handling around the engine (rate lookup, call identity)
//! - `server`: length-prefixed JSON over TCP for the voice agent
//! - `catalog`: posted loads and search

pub mod broker;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod negotiation;
pub mod outcome;
pub mod server;
pub mod types;

// Re-export commonly used types
pub use broker::{BrokerService, CallContext, CallSummaryRequest, EndCallRequest, NegotiateRequest};
pub use config::BrokerConfig;
pub use error::{BrokerError, Result};
pub use negotiation::{
    Decision, NegotiationEngine, NegotiationPolicy, NegotiationSession, NegotiationStatus,
    RawOffer,
};
pub use types::{CarrierID, LoadID, SessionID, SessionKey};
