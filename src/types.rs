//! Identity types shared across the broker

use blake2::{Blake2b512, Digest};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One voice call / agent session. Stable for the lifetime of the call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionID(pub String);

impl SessionID {
    /// Derive a stable session ID from a caller-supplied call token
    pub fn from_call_context(token: &str) -> Self {
        let mut hasher = Blake2b512::new();
        hasher.update(b"loadbroker-call:");
        hasher.update(token.trim().as_bytes());
        let result = hasher.finalize();
        Self(format!("call_{}", hex::encode(&result[..16])))
    }
}

impl From<CallID> for SessionID {
    fn from(call_id: CallID) -> Self {
        Self(call_id.0)
    }
}

impl fmt::Display for SessionID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Carrier identifier (MC number)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CarrierID(pub String);

impl fmt::Display for CarrierID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Load identifier from the catalog
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadID(pub String);

impl fmt::Display for LoadID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-generated call identifier for calls that arrive without a token
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallID(pub String);

impl CallID {
    /// Generate a new random call ID
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(format!("call_{}", hex::encode(bytes)))
    }
}

impl fmt::Display for CallID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite key of a negotiation session.
///
/// Two calls negotiating the same load with the same carrier get distinct
/// keys because the session ID differs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub session_id: SessionID,
    pub carrier_id: CarrierID,
    pub load_id: LoadID,
}

impl SessionKey {
    pub fn new(
        session_id: impl Into<String>,
        carrier_id: impl Into<String>,
        load_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: SessionID(session_id.into()),
            carrier_id: CarrierID(carrier_id.into()),
            load_id: LoadID(load_id.into()),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.session_id, self.carrier_id, self.load_id)
    }
}
