//! Negotiation types and state machine

use crate::types::{CarrierID, LoadID, SessionID, SessionKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason code returned when the carrier's offer could not be read as a number
pub const NEEDS_NUMERIC_OFFER: &str = "needs_numeric_from_carrier";

/// Negotiation state machine
///
/// `Pending` never describes a stored session; it only labels a decision
/// that left the session untouched. `Accepted` and `Failed` are absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationStatus {
    Pending,
    Ongoing,
    Accepted,
    Failed,
}

impl NegotiationStatus {
    /// Check if negotiation is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationStatus::Accepted | NegotiationStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationStatus::Pending => "pending",
            NegotiationStatus::Ongoing => "ongoing",
            NegotiationStatus::Accepted => "accepted",
            NegotiationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for NegotiationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The carrier's latest stated price, as relayed by the voice agent
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawOffer {
    #[default]
    Missing,
    Number(f64),
    Text(String),
}

impl RawOffer {
    /// The offer as a finite amount, if it can be read as one
    pub fn amount(&self) -> Option<f64> {
        let value = match self {
            RawOffer::Missing => return None,
            RawOffer::Number(n) => *n,
            RawOffer::Text(text) => parse_amount(text)?,
        };
        value.is_finite().then_some(value)
    }
}

impl From<f64> for RawOffer {
    fn from(value: f64) -> Self {
        RawOffer::Number(value)
    }
}

impl From<&str> for RawOffer {
    fn from(value: &str) -> Self {
        RawOffer::Text(value.to_string())
    }
}

impl From<Option<f64>> for RawOffer {
    fn from(value: Option<f64>) -> Self {
        value.map_or(RawOffer::Missing, RawOffer::Number)
    }
}

/// Parse "1200", " $1,200.50 " and similar spoken-rate transcriptions
fn parse_amount(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_prefix('$').unwrap_or(trimmed).trim_start();
    if trimmed.is_empty() {
        return None;
    }
    let cleaned: String = trimmed.chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok()
}

/// Outcome of one `submit_offer` call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub session_id: SessionID,
    #[serde(rename = "mc_number")]
    pub carrier_id: CarrierID,
    pub load_id: LoadID,
    pub status: NegotiationStatus,
    pub agreed_rate: Option<f64>,
    pub broker_counter_offer: Option<f64>,
    pub round_number: u32,
    pub max_acceptable: f64,
    pub hard_cap: f64,
    pub carrier_offers: Vec<f64>,
    pub message: String,
}

impl Decision {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            session_id: self.session_id.clone(),
            carrier_id: self.carrier_id.clone(),
            load_id: self.load_id.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
