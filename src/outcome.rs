//! Reporting negotiation rounds and call outcomes to the metrics collaborator

use crate::negotiation::Decision;
use crate::types::{CarrierID, LoadID, SessionID};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Mutex;

/// Transcript event name carrying the voice platform's sentiment tag
pub const SENTIMENT_EVENT: &str = "sentiment_hr";

/// How a call ended, as recorded for analytics
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallResult {
    Accepted,
    Unbooked,
}

/// One processed carrier offer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundEvent {
    pub session_id: SessionID,
    pub reference_rate: f64,
    pub carrier_offer: Option<f64>,
    pub decision: Decision,
}

/// Terminal outcome of a call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub session_id: SessionID,
    pub load_id: LoadID,
    #[serde(rename = "mc_number")]
    pub carrier_id: CarrierID,
    pub outcome: CallResult,
    pub agreed_rate: Option<f64>,
    pub rounds: u32,
}

impl CallOutcome {
    /// Outcome for a terminal decision; `None` while the negotiation is open
    pub fn from_decision(decision: &Decision) -> Option<Self> {
        use crate::negotiation::NegotiationStatus;

        let outcome = match decision.status {
            NegotiationStatus::Accepted => CallResult::Accepted,
            NegotiationStatus::Failed => CallResult::Unbooked,
            NegotiationStatus::Ongoing | NegotiationStatus::Pending => return None,
        };
        Some(Self {
            session_id: decision.session_id.clone(),
            load_id: decision.load_id.clone(),
            carrier_id: decision.carrier_id.clone(),
            outcome,
            agreed_rate: decision.agreed_rate,
            rounds: decision.round_number,
        })
    }
}

/// Carrier sentiment reported at the end of a call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Sentiment::Positive),
            "neutral" => Ok(Sentiment::Neutral),
            "negative" => Ok(Sentiment::Negative),
            other => Err(format!("unknown sentiment: {}", other)),
        }
    }
}

impl Sentiment {
    /// Last sentiment tag in a call transcript.
    ///
    /// The transcript is a JSON array (or a string holding one) of entries
    /// like `{"role": "event", "name": "sentiment_hr", "content": "positive_tag"}`.
    /// Unknown tags and other entries are skipped.
    pub fn from_transcript(transcript: &Value) -> Option<Self> {
        let parsed;
        let transcript = match transcript {
            Value::String(raw) => {
                parsed = serde_json::from_str::<Value>(raw).ok()?;
                &parsed
            }
            other => other,
        };

        transcript
            .as_array()?
            .iter()
            .filter_map(Self::from_event)
            .last()
    }

    fn from_event(entry: &Value) -> Option<Self> {
        let role = entry.get("role")?.as_str()?;
        let name = entry.get("name")?.as_str()?;
        if role != "event" || name != SENTIMENT_EVENT {
            return None;
        }
        let tag = entry
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        tag.strip_suffix("_tag").unwrap_or(&tag).parse().ok()
    }
}

/// Post-call summary attached to the most recent call for a carrier
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallSummary {
    pub session_id: SessionID,
    pub load_id: Option<LoadID>,
    #[serde(rename = "mc_number")]
    pub carrier_id: Option<CarrierID>,
    pub agreed_rate: Option<f64>,
    pub sentiment: Option<Sentiment>,
    pub transcript: Option<Value>,
}

/// Receiver for negotiation telemetry. Implementations must not fail the request.
pub trait OutcomeSink: Send + Sync {
    fn record_round(&self, event: &RoundEvent);
    fn close_call(&self, outcome: &CallOutcome);
    fn record_summary(&self, summary: &CallSummary);
}

/// Emits structured `tracing` events
#[derive(Clone, Debug, Default)]
pub struct TracingSink;

impl OutcomeSink for TracingSink {
    fn record_round(&self, event: &RoundEvent) {
        tracing::info!(
            target: "loadbroker::events",
            event_type = "nego.round",
            session_id = %event.session_id,
            load_id = %event.decision.load_id,
            mc_number = %event.decision.carrier_id,
            carrier_offer = ?event.carrier_offer,
            reference_rate = event.reference_rate,
            status = %event.decision.status,
            round = event.decision.round_number,
            counter = ?event.decision.broker_counter_offer,
            "negotiation round"
        );
    }

    fn close_call(&self, outcome: &CallOutcome) {
        tracing::info!(
            target: "loadbroker::events",
            event_type = "call.closed",
            session_id = %outcome.session_id,
            load_id = %outcome.load_id,
            mc_number = %outcome.carrier_id,
            outcome = ?outcome.outcome,
            agreed_rate = ?outcome.agreed_rate,
            rounds = outcome.rounds,
            "call closed"
        );
    }

    fn record_summary(&self, summary: &CallSummary) {
        tracing::info!(
            target: "loadbroker::events",
            event_type = "summary.received",
            session_id = %summary.session_id,
            load_id = ?summary.load_id,
            mc_number = ?summary.carrier_id,
            agreed_rate = ?summary.agreed_rate,
            sentiment = ?summary.sentiment,
            "call summary"
        );
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    rounds: Mutex<Vec<RoundEvent>>,
    outcomes: Mutex<Vec<CallOutcome>>,
    summaries: Mutex<Vec<CallSummary>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rounds(&self) -> Vec<RoundEvent> {
        self.rounds
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn outcomes(&self) -> Vec<CallOutcome> {
        self.outcomes
            .lock()
            .map(|o| o.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn summaries(&self) -> Vec<CallSummary> {
        self.summaries
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl OutcomeSink for MemorySink {
    fn record_round(&self, event: &RoundEvent) {
        if let Ok(mut rounds) = self.rounds.lock() {
            rounds.push(event.clone());
        }
    }

    fn close_call(&self, outcome: &CallOutcome) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push(outcome.clone());
        }
    }

    fn record_summary(&self, summary: &CallSummary) {
        if let Ok(mut summaries) = self.summaries.lock() {
            summaries.push(summary.clone());
        }
    }
}
