//! Negotiation session management

use crate::types::SessionKey;
use std::time::SystemTime;

use super::policy::NegotiationPolicy;
use super::types::{Decision, NegotiationStatus};

/// One carrier negotiating one load during one call
#[derive(Clone, Debug)]
pub struct NegotiationSession {
    key: SessionKey,
    reference_rate: f64,
    round_number: u32,
    carrier_offers: Vec<f64>,
    last_counter_offer: Option<f64>,
    agreed_rate: Option<f64>,
    status: NegotiationStatus,
    created_at: SystemTime,
}

impl NegotiationSession {
    /// Create new session. The reference rate is fixed from here on.
    pub fn new(key: SessionKey, reference_rate: f64) -> Self {
        Self {
            key,
            reference_rate,
            round_number: 0,
            carrier_offers: Vec::new(),
            last_counter_offer: None,
            agreed_rate: None,
            status: NegotiationStatus::Ongoing,
            created_at: SystemTime::now(),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn reference_rate(&self) -> f64 {
        self.reference_rate
    }

    pub fn round_number(&self) -> u32 {
        self.round_number
    }

    pub fn carrier_offers(&self) -> &[f64] {
        &self.carrier_offers
    }

    pub fn last_counter_offer(&self) -> Option<f64> {
        self.last_counter_offer
    }

    pub fn agreed_rate(&self) -> Option<f64> {
        self.agreed_rate
    }

    pub fn status(&self) -> NegotiationStatus {
        self.status
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Process a numeric carrier offer
    pub fn apply_offer(&mut self, offer: f64, policy: &NegotiationPolicy) -> Decision {
        if self.is_terminal() {
            let message = match self.agreed_rate {
                Some(rate) => format!("Negotiation already accepted at {:.2}", rate),
                None => "Negotiation already closed without agreement".to_string(),
            };
            return self.snapshot(policy, message);
        }

        // Carrier repeated our counter back to us: that is acceptance
        if let Some(counter) = self.last_counter_offer {
            if policy.same_amount(offer, counter) {
                self.round_number = self.round_number.max(1);
                self.status = NegotiationStatus::Accepted;
                self.agreed_rate = Some(counter);
                self.last_counter_offer = None;
                return self.snapshot(
                    policy,
                    format!("Carrier accepted broker counter at {:.2}", counter),
                );
            }
        }

        if self.round_number == 0 && policy.same_amount(offer, self.reference_rate) {
            self.round_number = 1;
            self.status = NegotiationStatus::Accepted;
            self.agreed_rate = Some(self.reference_rate);
            return self.snapshot(
                policy,
                format!("Accepted at listed rate {:.2}", self.reference_rate),
            );
        }

        self.record_offer(offer, policy);
        self.round_number = self.round_number.saturating_add(1).max(1);

        let max_acceptable = policy.max_acceptable(self.reference_rate, self.round_number);

        if policy.at_most(offer, max_acceptable) {
            self.status = NegotiationStatus::Accepted;
            self.agreed_rate = Some(offer);
            self.last_counter_offer = None;
            return self.snapshot(policy, format!("Accepted at {:.2}", offer));
        }

        if !policy.is_final_round(self.round_number) {
            self.status = NegotiationStatus::Ongoing;
            self.last_counter_offer = Some(max_acceptable);
            let mut decision = self.snapshot(
                policy,
                format!(
                    "Carrier offer too high. Broker countered with {:.2}.",
                    max_acceptable
                ),
            );
            decision.broker_counter_offer = Some(max_acceptable);
            return decision;
        }

        // Out of rounds and still above tolerance; the last counter stays on record
        self.status = NegotiationStatus::Failed;
        self.agreed_rate = None;
        let hard_cap = policy.hard_cap(self.reference_rate);
        self.snapshot(
            policy,
            format!(
                "Hard cap {:.2} reached after {} rounds",
                hard_cap, policy.max_rounds
            ),
        )
    }

    /// Decision describing the current state without changing it
    pub fn snapshot(&self, policy: &NegotiationPolicy, message: impl Into<String>) -> Decision {
        Decision {
            session_id: self.key.session_id.clone(),
            carrier_id: self.key.carrier_id.clone(),
            load_id: self.key.load_id.clone(),
            status: self.status,
            agreed_rate: self.agreed_rate,
            broker_counter_offer: None,
            round_number: self.round_number,
            max_acceptable: policy.max_acceptable(self.reference_rate, self.round_number),
            hard_cap: policy.hard_cap(self.reference_rate),
            carrier_offers: self.carrier_offers.clone(),
            message: message.into(),
        }
    }

    /// Log a new carrier position unless it repeats the previous one
    fn record_offer(&mut self, offer: f64, policy: &NegotiationPolicy) {
        let repeated = self
            .carrier_offers
            .last()
            .is_some_and(|last| policy.same_amount(*last, offer));
        if !repeated {
            self.carrier_offers.push(offer);
        }
    }
}
