//! Negotiation engine manages all active negotiation sessions

use crate::types::{CarrierID, SessionID, SessionKey};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::policy::NegotiationPolicy;
use super::session::NegotiationSession;
use super::types::{Decision, NegotiationStatus, RawOffer, NEEDS_NUMERIC_OFFER};

type SessionSlot = Arc<Mutex<NegotiationSession>>;

/// Negotiation engine manages all active sessions.
///
/// Each session lives behind its own mutex. The map's shard lock is held only
/// long enough to find or create that slot, so offers for one key are
/// serialized while offers for different keys do not wait on each other.
pub struct NegotiationEngine {
    sessions: DashMap<SessionKey, SessionSlot>,
    policy: NegotiationPolicy,
}

impl NegotiationEngine {
    /// Create new negotiation engine with the default policy
    pub fn new() -> Self {
        Self::with_policy(NegotiationPolicy::default())
    }

    pub fn with_policy(policy: NegotiationPolicy) -> Self {
        Self {
            sessions: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &NegotiationPolicy {
        &self.policy
    }

    /// Submit a carrier offer and get the broker's decision.
    ///
    /// `reference_rate` is only used when this call creates the session.
    pub fn submit_offer(&self, key: &SessionKey, reference_rate: f64, raw_offer: &RawOffer) -> Decision {
        let Some(offer) = raw_offer.amount() else {
            tracing::debug!("Non-numeric offer for {}: {:?}", key, raw_offer);
            return self.pending_decision(key, reference_rate);
        };

        let slot = self.slot(key, reference_rate);
        let decision = lock(&slot).apply_offer(offer, &self.policy);

        tracing::debug!(
            "Round {} for {}: offer {:.2} -> {} (max {:.2})",
            decision.round_number,
            key,
            offer,
            decision.status,
            decision.max_acceptable
        );
        if decision.is_terminal() {
            tracing::info!(
                session = %key,
                status = %decision.status,
                agreed_rate = ?decision.agreed_rate,
                rounds = decision.round_number,
                "Negotiation closed"
            );
        }

        decision
    }

    /// Drop a session's state. Removing an absent key is a no-op.
    pub fn reset_session(&self, key: &SessionKey) {
        if self.sessions.remove(key).is_some() {
            tracing::debug!("Reset negotiation session {}", key);
        }
    }

    /// Drop every session a carrier holds within one call. Returns how many were removed.
    pub fn reset_call(&self, session_id: &SessionID, carrier_id: &CarrierID) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|key, _| !(key.session_id == *session_id && key.carrier_id == *carrier_id));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            tracing::debug!(
                "Reset {} negotiation session(s) for {} in {}",
                removed,
                carrier_id,
                session_id
            );
        }
        removed
    }

    /// Number of sessions a carrier still holds within one call
    pub fn call_sessions(&self, session_id: &SessionID, carrier_id: &CarrierID) -> usize {
        self.sessions
            .iter()
            .filter(|entry| {
                entry.key().session_id == *session_id && entry.key().carrier_id == *carrier_id
            })
            .count()
    }

    /// Get a copy of a session
    pub fn session(&self, key: &SessionKey) -> Option<NegotiationSession> {
        let slot = self.sessions.get(key)?.value().clone();
        let session = lock(&slot).clone();
        Some(session)
    }

    /// Number of sessions currently held
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Find or create the slot for a key, releasing the shard lock before returning
    fn slot(&self, key: &SessionKey, reference_rate: f64) -> SessionSlot {
        self.sessions
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(
                    "Opening negotiation session {} at reference rate {:.2}",
                    key,
                    reference_rate
                );
                Arc::new(Mutex::new(NegotiationSession::new(key.clone(), reference_rate)))
            })
            .value()
            .clone()
    }

    /// Report the current state without creating or touching the session
    fn pending_decision(&self, key: &SessionKey, reference_rate: f64) -> Decision {
        let existing = self.sessions.get(key).map(|entry| entry.value().clone());
        let mut decision = match existing {
            Some(slot) => lock(&slot).snapshot(&self.policy, NEEDS_NUMERIC_OFFER),
            None => NegotiationSession::new(key.clone(), reference_rate)
                .snapshot(&self.policy, NEEDS_NUMERIC_OFFER),
        };
        // A closed session keeps reporting its outcome
        if !decision.is_terminal() {
            decision.status = NegotiationStatus::Pending;
        }
        decision
    }
}

impl Default for NegotiationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Session state stays consistent even if a holder panicked, since every
/// mutation completes before the guard is released.
fn lock(slot: &Mutex<NegotiationSession>) -> MutexGuard<'_, NegotiationSession> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn key(call: &str) -> SessionKey {
        SessionKey::new(call, "MC123456", "L-1001")
    }

    #[test]
    fn test_engine_creation() {
        let engine = NegotiationEngine::new();
        assert_eq!(engine.active_sessions(), 0);
        assert_eq!(engine.policy(), &NegotiationPolicy::default());
    }

    #[test]
    fn test_accept_below_reference() {
        let engine = NegotiationEngine::new();

        let decision = engine.submit_offer(&key("call_1"), 1000.0, &RawOffer::from(950.0));

        assert_eq!(decision.status, NegotiationStatus::Accepted);
        assert_eq!(decision.agreed_rate, Some(950.0));
        assert_eq!(decision.round_number, 1);
        assert_eq!(engine.active_sessions(), 1);
    }

    #[test]
    fn test_non_numeric_offer_is_pending() {
        let engine = NegotiationEngine::new();
        let key = key("call_1");

        let decision = engine.submit_offer(&key, 1000.0, &RawOffer::from("not a number"));

        assert_eq!(decision.status, NegotiationStatus::Pending);
        assert_eq!(decision.message, NEEDS_NUMERIC_OFFER);
        assert_eq!(decision.round_number, 0);
        // Nothing was created
        assert_eq!(engine.active_sessions(), 0);
    }

    #[test]
    fn test_non_numeric_offer_mid_negotiation() {
        let engine = NegotiationEngine::new();
        let key = key("call_1");

        engine.submit_offer(&key, 1000.0, &RawOffer::from(1200.0));
        let pending = engine.submit_offer(&key, 1000.0, &RawOffer::Missing);

        assert_eq!(pending.status, NegotiationStatus::Pending);
        assert_eq!(pending.round_number, 1);
        assert_eq!(pending.carrier_offers, vec![1200.0]);

        let session = engine.session(&key).unwrap();
        assert_eq!(session.round_number(), 1);
        assert_eq!(session.status(), NegotiationStatus::Ongoing);
        assert_eq!(session.last_counter_offer(), Some(1050.0));
    }

    #[test]
    fn test_non_numeric_offer_after_close_reports_outcome() {
        let engine = NegotiationEngine::new();
        let key = key("call_1");

        engine.submit_offer(&key, 1000.0, &RawOffer::from(980.0));
        let decision = engine.submit_offer(&key, 1000.0, &RawOffer::from("ok"));

        assert_eq!(decision.status, NegotiationStatus::Accepted);
        assert_eq!(decision.agreed_rate, Some(980.0));
    }

    #[test]
    fn test_reference_rate_fixed_at_creation() {
        let engine = NegotiationEngine::new();
        let key = key("call_1");

        engine.submit_offer(&key, 1000.0, &RawOffer::from(1200.0));
        // Catalog price moved; the session ignores it
        let decision = engine.submit_offer(&key, 2000.0, &RawOffer::from(1150.0));

        assert_eq!(engine.session(&key).unwrap().reference_rate(), 1000.0);
        assert_eq!(decision.max_acceptable, 1100.0);
        assert_eq!(decision.status, NegotiationStatus::Ongoing);
    }

    #[test]
    fn test_session_isolation() {
        let engine = NegotiationEngine::new();
        let first_call = key("call_1");
        let second_call = key("call_2");

        engine.submit_offer(&first_call, 1000.0, &RawOffer::from(1300.0));
        engine.submit_offer(&first_call, 1000.0, &RawOffer::from(1300.0));
        let other = engine.submit_offer(&second_call, 1000.0, &RawOffer::from(1300.0));

        assert_eq!(other.round_number, 1);
        assert_eq!(other.broker_counter_offer, Some(1050.0));
        assert_eq!(engine.session(&first_call).unwrap().round_number(), 2);
        assert_eq!(engine.active_sessions(), 2);
    }

    #[test]
    fn test_reset_session() {
        let engine = NegotiationEngine::new();
        let key = key("call_1");

        engine.submit_offer(&key, 1000.0, &RawOffer::from(990.0));
        engine.reset_session(&key);
        assert!(engine.session(&key).is_none());

        // Idempotent
        engine.reset_session(&key);

        let fresh = engine.submit_offer(&key, 1000.0, &RawOffer::from(1200.0));
        assert_eq!(fresh.status, NegotiationStatus::Ongoing);
        assert_eq!(fresh.round_number, 1);
    }

    #[test]
    fn test_reset_call_drops_every_load_of_that_call() {
        let engine = NegotiationEngine::new();
        let first_load = SessionKey::new("call_1", "MC1", "L-1");
        let second_load = SessionKey::new("call_1", "MC1", "L-2");
        let other_carrier = SessionKey::new("call_1", "MC2", "L-1");
        let other_call = SessionKey::new("call_2", "MC1", "L-1");

        for key in [&first_load, &second_load, &other_carrier, &other_call] {
            engine.submit_offer(key, 1000.0, &RawOffer::from(1200.0));
        }
        assert_eq!(engine.call_sessions(&first_load.session_id, &first_load.carrier_id), 2);

        let removed = engine.reset_call(&first_load.session_id, &first_load.carrier_id);

        assert_eq!(removed, 2);
        assert_eq!(engine.call_sessions(&first_load.session_id, &first_load.carrier_id), 0);
        assert!(engine.session(&other_carrier).is_some());
        assert!(engine.session(&other_call).is_some());
        assert_eq!(engine.reset_call(&first_load.session_id, &first_load.carrier_id), 0);
    }

    #[test]
    fn test_custom_policy() {
        let engine = NegotiationEngine::with_policy(NegotiationPolicy {
            tolerance_step: 0.02,
            max_rounds: 2,
            hard_cap_ratio: 0.04,
            ..Default::default()
        });
        let key = key("call_1");

        let r1 = engine.submit_offer(&key, 1000.0, &RawOffer::from(1100.0));
        assert_eq!(r1.broker_counter_offer, Some(1020.0));

        let r2 = engine.submit_offer(&key, 1000.0, &RawOffer::from(1090.0));
        assert_eq!(r2.status, NegotiationStatus::Failed);
        assert_eq!(r2.hard_cap, 1040.0);
    }

    #[test]
    fn test_concurrent_offers_same_key_are_serialized() {
        let engine = Arc::new(NegotiationEngine::new());
        let key = key("call_1");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let key = key.clone();
                thread::spawn(move || engine.submit_offer(&key, 1000.0, &RawOffer::from(1040.0)))
            })
            .collect();

        let decisions: Vec<Decision> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Exactly one submission opened and closed the deal; the rest saw it frozen
        assert!(decisions.iter().all(|d| d.status == NegotiationStatus::Accepted));
        assert!(decisions.iter().all(|d| d.round_number == 1));
        assert!(decisions.iter().all(|d| d.carrier_offers == vec![1040.0]));
    }

    #[test]
    fn test_concurrent_different_keys() {
        let engine = Arc::new(NegotiationEngine::new());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let engine = engine.clone();
                thread::spawn(move || {
                    let key = SessionKey::new(format!("call_{}", i), "MC1", "L1");
                    engine.submit_offer(&key, 1000.0, &RawOffer::from(1200.0))
                })
            })
            .collect();

        for handle in handles {
            let decision = handle.join().unwrap();
            assert_eq!(decision.round_number, 1);
            assert_eq!(decision.status, NegotiationStatus::Ongoing);
        }
        assert_eq!(engine.active_sessions(), 16);
    }
}
