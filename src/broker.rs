//! Request-handling layer around the negotiation engine

use crate::catalog::{Load, LoadCatalog, LoadQuery};
use crate::error::{BrokerError, Result};
use crate::negotiation::{Decision, NegotiationEngine, RawOffer};
use crate::outcome::{CallOutcome, CallSummary, OutcomeSink, RoundEvent, Sentiment, TracingSink};
use crate::types::{CallID, CarrierID, LoadID, SessionID, SessionKey};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Carrier offer for one load, as relayed by the voice agent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NegotiateRequest {
    pub load_id: LoadID,
    pub mc_number: CarrierID,
    #[serde(default)]
    pub carrier_offer: RawOffer,
}

/// The agent hung up or abandoned the load
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndCallRequest {
    pub load_id: LoadID,
    pub mc_number: CarrierID,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndCallReply {
    pub session_id: Option<SessionID>,
    pub reset: bool,
}

/// Post-call summary pushed by the voice platform
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallSummaryRequest {
    pub mc_number: Option<CarrierID>,
    pub load_id: Option<LoadID>,
    pub agreed_rate: Option<f64>,
    pub transcript: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallSummaryReply {
    /// Call the summary was attached to; `None` when no call matched
    pub session_id: Option<SessionID>,
    pub sentiment: Option<Sentiment>,
}

/// Where a request came from
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallContext {
    /// Call identifier supplied by the voice platform, if any
    pub call_token: Option<String>,
    /// Transport-level origin, e.g. the client's socket address
    pub connection: String,
}

impl CallContext {
    pub fn new(call_token: Option<String>, connection: impl Into<String>) -> Self {
        Self {
            call_token: call_token.filter(|t| !t.trim().is_empty()),
            connection: connection.into(),
        }
    }
}

/// Maps inbound requests to a session ID that is stable for one call
#[derive(Debug, Default)]
pub struct CallRegistry {
    untokened: DashMap<(String, CarrierID), SessionID>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session ID for this call, creating a mapping for untokened callers
    pub fn resolve(&self, ctx: &CallContext, carrier: &CarrierID) -> SessionID {
        match &ctx.call_token {
            Some(token) => SessionID::from_call_context(token),
            None => self
                .untokened
                .entry((ctx.connection.clone(), carrier.clone()))
                .or_insert_with(|| {
                    let call_id = CallID::generate();
                    tracing::debug!(
                        "New call {} for {} from {}",
                        call_id,
                        carrier,
                        ctx.connection
                    );
                    call_id.into()
                })
                .value()
                .clone(),
        }
    }

    /// Session ID for this call without creating one
    pub fn lookup(&self, ctx: &CallContext, carrier: &CarrierID) -> Option<SessionID> {
        match &ctx.call_token {
            Some(token) => Some(SessionID::from_call_context(token)),
            None => self
                .untokened
                .get(&(ctx.connection.clone(), carrier.clone()))
                .map(|entry| entry.value().clone()),
        }
    }

    /// Forget every mapping that points at this session
    pub fn deactivate(&self, session_id: &SessionID) {
        self.untokened.retain(|_, mapped| *mapped != *session_id);
    }

    /// Drop every untokened mapping opened over one connection
    pub fn release_connection(&self, connection: &str) -> Vec<(CarrierID, SessionID)> {
        let keys: Vec<(String, CarrierID)> = self
            .untokened
            .iter()
            .filter(|entry| entry.key().0 == connection)
            .map(|entry| entry.key().clone())
            .collect();

        keys.into_iter()
            .filter_map(|key| self.untokened.remove(&key))
            .map(|((_, carrier), session_id)| (carrier, session_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.untokened.len()
    }

    pub fn is_empty(&self) -> bool {
        self.untokened.is_empty()
    }
}

/// Resolves reference rates, drives the engine, reports outcomes
pub struct BrokerService {
    catalog: LoadCatalog,
    engine: NegotiationEngine,
    calls: CallRegistry,
    reported: DashMap<SessionKey, ()>,
    latest_calls: DashMap<(CarrierID, LoadID), SessionID>,
    latest_by_carrier: DashMap<CarrierID, SessionID>,
    sink: Arc<dyn OutcomeSink>,
}

impl BrokerService {
    pub fn new(catalog: LoadCatalog, engine: NegotiationEngine) -> Self {
        Self::with_sink(catalog, engine, Arc::new(TracingSink))
    }

    pub fn with_sink(
        catalog: LoadCatalog,
        engine: NegotiationEngine,
        sink: Arc<dyn OutcomeSink>,
    ) -> Self {
        Self {
            catalog,
            engine,
            calls: CallRegistry::new(),
            reported: DashMap::new(),
            latest_calls: DashMap::new(),
            latest_by_carrier: DashMap::new(),
            sink,
        }
    }

    pub fn engine(&self) -> &NegotiationEngine {
        &self.engine
    }

    pub fn catalog(&self) -> &LoadCatalog {
        &self.catalog
    }

    pub fn calls(&self) -> &CallRegistry {
        &self.calls
    }

    /// Run one negotiation round for a carrier offer
    pub fn negotiate_round(&self, ctx: &CallContext, request: &NegotiateRequest) -> Result<Decision> {
        let load = self
            .catalog
            .get(&request.load_id)
            .ok_or_else(|| BrokerError::LoadNotFound(request.load_id.0.clone()))?;

        let key = SessionKey {
            session_id: self.calls.resolve(ctx, &request.mc_number),
            carrier_id: request.mc_number.clone(),
            load_id: request.load_id.clone(),
        };

        self.latest_calls.insert(
            (key.carrier_id.clone(), key.load_id.clone()),
            key.session_id.clone(),
        );
        self.latest_by_carrier
            .insert(key.carrier_id.clone(), key.session_id.clone());

        let decision = self
            .engine
            .submit_offer(&key, load.loadboard_rate, &request.carrier_offer);

        self.sink.record_round(&RoundEvent {
            session_id: key.session_id.clone(),
            reference_rate: load.loadboard_rate,
            carrier_offer: request.carrier_offer.amount(),
            decision: decision.clone(),
        });

        if let Some(outcome) = CallOutcome::from_decision(&decision) {
            // Resubmissions after close return the frozen decision; report once
            if self.reported.insert(key, ()).is_none() {
                self.sink.close_call(&outcome);
            }
        }

        Ok(decision)
    }

    /// Discard the negotiation for a finished call. Safe to repeat.
    pub fn end_call(&self, ctx: &CallContext, request: &EndCallRequest) -> EndCallReply {
        let Some(session_id) = self.calls.lookup(ctx, &request.mc_number) else {
            return EndCallReply {
                session_id: None,
                reset: false,
            };
        };

        let key = SessionKey {
            session_id: session_id.clone(),
            carrier_id: request.mc_number.clone(),
            load_id: request.load_id.clone(),
        };
        let existed = self.engine.session(&key).is_some();
        self.engine.reset_session(&key);
        self.reported.remove(&key);
        // The mapping is the only route to an untokened call's other loads
        if self.engine.call_sessions(&session_id, &request.mc_number) == 0 {
            self.calls.deactivate(&session_id);
        }

        tracing::info!("Ended call {} (session existed: {})", key, existed);

        EndCallReply {
            session_id: Some(session_id),
            reset: existed,
        }
    }

    /// Discard the untokened calls of a closed connection. Returns the sessions dropped.
    pub fn release_connection(&self, connection: &str) -> usize {
        let released: usize = self
            .calls
            .release_connection(connection)
            .into_iter()
            .map(|(carrier_id, session_id)| {
                self.reported.retain(|key, _| {
                    !(key.session_id == session_id && key.carrier_id == carrier_id)
                });
                self.engine.reset_call(&session_id, &carrier_id)
            })
            .sum();

        if released > 0 {
            tracing::info!(
                "Released {} open session(s) of closed connection {}",
                released,
                connection
            );
        }
        released
    }

    /// Attach a post-call summary to the carrier's most recent call.
    ///
    /// Matches on carrier and load first, then on carrier alone. Never
    /// changes negotiation state.
    pub fn record_summary(&self, request: &CallSummaryRequest) -> CallSummaryReply {
        let by_load = match (&request.mc_number, &request.load_id) {
            (Some(carrier), Some(load)) => self
                .latest_calls
                .get(&(carrier.clone(), load.clone()))
                .map(|entry| entry.value().clone()),
            _ => None,
        };
        let session_id = by_load.or_else(|| {
            request
                .mc_number
                .as_ref()
                .and_then(|carrier| self.latest_by_carrier.get(carrier))
                .map(|entry| entry.value().clone())
        });

        let Some(session_id) = session_id else {
            tracing::debug!(
                "No call found for summary (mc {:?}, load {:?})",
                request.mc_number,
                request.load_id
            );
            return CallSummaryReply {
                session_id: None,
                sentiment: None,
            };
        };

        let sentiment = request
            .transcript
            .as_ref()
            .and_then(Sentiment::from_transcript);

        self.sink.record_summary(&CallSummary {
            session_id: session_id.clone(),
            load_id: request.load_id.clone(),
            carrier_id: request.mc_number.clone(),
            agreed_rate: request.agreed_rate,
            sentiment,
            transcript: request.transcript.clone(),
        });

        CallSummaryReply {
            session_id: Some(session_id),
            sentiment,
        }
    }

    pub fn load(&self, load_id: &LoadID) -> Result<Load> {
        self.catalog
            .get(load_id)
            .cloned()
            .ok_or_else(|| BrokerError::LoadNotFound(load_id.0.clone()))
    }

    pub fn search_loads(&self, query: &LoadQuery) -> Result<Vec<Load>> {
        self.catalog.search(query)
    }

    pub fn suggest_loads(&self, query: &LoadQuery) -> Result<Vec<Load>> {
        self.catalog.suggest(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample_catalog;
    use crate::negotiation::NegotiationStatus;
    use crate::outcome::{CallResult, MemorySink};

    fn service() -> (BrokerService, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let service =
            BrokerService::with_sink(sample_catalog(), NegotiationEngine::new(), sink.clone());
        (service, sink)
    }

    fn offer(load: &str, mc: &str, amount: impl Into<RawOffer>) -> NegotiateRequest {
        NegotiateRequest {
            load_id: LoadID(load.into()),
            mc_number: CarrierID(mc.into()),
            carrier_offer: amount.into(),
        }
    }

    fn tokened(token: &str) -> CallContext {
        CallContext::new(Some(token.to_string()), "127.0.0.1:50000")
    }

    #[test]
    fn test_unknown_load() {
        let (service, sink) = service();

        let result = service.negotiate_round(&tokened("c1"), &offer("L-9999", "MC1", 900.0));

        assert!(matches!(result, Err(BrokerError::LoadNotFound(_))));
        assert!(sink.rounds().is_empty());
        assert_eq!(service.engine().active_sessions(), 0);
    }

    #[test]
    fn test_reference_rate_from_catalog() {
        let (service, _) = service();

        // L-1002 is posted at 2150.40
        let decision = service
            .negotiate_round(&tokened("c1"), &offer("L-1002", "MC1", 3000.0))
            .unwrap();

        assert_eq!(decision.max_acceptable, 2257.92);
        assert_eq!(decision.broker_counter_offer, Some(2257.92));
        assert_eq!(decision.hard_cap, 2472.96);
    }

    #[test]
    fn test_counter_then_accept_reports_once() {
        let (service, sink) = service();
        let ctx = tokened("c1");

        let first = service
            .negotiate_round(&ctx, &offer("L-1001", "MC1", 1200.0))
            .unwrap();
        assert_eq!(first.status, NegotiationStatus::Ongoing);

        let second = service
            .negotiate_round(&ctx, &offer("L-1001", "MC1", 1050.0))
            .unwrap();
        assert_eq!(second.status, NegotiationStatus::Accepted);

        // Agent re-sends after close
        let third = service
            .negotiate_round(&ctx, &offer("L-1001", "MC1", 1050.0))
            .unwrap();
        assert_eq!(third.status, NegotiationStatus::Accepted);
        assert_eq!(third.round_number, 1);

        assert_eq!(sink.rounds().len(), 3);
        let outcomes = sink.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].outcome, CallResult::Accepted);
        assert_eq!(outcomes[0].agreed_rate, Some(1050.0));
    }

    #[test]
    fn test_failed_call_reported_unbooked() {
        let (service, sink) = service();
        let ctx = tokened("c1");

        for amount in [1300.0, 1300.0, 1400.0] {
            service
                .negotiate_round(&ctx, &offer("L-1001", "MC1", amount))
                .unwrap();
        }

        let outcomes = sink.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].outcome, CallResult::Unbooked);
        assert_eq!(outcomes[0].rounds, 3);
    }

    #[test]
    fn test_pending_offer_not_reported_as_outcome() {
        let (service, sink) = service();

        let decision = service
            .negotiate_round(&tokened("c1"), &offer("L-1001", "MC1", "uh, let me think"))
            .unwrap();

        assert_eq!(decision.status, NegotiationStatus::Pending);
        assert_eq!(sink.rounds().len(), 1);
        assert!(sink.rounds()[0].carrier_offer.is_none());
        assert!(sink.outcomes().is_empty());
    }

    #[test]
    fn test_calls_do_not_share_state() {
        let (service, _) = service();

        service
            .negotiate_round(&tokened("c1"), &offer("L-1001", "MC1", 1300.0))
            .unwrap();
        service
            .negotiate_round(&tokened("c1"), &offer("L-1001", "MC1", 1300.0))
            .unwrap();
        let other = service
            .negotiate_round(&tokened("c2"), &offer("L-1001", "MC1", 1300.0))
            .unwrap();

        assert_eq!(other.round_number, 1);
        assert_ne!(other.session_id, SessionID::from_call_context("c1"));
    }

    #[test]
    fn test_untokened_calls_keep_session_per_connection() {
        let (service, _) = service();
        let ctx = CallContext::new(None, "10.0.0.5:41000");

        let first = service
            .negotiate_round(&ctx, &offer("L-1001", "MC1", 1200.0))
            .unwrap();
        let second = service
            .negotiate_round(&ctx, &offer("L-1001", "MC1", 1150.0))
            .unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(second.round_number, 2);
        assert_eq!(service.calls().len(), 1);

        let elsewhere = service
            .negotiate_round(
                &CallContext::new(None, "10.0.0.6:41000"),
                &offer("L-1001", "MC1", 1200.0),
            )
            .unwrap();
        assert_ne!(elsewhere.session_id, first.session_id);
    }

    #[test]
    fn test_end_call_resets_session() {
        let (service, sink) = service();
        let ctx = tokened("c1");

        service
            .negotiate_round(&ctx, &offer("L-1001", "MC1", 990.0))
            .unwrap();

        let request = EndCallRequest {
            load_id: LoadID("L-1001".into()),
            mc_number: CarrierID("MC1".into()),
        };
        let reply = service.end_call(&ctx, &request);
        assert!(reply.reset);
        assert_eq!(service.engine().active_sessions(), 0);

        // Idempotent
        let again = service.end_call(&ctx, &request);
        assert!(!again.reset);

        // A recycled call token starts from scratch
        let fresh = service
            .negotiate_round(&ctx, &offer("L-1001", "MC1", 1200.0))
            .unwrap();
        assert_eq!(fresh.status, NegotiationStatus::Ongoing);
        assert_eq!(fresh.round_number, 1);
        assert_eq!(sink.outcomes().len(), 1);
    }

    #[test]
    fn test_end_call_untokened_drops_mapping() {
        let (service, _) = service();
        let ctx = CallContext::new(None, "10.0.0.5:41000");

        let first = service
            .negotiate_round(&ctx, &offer("L-1001", "MC1", 1200.0))
            .unwrap();
        service.end_call(
            &ctx,
            &EndCallRequest {
                load_id: LoadID("L-1001".into()),
                mc_number: CarrierID("MC1".into()),
            },
        );
        assert!(service.calls().is_empty());

        let next = service
            .negotiate_round(&ctx, &offer("L-1001", "MC1", 1200.0))
            .unwrap();
        assert_ne!(next.session_id, first.session_id);
    }

    #[test]
    fn test_end_call_without_mapping() {
        let (service, _) = service();
        let reply = service.end_call(
            &CallContext::new(None, "10.0.0.9:1"),
            &EndCallRequest {
                load_id: LoadID("L-1001".into()),
                mc_number: CarrierID("MC1".into()),
            },
        );
        assert!(reply.session_id.is_none());
        assert!(!reply.reset);
    }

    fn end_request(load: &str, mc: &str) -> EndCallRequest {
        EndCallRequest {
            load_id: LoadID(load.into()),
            mc_number: CarrierID(mc.into()),
        }
    }

    #[test]
    fn test_end_call_untokened_keeps_other_loads_reachable() {
        let (service, _) = service();
        let ctx = CallContext::new(None, "10.0.0.5:41000");

        let first = service
            .negotiate_round(&ctx, &offer("L-1001", "MC1", 1200.0))
            .unwrap();
        let second = service
            .negotiate_round(&ctx, &offer("L-1002", "MC1", 3000.0))
            .unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(service.engine().active_sessions(), 2);

        let reply = service.end_call(&ctx, &end_request("L-1001", "MC1"));
        assert!(reply.reset);
        // The call still has L-1002 open
        assert_eq!(service.calls().len(), 1);

        let resumed = service
            .negotiate_round(&ctx, &offer("L-1002", "MC1", 3000.0))
            .unwrap();
        assert_eq!(resumed.session_id, second.session_id);
        assert_eq!(resumed.round_number, 2);

        let reply = service.end_call(&ctx, &end_request("L-1002", "MC1"));
        assert_eq!(reply.session_id, Some(second.session_id));
        assert!(reply.reset);
        assert_eq!(service.engine().active_sessions(), 0);
        assert!(service.calls().is_empty());
    }

    #[test]
    fn test_release_connection_drops_untokened_calls() {
        let (service, sink) = service();
        let closing = CallContext::new(None, "10.0.0.5:41000");
        let staying = CallContext::new(None, "10.0.0.6:41000");

        service
            .negotiate_round(&closing, &offer("L-1001", "MC1", 950.0))
            .unwrap();
        service
            .negotiate_round(&closing, &offer("L-1002", "MC1", 3000.0))
            .unwrap();
        service
            .negotiate_round(&closing, &offer("L-1001", "MC2", 1200.0))
            .unwrap();
        service
            .negotiate_round(&staying, &offer("L-1001", "MC1", 1200.0))
            .unwrap();
        service
            .negotiate_round(&tokened("c1"), &offer("L-1001", "MC1", 1200.0))
            .unwrap();

        let released = service.release_connection("10.0.0.5:41000");

        assert_eq!(released, 3);
        assert_eq!(service.engine().active_sessions(), 2);
        assert_eq!(service.calls().len(), 1);
        assert_eq!(service.release_connection("10.0.0.5:41000"), 0);

        // A later call on a recycled address starts over and reports again
        let again = service
            .negotiate_round(&closing, &offer("L-1001", "MC1", 950.0))
            .unwrap();
        assert_eq!(again.round_number, 1);
        assert_eq!(sink.outcomes().len(), 2);
    }

    #[test]
    fn test_summary_attaches_to_latest_call() {
        let (service, sink) = service();

        let first = service
            .negotiate_round(&tokened("c1"), &offer("L-1001", "MC1", 990.0))
            .unwrap();
        let latest = service
            .negotiate_round(&tokened("c2"), &offer("L-1003", "MC1", 1800.0))
            .unwrap();
        service.end_call(&tokened("c2"), &end_request("L-1003", "MC1"));

        let reply = service.record_summary(&CallSummaryRequest {
            mc_number: Some(CarrierID("MC1".into())),
            load_id: Some(LoadID("L-1001".into())),
            agreed_rate: Some(990.0),
            transcript: Some(serde_json::json!([
                {"role": "event", "name": "sentiment_hr", "content": "positive_tag"}
            ])),
        });
        assert_eq!(reply.session_id, Some(first.session_id.clone()));
        assert_eq!(reply.sentiment, Some(Sentiment::Positive));

        // Unknown load falls back to the carrier's latest call, even after end_call
        let fallback = service.record_summary(&CallSummaryRequest {
            mc_number: Some(CarrierID("MC1".into())),
            load_id: Some(LoadID("L-4040".into())),
            ..Default::default()
        });
        assert_eq!(fallback.session_id, Some(latest.session_id));
        assert!(fallback.sentiment.is_none());

        let summaries = sink.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].agreed_rate, Some(990.0));
        // Summaries never touch negotiation state
        assert_eq!(service.engine().active_sessions(), 1);
    }

    #[test]
    fn test_summary_without_call() {
        let (service, sink) = service();

        let reply = service.record_summary(&CallSummaryRequest {
            mc_number: Some(CarrierID("MC404".into())),
            ..Default::default()
        });

        assert!(reply.session_id.is_none());
        assert!(sink.summaries().is_empty());
    }

    #[test]
    fn test_load_lookups() {
        let (service, _) = service();

        assert_eq!(service.load(&LoadID("L-1003".into())).unwrap().weight, 46000);
        assert!(service.load(&LoadID("nope".into())).is_err());

        let suggestions = service
            .suggest_loads(&LoadQuery {
                origin: Some("TX".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(suggestions.len(), 3);
    }
}
