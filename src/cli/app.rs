//! Load broker application wiring config, catalog, engine and server

use crate::broker::{BrokerService, EndCallRequest, NegotiateRequest};
use crate::catalog::{Load, LoadCatalog, LoadQuery};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::negotiation::{Decision, NegotiationEngine, NegotiationPolicy, RawOffer};
use crate::server::{BrokerClient, BrokerServer};
use crate::types::{CallID, CarrierID, LoadID, SessionKey};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use super::commands::RemoteArgs;

/// Main load broker application
pub struct BrokerApp {
    config: BrokerConfig,
    service: Arc<BrokerService>,
}

impl BrokerApp {
    /// Build the application from a validated config
    pub fn new(config: BrokerConfig) -> Result<Self> {
        let catalog = LoadCatalog::from_path(&config.catalog.loads_path)?;
        Ok(Self::with_catalog(config, catalog))
    }

    pub fn with_catalog(config: BrokerConfig, catalog: LoadCatalog) -> Self {
        let engine = NegotiationEngine::with_policy(config.negotiation.clone());
        let service = Arc::new(BrokerService::new(catalog, engine));
        Self { config, service }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn service(&self) -> Arc<BrokerService> {
        self.service.clone()
    }

    /// Bind the server; returns it so callers can read the bound address
    pub async fn bind(&self) -> Result<BrokerServer> {
        BrokerServer::bind(&self.config, self.service.clone()).await
    }

    /// Serve until Ctrl+C
    pub async fn serve(&self) -> Result<SocketAddr> {
        let server = self.bind().await?;
        let addr = server.local_addr()?;
        let handle = server.spawn();

        tracing::info!(
            "Broker ready on {} with {} loads. Press Ctrl+C to stop.",
            addr,
            self.service.catalog().len()
        );

        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");
        handle.abort();
        Ok(addr)
    }
}

/// Run offers through a fresh engine, one round each
pub fn simulate(policy: NegotiationPolicy, reference_rate: f64, offers: &[String]) -> Vec<Decision> {
    let engine = NegotiationEngine::with_policy(policy);
    let key = SessionKey::new("simulation", "MC-SIM", "LOAD-SIM");

    offers
        .iter()
        .map(|offer| engine.submit_offer(&key, reference_rate, &RawOffer::from(offer.as_str())))
        .collect()
}

/// One remote round plus the call ID to pass back on the next round
#[derive(Debug, Serialize)]
pub struct RemoteRound {
    pub call_id: String,
    pub decision: Decision,
}

/// Send one round, generating a call ID when none was given
pub async fn negotiate_remote(
    remote: &RemoteArgs,
    load_id: &str,
    mc_number: &str,
    offer: &str,
) -> Result<RemoteRound> {
    let call_id = remote
        .call_id
        .clone()
        .unwrap_or_else(|| CallID::generate().0);

    let mut client = BrokerClient::connect(&remote.addr, remote.api_key.clone())
        .await?
        .with_call_id(call_id.clone());
    let decision = client
        .negotiate_round(NegotiateRequest {
            load_id: LoadID(load_id.to_string()),
            mc_number: CarrierID(mc_number.to_string()),
            carrier_offer: RawOffer::from(offer),
        })
        .await?;

    Ok(RemoteRound { call_id, decision })
}

pub async fn end_call_remote(remote: &RemoteArgs, load_id: &str, mc_number: &str) -> Result<serde_json::Value> {
    // Each CLI invocation is a new connection, so only a call ID can find the call
    let call_id = remote.call_id.clone().ok_or_else(|| {
        BrokerError::InvalidRequest("end-call needs the --call-id printed by negotiate".to_string())
    })?;

    let mut client = BrokerClient::connect(&remote.addr, remote.api_key.clone())
        .await?
        .with_call_id(call_id);
    let reply = client
        .end_call(EndCallRequest {
            load_id: LoadID(load_id.to_string()),
            mc_number: CarrierID(mc_number.to_string()),
        })
        .await?;
    Ok(serde_json::to_value(reply)?)
}

pub fn get_load(file: &Path, load_id: &str) -> Result<Load> {
    let catalog = LoadCatalog::from_path(file)?;
    let load_id = LoadID(load_id.to_string());
    catalog
        .get(&load_id)
        .cloned()
        .ok_or(BrokerError::LoadNotFound(load_id.0))
}

pub fn search_loads(file: &Path, query: &LoadQuery) -> Result<Vec<Load>> {
    LoadCatalog::from_path(file)?.search(query)
}
