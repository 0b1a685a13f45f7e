//! Load catalog: static lookups over the posted-loads dataset

use crate::error::{BrokerError, Result};
use crate::types::LoadID;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Number of loads returned by `suggest` when the caller gives no limit
pub const DEFAULT_SUGGESTION_LIMIT: usize = 3;

/// A posted load
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Load {
    pub load_id: LoadID,
    pub origin: String,
    pub destination: String,
    pub pickup_datetime: NaiveDateTime,
    #[serde(default)]
    pub delivery_datetime: Option<NaiveDateTime>,
    pub equipment_type: String,
    /// Posted rate; the reference rate for negotiation
    pub loadboard_rate: f64,
    pub weight: u64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub commodity_type: Option<String>,
    #[serde(default)]
    pub num_of_pieces: Option<u32>,
    #[serde(default)]
    pub miles: Option<f64>,
    #[serde(default)]
    pub dimensions: Option<String>,
}

/// Search filters. Every field is optional; unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadQuery {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub equipment_type: Option<String>,
    pub pickup_date_before: Option<String>,
    pub pickup_date_after: Option<String>,
    pub max_weight: Option<u64>,
    pub limit: Option<usize>,
}

/// In-memory catalog of posted loads
#[derive(Clone, Debug, Default)]
pub struct LoadCatalog {
    loads: Vec<Load>,
}

impl LoadCatalog {
    pub fn new(loads: Vec<Load>) -> Self {
        Self { loads }
    }

    /// Read a JSON array of loads from disk
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BrokerError::Catalog(format!("cannot read {}: {}", path.display(), e))
        })?;
        let catalog = Self::from_json_str(&raw)?;
        tracing::info!("Loaded {} loads from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let loads: Vec<Load> =
            serde_json::from_str(raw).map_err(|e| BrokerError::Catalog(e.to_string()))?;
        Ok(Self::new(loads))
    }

    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    pub fn get(&self, load_id: &LoadID) -> Option<&Load> {
        self.loads.iter().find(|load| &load.load_id == load_id)
    }

    /// Loads matching the query in catalog order, at most `limit` of them
    pub fn search(&self, query: &LoadQuery) -> Result<Vec<Load>> {
        let before = query
            .pickup_date_before
            .as_deref()
            .map(parse_cutoff)
            .transpose()?;
        let after = query
            .pickup_date_after
            .as_deref()
            .map(parse_cutoff)
            .transpose()?;

        let mut matches: Vec<Load> = self
            .loads
            .iter()
            .filter(|load| before.map_or(true, |cutoff| load.pickup_datetime <= cutoff))
            .filter(|load| after.map_or(true, |cutoff| load.pickup_datetime >= cutoff))
            .filter(|load| contains_ignore_case(&load.origin, query.origin.as_deref()))
            .filter(|load| contains_ignore_case(&load.destination, query.destination.as_deref()))
            .filter(|load| {
                query
                    .equipment_type
                    .as_deref()
                    .map_or(true, |wanted| load.equipment_type.eq_ignore_ascii_case(wanted))
            })
            .filter(|load| query.max_weight.map_or(true, |max| load.weight <= max))
            .cloned()
            .collect();

        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    /// Top matches for a carrier's stated preferences; `search` with a default limit
    pub fn suggest(&self, query: &LoadQuery) -> Result<Vec<Load>> {
        let query = LoadQuery {
            limit: Some(query.limit.unwrap_or(DEFAULT_SUGGESTION_LIMIT)),
            ..query.clone()
        };
        self.search(&query)
    }
}

fn contains_ignore_case(haystack: &str, needle: Option<&str>) -> bool {
    match needle {
        Some(needle) if !needle.is_empty() => {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        }
        _ => true,
    }
}

/// Accept a full ISO datetime or a bare `YYYY-MM-DD` (midnight)
fn parse_cutoff(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(datetime) = raw.parse::<NaiveDateTime>() {
        return Ok(datetime);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| BrokerError::InvalidRequest(format!("invalid pickup date: {}", raw)))
}
