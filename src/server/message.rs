//! Wire messages for the broker server

use crate::broker::{CallSummaryRequest, EndCallRequest, NegotiateRequest};
use crate::catalog::LoadQuery;
use crate::error::BrokerError;
use crate::types::LoadID;
use serde::{Deserialize, Serialize};

/// One client frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default)]
    pub api_key: String,
    /// Voice-platform call identifier; keeps one call's rounds together
    #[serde(default)]
    pub call_id: Option<String>,
    pub request: Request,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    NegotiateRound(NegotiateRequest),
    EndCall(EndCallRequest),
    CallSummary(CallSummaryRequest),
    GetLoad { load_id: LoadID },
    SearchLoads(LoadQuery),
    SuggestLoads(LoadQuery),
    Health,
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::NegotiateRound(_) => "negotiate_round",
            Request::EndCall(_) => "end_call",
            Request::CallSummary(_) => "call_summary",
            Request::GetLoad { .. } => "get_load",
            Request::SearchLoads(_) => "search_loads",
            Request::SuggestLoads(_) => "suggest_loads",
            Request::Health => "health",
        }
    }

    pub fn requires_auth(&self) -> bool {
        !matches!(self, Request::Health)
    }
}

/// One server frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Ok { body: serde_json::Value },
    Error { code: u16, detail: String },
}

impl Response {
    pub fn ok<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Response::Ok { body },
            Err(e) => Response::from(BrokerError::Json(e)),
        }
    }
}

impl From<BrokerError> for Response {
    fn from(err: BrokerError) -> Self {
        Response::Error {
            code: err.code(),
            detail: err.to_string(),
        }
    }
}
