//! HubSpot CRM v3 API request/response types
//!
//! Data structures for the object list, filtered search, and batch
//! endpoints.

use bridge_traits::origin::{parse_origin_timestamp, Record};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Object envelope returned by every read endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEnvelope {
    /// Origin-assigned object id
    pub id: String,

    /// Requested properties; the origin sends explicit nulls for missing
    /// values
    #[serde(default)]
    pub properties: HashMap<String, Option<String>>,

    /// Envelope creation time (RFC 3339)
    #[serde(default)]
    pub created_at: Option<String>,

    /// Envelope modification time (RFC 3339)
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl From<ObjectEnvelope> for Record {
    fn from(envelope: ObjectEnvelope) -> Self {
        Record {
            id: envelope.id,
            properties: envelope.properties,
            created_at: envelope.created_at.as_deref().and_then(parse_origin_timestamp),
            updated_at: envelope.updated_at.as_deref().and_then(parse_origin_timestamp),
        }
    }
}

/// Cursor paging block
#[derive(Debug, Clone, Deserialize)]
pub struct Paging {
    pub next: Option<PagingNext>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PagingNext {
    pub after: String,
}

/// `GET /crm/v3/objects/{type}` response
#[derive(Debug, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub results: Vec<ObjectEnvelope>,
    pub paging: Option<Paging>,
}

impl ListResponse {
    pub fn next_after(&self) -> Option<String> {
        self.paging
            .as_ref()
            .and_then(|p| p.next.as_ref())
            .map(|n| n.after.clone())
    }
}

/// `POST /crm/v3/objects/{type}/search` response
///
/// `total` is the match count for the whole filter, which the origin caps;
/// the windowed fetcher compares it against the cap before paging.
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub results: Vec<ObjectEnvelope>,
    pub paging: Option<Paging>,
}

impl SearchResponse {
    pub fn next_after(&self) -> Option<String> {
        self.paging
            .as_ref()
            .and_then(|p| p.next.as_ref())
            .map(|n| n.after.clone())
    }
}

/// Batch read/create response
#[derive(Debug, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub results: Vec<ObjectEnvelope>,
}

/// `POST /crm/v3/objects/{type}/search` request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub filter_groups: Vec<FilterGroup>,
    pub properties: Vec<String>,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterGroup {
    pub filters: Vec<Filter>,
}

/// One property filter; values for date properties are unix-millis strings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub property_name: String,
    pub operator: String,
    pub value: String,
}

/// Batch read request body (≤100 inputs)
#[derive(Debug, Clone, Serialize)]
pub struct BatchReadRequest {
    pub inputs: Vec<IdInput>,
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdInput {
    pub id: String,
}

/// Batch create request body (≤100 inputs)
#[derive(Debug, Clone, Serialize)]
pub struct BatchCreateRequest {
    pub inputs: Vec<PropertiesInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertiesInput {
    pub properties: HashMap<String, String>,
}
