//! HubSpot API connector implementation
//!
//! Implements the `RecordSource` trait for the HubSpot CRM v3 API.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::origin::{
    IdPage, ObjectSpec, Record, RecordPage, RecordSource, SearchPage, TimeRange,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use crate::error::HubSpotError;
use crate::types::{
    BatchCreateRequest, BatchReadRequest, BatchResponse, Filter, FilterGroup, IdInput,
    ListResponse, PropertiesInput, SearchRequest, SearchResponse,
};

/// HubSpot API base URL
const API_BASE: &str = "https://api.hubapi.com";

/// Page size for cursor-paginated endpoints
pub const PAGE_LIMIT: u32 = 100;

/// Maximum inputs accepted by the batch read/create endpoints
pub const BATCH_LIMIT: usize = 100;

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HubSpot CRM connector
///
/// Implements `RecordSource` with rate-limit aware retries:
///
/// - 429 sleeps for the `Retry-After` hint (falling back to the backoff
///   schedule) and retries while attempts remain
/// - 5xx and transport errors retry with exponential backoff
/// - any other 4xx fails immediately, surfacing the response body
///
/// The connector is called synchronously by everything above it; it has no
/// concurrency of its own.
pub struct HubSpotConnector {
    /// HTTP client for API requests
    http: Arc<dyn HttpClient>,

    /// API base URL (overridable for tests)
    base_url: String,

    /// Private-app bearer token
    access_token: String,

    /// Retry schedule for transient failures
    retry: RetryPolicy,
}

impl HubSpotConnector {
    /// Create a new connector with the default API base and retry policy
    pub fn new(http: Arc<dyn HttpClient>, access_token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: API_BASE.to_string(),
            access_token: access_token.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Point the connector at a different base URL (mock servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn objects_url(&self, spec: &ObjectSpec) -> String {
        format!("{}/crm/v3/objects/{}", self.base_url, spec.object_type)
    }

    fn get(&self, url: String) -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, url)
            .bearer_token(&self.access_token)
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT)
    }

    fn post<T: Serialize>(&self, url: String, body: &T) -> crate::error::Result<HttpRequest> {
        HttpRequest::new(HttpMethod::Post, url)
            .bearer_token(&self.access_token)
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .map_err(|e| HubSpotError::Parse(e.to_string()))
    }

    /// Execute a request under the retry policy.
    ///
    /// Returns the response only for 2xx statuses; every other outcome is
    /// classified per the error taxonomy.
    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn send_with_retry(&self, request: HttpRequest) -> crate::error::Result<HttpResponse> {
        let mut last_error: Option<HubSpotError> = None;

        for attempt in 0..self.retry.max_attempts {
            match self.http.execute(request.clone()).await {
                Ok(response) if response.is_success() => {
                    debug!(status = response.status, "origin request succeeded");
                    return Ok(response);
                }
                Ok(response) if response.status == 429 => {
                    let hinted = response
                        .header("Retry-After")
                        .and_then(|v| v.trim().parse::<u64>().ok());
                    let delay = hinted
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| self.retry.delay_for(attempt));
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, waiting before retry"
                    );
                    last_error = Some(HubSpotError::RateLimited {
                        retry_after: hinted,
                    });
                    if attempt + 1 < self.retry.max_attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
                Ok(response) if response.is_server_error() => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        status = response.status,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "origin server error, backing off"
                    );
                    last_error = Some(HubSpotError::Server {
                        status: response.status,
                    });
                    if attempt + 1 < self.retry.max_attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
                Ok(response) => {
                    // Malformed request: not transient, body kept for diagnosis
                    let body = response.text();
                    error!(status = response.status, body = %body, "origin rejected request");
                    return Err(HubSpotError::BadRequest {
                        status: response.status,
                        body,
                    });
                }
                Err(e) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transport error, backing off"
                    );
                    last_error = Some(HubSpotError::Transport(e.to_string()));
                    if attempt + 1 < self.retry.max_attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(HubSpotError::RetriesExhausted {
            attempts: self.retry.max_attempts,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt recorded".to_string()),
        })
    }

    fn parse<T: serde::de::DeserializeOwned>(
        response: &HttpResponse,
        context: &str,
    ) -> crate::error::Result<T> {
        serde_json::from_slice(&response.body)
            .map_err(|e| HubSpotError::Parse(format!("{}: {}", context, e)))
    }
}

#[async_trait]
impl RecordSource for HubSpotConnector {
    async fn list_page(&self, spec: &ObjectSpec, after: Option<&str>) -> Result<RecordPage> {
        let mut url = format!(
            "{}?limit={}&properties={}",
            self.objects_url(spec),
            PAGE_LIMIT,
            urlencoding::encode(&spec.fetch_properties().join(","))
        );
        if let Some(after) = after {
            url.push_str(&format!("&after={}", urlencoding::encode(after)));
        }

        let response = self
            .send_with_retry(self.get(url))
            .await
            .map_err(BridgeError::from)?;
        let list: ListResponse =
            Self::parse(&response, "list response").map_err(BridgeError::from)?;

        let next_after = list.next_after();
        let records: Vec<Record> = list.results.into_iter().map(Record::from).collect();

        Ok(RecordPage {
            records,
            next_after,
        })
    }

    async fn list_ids_page(&self, spec: &ObjectSpec, after: Option<&str>) -> Result<IdPage> {
        // Id-only projection keeps the reconciliation sweep cheap
        let mut url = format!("{}?limit={}&properties=id", self.objects_url(spec), PAGE_LIMIT);
        if let Some(after) = after {
            url.push_str(&format!("&after={}", urlencoding::encode(after)));
        }

        let response = self
            .send_with_retry(self.get(url))
            .await
            .map_err(BridgeError::from)?;
        let list: ListResponse =
            Self::parse(&response, "id list response").map_err(BridgeError::from)?;

        let next_after = list.next_after();
        let ids: Vec<String> = list.results.into_iter().map(|e| e.id).collect();

        Ok(IdPage { ids, next_after })
    }

    async fn search_modified(
        &self,
        spec: &ObjectSpec,
        range: &TimeRange,
        after: Option<&str>,
    ) -> Result<SearchPage> {
        // Date filters take unix-millis strings; [start, end) maps to GTE/LT
        let body = SearchRequest {
            filter_groups: vec![FilterGroup {
                filters: vec![
                    Filter {
                        property_name: spec.modified_property.clone(),
                        operator: "GTE".to_string(),
                        value: range.start.timestamp_millis().to_string(),
                    },
                    Filter {
                        property_name: spec.modified_property.clone(),
                        operator: "LT".to_string(),
                        value: range.end.timestamp_millis().to_string(),
                    },
                ],
            }],
            properties: spec.fetch_properties(),
            limit: PAGE_LIMIT,
            after: after.map(|a| a.to_string()),
        };

        let url = format!("{}/search", self.objects_url(spec));
        let request = self.post(url, &body).map_err(BridgeError::from)?;
        let response = self
            .send_with_retry(request)
            .await
            .map_err(BridgeError::from)?;
        let search: SearchResponse =
            Self::parse(&response, "search response").map_err(BridgeError::from)?;

        let next_after = search.next_after();
        let total = search.total;
        let records: Vec<Record> = search.results.into_iter().map(Record::from).collect();

        Ok(SearchPage {
            records,
            next_after,
            total,
        })
    }

    async fn read_batch(&self, spec: &ObjectSpec, ids: &[String]) -> Result<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids.len() > BATCH_LIMIT {
            return Err(HubSpotError::BatchTooLarge {
                given: ids.len(),
                limit: BATCH_LIMIT,
            }
            .into());
        }

        let body = BatchReadRequest {
            inputs: ids.iter().map(|id| IdInput { id: id.clone() }).collect(),
            properties: spec.fetch_properties(),
        };

        let url = format!("{}/batch/read", self.objects_url(spec));
        let request = self.post(url, &body).map_err(BridgeError::from)?;
        let response = self
            .send_with_retry(request)
            .await
            .map_err(BridgeError::from)?;
        let batch: BatchResponse =
            Self::parse(&response, "batch read response").map_err(BridgeError::from)?;

        Ok(batch.results.into_iter().map(Record::from).collect())
    }

    async fn create_batch(
        &self,
        spec: &ObjectSpec,
        inputs: &[HashMap<String, String>],
    ) -> Result<Vec<Record>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        if inputs.len() > BATCH_LIMIT {
            return Err(HubSpotError::BatchTooLarge {
                given: inputs.len(),
                limit: BATCH_LIMIT,
            }
            .into());
        }

        let body = BatchCreateRequest {
            inputs: inputs
                .iter()
                .map(|properties| PropertiesInput {
                    properties: properties.clone(),
                })
                .collect(),
        };

        let url = format!("{}/batch/create", self.objects_url(spec));
        let request = self.post(url, &body).map_err(BridgeError::from)?;
        let response = self
            .send_with_retry(request)
            .await
            .map_err(BridgeError::from)?;
        let batch: BatchResponse =
            Self::parse(&response, "batch create response").map_err(BridgeError::from)?;

        Ok(batch.results.into_iter().map(Record::from).collect())
    }
}
