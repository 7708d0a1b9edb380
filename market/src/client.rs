//! HTTP implementation of [`MarketApi`].
//!
//! Transport faults and 5xx responses are retried with linear backoff
//! (`backoff_ms * attempt`); 4xx responses surface immediately. Each attempt
//! is bounded by the client-level timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::api::{BidRequest, JobQuery, MarketApi, PageQuery, SubmissionRequest};
use crate::errors::MarketError;
use crate::types::{BidStatus, MarketBid, MarketJob, TrackedBid};

pub const DEFAULT_AUTH_HEADER: &str = "authorization";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

const JOB_ROW_KEYS: &[&str] = &["jobs", "data", "items", "results"];
const BID_ROW_KEYS: &[&str] = &["bids", "data", "items", "results"];

#[derive(Clone, Debug)]
pub struct MarketConfig {
    pub base_url: String,
    pub api_key: String,
    pub auth_header: String,
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl MarketConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            auth_header: DEFAULT_AUTH_HEADER.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

#[derive(Clone)]
pub struct HttpMarketClient {
    http: Client,
    config: MarketConfig,
    bearer: String,
}

impl HttpMarketClient {
    pub fn new(config: MarketConfig) -> Result<Self, MarketError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(MarketError::Setup)?;

        let bearer = bearer_value(&config.api_key);
        Ok(Self {
            http,
            config,
            bearer,
        })
    }

    #[instrument(skip(self, body), fields(path = %path), level = "debug")]
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, MarketError> {
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.send_once(method.clone(), path, query, body).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retriable() && attempt < attempts => {
                    let backoff = Duration::from_millis(
                        self.config.retry_backoff_ms.saturating_mul(u64::from(attempt)),
                    );
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying marketplace call"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, MarketError> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let mut request = self
            .http
            .request(method, &url)
            .header(self.config.auth_header.as_str(), &self.bearer);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(MarketError::Transport)?;
        let status = response.status();

        if status.is_success() {
            let text = response.text().await.map_err(MarketError::Transport)?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&text).map_err(|err| MarketError::Decode(err.to_string()))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(MarketError::Api {
                status: status.as_u16(),
                body: snippet(&body),
            })
        }
    }
}

/// Values lacking a `Bearer ` prefix are prefixed.
fn bearer_value(api_key: &str) -> String {
    if api_key.starts_with("Bearer ") {
        api_key.to_string()
    } else {
        format!("Bearer {api_key}")
    }
}

fn snippet(body: &str) -> String {
    const MAX: usize = 512;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}

/// Pulls the row array out of a response that is either a bare array or an
/// envelope keyed by one of `keys`.
fn rows(body: Value, keys: &[&str]) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in keys {
                if let Some(Value::Array(items)) = map.remove(*key) {
                    return items;
                }
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

/// Parses each row, dropping malformed ones with a warning rather than
/// failing the whole page.
fn parse_rows<T: DeserializeOwned>(body: Value, keys: &[&str], what: &'static str) -> Vec<T> {
    rows(body, keys)
        .into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(what, error = %err, "dropping malformed marketplace row");
                None
            }
        })
        .collect()
}

/// Unwraps single-record envelopes like `{"job": {...}}`.
fn unwrap_envelope(body: Value, keys: &[&str]) -> Value {
    if let Value::Object(map) = &body {
        for key in keys {
            if let Some(inner) = map.get(*key) {
                if inner.is_object() {
                    return inner.clone();
                }
            }
        }
    }
    body
}

fn page_params(query: &mut Vec<(&'static str, String)>, page: &PageQuery) {
    if let Some(limit) = page.limit {
        query.push(("limit", limit.to_string()));
    }
    if let Some(offset) = page.offset {
        query.push(("offset", offset.to_string()));
    }
}

#[async_trait]
impl MarketApi for HttpMarketClient {
    async fn list_jobs(&self, query: &JobQuery) -> Result<Vec<MarketJob>, MarketError> {
        let mut params: Vec<(&'static str, String)> = Vec::new();
        if let Some(status) = &query.status {
            params.push(("status", status.clone()));
        }
        if let Some(sort) = &query.sort {
            params.push(("sort", sort.clone()));
        }
        if let Some(order) = &query.order {
            params.push(("order", order.clone()));
        }
        if let Some(worker) = &query.worker_agent_id {
            params.push(("worker_agent_id", worker.clone()));
        }
        if let Some(job_type) = &query.job_type {
            params.push(("job_type", job_type.clone()));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(offset) = query.offset {
            params.push(("offset", offset.to_string()));
        }

        let body = self.send(Method::GET, "/v1/jobs", &params, None).await?;
        let jobs = parse_rows(body, JOB_ROW_KEYS, "job");
        debug!(count = jobs.len(), "listed jobs");
        Ok(jobs)
    }

    async fn get_job(&self, job_id: &str) -> Result<MarketJob, MarketError> {
        let body = self
            .send(Method::GET, &format!("/v1/jobs/{job_id}"), &[], None)
            .await?;
        serde_json::from_value(unwrap_envelope(body, &["job", "data"]))
            .map_err(|err| MarketError::Decode(err.to_string()))
    }

    async fn list_job_bids(
        &self,
        job_id: &str,
        page: &PageQuery,
    ) -> Result<Vec<MarketBid>, MarketError> {
        let mut params = Vec::new();
        page_params(&mut params, page);

        let body = self
            .send(
                Method::GET,
                &format!("/v1/jobs/{job_id}/bids"),
                &params,
                None,
            )
            .await?;
        Ok(parse_rows(body, BID_ROW_KEYS, "bid"))
    }

    async fn list_my_bids(
        &self,
        statuses: &[BidStatus],
        page: &PageQuery,
    ) -> Result<Vec<TrackedBid>, MarketError> {
        let mut params = Vec::new();
        if !statuses.is_empty() {
            let joined = statuses
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(",");
            params.push(("statuses", joined));
        }
        page_params(&mut params, page);

        let body = self
            .send(Method::GET, "/v1/agents/me/bids", &params, None)
            .await?;
        let bids: Vec<MarketBid> = parse_rows(body, BID_ROW_KEYS, "own bid");
        Ok(bids.into_iter().filter_map(TrackedBid::from_market).collect())
    }

    async fn place_bid(
        &self,
        job_id: &str,
        request: &BidRequest,
    ) -> Result<MarketBid, MarketError> {
        let body = serde_json::json!({
            "amount": request.amount,
            "eta_seconds": request.eta_seconds,
            "proposal": request.proposal,
        });
        let response = self
            .send(
                Method::POST,
                &format!("/v1/jobs/{job_id}/bids"),
                &[],
                Some(&body),
            )
            .await?;
        serde_json::from_value(unwrap_envelope(response, &["bid", "data"]))
            .map_err(|err| MarketError::Decode(err.to_string()))
    }

    async fn submit_entry(
        &self,
        job_id: &str,
        request: &SubmissionRequest,
    ) -> Result<Value, MarketError> {
        let body = serde_json::json!({
            "deliverable": request.deliverable,
            "deliverable_hash": request.deliverable_hash,
        });
        self.send(
            Method::POST,
            &format!("/v1/jobs/{job_id}/entries"),
            &[],
            Some(&body),
        )
        .await
    }

    async fn submit_work(
        &self,
        job_id: &str,
        request: &SubmissionRequest,
    ) -> Result<Value, MarketError> {
        let body = serde_json::json!({
            "deliverable": request.deliverable,
            "deliverable_hash": request.deliverable_hash,
        });
        self.send(
            Method::POST,
            &format!("/v1/jobs/{job_id}/submit"),
            &[],
            Some(&body),
        )
        .await
    }

    async fn withdraw_bid(&self, bid_id: &str) -> Result<Value, MarketError> {
        self.send(
            Method::POST,
            &format!("/v1/bids/{bid_id}/withdraw"),
            &[],
            None,
        )
        .await
    }

    async fn request_changes(
        &self,
        job_id: &str,
        message: &str,
    ) -> Result<Value, MarketError> {
        let body = serde_json::json!({ "message": message });
        self.send(
            Method::POST,
            &format!("/v1/jobs/{job_id}/request-changes"),
            &[],
            Some(&body),
        )
        .await
    }

    async fn list_completed_jobs_for_worker(
        &self,
        worker_agent_id: &str,
        limit: u32,
    ) -> Result<Vec<MarketJob>, MarketError> {
        let query = JobQuery {
            status: Some("completed".to_string()),
            sort: Some("updated_at".to_string()),
            order: Some("desc".to_string()),
            worker_agent_id: Some(worker_agent_id.to_string()),
            limit: Some(limit),
            ..JobQuery::default()
        };
        self.list_jobs(&query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_prefix_is_added_when_missing() {
        assert_eq!(bearer_value("abc123"), "Bearer abc123");
        assert_eq!(bearer_value("Bearer abc123"), "Bearer abc123");
    }

    #[test]
    fn rows_handles_bare_arrays_and_envelopes() {
        let bare = serde_json::json!([{"id": "job-1"}]);
        assert_eq!(rows(bare, JOB_ROW_KEYS).len(), 1);

        let keyed = serde_json::json!({"jobs": [{"id": "job-1"}, {"id": "job-2"}]});
        assert_eq!(rows(keyed, JOB_ROW_KEYS).len(), 2);

        let empty = serde_json::json!({"total": 0});
        assert!(rows(empty, JOB_ROW_KEYS).is_empty());
    }

    #[test]
    fn malformed_rows_are_dropped_not_fatal() {
        let body = serde_json::json!([
            {"id": "job-1", "budget_token": "NEAR"},
            {"title": "row without any id"},
        ]);
        let jobs: Vec<MarketJob> = parse_rows(body, JOB_ROW_KEYS, "job");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id, "job-1");
    }

    #[test]
    fn envelope_unwrap_prefers_keyed_object() {
        let body = serde_json::json!({"job": {"id": "job-9"}});
        let job: MarketJob =
            serde_json::from_value(unwrap_envelope(body, &["job", "data"])).unwrap();
        assert_eq!(job.job_id, "job-9");

        let bare = serde_json::json!({"id": "job-3"});
        let job: MarketJob =
            serde_json::from_value(unwrap_envelope(bare, &["job", "data"])).unwrap();
        assert_eq!(job.job_id, "job-3");
    }
}
