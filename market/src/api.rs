//! Typed surface of the remote marketplace.
//!
//! The orchestrator only ever talks to [`MarketApi`]; the HTTP client in
//! [`crate::client`] is one implementation, and tests supply their own.

use async_trait::async_trait;

use crate::errors::MarketError;
use crate::types::{BidStatus, MarketBid, MarketJob, TrackedBid};

#[derive(Clone, Debug, Default)]
pub struct JobQuery {
    pub status: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub worker_agent_id: Option<String>,
    pub job_type: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct BidRequest {
    pub amount: f64,
    pub eta_seconds: u64,
    pub proposal: String,
}

#[derive(Clone, Debug)]
pub struct SubmissionRequest {
    pub deliverable: String,
    pub deliverable_hash: String,
}

#[async_trait]
pub trait MarketApi: Send + Sync {
    async fn list_jobs(&self, query: &JobQuery) -> Result<Vec<MarketJob>, MarketError>;

    async fn get_job(&self, job_id: &str) -> Result<MarketJob, MarketError>;

    async fn list_job_bids(
        &self,
        job_id: &str,
        page: &PageQuery,
    ) -> Result<Vec<MarketBid>, MarketError>;

    /// The worker's own bids, already projected to [`TrackedBid`]. Rows
    /// without a job id are dropped during normalization.
    async fn list_my_bids(
        &self,
        statuses: &[BidStatus],
        page: &PageQuery,
    ) -> Result<Vec<TrackedBid>, MarketError>;

    async fn place_bid(
        &self,
        job_id: &str,
        request: &BidRequest,
    ) -> Result<MarketBid, MarketError>;

    /// Submission for competition jobs.
    async fn submit_entry(
        &self,
        job_id: &str,
        request: &SubmissionRequest,
    ) -> Result<serde_json::Value, MarketError>;

    /// Submission for standard jobs.
    async fn submit_work(
        &self,
        job_id: &str,
        request: &SubmissionRequest,
    ) -> Result<serde_json::Value, MarketError>;

    async fn withdraw_bid(&self, bid_id: &str) -> Result<serde_json::Value, MarketError>;

    async fn request_changes(
        &self,
        job_id: &str,
        message: &str,
    ) -> Result<serde_json::Value, MarketError>;

    async fn list_completed_jobs_for_worker(
        &self,
        worker_agent_id: &str,
        limit: u32,
    ) -> Result<Vec<MarketJob>, MarketError>;
}
