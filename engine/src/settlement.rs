//! Settlement reconciliation.
//!
//! Sweeps completed jobs into payout records. The payout amount resolves by
//! strict precedence: the awarded bid, then our own bid, then the job's
//! NEAR budget. The awarded bid wins even when it belongs to a different
//! agent; the marketplace's award is the source of truth.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use market::types::{JobStatus, MarketBid, MarketJob};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    pub settlement_id: String,
    pub job_id: String,
    pub job_title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_id: Option<String>,

    pub amount_near: f64,
    pub amount_usd: f64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReport {
    pub records: Vec<SettlementRecord>,
    pub total_near: f64,
    pub total_usd: f64,
    pub scanned_jobs: usize,

    /// Latest `updated_at` across settled jobs; feeds the settlement
    /// cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_completed_at: Option<DateTime<Utc>>,
}

impl SettlementReport {
    pub fn empty(scanned_jobs: usize) -> Self {
        Self {
            scanned_jobs,
            ..Self::default()
        }
    }
}

pub fn build_settlement_report(
    jobs: &[MarketJob],
    bids_by_job: &BTreeMap<String, Vec<MarketBid>>,
    agent_id: &str,
    near_price_usd: f64,
) -> SettlementReport {
    let mut report = SettlementReport::empty(jobs.len());

    for job in jobs {
        if job.status != Some(JobStatus::Completed) {
            continue;
        }

        let bids = bids_by_job
            .get(&job.job_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let Some((amount_near, bid_id)) = resolve_amount(job, bids, agent_id) else {
            debug!(job_id = %job.job_id, "completed job has no resolvable payout; skipped");
            continue;
        };

        let completed_at = job.updated_at.unwrap_or(DateTime::UNIX_EPOCH);
        let settlement_id = format!(
            "{}:{}",
            job.job_id,
            bid_id.as_deref().unwrap_or("unknown")
        );

        report.total_near += amount_near;
        report.total_usd += amount_near * near_price_usd;
        report.latest_completed_at = match report.latest_completed_at {
            Some(latest) if latest >= completed_at => Some(latest),
            _ => Some(completed_at),
        };
        report.records.push(SettlementRecord {
            settlement_id,
            job_id: job.job_id.clone(),
            job_title: job.title.clone(),
            bid_id,
            amount_near,
            amount_usd: amount_near * near_price_usd,
            completed_at,
        });
    }

    report
}

/// First-match precedence for the payout amount.
fn resolve_amount(
    job: &MarketJob,
    bids: &[MarketBid],
    agent_id: &str,
) -> Option<(f64, Option<String>)> {
    if let Some(awarded_id) = &job.awarded_bid_id {
        if let Some(awarded) = bids.iter().find(|bid| &bid.bid_id == awarded_id) {
            if let Some(amount) = positive(awarded.amount) {
                return Some((amount, Some(awarded.bid_id.clone())));
            }
        }
    }

    if let Some(own) = bids.iter().find(|bid| {
        bid.bidder_agent_id.as_deref() == Some(agent_id) && positive(bid.amount).is_some()
    }) {
        if let Some(amount) = positive(own.amount) {
            return Some((amount, Some(own.bid_id.clone())));
        }
    }

    job.near_budget()
        .and_then(|budget| positive(Some(budget)))
        .map(|budget| (budget, None))
}

fn positive(amount: Option<f64>) -> Option<f64> {
    amount.filter(|a| a.is_finite() && *a > 0.0)
}
