//! Per-job bid decisions.
//!
//! Skip checks run in a fixed precedence order so that the reported reason
//! is stable for a given job, which keeps two ticks over identical market
//! state byte-identical.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use market::types::{JobType, MarketBid, MarketJob};

use crate::policy::Policy;

/// Smallest NEAR increment the marketplace distinguishes between bids.
pub const MIN_UNDERCUT_STEP: f64 = 0.0001;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidAction {
    Skip,
    Bid,
    Entry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    BudgetUnknownOrNonNear,
    BudgetOutsidePolicy,
    MarketTooCompetitive,
    InvalidBidAfterBounds,
    BelowMarginFloor,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidDecision {
    pub job_id: String,
    pub action: BidAction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_amount_near: Option<f64>,

    pub confidence: f64,
}

impl BidDecision {
    fn skip(job_id: &str, reason: SkipReason) -> Self {
        Self {
            job_id: job_id.to_string(),
            action: BidAction::Skip,
            reason: Some(reason),
            bid_amount_near: None,
            confidence: 0.0,
        }
    }

    pub fn is_skip(&self) -> bool {
        self.action == BidAction::Skip
    }
}

/// Decides whether and how to bid on a single job.
pub fn decide_bid_for_job(job: &MarketJob, bids: &[MarketBid], policy: &Policy) -> BidDecision {
    let Some(budget) = job.near_budget() else {
        return BidDecision::skip(&job.job_id, SkipReason::BudgetUnknownOrNonNear);
    };

    if budget < policy.min_budget_near || budget > policy.max_budget_near {
        return BidDecision::skip(&job.job_id, SkipReason::BudgetOutsidePolicy);
    }

    if bids.len() > policy.max_existing_bids {
        return BidDecision::skip(&job.job_id, SkipReason::MarketTooCompetitive);
    }

    let amount = compute_bid_amount(budget, bids, policy);
    if !amount.is_finite() || amount <= 0.0 {
        return BidDecision::skip(&job.job_id, SkipReason::InvalidBidAfterBounds);
    }

    if budget - amount < policy.min_margin_near {
        return BidDecision::skip(&job.job_id, SkipReason::BelowMarginFloor);
    }

    let action = match job.job_type {
        Some(JobType::Competition) => BidAction::Entry,
        _ => BidAction::Bid,
    };

    let decision = BidDecision {
        job_id: job.job_id.clone(),
        action,
        reason: None,
        bid_amount_near: Some(amount),
        confidence: confidence_for(budget, bids.len(), policy),
    };

    debug!(
        job_id = %decision.job_id,
        amount,
        confidence = decision.confidence,
        existing_bids = bids.len(),
        "bid decision"
    );

    decision
}

/// Discounted base, minimum-step undercut against the lowest live bid, then
/// clamped to the policy band and the budget ceiling.
fn compute_bid_amount(budget: f64, bids: &[MarketBid], policy: &Policy) -> f64 {
    let base = budget * (f64::from(policy.bid_discount_bps) / 10_000.0);

    let lowest_live = bids
        .iter()
        .filter(|bid| bid.status.map(|s| s.is_live()).unwrap_or(true))
        .filter_map(|bid| bid.amount)
        .filter(|amount| amount.is_finite() && *amount > 0.0)
        .fold(None::<f64>, |lowest, amount| {
            Some(lowest.map_or(amount, |l| l.min(amount)))
        });

    let candidate = match lowest_live {
        Some(lowest) => lowest - MIN_UNDERCUT_STEP,
        None => base,
    };

    let upper_bound = policy.max_bid_near.min((budget - MIN_UNDERCUT_STEP).max(0.0));
    round4(upper_bound.min(candidate.max(policy.min_bid_near)))
}

/// Larger budgets raise confidence, a crowded bid list lowers it; the crowd
/// penalty saturates at 40%.
fn confidence_for(budget: f64, existing_bids: usize, policy: &Policy) -> f64 {
    let reach = (budget / policy.max_budget_near).min(1.0);
    let crowd = 1.0 - (0.03 * existing_bids as f64).min(0.4);
    round3((reach * crowd).clamp(0.0, 1.0))
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn round3(value: f64) -> f64 {
    (value * 1_000.0).round() / 1_000.0
}

/// Decides every job and orders the result: actionable decisions first,
/// highest confidence leading; skips keep their (job-id) order at the tail.
///
/// Jobs are pre-sorted by id so the output is independent of the order the
/// marketplace returned them in.
pub fn rank_jobs_for_bidding(
    jobs: &[MarketJob],
    bids_by_job: &BTreeMap<String, Vec<MarketBid>>,
    policy: &Policy,
) -> Vec<BidDecision> {
    let mut ordered: Vec<&MarketJob> = jobs.iter().collect();
    ordered.sort_by(|a, b| a.job_id.cmp(&b.job_id));

    let mut decisions: Vec<BidDecision> = ordered
        .into_iter()
        .map(|job| {
            let bids = bids_by_job
                .get(&job.job_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            decide_bid_for_job(job, bids, policy)
        })
        .collect();

    decisions.sort_by(|a, b| {
        a.is_skip()
            .cmp(&b.is_skip())
            .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal))
    });

    decisions
}
