//! Pure tick projection.
//!
//! Runs the bidding, withdrawal-planning, and submission-gating pipeline
//! over a snapshot with no I/O, and stamps the output with a digest of its
//! canonical encoding. Identical input yields byte-identical output on any
//! machine, which makes snapshots diffable across versions and hosts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use common::clock::parse_canonical;
use market::types::{MarketBid, MarketJob, TrackedBid};

use crate::bidding::{BidDecision, rank_jobs_for_bidding};
use crate::canonical::canonical_digest;
use crate::lifecycle::{
    ExecutionAction, ExecutionDecision, SubmitAttemptState, next_submission_attempt,
    plan_stale_bid_withdrawals,
};
use crate::policy::{Policy, PolicyError, PolicyOverrides};

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("nowIso is not a valid instant: {0}")]
    BadTimestamp(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("could not encode simulation output: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationInput {
    pub now_iso: String,

    #[serde(default)]
    pub jobs: Vec<MarketJob>,

    #[serde(default)]
    pub bids_by_job_id: BTreeMap<String, Vec<MarketBid>>,

    #[serde(default)]
    pub tracked_bids: Vec<TrackedBid>,

    /// Keyed `<jobId>:<bidId>`, mirroring the persisted attempt states.
    #[serde(default)]
    pub submit_state_by_key: BTreeMap<String, SubmitAttemptState>,

    /// First-observation markers keyed by job id. Absent markers mean every
    /// pending bid is treated as newly observed, so nothing withdraws.
    #[serde(default)]
    pub marker_by_job_id: BTreeMap<String, String>,

    #[serde(default)]
    pub policy: Option<PolicyOverrides>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationOutput {
    pub bid_decisions: Vec<BidDecision>,
    pub withdraw_bid_ids: Vec<String>,
    pub submit_decisions: Vec<ExecutionDecision>,
    pub deterministic_digest: String,
}

/// The digest covers exactly these three projections; ids are sorted so the
/// digest is independent of planner iteration order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DigestView<'a> {
    bid_decisions: &'a [BidDecision],
    withdraw_bid_ids: &'a [String],
    submit_decisions: &'a [ExecutionDecision],
}

pub fn simulate_tick(input: &SimulationInput) -> Result<SimulationOutput, SimulationError> {
    let now = parse_canonical(&input.now_iso)
        .ok_or_else(|| SimulationError::BadTimestamp(input.now_iso.clone()))?;

    let policy = match &input.policy {
        Some(overrides) => Policy::resolve(overrides)?,
        None => Policy::resolve(&PolicyOverrides::default())?,
    };

    let bid_decisions = rank_jobs_for_bidding(&input.jobs, &input.bids_by_job_id, &policy);

    let plan =
        plan_stale_bid_withdrawals(&input.tracked_bids, now, &input.marker_by_job_id, &policy);
    let mut withdraw_bid_ids: Vec<String> =
        plan.to_withdraw.into_iter().map(|bid| bid.bid_id).collect();
    withdraw_bid_ids.sort();

    let submit_decisions: Vec<ExecutionDecision> = input
        .tracked_bids
        .iter()
        .filter(|bid| bid.status.is_submittable())
        .map(|bid| {
            let key = format!("{}:{}", bid.job_id, bid.bid_id);
            let gate =
                next_submission_attempt(bid, now, &policy, input.submit_state_by_key.get(&key));

            let assignment_id = input
                .jobs
                .iter()
                .find(|job| job.job_id == bid.job_id)
                .and_then(|job| job.my_assignments.first())
                .map(|assignment| assignment.assignment_id.clone());

            ExecutionDecision {
                job_id: bid.job_id.clone(),
                bid_id: bid.bid_id.clone(),
                assignment_id,
                action: if gate.should_attempt {
                    ExecutionAction::Submit
                } else {
                    ExecutionAction::Skip
                },
                reason: gate.reason.map(|r| r.as_str().to_string()),
                next_attempt_at: gate.next_state.next_attempt_at,
            }
        })
        .collect();

    let deterministic_digest = canonical_digest(&DigestView {
        bid_decisions: &bid_decisions,
        withdraw_bid_ids: &withdraw_bid_ids,
        submit_decisions: &submit_decisions,
    })?;

    Ok(SimulationOutput {
        bid_decisions,
        withdraw_bid_ids,
        submit_decisions,
        deterministic_digest,
    })
}
