//! Bid and submission lifecycle.
//!
//! Two pure pieces: the stale-bid withdrawal planner and the submission
//! retry state machine. Neither touches I/O; the orchestrator persists
//! whatever state they hand back, which keeps every transition
//! property-testable.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use common::clock::parse_canonical;
use market::types::{BidStatus, TrackedBid};

use crate::policy::Policy;

/// Persisted per-`(job, bid)` submission retry state.
///
/// Invariants: `submitted_at` set means terminal; `attempts` never exceeds
/// the retry limit; `escalations` never exceeds the escalation limit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAttemptState {
    pub attempts: u32,
    pub first_seen_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,

    pub escalations: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl SubmitAttemptState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            attempts: 0,
            first_seen_at: now,
            next_attempt_at: None,
            escalations: 0,
            submitted_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.submitted_at.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    AlreadySubmitted,
    RetryLimitReached,
    BackoffPending,
}

impl HoldReason {
    pub fn as_str(self) -> &'static str {
        match self {
            HoldReason::AlreadySubmitted => "already_submitted",
            HoldReason::RetryLimitReached => "retry_limit_reached",
            HoldReason::BackoffPending => "backoff_pending",
        }
    }
}

/// Outcome of gating one bid through the retry machine.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionGate {
    pub should_attempt: bool,
    pub next_state: SubmitAttemptState,
    pub reason: Option<HoldReason>,
}

/// Per-bid execution decision, as recorded in tick results and simulator
/// output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDecision {
    pub job_id: String,
    pub bid_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<String>,

    pub action: ExecutionAction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionAction {
    Skip,
    Submit,
}

/// Plan produced by [`plan_stale_bid_withdrawals`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StalePlan {
    pub to_withdraw: Vec<TrackedBid>,
    /// Job ids whose first-seen marker should be (re)written at `now`.
    pub marker_updates: BTreeMap<String, DateTime<Utc>>,
}

/// Plans which pending bids to withdraw.
///
/// A bid is only withdrawn after it has been observed pending for the full
/// stale window across ticks: a missing or malformed marker schedules
/// first-seen bookkeeping, never a same-tick withdrawal.
pub fn plan_stale_bid_withdrawals(
    tracked: &[TrackedBid],
    now: DateTime<Utc>,
    marker_by_job: &BTreeMap<String, String>,
    policy: &Policy,
) -> StalePlan {
    let cutoff = now - Duration::minutes(policy.stale_pending_bid_minutes);
    let mut plan = StalePlan::default();

    for bid in tracked {
        if bid.status != BidStatus::Pending {
            continue;
        }

        match marker_by_job.get(&bid.job_id).and_then(|raw| parse_canonical(raw)) {
            None => {
                plan.marker_updates.insert(bid.job_id.clone(), now);
            }
            Some(first_seen) if first_seen <= cutoff => {
                debug!(
                    bid_id = %bid.bid_id,
                    job_id = %bid.job_id,
                    first_seen = %first_seen,
                    "pending bid is stale"
                );
                plan.to_withdraw.push(bid.clone());
            }
            Some(_) => {}
        }
    }

    plan
}

/// Gates one submission attempt. On a go, `next_state` already carries the
/// incremented attempt counter; the caller persists it only around an
/// actual attempt.
pub fn next_submission_attempt(
    bid: &TrackedBid,
    now: DateTime<Utc>,
    policy: &Policy,
    state: Option<&SubmitAttemptState>,
) -> SubmissionGate {
    let current = state
        .cloned()
        .unwrap_or_else(|| SubmitAttemptState::new(now));

    if current.is_terminal() {
        return hold(current, HoldReason::AlreadySubmitted);
    }

    if current.attempts >= policy.submit_retry_limit {
        debug!(bid_id = %bid.bid_id, attempts = current.attempts, "submission retries exhausted");
        return hold(current, HoldReason::RetryLimitReached);
    }

    if let Some(next_at) = current.next_attempt_at {
        if next_at > now {
            return hold(current, HoldReason::BackoffPending);
        }
    }

    let mut next_state = current;
    next_state.attempts += 1;

    SubmissionGate {
        should_attempt: true,
        next_state,
        reason: None,
    }
}

fn hold(state: SubmitAttemptState, reason: HoldReason) -> SubmissionGate {
    SubmissionGate {
        should_attempt: false,
        next_state: state,
        reason: Some(reason),
    }
}

/// Records a failed attempt: linear backoff scaled by the attempt count,
/// capped, plus an escalation bump once the bid has been overdue long
/// enough.
pub fn apply_submission_failure(
    state: &SubmitAttemptState,
    now: DateTime<Utc>,
    policy: &Policy,
) -> SubmitAttemptState {
    let mut next = state.clone();

    let scale = i64::from(next.attempts.max(1));
    let backoff_minutes = policy
        .submit_retry_max_backoff_minutes
        .min(policy.submit_retry_backoff_minutes.saturating_mul(scale));
    next.next_attempt_at = Some(now + Duration::minutes(backoff_minutes));

    if now - next.first_seen_at >= Duration::minutes(policy.submit_escalate_after_minutes) {
        next.escalations = (next.escalations + 1).min(policy.submit_escalation_limit);
    }

    next
}

/// Terminal transition: the marketplace accepted the deliverable.
pub fn mark_submission_succeeded(
    state: &SubmitAttemptState,
    now: DateTime<Utc>,
) -> SubmitAttemptState {
    let mut next = state.clone();
    next.submitted_at = Some(now);
    next.next_attempt_at = None;
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::clock::canonical;

    fn at(raw: &str) -> DateTime<Utc> {
        parse_canonical(raw).unwrap()
    }

    fn pending(job_id: &str, bid_id: &str) -> TrackedBid {
        TrackedBid {
            bid_id: bid_id.to_string(),
            job_id: job_id.to_string(),
            status: BidStatus::Pending,
            amount_near: Some(0.5),
        }
    }

    #[test]
    fn stale_marker_triggers_withdrawal() {
        let now = at("2026-02-28T00:00:00Z");
        let policy = Policy::resolve(&crate::policy::PolicyOverrides {
            stale_pending_bid_minutes: Some(30),
            ..Default::default()
        })
        .unwrap();

        let mut markers = BTreeMap::new();
        markers.insert("job-1".to_string(), "2026-02-27T22:00:00Z".to_string());

        let plan =
            plan_stale_bid_withdrawals(&[pending("job-1", "bid-1")], now, &markers, &policy);

        assert_eq!(plan.to_withdraw.len(), 1);
        assert_eq!(plan.to_withdraw[0].bid_id, "bid-1");
        assert!(plan.marker_updates.is_empty());
    }

    #[test]
    fn first_observation_never_withdraws() {
        let now = at("2026-02-28T00:00:00Z");
        let policy = Policy::default();

        let plan = plan_stale_bid_withdrawals(
            &[pending("job-1", "bid-1")],
            now,
            &BTreeMap::new(),
            &policy,
        );

        assert!(plan.to_withdraw.is_empty());
        assert_eq!(plan.marker_updates.get("job-1"), Some(&now));
    }

    #[test]
    fn malformed_marker_is_treated_as_first_observation() {
        let now = at("2026-02-28T00:00:00Z");
        let policy = Policy::default();

        let mut markers = BTreeMap::new();
        markers.insert("job-1".to_string(), "last tuesday".to_string());

        let plan =
            plan_stale_bid_withdrawals(&[pending("job-1", "bid-1")], now, &markers, &policy);

        assert!(plan.to_withdraw.is_empty());
        assert_eq!(plan.marker_updates.get("job-1"), Some(&now));
    }

    #[test]
    fn fresh_marker_does_nothing() {
        let now = at("2026-02-28T00:00:00Z");
        let policy = Policy::default(); // 240 minute window

        let mut markers = BTreeMap::new();
        markers.insert(
            "job-1".to_string(),
            canonical(now - Duration::minutes(10)),
        );

        let plan =
            plan_stale_bid_withdrawals(&[pending("job-1", "bid-1")], now, &markers, &policy);
        assert!(plan.to_withdraw.is_empty());
        assert!(plan.marker_updates.is_empty());
    }

    #[test]
    fn non_pending_bids_are_ignored() {
        let now = at("2026-02-28T00:00:00Z");
        let policy = Policy::default();

        let mut accepted = pending("job-1", "bid-1");
        accepted.status = BidStatus::Accepted;

        let plan =
            plan_stale_bid_withdrawals(&[accepted], now, &BTreeMap::new(), &policy);
        assert!(plan.to_withdraw.is_empty());
        assert!(plan.marker_updates.is_empty());
    }

    #[test]
    fn backoff_blocks_retry() {
        let now = at("2026-02-28T00:00:00Z");
        let policy = Policy::default();

        let state = SubmitAttemptState {
            attempts: 1,
            first_seen_at: now - Duration::hours(1),
            next_attempt_at: Some(at("2026-02-28T01:00:00Z")),
            escalations: 0,
            submitted_at: None,
        };

        let gate = next_submission_attempt(&pending("job-1", "bid-1"), now, &policy, Some(&state));
        assert!(!gate.should_attempt);
        assert_eq!(gate.reason, Some(HoldReason::BackoffPending));
        // Holding does not mutate the persisted state.
        assert_eq!(gate.next_state, state);
    }

    #[test]
    fn terminal_state_reports_already_submitted() {
        let now = at("2026-02-28T00:00:00Z");
        let policy = Policy::default();

        let submitted = mark_submission_succeeded(&SubmitAttemptState::new(now), now);
        assert!(submitted.is_terminal());
        assert_eq!(submitted.next_attempt_at, None);

        let gate =
            next_submission_attempt(&pending("job-1", "bid-1"), now, &policy, Some(&submitted));
        assert!(!gate.should_attempt);
        assert_eq!(gate.reason, Some(HoldReason::AlreadySubmitted));
    }

    #[test]
    fn retry_limit_is_enforced() {
        let now = at("2026-02-28T00:00:00Z");
        let policy = Policy::resolve(&crate::policy::PolicyOverrides {
            submit_retry_limit: Some(2),
            ..Default::default()
        })
        .unwrap();

        let state = SubmitAttemptState {
            attempts: 2,
            first_seen_at: now,
            next_attempt_at: None,
            escalations: 0,
            submitted_at: None,
        };

        let gate = next_submission_attempt(&pending("job-1", "bid-1"), now, &policy, Some(&state));
        assert!(!gate.should_attempt);
        assert_eq!(gate.reason, Some(HoldReason::RetryLimitReached));
    }

    #[test]
    fn first_attempt_initializes_and_increments() {
        let now = at("2026-02-28T00:00:00Z");
        let policy = Policy::default();

        let gate = next_submission_attempt(&pending("job-1", "bid-1"), now, &policy, None);
        assert!(gate.should_attempt);
        assert_eq!(gate.next_state.attempts, 1);
        assert_eq!(gate.next_state.first_seen_at, now);
        assert!(gate.next_state.submitted_at.is_none());
    }

    #[test]
    fn failure_backoff_scales_linearly_and_caps() {
        let policy = Policy::resolve(&crate::policy::PolicyOverrides {
            submit_retry_backoff_minutes: Some(10),
            submit_retry_max_backoff_minutes: Some(25),
            submit_retry_limit: Some(10),
            ..Default::default()
        })
        .unwrap();
        let now = at("2026-02-28T00:00:00Z");

        let mut state = SubmitAttemptState::new(now);
        state.attempts = 1;
        let after_first = apply_submission_failure(&state, now, &policy);
        assert_eq!(
            after_first.next_attempt_at,
            Some(now + Duration::minutes(10))
        );

        state.attempts = 2;
        let after_second = apply_submission_failure(&state, now, &policy);
        assert_eq!(
            after_second.next_attempt_at,
            Some(now + Duration::minutes(20))
        );

        state.attempts = 5;
        let capped = apply_submission_failure(&state, now, &policy);
        assert_eq!(capped.next_attempt_at, Some(now + Duration::minutes(25)));
    }

    #[test]
    fn escalation_bumps_once_overdue_and_caps() {
        let policy = Policy::resolve(&crate::policy::PolicyOverrides {
            submit_escalate_after_minutes: Some(60),
            submit_escalation_limit: Some(2),
            ..Default::default()
        })
        .unwrap();

        let first_seen = at("2026-02-28T00:00:00Z");
        let mut state = SubmitAttemptState::new(first_seen);
        state.attempts = 1;

        // Not yet overdue: no escalation.
        let early = apply_submission_failure(&state, first_seen + Duration::minutes(30), &policy);
        assert_eq!(early.escalations, 0);

        // Overdue: each failure escalates, capped at the limit.
        let mut current = state;
        for expected in [1u32, 2, 2] {
            current = apply_submission_failure(
                &current,
                first_seen + Duration::minutes(90),
                &policy,
            );
            assert_eq!(current.escalations, expected);
        }
    }

    #[test]
    fn attempt_state_round_trips_through_json() {
        let now = Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap();
        let state = SubmitAttemptState {
            attempts: 3,
            first_seen_at: now,
            next_attempt_at: Some(now + Duration::minutes(15)),
            escalations: 1,
            submitted_at: None,
        };

        let raw = serde_json::to_string(&state).unwrap();
        let back: SubmitAttemptState = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, state);
    }
}
