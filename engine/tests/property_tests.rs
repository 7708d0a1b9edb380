//! Property suites for the pure decision logic.

use std::collections::BTreeMap;

use proptest::prelude::*;

use engine::bidding::{BidAction, decide_bid_for_job, rank_jobs_for_bidding};
use engine::lifecycle::{SubmitAttemptState, apply_submission_failure, next_submission_attempt};
use engine::policy::{Policy, PolicyOverrides};
use market::types::{BidStatus, JobType, MarketBid, MarketJob, TrackedBid};

fn near_job(id: &str, budget: f64) -> MarketJob {
    MarketJob {
        job_id: id.to_string(),
        title: format!("job {id}"),
        status: Some(market::types::JobStatus::Open),
        job_type: Some(JobType::Standard),
        budget_amount: Some(budget),
        budget_token: Some("NEAR".to_string()),
        awarded_bid_id: None,
        updated_at: None,
        my_assignments: Vec::new(),
    }
}

fn bid_with_amount(n: usize, amount: f64) -> MarketBid {
    MarketBid {
        bid_id: format!("bid-{n}"),
        job_id: None,
        status: Some(BidStatus::Pending),
        bidder_agent_id: None,
        amount: Some(amount),
    }
}

proptest! {
    /// Fewer existing bids never lower confidence for the same job.
    #[test]
    fn confidence_is_monotone_in_bid_count(
        budget in 0.2f64..100.0,
        fewer in 0usize..8,
        extra in 1usize..4,
    ) {
        let policy = Policy::default();
        let more = (fewer + extra).min(8);
        let job = near_job("job-m", budget);

        // Amounts high enough that the undercut never trips the margin
        // floor, so both decisions are actionable.
        let quiet: Vec<MarketBid> =
            (0..fewer).map(|n| bid_with_amount(n, budget * 0.6)).collect();
        let busy: Vec<MarketBid> =
            (0..more).map(|n| bid_with_amount(n, budget * 0.6)).collect();

        let quiet_decision = decide_bid_for_job(&job, &quiet, &policy);
        let busy_decision = decide_bid_for_job(&job, &busy, &policy);

        prop_assert!(quiet_decision.confidence >= busy_decision.confidence);
    }

    /// Whenever a bid is placed, the margin floor holds for the rounded
    /// amount.
    #[test]
    fn margin_floor_holds_for_every_actionable_decision(
        budget in 0.1f64..100.0,
        amounts in proptest::collection::vec(0.0001f64..50.0, 0..6),
    ) {
        let policy = Policy::default();
        let job = near_job("job-f", budget);
        let bids: Vec<MarketBid> = amounts
            .iter()
            .enumerate()
            .map(|(n, a)| bid_with_amount(n, *a))
            .collect();

        let decision = decide_bid_for_job(&job, &bids, &policy);
        if decision.action != BidAction::Skip {
            let amount = decision.bid_amount_near.unwrap();
            prop_assert!(budget - amount >= policy.min_margin_near - 1e-9);
            prop_assert!(amount > 0.0);
            prop_assert!(amount <= policy.max_bid_near + 1e-9);
        }
    }

    /// A live lowest bid within bounds is undercut by exactly the minimum
    /// step.
    #[test]
    fn undercut_is_exactly_one_step(lowest_steps in 102u32..90_000) {
        let policy = Policy::default();
        let budget = 10.0;
        let lowest = f64::from(lowest_steps) / 10_000.0;

        let job = near_job("job-u", budget);
        let bids = vec![
            bid_with_amount(0, lowest),
            bid_with_amount(1, lowest + 0.5),
        ];

        let decision = decide_bid_for_job(&job, &bids, &policy);
        prop_assert_eq!(decision.action, BidAction::Bid);

        let amount = decision.bid_amount_near.unwrap();
        let expected = ((lowest - 0.0001) * 10_000.0).round() / 10_000.0;
        prop_assert!((amount - expected).abs() < 1e-9, "amount {} expected {}", amount, expected);
        prop_assert!(amount < lowest);
    }

    /// Failure backoffs never move the next attempt earlier, and saturate
    /// at the configured cap.
    #[test]
    fn failure_backoff_is_nondecreasing_until_cap(
        attempts_seen in proptest::collection::vec(1u32..12, 1..8),
    ) {
        let policy = Policy::default();
        let now = common::clock::parse_canonical("2026-02-28T00:00:00Z").unwrap();

        let mut ordered = attempts_seen.clone();
        ordered.sort_unstable();

        let mut last = None;
        for attempts in ordered {
            let state = SubmitAttemptState {
                attempts,
                first_seen_at: now,
                next_attempt_at: None,
                escalations: 0,
                submitted_at: None,
            };
            let failed = apply_submission_failure(&state, now, &policy);
            let next_at = failed.next_attempt_at.unwrap();

            if let Some(previous) = last {
                prop_assert!(next_at >= previous);
            }
            prop_assert!(
                next_at <= now + chrono::Duration::minutes(policy.submit_retry_max_backoff_minutes)
            );
            last = Some(next_at);
        }
    }

    /// Terminality: once submitted, no sequence of gates re-attempts.
    #[test]
    fn submitted_states_never_reattempt(extra_minutes in 0i64..10_000) {
        let policy = Policy::default();
        let now = common::clock::parse_canonical("2026-02-28T00:00:00Z").unwrap();
        let later = now + chrono::Duration::minutes(extra_minutes);

        let state = SubmitAttemptState {
            attempts: 1,
            first_seen_at: now,
            next_attempt_at: None,
            escalations: 0,
            submitted_at: Some(now),
        };

        let bid = TrackedBid {
            bid_id: "bid-1".to_string(),
            job_id: "job-1".to_string(),
            status: BidStatus::Accepted,
            amount_near: None,
        };

        let gate = next_submission_attempt(&bid, later, &policy, Some(&state));
        prop_assert!(!gate.should_attempt);
    }

    /// Resolved policies always satisfy their own constraints.
    #[test]
    fn resolved_policies_validate(
        min_budget in 0.001f64..10.0,
        budget_span in 0.0f64..100.0,
        discount in 1u32..=10_000,
        retry_limit in 1u32..10,
    ) {
        let overrides = PolicyOverrides {
            min_budget_near: Some(min_budget),
            max_budget_near: Some(min_budget + budget_span),
            bid_discount_bps: Some(discount),
            submit_retry_limit: Some(retry_limit),
            ..Default::default()
        };

        let policy = Policy::resolve(&overrides);
        prop_assume!(policy.is_ok());
        let policy = policy.unwrap();
        prop_assert!(policy.validate().is_ok());
        prop_assert!(policy.min_budget_near <= policy.max_budget_near);
    }

    /// Ranking is a permutation: every job appears exactly once, with all
    /// actionable decisions ahead of all skips.
    #[test]
    fn ranking_is_a_partitioned_permutation(budgets in proptest::collection::vec(0.01f64..120.0, 1..10)) {
        let policy = Policy::default();
        let jobs: Vec<MarketJob> = budgets
            .iter()
            .enumerate()
            .map(|(n, b)| near_job(&format!("job-{n}"), *b))
            .collect();

        let decisions = rank_jobs_for_bidding(&jobs, &BTreeMap::new(), &policy);
        prop_assert_eq!(decisions.len(), jobs.len());

        let first_skip = decisions.iter().position(|d| d.action == BidAction::Skip);
        if let Some(boundary) = first_skip {
            prop_assert!(
                decisions[boundary..].iter().all(|d| d.action == BidAction::Skip)
            );
        }
    }
}
