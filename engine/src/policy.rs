//! Numeric guardrails for bidding and submission.
//!
//! Defaults favor conservative behavior; every knob can be overridden from
//! config, and the merged result is validated before anything runs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("policy field {field} invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Jobs below this budget are not worth the marketplace fees.
    pub min_budget_near: f64,

    /// Jobs above this budget are assumed to need human review.
    pub max_budget_near: f64,

    /// Fraction of the budget used as the base bid, in basis points.
    /// Must lie in [1, 10000].
    pub bid_discount_bps: u32,

    pub min_bid_near: f64,
    pub max_bid_near: f64,

    /// Skip a job once it already has more than this many bids.
    pub max_existing_bids: usize,

    /// A bid must leave at least this much of the budget on the table.
    pub min_margin_near: f64,

    /// Pending bids older than this are withdrawn.
    pub stale_pending_bid_minutes: i64,

    pub submit_retry_limit: u32,
    pub submit_retry_backoff_minutes: i64,
    pub submit_retry_max_backoff_minutes: i64,
    pub submit_escalate_after_minutes: i64,
    pub submit_escalation_limit: u32,

    /// When set, any unrecoverable anomaly halts the tick instead of
    /// continuing with partial information.
    pub fail_closed: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            min_budget_near: 0.1,
            max_budget_near: 100.0,
            bid_discount_bps: 7000,
            min_bid_near: 0.01,
            max_bid_near: 50.0,
            max_existing_bids: 8,
            min_margin_near: 0.01,
            stale_pending_bid_minutes: 240,
            submit_retry_limit: 5,
            submit_retry_backoff_minutes: 5,
            submit_retry_max_backoff_minutes: 60,
            submit_escalate_after_minutes: 120,
            submit_escalation_limit: 3,
            fail_closed: true,
        }
    }
}

/// Operator overrides; every field optional, merged onto the defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PolicyOverrides {
    pub min_budget_near: Option<f64>,
    pub max_budget_near: Option<f64>,
    pub bid_discount_bps: Option<u32>,
    pub min_bid_near: Option<f64>,
    pub max_bid_near: Option<f64>,
    pub max_existing_bids: Option<usize>,
    pub min_margin_near: Option<f64>,
    pub stale_pending_bid_minutes: Option<i64>,
    pub submit_retry_limit: Option<u32>,
    pub submit_retry_backoff_minutes: Option<i64>,
    pub submit_retry_max_backoff_minutes: Option<i64>,
    pub submit_escalate_after_minutes: Option<i64>,
    pub submit_escalation_limit: Option<u32>,
    pub fail_closed: Option<bool>,
}

impl Policy {
    /// Merges `overrides` onto the defaults and validates every field.
    pub fn resolve(overrides: &PolicyOverrides) -> Result<Policy, PolicyError> {
        let defaults = Policy::default();
        let policy = Policy {
            min_budget_near: overrides.min_budget_near.unwrap_or(defaults.min_budget_near),
            max_budget_near: overrides.max_budget_near.unwrap_or(defaults.max_budget_near),
            bid_discount_bps: overrides.bid_discount_bps.unwrap_or(defaults.bid_discount_bps),
            min_bid_near: overrides.min_bid_near.unwrap_or(defaults.min_bid_near),
            max_bid_near: overrides.max_bid_near.unwrap_or(defaults.max_bid_near),
            max_existing_bids: overrides
                .max_existing_bids
                .unwrap_or(defaults.max_existing_bids),
            min_margin_near: overrides.min_margin_near.unwrap_or(defaults.min_margin_near),
            stale_pending_bid_minutes: overrides
                .stale_pending_bid_minutes
                .unwrap_or(defaults.stale_pending_bid_minutes),
            submit_retry_limit: overrides
                .submit_retry_limit
                .unwrap_or(defaults.submit_retry_limit),
            submit_retry_backoff_minutes: overrides
                .submit_retry_backoff_minutes
                .unwrap_or(defaults.submit_retry_backoff_minutes),
            submit_retry_max_backoff_minutes: overrides
                .submit_retry_max_backoff_minutes
                .unwrap_or(defaults.submit_retry_max_backoff_minutes),
            submit_escalate_after_minutes: overrides
                .submit_escalate_after_minutes
                .unwrap_or(defaults.submit_escalate_after_minutes),
            submit_escalation_limit: overrides
                .submit_escalation_limit
                .unwrap_or(defaults.submit_escalation_limit),
            fail_closed: overrides.fail_closed.unwrap_or(defaults.fail_closed),
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        positive_finite("minBudgetNear", self.min_budget_near)?;
        positive_finite("maxBudgetNear", self.max_budget_near)?;
        if self.min_budget_near > self.max_budget_near {
            return Err(invalid("minBudgetNear", "exceeds maxBudgetNear"));
        }

        if self.bid_discount_bps == 0 || self.bid_discount_bps > 10_000 {
            return Err(invalid("bidDiscountBps", "must lie in [1, 10000]"));
        }

        positive_finite("minBidNear", self.min_bid_near)?;
        positive_finite("maxBidNear", self.max_bid_near)?;
        if self.min_bid_near > self.max_bid_near {
            return Err(invalid("minBidNear", "exceeds maxBidNear"));
        }

        if !self.min_margin_near.is_finite() || self.min_margin_near < 0.0 {
            return Err(invalid("minMarginNear", "must be finite and non-negative"));
        }

        positive_int("stalePendingBidMinutes", self.stale_pending_bid_minutes)?;
        if self.submit_retry_limit == 0 {
            return Err(invalid("submitRetryLimit", "must be at least 1"));
        }
        positive_int("submitRetryBackoffMinutes", self.submit_retry_backoff_minutes)?;
        positive_int(
            "submitRetryMaxBackoffMinutes",
            self.submit_retry_max_backoff_minutes,
        )?;
        if self.submit_retry_backoff_minutes > self.submit_retry_max_backoff_minutes {
            return Err(invalid(
                "submitRetryBackoffMinutes",
                "exceeds submitRetryMaxBackoffMinutes",
            ));
        }
        positive_int(
            "submitEscalateAfterMinutes",
            self.submit_escalate_after_minutes,
        )?;

        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> PolicyError {
    PolicyError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn positive_finite(field: &'static str, value: f64) -> Result<(), PolicyError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, "must be finite and positive"))
    }
}

fn positive_int(field: &'static str, value: i64) -> Result<(), PolicyError> {
    if value > 0 {
        Ok(())
    } else {
        Err(invalid(field, "must be a positive integer"))
    }
}
