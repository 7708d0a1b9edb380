//! Normalized marketplace records.
//!
//! The marketplace returns heterogeneous JSON: fields come and go, numerics
//! arrive as strings or numbers, and enumerations grow values we have never
//! seen. Everything optional is an explicit `Option`, and every enumeration
//! carries a designated `Unknown` variant so an unexpected value can never
//! be confused with a known one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Open,
    Filling,
    InProgress,
    Submitted,
    Judging,
    Completed,
    Closed,
    Expired,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Standard,
    Competition,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Pending,
    Accepted,
    Submitted,
    InProgress,
    Withdrawn,
    Rejected,
    Completed,
    #[serde(other)]
    Unknown,
}

impl Default for BidStatus {
    fn default() -> Self {
        BidStatus::Unknown
    }
}

impl BidStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BidStatus::Pending => "pending",
            BidStatus::Accepted => "accepted",
            BidStatus::Submitted => "submitted",
            BidStatus::InProgress => "in_progress",
            BidStatus::Withdrawn => "withdrawn",
            BidStatus::Rejected => "rejected",
            BidStatus::Completed => "completed",
            BidStatus::Unknown => "unknown",
        }
    }

    /// Statuses for which the autopilot owes the marketplace a deliverable.
    pub fn is_submittable(self) -> bool {
        matches!(
            self,
            BidStatus::Accepted | BidStatus::InProgress | BidStatus::Submitted
        )
    }

    /// A bid still competing for the job. Withdrawn and rejected bids are
    /// ignored when computing the undercut target.
    pub fn is_live(self) -> bool {
        !matches!(self, BidStatus::Withdrawn | BidStatus::Rejected)
    }
}

/// The marketplace's record that one of our bids was accepted and work is
/// expected against it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    #[serde(alias = "id", alias = "assignment_id")]
    pub assignment_id: String,

    #[serde(default)]
    pub status: Option<String>,
}

impl Assignment {
    pub fn is_submitted(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("submitted"))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketJob {
    #[serde(alias = "id", alias = "job_id")]
    pub job_id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub status: Option<JobStatus>,

    #[serde(default, alias = "job_type")]
    pub job_type: Option<JobType>,

    #[serde(
        default,
        alias = "budget_amount",
        deserialize_with = "de_opt_decimal"
    )]
    pub budget_amount: Option<f64>,

    #[serde(default, alias = "budget_token")]
    pub budget_token: Option<String>,

    #[serde(default, alias = "awarded_bid_id")]
    pub awarded_bid_id: Option<String>,

    #[serde(default, alias = "updated_at")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, alias = "my_assignments")]
    pub my_assignments: Vec<Assignment>,
}

impl MarketJob {
    /// The job's budget in NEAR, when the budget token is NEAR and the
    /// amount is a usable number. Anything else is treated as unknown.
    pub fn near_budget(&self) -> Option<f64> {
        let token = self.budget_token.as_deref()?;
        if !token.eq_ignore_ascii_case("near") {
            return None;
        }
        self.budget_amount.filter(|amount| amount.is_finite())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketBid {
    #[serde(alias = "id", alias = "bid_id")]
    pub bid_id: String,

    #[serde(default, alias = "job_id")]
    pub job_id: Option<String>,

    #[serde(default)]
    pub status: Option<BidStatus>,

    #[serde(default, alias = "bidder_agent_id", alias = "agent_id")]
    pub bidder_agent_id: Option<String>,

    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub amount: Option<f64>,
}

/// Normalized projection of one of the autopilot's own bids. This is the
/// shape the lifecycle engine operates on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedBid {
    pub bid_id: String,
    pub job_id: String,

    #[serde(default)]
    pub status: BidStatus,

    #[serde(
        default,
        alias = "amount",
        deserialize_with = "de_opt_decimal"
    )]
    pub amount_near: Option<f64>,
}

impl TrackedBid {
    /// Projects a raw marketplace bid row. Rows without a job id cannot be
    /// tracked and are dropped.
    pub fn from_market(bid: MarketBid) -> Option<TrackedBid> {
        let job_id = bid.job_id.filter(|id| !id.is_empty())?;
        Some(TrackedBid {
            bid_id: bid.bid_id,
            job_id,
            status: bid.status.unwrap_or_default(),
            amount_near: bid.amount.filter(|a| a.is_finite()),
        })
    }
}

/// Accepts a decimal as either a JSON number or a decimal string, which is
/// how the marketplace serializes NEAR amounts depending on the endpoint.
fn de_opt_decimal<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| match value {
        serde_json::Value::String(s) => {
            s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
        }
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_row_normalizes_string_budget_and_snake_case() {
        let job: MarketJob = serde_json::from_value(serde_json::json!({
            "id": "job-1",
            "title": "Summarize docs",
            "status": "open",
            "job_type": "standard",
            "budget_amount": "1.25",
            "budget_token": "NEAR",
            "updated_at": "2026-02-28T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(job.job_id, "job-1");
        assert_eq!(job.status, Some(JobStatus::Open));
        assert_eq!(job.job_type, Some(JobType::Standard));
        assert_eq!(job.budget_amount, Some(1.25));
        assert_eq!(job.near_budget(), Some(1.25));
        assert!(job.updated_at.is_some());
    }

    #[test]
    fn job_row_accepts_numeric_budget_and_camel_case() {
        let job: MarketJob = serde_json::from_value(serde_json::json!({
            "jobId": "job-2",
            "budgetAmount": 2.0,
            "budgetToken": "near"
        }))
        .unwrap();

        assert_eq!(job.near_budget(), Some(2.0));
    }

    #[test]
    fn unknown_enum_values_map_to_unknown() {
        let job: MarketJob = serde_json::from_value(serde_json::json!({
            "id": "job-3",
            "status": "haggling",
            "job_type": "charity"
        }))
        .unwrap();

        assert_eq!(job.status, Some(JobStatus::Unknown));
        assert_eq!(job.job_type, Some(JobType::Unknown));
    }

    #[test]
    fn non_near_budget_is_not_a_near_budget() {
        let job: MarketJob = serde_json::from_value(serde_json::json!({
            "id": "job-4",
            "budget_amount": "5",
            "budget_token": "USDC"
        }))
        .unwrap();

        assert_eq!(job.budget_amount, Some(5.0));
        assert_eq!(job.near_budget(), None);
    }

    #[test]
    fn garbage_budget_string_becomes_absent() {
        let job: MarketJob = serde_json::from_value(serde_json::json!({
            "id": "job-5",
            "budget_amount": "a lot",
            "budget_token": "NEAR"
        }))
        .unwrap();

        assert_eq!(job.budget_amount, None);
        assert_eq!(job.near_budget(), None);
    }

    #[test]
    fn tracked_bid_requires_job_id() {
        let with_job: MarketBid = serde_json::from_value(serde_json::json!({
            "id": "bid-1",
            "job_id": "job-1",
            "status": "pending",
            "amount": "0.2"
        }))
        .unwrap();
        let tracked = TrackedBid::from_market(with_job).unwrap();
        assert_eq!(tracked.status, BidStatus::Pending);
        assert_eq!(tracked.amount_near, Some(0.2));

        let orphan: MarketBid = serde_json::from_value(serde_json::json!({
            "id": "bid-2",
            "job_id": ""
        }))
        .unwrap();
        assert!(TrackedBid::from_market(orphan).is_none());
    }

    #[test]
    fn submittable_and_live_status_sets() {
        assert!(BidStatus::Accepted.is_submittable());
        assert!(BidStatus::InProgress.is_submittable());
        assert!(BidStatus::Submitted.is_submittable());
        assert!(!BidStatus::Pending.is_submittable());

        assert!(BidStatus::Pending.is_live());
        assert!(!BidStatus::Withdrawn.is_live());
        assert!(!BidStatus::Rejected.is_live());
    }

    #[test]
    fn assignment_submitted_check() {
        let open = Assignment {
            assignment_id: "a-1".into(),
            status: Some("in_progress".into()),
        };
        let done = Assignment {
            assignment_id: "a-2".into(),
            status: Some("Submitted".into()),
        };
        assert!(!open.is_submitted());
        assert!(done.is_submitted());
    }
}
