//! The persisted key families. These four prefixes are the entire surface
//! of the durable state; nothing else is written.

pub const BID_SUBMITTED_PREFIX: &str = "near_market_bid_submitted:";
pub const SUBMIT_ATTEMPT_PREFIX: &str = "near_market_submit_attempt:";
pub const WITHDRAWN_BID_PREFIX: &str = "near_market_withdrawn_bid:";
pub const SETTLEMENT_CURSOR: &str = "near_market_settlement_cursor";

/// Marker recording when a pending bid for `job_id` was first observed.
pub fn bid_submitted(job_id: &str) -> String {
    format!("{BID_SUBMITTED_PREFIX}{job_id}")
}

/// Per-`(job, bid)` submission retry state.
pub fn submit_attempt(job_id: &str, bid_id: &str) -> String {
    format!("{SUBMIT_ATTEMPT_PREFIX}{job_id}:{bid_id}")
}

/// Marker recording when a stale bid was withdrawn.
pub fn withdrawn_bid(bid_id: &str) -> String {
    format!("{WITHDRAWN_BID_PREFIX}{bid_id}")
}

pub fn job_id_of_bid_submitted(key: &str) -> Option<&str> {
    key.strip_prefix(BID_SUBMITTED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips() {
        let key = bid_submitted("job-1");
        assert_eq!(key, "near_market_bid_submitted:job-1");
        assert_eq!(job_id_of_bid_submitted(&key), Some("job-1"));
        assert_eq!(job_id_of_bid_submitted("unrelated:job-1"), None);
    }

    #[test]
    fn submit_attempt_key_is_job_then_bid() {
        assert_eq!(
            submit_attempt("job-1", "bid-7"),
            "near_market_submit_attempt:job-1:bid-7"
        );
    }
}
