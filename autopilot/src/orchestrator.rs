//! Tick orchestration.
//!
//! One tick runs the full pipeline: discover open jobs, decide and place
//! bids, withdraw stale pending bids, submit deliverables for accepted
//! work, reconcile completed jobs, persist markers. Under fail-closed
//! policy any fatal anomaly ends the tick with `halted = true` and no
//! further side effects; per-item failures inside a fan-out are recorded
//! and skipped without touching their siblings.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use common::clock::{Clock, SystemClock, canonical, parse_canonical};
use common::fanout::map_limit_settled;
use common::logger::warn_if_slow;
use engine::bidding::{BidDecision, rank_jobs_for_bidding};
use engine::lifecycle::{
    ExecutionAction, ExecutionDecision, SubmitAttemptState, apply_submission_failure,
    mark_submission_succeeded, next_submission_attempt, plan_stale_bid_withdrawals,
};
use engine::manifest::{DeliverableManifest, manifest_hash, sign};
use engine::policy::Policy;
use engine::settlement::{SettlementReport, build_settlement_report};
use market::api::{BidRequest, JobQuery, MarketApi, PageQuery, SubmissionRequest};
use market::types::{BidStatus, JobType, MarketBid, MarketJob, TrackedBid};
use store::keys;
use store::{StateStore, StoreError};

use crate::artifact::{ArtifactProvider, NullArtifactProvider, StaticArtifactProvider};
use crate::config::{AppConfig, StateDriver};
use crate::error::AutopilotError;
use crate::telemetry::{TelemetryBus, TelemetryEvent};

/// Upper bound on concurrent in-flight marketplace requests per fan-out.
pub const FANOUT_LIMIT: usize = 10;

const OPEN_JOBS_PAGE_LIMIT: u32 = 50;
const COMPLETED_JOBS_LIMIT: u32 = 100;
const BID_ETA_SECONDS: u64 = 3600;
const SLOW_CALL: StdDuration = StdDuration::from_millis(2_000);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickPhase {
    Discovery,
    Bidding,
    Withdrawal,
    Submission,
    Settlement,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickError {
    pub phase: TickPhase,
    pub message: String,
}

impl TickError {
    fn new(phase: TickPhase, error: &AutopilotError) -> Self {
        Self {
            phase,
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickResult {
    pub tick_id: String,
    pub started_at: String,
    pub completed_at: String,
    pub bid_decisions: Vec<BidDecision>,
    pub execution_decisions: Vec<ExecutionDecision>,
    pub settlements: SettlementReport,
    pub errors: Vec<TickError>,
    pub halted: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct LoopOptions {
    pub interval_ms: u64,
    pub max_ticks: Option<u64>,
}

struct PhasedError {
    phase: TickPhase,
    error: AutopilotError,
}

trait PhaseExt<T> {
    fn phased(self, phase: TickPhase) -> Result<T, PhasedError>;
}

impl<T, E: Into<AutopilotError>> PhaseExt<T> for Result<T, E> {
    fn phased(self, phase: TickPhase) -> Result<T, PhasedError> {
        self.map_err(|err| PhasedError {
            phase,
            error: err.into(),
        })
    }
}

/// Mutable working set threaded through the tick phases.
#[derive(Default)]
struct TickState {
    errors: Vec<TickError>,
    bid_decisions: Vec<BidDecision>,
    execution_decisions: Vec<ExecutionDecision>,
    settlements: SettlementReport,
}

pub struct Autopilot {
    agent_id: String,
    policy: Policy,
    near_price_usd: f64,
    signing: Option<(Vec<u8>, String)>,
    market: Arc<dyn MarketApi>,
    store: Arc<dyn StateStore>,
    artifacts: Arc<dyn ArtifactProvider>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<TelemetryBus>,
}

/// Builds a production autopilot from config: HTTP market client, the
/// configured store driver, and the artifact seam.
pub async fn bootstrap(config: &AppConfig) -> Result<Autopilot, AutopilotError> {
    let market: Arc<dyn MarketApi> = Arc::new(market::client::HttpMarketClient::new(
        config.market_config(),
    )?);

    let store: Arc<dyn StateStore> = match config.state.driver {
        StateDriver::File => Arc::new(store::file::FileStore::open(&config.state.path).await?),
        StateDriver::Sqlite => Arc::new(store::sqlite::SqliteStore::open(&config.state.path).await?),
    };

    let artifacts: Arc<dyn ArtifactProvider> = match &config.artifact {
        Some(section) => Arc::new(StaticArtifactProvider::new(&section.deliverable_url)),
        None => Arc::new(NullArtifactProvider),
    };

    Autopilot::new(
        config,
        market,
        store,
        artifacts,
        Arc::new(SystemClock),
        Arc::new(TelemetryBus::new()),
    )
}

impl Autopilot {
    pub fn new(
        config: &AppConfig,
        market: Arc<dyn MarketApi>,
        store: Arc<dyn StateStore>,
        artifacts: Arc<dyn ArtifactProvider>,
        clock: Arc<dyn Clock>,
        telemetry: Arc<TelemetryBus>,
    ) -> Result<Self, AutopilotError> {
        let policy = config.resolve_policy()?;
        let signing = config
            .submit_signing_key
            .as_ref()
            .map(|key| (key.as_bytes().to_vec(), config.signer_id().to_string()));

        Ok(Self {
            agent_id: config.agent_id.clone(),
            policy,
            near_price_usd: config.near_price_usd(),
            signing,
            market,
            store,
            artifacts,
            clock,
            telemetry,
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn telemetry(&self) -> &TelemetryBus {
        &self.telemetry
    }

    fn emit(&self, event_type: &str, fields: serde_json::Value) {
        self.telemetry.emit(TelemetryEvent::new(
            event_type,
            self.clock.now_canonical(),
            fields,
        ));
    }

    /// Runs one full tick. Never returns an error: every outcome, including
    /// a halt, is reported through the `TickResult`.
    #[instrument(skip_all, target = "orchestrator")]
    pub async fn run_tick(&self) -> TickResult {
        let tick_id = Uuid::new_v4().to_string();
        let started_at = self.clock.now_canonical();
        let mut state = TickState::default();
        let mut halted = false;

        self.emit("tick_started", serde_json::json!({ "tickId": tick_id }));
        info!(tick_id = %tick_id, "tick started");

        if let Err(fatal) = self.tick_phases(&mut state).await {
            state.errors.push(TickError::new(fatal.phase, &fatal.error));
            halted = true;
            warn!(
                tick_id = %tick_id,
                phase = ?fatal.phase,
                error = %fatal.error,
                "tick halted"
            );
        }

        let completed_at = self.clock.now_canonical();
        let actionable = state
            .bid_decisions
            .iter()
            .filter(|d| !d.is_skip())
            .count();
        let submitted = state
            .execution_decisions
            .iter()
            .filter(|d| d.action == ExecutionAction::Submit)
            .count();

        self.emit(
            "tick_completed",
            serde_json::json!({
                "tickId": tick_id,
                "bids": actionable,
                "skips": state.bid_decisions.len() - actionable,
                "submissions": submitted,
                "settledJobs": state.settlements.records.len(),
                "errors": state.errors.len(),
                "halted": halted,
            }),
        );
        info!(
            tick_id = %tick_id,
            bids = actionable,
            submissions = submitted,
            settled = state.settlements.records.len(),
            errors = state.errors.len(),
            halted,
            "tick completed"
        );

        TickResult {
            tick_id,
            started_at,
            completed_at,
            bid_decisions: state.bid_decisions,
            execution_decisions: state.execution_decisions,
            settlements: state.settlements,
            errors: state.errors,
            halted,
        }
    }

    /// The five phases in order. A returned error is fatal and halts the
    /// tick; recoverable per-item failures are recorded in `state.errors`.
    async fn tick_phases(&self, state: &mut TickState) -> Result<(), PhasedError> {
        // Phase 1+2: discover open jobs and their bids, decide, place bids.
        let discovered = match self.discover_open_jobs(state).await {
            Ok(discovered) => discovered,
            Err(error) => {
                if self.policy.fail_closed {
                    return Err(PhasedError {
                        phase: TickPhase::Discovery,
                        error,
                    });
                }
                state
                    .errors
                    .push(TickError::new(TickPhase::Discovery, &error));
                Vec::new()
            }
        };
        self.place_bids(state, &discovered).await?;

        // Phase 3: refetch own bids, withdraw the stale ones.
        let tracked = match self.fetch_own_bids().await {
            Ok(tracked) => tracked,
            Err(error) => {
                if self.policy.fail_closed {
                    return Err(PhasedError {
                        phase: TickPhase::Withdrawal,
                        error,
                    });
                }
                state
                    .errors
                    .push(TickError::new(TickPhase::Withdrawal, &error));
                Vec::new()
            }
        };
        let now = self.clock.now();
        self.withdraw_stale_bids(state, &tracked, now).await?;

        // Phase 4: submissions for accepted work.
        self.submit_accepted_work(state, &tracked).await?;

        // Phase 5: settlement reconciliation, cursor last.
        self.reconcile_settlements(state, COMPLETED_JOBS_LIMIT).await?;

        Ok(())
    }

    async fn discover_open_jobs(
        &self,
        state: &mut TickState,
    ) -> Result<Vec<(MarketJob, Vec<MarketBid>)>, AutopilotError> {
        let query = JobQuery {
            status: Some("open".to_string()),
            limit: Some(OPEN_JOBS_PAGE_LIMIT),
            ..JobQuery::default()
        };

        let jobs = warn_if_slow("list_jobs", SLOW_CALL, self.market.list_jobs(&query)).await?;
        debug!(count = jobs.len(), "open jobs fetched");

        let settled = map_limit_settled(FANOUT_LIMIT, jobs, |job| async move {
            match self
                .market
                .list_job_bids(&job.job_id, &PageQuery::default())
                .await
            {
                Ok(bids) => Ok((job, bids)),
                Err(err) => Err((job.job_id.clone(), err)),
            }
        })
        .await;

        let mut discovered = Vec::new();
        for outcome in settled {
            match outcome {
                Ok(pair) => discovered.push(pair),
                Err((job_id, err)) => {
                    let error = AutopilotError::Market(err);
                    warn!(job_id = %job_id, error = %error, "bid fetch failed; job skipped");
                    state.errors.push(TickError {
                        phase: TickPhase::Discovery,
                        message: format!("bids for job {job_id}: {error}"),
                    });
                }
            }
        }

        Ok(discovered)
    }

    async fn place_bids(
        &self,
        state: &mut TickState,
        discovered: &[(MarketJob, Vec<MarketBid>)],
    ) -> Result<(), PhasedError> {
        let jobs: Vec<MarketJob> = discovered.iter().map(|(job, _)| job.clone()).collect();
        let bids_by_job: BTreeMap<String, Vec<MarketBid>> = discovered
            .iter()
            .map(|(job, bids)| (job.job_id.clone(), bids.clone()))
            .collect();
        let job_by_id: BTreeMap<&str, &MarketJob> = discovered
            .iter()
            .map(|(job, _)| (job.job_id.as_str(), job))
            .collect();

        state.bid_decisions = rank_jobs_for_bidding(&jobs, &bids_by_job, &self.policy);

        let actionable: Vec<BidDecision> = state
            .bid_decisions
            .iter()
            .filter(|d| !d.is_skip())
            .cloned()
            .collect();

        for decision in &actionable {
            let Some(amount) = decision.bid_amount_near else {
                continue;
            };
            let title = job_by_id
                .get(decision.job_id.as_str())
                .map(|job| job.title.as_str())
                .unwrap_or_default();

            let request = BidRequest {
                amount,
                eta_seconds: BID_ETA_SECONDS,
                proposal: proposal_for(title),
            };

            match self.market.place_bid(&decision.job_id, &request).await {
                Ok(placed) => {
                    self.store
                        .set(
                            &keys::bid_submitted(&decision.job_id),
                            &self.clock.now_canonical(),
                        )
                        .await
                        .phased(TickPhase::Bidding)?;
                    self.emit(
                        "bid_placed",
                        serde_json::json!({
                            "jobId": decision.job_id,
                            "bidId": placed.bid_id,
                            "amountNear": amount,
                        }),
                    );
                    info!(job_id = %decision.job_id, amount, "bid placed");
                }
                Err(err) => {
                    let error = AutopilotError::Market(err);
                    warn!(job_id = %decision.job_id, error = %error, "bid placement failed");
                    state.errors.push(TickError {
                        phase: TickPhase::Bidding,
                        message: format!("place bid on {}: {error}", decision.job_id),
                    });
                }
            }
        }

        Ok(())
    }

    async fn fetch_own_bids(&self) -> Result<Vec<TrackedBid>, AutopilotError> {
        let statuses = [
            BidStatus::Pending,
            BidStatus::Accepted,
            BidStatus::InProgress,
            BidStatus::Submitted,
        ];
        Ok(warn_if_slow(
            "list_my_bids",
            SLOW_CALL,
            self.market.list_my_bids(&statuses, &PageQuery::default()),
        )
        .await?)
    }

    async fn withdraw_stale_bids(
        &self,
        state: &mut TickState,
        tracked: &[TrackedBid],
        now: DateTime<Utc>,
    ) -> Result<(), PhasedError> {
        let marker_by_job = self
            .load_markers()
            .await
            .phased(TickPhase::Withdrawal)?;

        let plan = plan_stale_bid_withdrawals(tracked, now, &marker_by_job, &self.policy);

        for (job_id, first_seen) in &plan.marker_updates {
            self.store
                .set(&keys::bid_submitted(job_id), &canonical(*first_seen))
                .await
                .phased(TickPhase::Withdrawal)?;
            debug!(job_id = %job_id, "pending bid first observed");
        }

        for bid in &plan.to_withdraw {
            match self.market.withdraw_bid(&bid.bid_id).await {
                Ok(_) => {
                    self.store
                        .del(&keys::bid_submitted(&bid.job_id))
                        .await
                        .phased(TickPhase::Withdrawal)?;
                    self.store
                        .set(
                            &keys::withdrawn_bid(&bid.bid_id),
                            &self.clock.now_canonical(),
                        )
                        .await
                        .phased(TickPhase::Withdrawal)?;
                    self.emit(
                        "bid_withdrawn",
                        serde_json::json!({ "bidId": bid.bid_id, "jobId": bid.job_id }),
                    );
                    info!(bid_id = %bid.bid_id, job_id = %bid.job_id, "stale bid withdrawn");
                }
                Err(err) => {
                    // The marker stays so a future tick retries the
                    // withdrawal.
                    let error = AutopilotError::WithdrawFailed {
                        bid_id: bid.bid_id.clone(),
                        reason: err.to_string(),
                    };
                    warn!(bid_id = %bid.bid_id, error = %error, "withdraw failed; marker kept");
                    state
                        .errors
                        .push(TickError::new(TickPhase::Withdrawal, &error));
                }
            }
        }

        Ok(())
    }

    async fn load_markers(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let mut marker_by_job = BTreeMap::new();
        for key in self.store.keys(keys::BID_SUBMITTED_PREFIX).await? {
            let Some(job_id) = keys::job_id_of_bid_submitted(&key) else {
                continue;
            };
            if let Some(value) = self.store.get(&key).await? {
                marker_by_job.insert(job_id.to_string(), value);
            }
        }
        Ok(marker_by_job)
    }

    async fn submit_accepted_work(
        &self,
        state: &mut TickState,
        tracked: &[TrackedBid],
    ) -> Result<(), PhasedError> {
        for bid in tracked.iter().filter(|bid| bid.status.is_submittable()) {
            let decision = self.submit_one(state, bid).await?;
            state.execution_decisions.push(decision);
        }
        Ok(())
    }

    async fn submit_one(
        &self,
        state: &mut TickState,
        bid: &TrackedBid,
    ) -> Result<ExecutionDecision, PhasedError> {
        let now = self.clock.now();
        let attempt_key = keys::submit_attempt(&bid.job_id, &bid.bid_id);
        let stored = self
            .load_attempt_state(&attempt_key)
            .await
            .phased(TickPhase::Submission)?;

        let gate = next_submission_attempt(bid, now, &self.policy, stored.as_ref());
        if !gate.should_attempt {
            return Ok(skip_decision(
                bid,
                gate.reason.map(|r| r.as_str().to_string()),
                gate.next_state.next_attempt_at,
            ));
        }

        // The job detail carries our assignment for this bid.
        let job = match self.market.get_job(&bid.job_id).await {
            Ok(job) => job,
            Err(err) => {
                let error = AutopilotError::Market(err);
                warn!(job_id = %bid.job_id, error = %error, "job fetch failed before submit");
                state
                    .errors
                    .push(TickError::new(TickPhase::Submission, &error));
                return Ok(skip_decision(bid, Some("job_fetch_failed".to_string()), None));
            }
        };

        let Some(assignment) = job.my_assignments.first() else {
            debug!(job_id = %bid.job_id, "no assignment yet; submission skipped");
            return Ok(skip_decision(bid, Some("missing_assignment".to_string()), None));
        };
        if assignment.is_submitted() {
            return Ok(skip_decision(
                bid,
                Some("assignment_already_submitted".to_string()),
                None,
            ));
        }
        let assignment_id = assignment.assignment_id.clone();

        let artifact = match self.artifacts.produce(&job, bid, &assignment_id).await {
            Ok(Some(artifact)) => artifact,
            Ok(None) => {
                return self
                    .record_submission_failure(
                        state,
                        bid,
                        &attempt_key,
                        &gate.next_state,
                        AutopilotError::ArtifactProvider(
                            "upstream produced no artifact".to_string(),
                        ),
                        Some(assignment_id),
                    )
                    .await;
            }
            Err(err) => {
                return self
                    .record_submission_failure(
                        state,
                        bid,
                        &attempt_key,
                        &gate.next_state,
                        AutopilotError::ArtifactProvider(err.to_string()),
                        Some(assignment_id),
                    )
                    .await;
            }
        };

        let manifest = DeliverableManifest {
            job_id: bid.job_id.clone(),
            assignment_id: assignment_id.clone(),
            bid_id: bid.bid_id.clone(),
            agent_id: self.agent_id.clone(),
            deliverable_url: artifact.deliverable_url.clone(),
            artifact_hash: artifact.artifact_hash.clone(),
            created_at: canonical(now),
            metadata: artifact.metadata.clone(),
        };

        let deliverable_hash = match &self.signing {
            Some((key, signer_id)) => sign(&manifest, key, signer_id)
                .phased(TickPhase::Submission)?
                .manifest_hash,
            None => manifest_hash(&manifest).phased(TickPhase::Submission)?,
        };

        let request = SubmissionRequest {
            deliverable: artifact.deliverable_url.clone(),
            deliverable_hash,
        };

        let submitted = match job.job_type {
            Some(JobType::Competition) => self.market.submit_entry(&bid.job_id, &request).await,
            _ => self.market.submit_work(&bid.job_id, &request).await,
        };

        match submitted {
            Ok(_) => {
                let done = mark_submission_succeeded(&gate.next_state, now);
                self.persist_attempt_state(&attempt_key, &done)
                    .await
                    .phased(TickPhase::Submission)?;
                self.emit(
                    "work_submitted",
                    serde_json::json!({
                        "jobId": bid.job_id,
                        "bidId": bid.bid_id,
                        "assignmentId": assignment_id,
                    }),
                );
                info!(job_id = %bid.job_id, bid_id = %bid.bid_id, "deliverable submitted");

                Ok(ExecutionDecision {
                    job_id: bid.job_id.clone(),
                    bid_id: bid.bid_id.clone(),
                    assignment_id: Some(assignment_id),
                    action: ExecutionAction::Submit,
                    reason: None,
                    next_attempt_at: None,
                })
            }
            Err(err) => {
                self.record_submission_failure(
                    state,
                    bid,
                    &attempt_key,
                    &gate.next_state,
                    AutopilotError::SubmissionFailed(err.to_string()),
                    Some(assignment_id),
                )
                .await
            }
        }
    }

    /// Persists the advanced retry state for a failed attempt and reports
    /// the decision that was acted on.
    async fn record_submission_failure(
        &self,
        state: &mut TickState,
        bid: &TrackedBid,
        attempt_key: &str,
        attempted: &SubmitAttemptState,
        error: AutopilotError,
        assignment_id: Option<String>,
    ) -> Result<ExecutionDecision, PhasedError> {
        let now = self.clock.now();
        let failed = apply_submission_failure(attempted, now, &self.policy);
        self.persist_attempt_state(attempt_key, &failed)
            .await
            .phased(TickPhase::Submission)?;

        warn!(
            job_id = %bid.job_id,
            bid_id = %bid.bid_id,
            attempts = failed.attempts,
            escalations = failed.escalations,
            error = %error,
            "submission attempt failed"
        );
        self.emit(
            "submission_failed",
            serde_json::json!({
                "jobId": bid.job_id,
                "bidId": bid.bid_id,
                "attempts": failed.attempts,
            }),
        );
        state
            .errors
            .push(TickError::new(TickPhase::Submission, &error));

        Ok(ExecutionDecision {
            job_id: bid.job_id.clone(),
            bid_id: bid.bid_id.clone(),
            assignment_id,
            action: ExecutionAction::Submit,
            reason: Some("attempt_failed".to_string()),
            next_attempt_at: failed.next_attempt_at,
        })
    }

    async fn load_attempt_state(
        &self,
        key: &str,
    ) -> Result<Option<SubmitAttemptState>, StoreError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(err) => {
                warn!(key, error = %err, "unreadable attempt state; reinitializing");
                Ok(None)
            }
        }
    }

    async fn persist_attempt_state(
        &self,
        key: &str,
        state: &SubmitAttemptState,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(state)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        self.store.set(key, &raw).await
    }

    async fn reconcile_settlements(
        &self,
        state: &mut TickState,
        limit: u32,
    ) -> Result<(), PhasedError> {
        let completed = match self
            .market
            .list_completed_jobs_for_worker(&self.agent_id, limit)
            .await
        {
            Ok(jobs) => jobs,
            Err(err) => {
                // Bids, withdrawals, and submissions are already committed;
                // reconciliation just waits for the next tick.
                let error = AutopilotError::Market(err);
                warn!(error = %error, "completed-jobs fetch failed; settlement deferred");
                state
                    .errors
                    .push(TickError::new(TickPhase::Settlement, &error));
                return Ok(());
            }
        };

        let settled = map_limit_settled(FANOUT_LIMIT, completed.clone(), |job| async move {
            match self
                .market
                .list_job_bids(&job.job_id, &PageQuery::default())
                .await
            {
                Ok(bids) => Ok((job.job_id, bids)),
                Err(err) => Err((job.job_id.clone(), err)),
            }
        })
        .await;

        let mut bids_by_job = BTreeMap::new();
        for outcome in settled {
            match outcome {
                Ok((job_id, bids)) => {
                    bids_by_job.insert(job_id, bids);
                }
                Err((job_id, err)) => {
                    let error = AutopilotError::Market(err);
                    state.errors.push(TickError {
                        phase: TickPhase::Settlement,
                        message: format!("bids for completed job {job_id}: {error}"),
                    });
                }
            }
        }

        state.settlements = build_settlement_report(
            &completed,
            &bids_by_job,
            &self.agent_id,
            self.near_price_usd,
        );

        self.advance_settlement_cursor(&state.settlements)
            .await
            .phased(TickPhase::Settlement)?;

        self.emit(
            "settlement_reconciled",
            serde_json::json!({
                "records": state.settlements.records.len(),
                "totalNear": state.settlements.total_near,
                "scannedJobs": state.settlements.scanned_jobs,
            }),
        );

        Ok(())
    }

    /// The cursor only ever moves forward, to the latest `updated_at` the
    /// report settled.
    async fn advance_settlement_cursor(
        &self,
        report: &SettlementReport,
    ) -> Result<(), StoreError> {
        let Some(latest) = report.latest_completed_at else {
            return Ok(());
        };

        let current = self
            .store
            .get(keys::SETTLEMENT_CURSOR)
            .await?
            .and_then(|raw| parse_canonical(&raw));

        if current.is_none_or(|cursor| latest > cursor) {
            self.store
                .set(keys::SETTLEMENT_CURSOR, &canonical(latest))
                .await?;
            debug!(cursor = %canonical(latest), "settlement cursor advanced");
        }

        Ok(())
    }

    /// Rebuilds the settlement report without bidding, withdrawing, or
    /// submitting. Backs the `reconcile` CLI command.
    pub async fn reconcile(&self, limit: u32) -> Result<SettlementReport, AutopilotError> {
        let mut state = TickState::default();
        self.reconcile_settlements(&mut state, limit)
            .await
            .map_err(|fatal| fatal.error)?;

        if let Some(first) = state.errors.first() {
            warn!(count = state.errors.len(), first = %first.message, "reconcile finished with errors");
        }
        Ok(state.settlements)
    }

    /// Calls `run_tick` on a steady cadence until the stop flag is raised
    /// or `max_ticks` is reached. Returns the number of ticks executed.
    pub async fn run_loop<F>(
        &self,
        options: LoopOptions,
        stop: Arc<AtomicBool>,
        mut on_tick: F,
    ) -> u64
    where
        F: FnMut(&TickResult),
    {
        let mut ticker =
            tokio::time::interval(StdDuration::from_millis(options.interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = options.interval_ms,
            max_ticks = options.max_ticks,
            "tick loop started"
        );

        let mut count = 0u64;
        loop {
            ticker.tick().await;
            if stop.load(Ordering::SeqCst) {
                break;
            }

            let result = self.run_tick().await;
            count += 1;
            on_tick(&result);

            if options.max_ticks.is_some_and(|max| count >= max) {
                break;
            }
            if stop.load(Ordering::SeqCst) {
                break;
            }
        }

        info!(ticks = count, "tick loop stopped");
        count
    }
}

fn skip_decision(
    bid: &TrackedBid,
    reason: Option<String>,
    next_attempt_at: Option<DateTime<Utc>>,
) -> ExecutionDecision {
    ExecutionDecision {
        job_id: bid.job_id.clone(),
        bid_id: bid.bid_id.clone(),
        assignment_id: None,
        action: ExecutionAction::Skip,
        reason,
        next_attempt_at,
    }
}

fn proposal_for(title: &str) -> String {
    format!(
        "Automated delivery for \"{title}\": scoped execution against the posted \
         requirements, content-addressed manifest on submission, delivery within the \
         quoted ETA."
    )
}
