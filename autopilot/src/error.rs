use thiserror::Error;

use engine::manifest::SignError;
use engine::policy::PolicyError;
use engine::simulator::SimulationError;
use market::errors::MarketError;
use store::StoreError;

/// Top-level error taxonomy. Config and state-store failures are fatal;
/// everything else is recorded per tick and handled by the retry machinery.
#[derive(Error, Debug)]
pub enum AutopilotError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("market client failure: {0}")]
    Market(#[from] MarketError),

    #[error("state store failure: {0}")]
    StateStore(#[from] StoreError),

    #[error("artifact provider failure: {0}")]
    ArtifactProvider(String),

    #[error("submission rejected: {0}")]
    SubmissionFailed(String),

    #[error("withdraw rejected for bid {bid_id}: {reason}")]
    WithdrawFailed { bid_id: String, reason: String },

    #[error("manifest signature mismatch")]
    SignatureMismatch,
}

impl From<PolicyError> for AutopilotError {
    fn from(err: PolicyError) -> Self {
        AutopilotError::ConfigInvalid(err.to_string())
    }
}

impl From<SignError> for AutopilotError {
    fn from(err: SignError) -> Self {
        match err {
            SignError::SignatureMismatch => AutopilotError::SignatureMismatch,
            other => AutopilotError::ConfigInvalid(other.to_string()),
        }
    }
}

impl From<SimulationError> for AutopilotError {
    fn from(err: SimulationError) -> Self {
        AutopilotError::ConfigInvalid(err.to_string())
    }
}
