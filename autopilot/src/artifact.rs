//! Seam to the artifact-producing upstream.
//!
//! Deliverable content itself comes from outside the autopilot; this trait
//! is the boundary. A `None` artifact means the upstream had nothing for
//! the assignment, which the orchestrator treats as a submission failure so
//! the retry machine paces further attempts.

use async_trait::async_trait;

use engine::canonical::sha256_hex;
use market::types::{MarketJob, TrackedBid};

#[derive(Clone, Debug)]
pub struct Artifact {
    pub deliverable_url: String,
    pub artifact_hash: String,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait ArtifactProvider: Send + Sync {
    async fn produce(
        &self,
        job: &MarketJob,
        bid: &TrackedBid,
        assignment_id: &str,
    ) -> anyhow::Result<Option<Artifact>>;
}

/// Points every submission at a fixed upstream URL, content-addressed per
/// assignment. Used when the deployment publishes artifacts at a known
/// location keyed by job and assignment.
pub struct StaticArtifactProvider {
    base_url: String,
}

impl StaticArtifactProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ArtifactProvider for StaticArtifactProvider {
    async fn produce(
        &self,
        job: &MarketJob,
        _bid: &TrackedBid,
        assignment_id: &str,
    ) -> anyhow::Result<Option<Artifact>> {
        let deliverable_url = format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            job.job_id,
            assignment_id
        );
        let artifact_hash = sha256_hex(deliverable_url.as_bytes());

        Ok(Some(Artifact {
            deliverable_url,
            artifact_hash,
            metadata: serde_json::json!({
                "source": "static",
                "jobTitle": job.title,
            }),
        }))
    }
}

/// Upstream not configured: every produce call yields nothing.
pub struct NullArtifactProvider;

#[async_trait]
impl ArtifactProvider for NullArtifactProvider {
    async fn produce(
        &self,
        _job: &MarketJob,
        _bid: &TrackedBid,
        _assignment_id: &str,
    ) -> anyhow::Result<Option<Artifact>> {
        Ok(None)
    }
}
