//! Durable keyed state for the autopilot.
//!
//! The store is a flat string-keyed map with atomic single-key writes and
//! prefix enumeration. It is the only durable shared resource; the
//! orchestrator is its sole writer in a single-process deployment.

pub mod file;
pub mod keys;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("state store io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store corrupt: {0}")]
    Corrupt(String),

    #[error("state store query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Keyed persistent map. Each `set` is crash-safe: after a crash the store
/// holds either the prior value or the full new value for a key, never a
/// truncated one. Serialization of values is the caller's concern; the
/// store moves opaque strings.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// All keys beginning with `prefix`, in ascending order.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}
