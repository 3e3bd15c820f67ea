//! Error types for cache operations.

use thiserror::Error;

use crate::types::WorkloadId;

/// Errors that can occur when mutating or querying the placement cache.
///
/// Every precondition miss surfaces as one of these variants; the cache
/// never silently swallows a failed contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The workload is not known to the cache.
    #[error("workload not found: {0}")]
    NotFound(WorkloadId),

    /// The workload identity is already tracked (assumed or bound).
    #[error("workload already present: {0}")]
    AlreadyPresent(WorkloadId),

    /// An authoritative add arrived for an identity that is already bound.
    #[error("workload already bound: {0}")]
    AlreadyBound(WorkloadId),

    /// The operation requires an assumed workload but the identity is bound.
    #[error("workload is not assumed: {0}")]
    NotAssumed(WorkloadId),

    /// The operation requires a bound workload but the identity is still assumed.
    #[error("workload is still assumed: {0}")]
    StillAssumed(WorkloadId),

    /// The workload's host does not match the cached assignment.
    #[error("host mismatch for {id}: cached '{cached}', got '{actual}'")]
    HostMismatch {
        id: WorkloadId,
        cached: String,
        actual: String,
    },

    /// The operation requires a host assignment but the workload has none.
    #[error("workload has no host assignment: {0}")]
    MissingHost(WorkloadId),

    /// A resize annotation could not be parsed.
    #[error("malformed resize payload: {0}")]
    Parse(String),

    /// Internal bookkeeping is inconsistent.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Parse(err.to_string())
    }
}
