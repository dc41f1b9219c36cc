//! Errors returned by the cache and queue manager

/// Errors from cache and queue manager bookkeeping
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The ClusterQueue has not been added (or was already deleted)
    #[error("cluster queue {0} not found")]
    ClusterQueueNotFound(String),

    /// The ClusterQueue was added twice
    #[error("cluster queue {0} already exists")]
    ClusterQueueAlreadyExists(String),

    /// Summed usage of a resource does not fit in a quantity
    #[error("cluster queue {cluster_queue} usage of {resource} overflows")]
    UsageOverflow {
        /// Name of the ClusterQueue whose usage overflowed
        cluster_queue: String,
        /// Name of the resource whose usage overflowed
        resource: String,
    },

    /// A workload carried requests that could not be accounted
    #[error("{0}")]
    InvalidWorkload(#[from] kueue_common::Error),
}
