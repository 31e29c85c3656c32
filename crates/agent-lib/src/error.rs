//! Error kinds surfaced by the eviction engine.
//!
//! Configuration errors are fatal at construction. Everything else is
//! recovered locally inside the synchronize loop: the failing step is logged
//! and the cycle continues (or is skipped entirely for snapshot failures).

use thiserror::Error;

use crate::types::Signal;

#[derive(Debug, Error)]
pub enum EvictionError {
    #[error("failed to fetch stats snapshot: {0}")]
    SnapshotFetch(#[source] anyhow::Error),

    #[error("reclaim action for {signal} failed: {source}")]
    ReclaimAction {
        signal: Signal,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to kill workload {workload}: {source}")]
    KillWorkload {
        workload: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("threshold notifier {description} failed to update: {source}")]
    NotifierUpdate {
        description: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid eviction configuration: {0}")]
    ConfigInvalid(String),
}
