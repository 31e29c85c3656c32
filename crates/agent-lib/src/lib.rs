//! Eviction engine library for the node agent
//!
//! This crate provides the core functionality for:
//! - Deriving pressure signals from node statistics snapshots
//! - Threshold evaluation with soft/hard semantics and grace periods
//! - Node condition advertisement with transition hysteresis
//! - Node-level reclaim (image and container garbage collection)
//! - Ranking and evicting workloads under sustained pressure
//! - Admission gating and kernel memory watermark notifications

pub mod clock;
pub mod error;
pub mod events;
pub mod manager;
pub mod notifier;
pub mod observability;
pub mod observe;
pub mod rank;
pub mod reclaim;
pub mod stats;
pub mod thresholds;
pub mod types;
pub mod workload;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::EvictionError;
pub use events::{EventReason, EventRecorder, LogEventRecorder, NodeEvent};
pub use manager::{
    AdmissionResult, EvictionConfig, EvictionManager, EvictionManagerBuilder, REASON_EVICTED,
};
pub use observability::EvictionMetrics;
pub use stats::{
    DiskLayoutProvider, FsStats, MemoryStats, NodeStats, PidStats, Snapshot, SnapshotProvider,
    WorkloadUsage,
};
pub use types::{
    NodeCondition, Quantity, ResourceKind, Signal, Threshold, ThresholdOperator, ThresholdValue,
};
pub use workload::{
    ActiveWorkloadsFn, QosClass, StatusMutator, WorkloadKiller, WorkloadOrigin, WorkloadRef,
    WorkloadStatus, SYSTEM_CRITICAL_PRIORITY,
};
