//! Node statistics snapshots and the capabilities that supply them.
//!
//! Snapshots are immutable per-cycle values: the engine never retains a
//! reference to one across cycles beyond the aggregated observation state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Memory statistics for the node or for a logical pool.
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub available_bytes: Option<u64>,
    pub working_set_bytes: Option<u64>,
    /// Total usage including reclaimable page cache; used to derive the
    /// inactive-file share when arming kernel watermarks.
    pub usage_bytes: Option<u64>,
}

/// Filesystem statistics for one device.
#[derive(Debug, Clone, Default)]
pub struct FsStats {
    pub available_bytes: Option<u64>,
    pub capacity_bytes: Option<u64>,
    pub inodes_free: Option<u64>,
    pub inodes: Option<u64>,
}

/// Process-id accounting for the node.
#[derive(Debug, Clone, Default)]
pub struct PidStats {
    pub max_pids: Option<u64>,
    pub num_processes: Option<u64>,
}

/// Node-level statistics.
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    pub memory: MemoryStats,
    /// Memory stats of the workload pool (every admitted workload counted at
    /// node scope); the basis for the allocatable signal.
    pub allocatable: MemoryStats,
    /// The node root filesystem.
    pub fs: FsStats,
    /// The filesystem holding container images; identical to `fs` unless the
    /// disk layout dedicates a device to images.
    pub image_fs: FsStats,
    pub pids: PidStats,
}

/// Per-workload usage, attributable per signal.
#[derive(Debug, Clone, Default)]
pub struct WorkloadUsage {
    pub name: String,
    pub namespace: String,
    pub working_set_bytes: u64,
    pub rootfs_bytes: u64,
    pub logs_bytes: u64,
    pub local_volumes_bytes: u64,
    pub rootfs_inodes: u64,
    pub logs_inodes: u64,
    pub local_volumes_inodes: u64,
    pub process_count: u64,
}

/// One stats snapshot: node-level observations plus per-workload usages.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub node: NodeStats,
    pub workloads: Vec<WorkloadUsage>,
    /// When the underlying statistics were collected. Cycles only act on
    /// thresholds whose stats are fresher than the previous cycle's.
    pub recorded_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn usage_for(&self, namespace: &str, name: &str) -> Option<&WorkloadUsage> {
        self.workloads
            .iter()
            .find(|w| w.namespace == namespace && w.name == name)
    }
}

/// Supplies one fresh stats snapshot per call.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn get(&self) -> anyhow::Result<Snapshot>;
}

/// Reports whether container images live on their own filesystem. Probed once
/// at the first synchronize; the answer selects ranking and reclaim behavior
/// for the disk signals.
#[async_trait]
pub trait DiskLayoutProvider: Send + Sync {
    async fn has_dedicated_image_fs(&self) -> anyhow::Result<bool>;
}
