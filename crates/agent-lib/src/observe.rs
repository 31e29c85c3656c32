//! Signal observation: a pure projection of one stats snapshot onto the
//! signal set. No side effects, no I/O; signals whose underlying statistics
//! are absent from the snapshot simply produce no observation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::stats::Snapshot;
use crate::types::{Quantity, Signal};

/// One measured signal: the available amount and the capacity it is measured
/// against, stamped with the snapshot collection time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalObservation {
    pub available: Quantity,
    pub capacity: Quantity,
    pub time: Option<DateTime<Utc>>,
}

pub type Observations = HashMap<Signal, SignalObservation>;

/// Derive the signal observations for one snapshot.
pub fn signal_observations(snapshot: &Snapshot) -> Observations {
    let mut observations = Observations::new();
    let time = snapshot.recorded_at;
    let node = &snapshot.node;

    if let (Some(available), Some(working_set)) = (
        node.memory.available_bytes,
        node.memory.working_set_bytes,
    ) {
        observations.insert(
            Signal::MemoryAvailable,
            SignalObservation {
                available: Quantity::from_value(available as i64),
                capacity: Quantity::from_value((available + working_set) as i64),
                time,
            },
        );
    }

    // The allocatable pool: capacity comes from the workload-pool stats, and
    // availability is that capacity minus the sum of every workload's working
    // set. The result can go negative when the pool is overcommitted.
    if let (Some(available), Some(working_set)) = (
        node.allocatable.available_bytes,
        node.allocatable.working_set_bytes,
    ) {
        let capacity = (available + working_set) as i64;
        let used: i64 = snapshot
            .workloads
            .iter()
            .map(|w| w.working_set_bytes as i64)
            .sum();
        observations.insert(
            Signal::AllocatableMemoryAvailable,
            SignalObservation {
                available: Quantity::from_value(capacity - used),
                capacity: Quantity::from_value(capacity),
                time,
            },
        );
    }

    if let (Some(available), Some(capacity)) = (node.fs.available_bytes, node.fs.capacity_bytes) {
        observations.insert(
            Signal::NodeFsAvailable,
            SignalObservation {
                available: Quantity::from_value(available as i64),
                capacity: Quantity::from_value(capacity as i64),
                time,
            },
        );
    }
    if let (Some(free), Some(inodes)) = (node.fs.inodes_free, node.fs.inodes) {
        observations.insert(
            Signal::NodeFsInodesFree,
            SignalObservation {
                available: Quantity::from_value(free as i64),
                capacity: Quantity::from_value(inodes as i64),
                time,
            },
        );
    }

    if let (Some(available), Some(capacity)) =
        (node.image_fs.available_bytes, node.image_fs.capacity_bytes)
    {
        observations.insert(
            Signal::ImageFsAvailable,
            SignalObservation {
                available: Quantity::from_value(available as i64),
                capacity: Quantity::from_value(capacity as i64),
                time,
            },
        );
    }
    if let (Some(free), Some(inodes)) = (node.image_fs.inodes_free, node.image_fs.inodes) {
        observations.insert(
            Signal::ImageFsInodesFree,
            SignalObservation {
                available: Quantity::from_value(free as i64),
                capacity: Quantity::from_value(inodes as i64),
                time,
            },
        );
    }

    if let (Some(max_pids), Some(num_processes)) = (node.pids.max_pids, node.pids.num_processes) {
        observations.insert(
            Signal::PidAvailable,
            SignalObservation {
                available: Quantity::from_value(max_pids as i64 - num_processes as i64),
                capacity: Quantity::from_value(max_pids as i64),
                time,
            },
        );
    }

    observations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{MemoryStats, PidStats, WorkloadUsage};

    fn mib(n: u64) -> u64 {
        n * (1 << 20)
    }

    #[test]
    fn test_memory_observation_capacity_is_available_plus_working_set() {
        let mut snapshot = Snapshot::default();
        snapshot.node.memory = MemoryStats {
            available_bytes: Some(mib(1500)),
            working_set_bytes: Some(mib(500)),
            usage_bytes: None,
        };

        let observations = signal_observations(&snapshot);
        let obs = &observations[&Signal::MemoryAvailable];
        assert_eq!(obs.available.value(), mib(1500) as i64);
        assert_eq!(obs.capacity.value(), mib(2000) as i64);
    }

    #[test]
    fn test_allocatable_observation_subtracts_workload_working_sets() {
        let mut snapshot = Snapshot::default();
        snapshot.node.allocatable = MemoryStats {
            available_bytes: Some(mib(500)),
            working_set_bytes: Some(mib(500)),
            usage_bytes: None,
        };
        snapshot.workloads = vec![
            WorkloadUsage {
                name: "a".into(),
                namespace: "default".into(),
                working_set_bytes: mib(900),
                ..Default::default()
            },
            WorkloadUsage {
                name: "b".into(),
                namespace: "default".into(),
                working_set_bytes: mib(400),
                ..Default::default()
            },
        ];

        let observations = signal_observations(&snapshot);
        let obs = &observations[&Signal::AllocatableMemoryAvailable];
        assert_eq!(obs.capacity.value(), mib(1000) as i64);
        // Overcommitted: 1000Mi pool minus 1300Mi of working sets.
        assert_eq!(obs.available.value(), mib(1000) as i64 - mib(1300) as i64);
    }

    #[test]
    fn test_pid_observation() {
        let mut snapshot = Snapshot::default();
        snapshot.node.pids = PidStats {
            max_pids: Some(32768),
            num_processes: Some(1000),
        };

        let observations = signal_observations(&snapshot);
        let obs = &observations[&Signal::PidAvailable];
        assert_eq!(obs.available.value(), 31768);
        assert_eq!(obs.capacity.value(), 32768);
    }

    #[test]
    fn test_absent_stats_produce_no_observation() {
        let snapshot = Snapshot::default();
        let observations = signal_observations(&snapshot);
        assert!(observations.is_empty());
    }

    #[test]
    fn test_observation_carries_snapshot_time() {
        let mut snapshot = Snapshot::default();
        snapshot.recorded_at = Some(Utc::now());
        snapshot.node.pids = PidStats {
            max_pids: Some(100),
            num_processes: Some(10),
        };

        let observations = signal_observations(&snapshot);
        assert_eq!(
            observations[&Signal::PidAvailable].time,
            snapshot.recorded_at
        );
    }
}
