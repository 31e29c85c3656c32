//! Eviction ordering: which threshold to relieve, and which workload to
//! evict for it.

use std::cmp::Ordering;

use crate::stats::{Snapshot, WorkloadUsage};
use crate::types::{ResourceKind, Signal, Threshold};
use crate::workload::WorkloadRef;

/// Filesystem stats composed into a workload's attributable disk usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskSource {
    Root,
    Logs,
    LocalVolumes,
}

/// How per-workload usage of a signal is measured.
#[derive(Debug, Clone, PartialEq)]
pub enum UsageKind {
    /// Working-set bytes; also the effective usage for the allocatable pool.
    Memory,
    DiskBytes(Vec<DiskSource>),
    DiskInodes(Vec<DiskSource>),
    /// Process count; the effective usage for the pid pool.
    Processes,
}

impl UsageKind {
    pub fn usage(&self, workload: &WorkloadUsage) -> i64 {
        match self {
            UsageKind::Memory => workload.working_set_bytes as i64,
            UsageKind::DiskBytes(sources) => sources
                .iter()
                .map(|source| match source {
                    DiskSource::Root => workload.rootfs_bytes,
                    DiskSource::Logs => workload.logs_bytes,
                    DiskSource::LocalVolumes => workload.local_volumes_bytes,
                })
                .sum::<u64>() as i64,
            UsageKind::DiskInodes(sources) => sources
                .iter()
                .map(|source| match source {
                    DiskSource::Root => workload.rootfs_inodes,
                    DiskSource::Logs => workload.logs_inodes,
                    DiskSource::LocalVolumes => workload.local_volumes_inodes,
                })
                .sum::<u64>() as i64,
            UsageKind::Processes => workload.process_count as i64,
        }
    }
}

/// The ranking recipe for a signal: the resource requests are compared
/// against, and the usage measurement. `None` when the signal cannot rank
/// workloads under the current disk layout.
pub fn ranker_for_signal(
    signal: Signal,
    dedicated_image_fs: bool,
) -> Option<(ResourceKind, UsageKind)> {
    use DiskSource::*;
    match signal {
        Signal::MemoryAvailable | Signal::AllocatableMemoryAvailable => {
            Some((ResourceKind::Memory, UsageKind::Memory))
        }
        Signal::PidAvailable => Some((ResourceKind::Pids, UsageKind::Processes)),
        Signal::NodeFsAvailable => {
            let sources = if dedicated_image_fs {
                vec![Logs, LocalVolumes]
            } else {
                vec![Root, Logs, LocalVolumes]
            };
            Some((ResourceKind::EphemeralStorage, UsageKind::DiskBytes(sources)))
        }
        Signal::NodeFsInodesFree => {
            let sources = if dedicated_image_fs {
                vec![Logs, LocalVolumes]
            } else {
                vec![Root, Logs, LocalVolumes]
            };
            Some((ResourceKind::Inodes, UsageKind::DiskInodes(sources)))
        }
        Signal::ImageFsAvailable => dedicated_image_fs
            .then(|| (ResourceKind::EphemeralStorage, UsageKind::DiskBytes(vec![Root]))),
        Signal::ImageFsInodesFree => {
            dedicated_image_fs.then(|| (ResourceKind::Inodes, UsageKind::DiskInodes(vec![Root])))
        }
    }
}

/// Order met thresholds by eviction priority: any memory.available threshold
/// outranks everything else, and the remainder keep configuration order.
pub fn sort_by_eviction_priority(met: &mut [usize], thresholds: &[Threshold]) {
    met.sort_by_key(|&idx| {
        (
            thresholds[idx].signal != Signal::MemoryAvailable,
            idx,
        )
    });
}

/// Sort workloads into eviction order for one signal: first victim first.
///
/// Tiers, later tiers breaking earlier ties:
/// 1. critical-exempt workloads sort last;
/// 2. usage above requests sorts before usage within requests;
/// 3. lower priority sorts first;
/// 4. heavier absolute usage sorts first.
pub fn rank_workloads_for_eviction(
    workloads: &mut [WorkloadRef],
    snapshot: &Snapshot,
    resource: ResourceKind,
    usage_kind: &UsageKind,
) {
    workloads.sort_by(|a, b| {
        compare_for_eviction(a, b, snapshot, resource, usage_kind)
    });
}

fn usage_of(workload: &WorkloadRef, snapshot: &Snapshot, usage_kind: &UsageKind) -> i64 {
    snapshot
        .usage_for(&workload.namespace, &workload.name)
        .map(|u| usage_kind.usage(u))
        .unwrap_or(0)
}

fn compare_for_eviction(
    a: &WorkloadRef,
    b: &WorkloadRef,
    snapshot: &Snapshot,
    resource: ResourceKind,
    usage_kind: &UsageKind,
) -> Ordering {
    let a_usage = usage_of(a, snapshot, usage_kind);
    let b_usage = usage_of(b, snapshot, usage_kind);
    let a_exceeds = a_usage > a.request_for(resource).value();
    let b_exceeds = b_usage > b.request_for(resource).value();

    a.is_critical()
        .cmp(&b.is_critical())
        .then(b_exceeds.cmp(&a_exceeds))
        .then(a.priority.cmp(&b.priority))
        .then(b_usage.cmp(&a_usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Quantity, ThresholdValue};
    use crate::workload::{QosClass, WorkloadOrigin, SYSTEM_CRITICAL_PRIORITY};

    fn mib(n: u64) -> u64 {
        n * (1 << 20)
    }

    fn workload(name: &str, priority: i32, memory_request_mib: u64) -> WorkloadRef {
        WorkloadRef {
            name: name.to_string(),
            namespace: "default".to_string(),
            priority,
            qos: if memory_request_mib == 0 {
                QosClass::BestEffort
            } else {
                QosClass::Burstable
            },
            origin: WorkloadOrigin::ControlPlane,
            memory_request: Quantity::from_value(mib(memory_request_mib) as i64),
            storage_request: Quantity::from_value(0),
            tolerates_memory_pressure: false,
        }
    }

    fn memory_usage(name: &str, working_set_mib: u64) -> WorkloadUsage {
        WorkloadUsage {
            name: name.to_string(),
            namespace: "default".to_string(),
            working_set_bytes: mib(working_set_mib),
            ..Default::default()
        }
    }

    #[test]
    fn test_memory_ranking_tiers() {
        let mut snapshot = Snapshot::default();
        snapshot.workloads = vec![
            memory_usage("guaranteed-low-priority-high-usage", 900),
            memory_usage("burstable-below-requests", 50),
            memory_usage("burstable-above-requests", 400),
            memory_usage("best-effort-high-priority-high-usage", 400),
            memory_usage("best-effort-low-priority-low-usage", 100),
        ];

        let mut workloads = vec![
            workload("guaranteed-low-priority-high-usage", -1, 1024),
            workload("burstable-below-requests", 0, 100),
            workload("burstable-above-requests", 0, 100),
            workload("best-effort-high-priority-high-usage", 1, 0),
            workload("best-effort-low-priority-low-usage", -1, 0),
        ];

        rank_workloads_for_eviction(
            &mut workloads,
            &snapshot,
            ResourceKind::Memory,
            &UsageKind::Memory,
        );

        // Above-requests workloads first, the lowest priority among them on
        // top; within-requests workloads follow.
        let order: Vec<&str> = workloads.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "best-effort-low-priority-low-usage",
                "burstable-above-requests",
                "best-effort-high-priority-high-usage",
                "guaranteed-low-priority-high-usage",
                "burstable-below-requests",
            ]
        );
    }

    #[test]
    fn test_critical_workloads_rank_last() {
        let mut snapshot = Snapshot::default();
        snapshot.workloads = vec![
            memory_usage("critical", 900),
            memory_usage("ordinary", 100),
        ];

        let mut workloads = vec![
            workload("critical", SYSTEM_CRITICAL_PRIORITY, 0),
            workload("ordinary", 0, 0),
        ];
        rank_workloads_for_eviction(
            &mut workloads,
            &snapshot,
            ResourceKind::Memory,
            &UsageKind::Memory,
        );
        assert_eq!(workloads[0].name, "ordinary");
        assert_eq!(workloads[1].name, "critical");

        let mut workloads = vec![
            WorkloadRef {
                origin: WorkloadOrigin::Static,
                ..workload("critical", 0, 0)
            },
            workload("ordinary", 0, 0),
        ];
        rank_workloads_for_eviction(
            &mut workloads,
            &snapshot,
            ResourceKind::Memory,
            &UsageKind::Memory,
        );
        assert_eq!(workloads[0].name, "ordinary");
    }

    #[test]
    fn test_disk_usage_composes_configured_sources() {
        let usage = WorkloadUsage {
            rootfs_bytes: mib(400),
            logs_bytes: mib(100),
            local_volumes_bytes: mib(50),
            ..Default::default()
        };

        let shared = UsageKind::DiskBytes(vec![
            DiskSource::Root,
            DiskSource::Logs,
            DiskSource::LocalVolumes,
        ]);
        assert_eq!(shared.usage(&usage), mib(550) as i64);

        let dedicated = UsageKind::DiskBytes(vec![DiskSource::Logs, DiskSource::LocalVolumes]);
        assert_eq!(dedicated.usage(&usage), mib(150) as i64);
    }

    #[test]
    fn test_ranker_for_image_fs_requires_dedicated_layout() {
        assert!(ranker_for_signal(Signal::ImageFsAvailable, false).is_none());
        assert!(ranker_for_signal(Signal::ImageFsAvailable, true).is_some());
        assert!(ranker_for_signal(Signal::NodeFsAvailable, false).is_some());
    }

    #[test]
    fn test_eviction_priority_memory_first_then_config_order() {
        let thresholds = vec![
            Threshold::hard(
                Signal::NodeFsAvailable,
                ThresholdValue::Quantity(Quantity::from_value(1)),
            ),
            Threshold::hard(
                Signal::PidAvailable,
                ThresholdValue::Quantity(Quantity::from_value(1)),
            ),
            Threshold::hard(
                Signal::MemoryAvailable,
                ThresholdValue::Quantity(Quantity::from_value(1)),
            ),
        ];
        let mut met = vec![0, 1, 2];
        sort_by_eviction_priority(&mut met, &thresholds);
        assert_eq!(met, vec![2, 0, 1]);
    }

    #[test]
    fn test_missing_usage_ranks_as_zero() {
        let snapshot = Snapshot::default();
        let mut workloads = vec![workload("no-stats", 0, 0), workload("other", 0, 0)];
        // Neither workload has usage; the order is stable and nothing panics.
        rank_workloads_for_eviction(
            &mut workloads,
            &snapshot,
            ResourceKind::Memory,
            &UsageKind::Memory,
        );
        assert_eq!(workloads.len(), 2);
    }
}
