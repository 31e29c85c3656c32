//! Workload identity, quality of service, and status mutation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::{Quantity, ResourceKind};

/// Priority at or above which a workload is never evicted.
pub const SYSTEM_CRITICAL_PRIORITY: i32 = 2_000_000_000;

/// Quality-of-service class assigned at admission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QosClass {
    /// Requests equal limits for every resource.
    Guaranteed,
    /// Requests set, limits above requests or unset.
    Burstable,
    /// No requests or limits at all.
    BestEffort,
}

/// Where the workload definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadOrigin {
    /// Scheduled by the control plane.
    ControlPlane,
    /// Defined by local node configuration.
    Static,
    /// Control-plane mirror of a static workload.
    Mirror,
}

/// A resident workload as seen by the eviction engine.
#[derive(Debug, Clone)]
pub struct WorkloadRef {
    pub name: String,
    pub namespace: String,
    pub priority: i32,
    pub qos: QosClass,
    pub origin: WorkloadOrigin,
    pub memory_request: Quantity,
    pub storage_request: Quantity,
    /// Whether the workload tolerates the memory-pressure taint; consulted by
    /// admission for best-effort candidates.
    pub tolerates_memory_pressure: bool,
}

impl WorkloadRef {
    /// Critical workloads are exempt from eviction: static and mirror
    /// workloads, and anything at or above the system-critical priority.
    pub fn is_critical(&self) -> bool {
        matches!(self.origin, WorkloadOrigin::Static | WorkloadOrigin::Mirror)
            || self.priority >= SYSTEM_CRITICAL_PRIORITY
    }

    /// The workload's request for the given resource family. Workloads carry
    /// no inode or pid requests, so those resolve to zero.
    pub fn request_for(&self, resource: ResourceKind) -> Quantity {
        match resource {
            ResourceKind::Memory => self.memory_request,
            ResourceKind::EphemeralStorage => self.storage_request,
            ResourceKind::Inodes | ResourceKind::Pids => Quantity::from_value(0),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Lifecycle phase recorded on an evicted workload's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkloadPhase {
    #[default]
    Running,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCondition {
    pub condition_type: String,
    pub status: String,
    pub reason: String,
    pub message: String,
}

/// The mutable slice of workload status the engine is allowed to touch when
/// evicting.
#[derive(Debug, Clone, Default)]
pub struct WorkloadStatus {
    pub phase: WorkloadPhase,
    pub reason: String,
    pub message: String,
    pub conditions: Vec<StatusCondition>,
}

/// Applied by the killer to the workload's status before termination.
pub type StatusMutator = Box<dyn Fn(&mut WorkloadStatus) + Send + Sync>;

/// Terminates a workload. The engine calls this at most once per synchronize
/// cycle; failures are logged and retried implicitly on the next cycle since
/// the underlying pressure persists.
#[async_trait]
pub trait WorkloadKiller: Send + Sync {
    async fn kill(
        &self,
        workload: &WorkloadRef,
        evict: bool,
        grace_period_override: Option<i64>,
        status_mutator: StatusMutator,
    ) -> anyhow::Result<()>;
}

/// Supplies the set of workloads currently resident on the node.
pub type ActiveWorkloadsFn = Arc<dyn Fn() -> Vec<WorkloadRef> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(priority: i32, origin: WorkloadOrigin) -> WorkloadRef {
        WorkloadRef {
            name: "w".to_string(),
            namespace: "default".to_string(),
            priority,
            qos: QosClass::Burstable,
            origin,
            memory_request: Quantity::from_value(0),
            storage_request: Quantity::from_value(0),
            tolerates_memory_pressure: false,
        }
    }

    #[test]
    fn test_critical_exemption() {
        assert!(!workload(0, WorkloadOrigin::ControlPlane).is_critical());
        assert!(workload(0, WorkloadOrigin::Static).is_critical());
        assert!(workload(0, WorkloadOrigin::Mirror).is_critical());
        assert!(workload(SYSTEM_CRITICAL_PRIORITY, WorkloadOrigin::ControlPlane).is_critical());
        assert!(!workload(SYSTEM_CRITICAL_PRIORITY - 1, WorkloadOrigin::ControlPlane).is_critical());
    }

    #[test]
    fn test_request_for_unrequestable_resources_is_zero() {
        let w = workload(0, WorkloadOrigin::ControlPlane);
        assert_eq!(w.request_for(ResourceKind::Inodes).value(), 0);
        assert_eq!(w.request_for(ResourceKind::Pids).value(), 0);
    }
}
