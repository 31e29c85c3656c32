//! Container runtime integration points.
//!
//! The engine consumes the runtime through capability traits. Until a real
//! runtime integration is wired in, these implementations surface each
//! request as an error so the failure is visible in logs and events instead
//! of being silently dropped.

use anyhow::{bail, Result};
use async_trait::async_trait;

use eviction_agent_lib::reclaim::{ContainerGc, ImageGc};
use eviction_agent_lib::stats::DiskLayoutProvider;
use eviction_agent_lib::workload::{StatusMutator, WorkloadKiller, WorkloadRef};

/// Placeholder for the container runtime until one is configured.
pub struct UnconfiguredRuntime;

#[async_trait]
impl WorkloadKiller for UnconfiguredRuntime {
    async fn kill(
        &self,
        workload: &WorkloadRef,
        _evict: bool,
        _grace_period_override: Option<i64>,
        _status_mutator: StatusMutator,
    ) -> Result<()> {
        bail!(
            "no container runtime integration configured to kill {}",
            workload.qualified_name()
        )
    }
}

#[async_trait]
impl ImageGc for UnconfiguredRuntime {
    async fn delete_unused_images(&self) -> Result<()> {
        bail!("no container runtime integration configured for image garbage collection")
    }
}

#[async_trait]
impl ContainerGc for UnconfiguredRuntime {
    async fn delete_all_unused_containers(&self) -> Result<()> {
        bail!("no container runtime integration configured for container garbage collection")
    }
}

/// Disk layout answered from configuration rather than probed at runtime.
pub struct StaticDiskLayout {
    dedicated_image_fs: bool,
}

impl StaticDiskLayout {
    pub fn new(dedicated_image_fs: bool) -> Self {
        StaticDiskLayout { dedicated_image_fs }
    }
}

#[async_trait]
impl DiskLayoutProvider for StaticDiskLayout {
    async fn has_dedicated_image_fs(&self) -> Result<bool> {
        Ok(self.dedicated_image_fs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_runtime_surfaces_errors() {
        let runtime = UnconfiguredRuntime;
        assert!(runtime.delete_unused_images().await.is_err());
        assert!(runtime.delete_all_unused_containers().await.is_err());
    }

    #[tokio::test]
    async fn test_static_disk_layout() {
        assert!(StaticDiskLayout::new(true)
            .has_dedicated_image_fs()
            .await
            .unwrap());
        assert!(!StaticDiskLayout::new(false)
            .has_dedicated_image_fs()
            .await
            .unwrap());
    }
}
