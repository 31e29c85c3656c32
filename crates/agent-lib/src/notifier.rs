//! Kernel memory-cgroup watermark subscriptions for memory thresholds.
//!
//! Each memory-family threshold gets one [`MemoryThresholdNotifier`]. On
//! refresh it recomputes the kernel watermark from the latest snapshot and
//! re-installs the subscription through the injected factory; kernel
//! crossings are forwarded into the engine's wakeup channel, where at most
//! one pending wakeup is retained.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::stats::{MemoryStats, Snapshot};
use crate::types::{Quantity, Signal, Threshold};

/// How often watermark subscriptions are refreshed against fresh statistics,
/// absent a capacity change.
pub const NOTIFIER_REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);

/// A memory threshold notifier, refreshed by the synchronize loop.
#[async_trait]
pub trait ThresholdNotifier: Send + Sync {
    /// Recompute and re-install the kernel subscription for the given
    /// snapshot.
    async fn update_threshold(&self, snapshot: &Snapshot) -> anyhow::Result<()>;

    /// Human-readable identity, logged when an update fails.
    fn description(&self) -> String;
}

/// A live kernel watermark subscription. Implementations forward each
/// crossing into the wakeup sender (with `try_send`, so pending wakeups
/// coalesce) until stopped or dropped.
#[async_trait]
pub trait CgroupNotifier: Send + Sync {
    async fn start(&self, wakeup: mpsc::Sender<()>);
    fn stop(&self);
}

/// Installs kernel watermark subscriptions on a memory cgroup.
pub trait CgroupNotifierFactory: Send + Sync {
    fn new_notifier(
        &self,
        cgroup_path: &str,
        threshold_bytes: u64,
    ) -> anyhow::Result<Arc<dyn CgroupNotifier>>;
}

/// Converts one memory threshold into a kernel watermark subscription.
pub struct MemoryThresholdNotifier {
    threshold: Threshold,
    cgroup_path: String,
    factory: Arc<dyn CgroupNotifierFactory>,
    wakeup: mpsc::Sender<()>,
    current: Mutex<Option<Arc<dyn CgroupNotifier>>>,
}

impl MemoryThresholdNotifier {
    /// The allocatable signal watches the workload pool cgroup; plain memory
    /// pressure watches the root cgroup.
    pub fn new(
        threshold: Threshold,
        workload_cgroup_root: &str,
        factory: Arc<dyn CgroupNotifierFactory>,
        wakeup: mpsc::Sender<()>,
    ) -> Self {
        let cgroup_path = if threshold.signal == Signal::AllocatableMemoryAvailable {
            workload_cgroup_root.to_string()
        } else {
            "/".to_string()
        };
        MemoryThresholdNotifier {
            threshold,
            cgroup_path,
            factory,
            wakeup,
            current: Mutex::new(None),
        }
    }

    fn pool_stats<'a>(&self, snapshot: &'a Snapshot) -> &'a MemoryStats {
        if self.threshold.signal == Signal::AllocatableMemoryAvailable {
            &snapshot.node.allocatable
        } else {
            &snapshot.node.memory
        }
    }
}

/// The watermark fires when working-set crosses into the pressured band:
/// capacity minus the resolved threshold, plus the inactive-file pages the
/// kernel counts toward usage but not toward the working set.
pub fn watermark_bytes(threshold: &Threshold, stats: &MemoryStats) -> anyhow::Result<u64> {
    let available = stats
        .available_bytes
        .context("memory available bytes missing from snapshot")?;
    let working_set = stats
        .working_set_bytes
        .context("memory working set bytes missing from snapshot")?;
    let capacity = available + working_set;
    let inactive_file = stats
        .usage_bytes
        .map(|usage| usage.saturating_sub(working_set))
        .unwrap_or(0);
    let resolved = threshold
        .value
        .resolve(Quantity::from_value(capacity as i64))
        .value()
        .max(0) as u64;
    Ok(capacity.saturating_sub(resolved) + inactive_file)
}

#[async_trait]
impl ThresholdNotifier for MemoryThresholdNotifier {
    async fn update_threshold(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let watermark = watermark_bytes(&self.threshold, self.pool_stats(snapshot))?;
        let notifier = self.factory.new_notifier(&self.cgroup_path, watermark)?;

        let started = notifier.clone();
        let wakeup = self.wakeup.clone();
        tokio::spawn(async move {
            started.start(wakeup).await;
        });

        let mut current = self.current.lock().expect("notifier lock poisoned");
        if let Some(previous) = current.replace(notifier) {
            previous.stop();
        }
        Ok(())
    }

    fn description(&self) -> String {
        format!("{} memory threshold notifier", self.threshold.signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ThresholdValue;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct RecordingFactory {
        last_path: Mutex<Option<String>>,
        last_threshold: AtomicU64,
    }

    impl RecordingFactory {
        fn new() -> Arc<Self> {
            Arc::new(RecordingFactory {
                last_path: Mutex::new(None),
                last_threshold: AtomicU64::new(0),
            })
        }
    }

    struct NoopNotifier;

    #[async_trait]
    impl CgroupNotifier for NoopNotifier {
        async fn start(&self, _wakeup: mpsc::Sender<()>) {}
        fn stop(&self) {}
    }

    impl CgroupNotifierFactory for RecordingFactory {
        fn new_notifier(
            &self,
            cgroup_path: &str,
            threshold_bytes: u64,
        ) -> anyhow::Result<Arc<dyn CgroupNotifier>> {
            *self.last_path.lock().unwrap() = Some(cgroup_path.to_string());
            self.last_threshold.store(threshold_bytes, Ordering::SeqCst);
            Ok(Arc::new(NoopNotifier))
        }
    }

    fn gib(n: u64) -> u64 {
        n * (1 << 30)
    }

    fn memory_threshold(value: &str) -> Threshold {
        Threshold::hard(
            Signal::MemoryAvailable,
            ThresholdValue::Quantity(Quantity::parse(value).unwrap()),
        )
    }

    #[test]
    fn test_watermark_capacity_minus_threshold_plus_inactive_file() {
        let stats = MemoryStats {
            available_bytes: Some(gib(6)),
            working_set_bytes: Some(gib(2)),
            usage_bytes: Some(gib(3)),
        };
        // capacity 8Gi, threshold 1Gi, inactive file 1Gi.
        let watermark = watermark_bytes(&memory_threshold("1Gi"), &stats).unwrap();
        assert_eq!(watermark, gib(8));
    }

    #[test]
    fn test_watermark_without_usage_stats() {
        let stats = MemoryStats {
            available_bytes: Some(gib(6)),
            working_set_bytes: Some(gib(2)),
            usage_bytes: None,
        };
        let watermark = watermark_bytes(&memory_threshold("1Gi"), &stats).unwrap();
        assert_eq!(watermark, gib(7));
    }

    #[test]
    fn test_watermark_requires_memory_stats() {
        let stats = MemoryStats::default();
        assert!(watermark_bytes(&memory_threshold("1Gi"), &stats).is_err());
    }

    #[tokio::test]
    async fn test_update_threshold_installs_subscription() {
        let factory = RecordingFactory::new();
        let (tx, _rx) = mpsc::channel(1);
        let notifier = MemoryThresholdNotifier::new(
            memory_threshold("1Gi"),
            "/workloads",
            factory.clone(),
            tx,
        );

        let mut snapshot = Snapshot::default();
        snapshot.node.memory = MemoryStats {
            available_bytes: Some(gib(6)),
            working_set_bytes: Some(gib(2)),
            usage_bytes: None,
        };
        notifier.update_threshold(&snapshot).await.unwrap();

        assert_eq!(factory.last_path.lock().unwrap().as_deref(), Some("/"));
        assert_eq!(factory.last_threshold.load(Ordering::SeqCst), gib(7));
    }

    #[tokio::test]
    async fn test_allocatable_notifier_watches_workload_cgroup() {
        let factory = RecordingFactory::new();
        let (tx, _rx) = mpsc::channel(1);
        let threshold = Threshold::hard(
            Signal::AllocatableMemoryAvailable,
            ThresholdValue::Quantity(Quantity::parse("1Gi").unwrap()),
        );
        let notifier =
            MemoryThresholdNotifier::new(threshold, "/workloads", factory.clone(), tx);

        let mut snapshot = Snapshot::default();
        snapshot.node.allocatable = MemoryStats {
            available_bytes: Some(gib(3)),
            working_set_bytes: Some(gib(1)),
            usage_bytes: None,
        };
        notifier.update_threshold(&snapshot).await.unwrap();

        assert_eq!(
            factory.last_path.lock().unwrap().as_deref(),
            Some("/workloads")
        );
        assert_eq!(factory.last_threshold.load(Ordering::SeqCst), gib(3));
    }

    #[test]
    fn test_description_names_signal() {
        let factory = RecordingFactory::new();
        let (tx, _rx) = mpsc::channel(1);
        let notifier =
            MemoryThresholdNotifier::new(memory_threshold("1Gi"), "/workloads", factory, tx);
        assert_eq!(
            notifier.description(),
            "memory.available memory threshold notifier"
        );
    }
}
