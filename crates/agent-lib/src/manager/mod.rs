//! The eviction manager: the periodic synchronize loop that turns one stats
//! snapshot and the configured thresholds into node pressure conditions,
//! node-level reclaim, and at most one workload eviction per cycle.
//!
//! The loop owns all mutable engine state. Admission and the pressure
//! queries run on caller tasks against an immutable condition set the loop
//! swaps atomically at the end of each cycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::EvictionError;
use crate::events::{EventReason, EventRecorder, NodeEvent};
use crate::observability::EvictionMetrics;
use crate::observe::{signal_observations, Observations};
use crate::rank::{rank_workloads_for_eviction, ranker_for_signal, sort_by_eviction_priority};
use crate::reclaim::{reclaim_actions_for_signal, ContainerGc, ImageGc, ReclaimAction};
use crate::stats::{DiskLayoutProvider, Snapshot, SnapshotProvider};
use crate::thresholds::{
    chrono_duration, conditions_last_observed_at, conditions_observed_since, first_observed_at,
    merge_indices, node_conditions, thresholds_met, thresholds_met_grace_period,
    thresholds_updated_stats,
};
use crate::notifier::{
    CgroupNotifierFactory, MemoryThresholdNotifier, ThresholdNotifier, NOTIFIER_REFRESH_INTERVAL,
};
use crate::types::{NodeCondition, Signal, Threshold};
use crate::workload::{
    ActiveWorkloadsFn, QosClass, StatusCondition, StatusMutator, WorkloadKiller, WorkloadPhase,
    WorkloadRef, WorkloadStatus,
};


/// Status reason set on evicted workloads and on admission rejections.
pub const REASON_EVICTED: &str = "Evicted";
/// Condition appended to evicted workloads when disruption conditions are
/// enabled.
pub const DISRUPTION_TARGET_CONDITION: &str = "DisruptionTarget";
pub const DISRUPTION_TARGET_REASON: &str = "TerminationByKubelet";

/// Eviction engine configuration. Validated at construction; an invalid
/// configuration never produces a manager.
#[derive(Debug, Clone)]
pub struct EvictionConfig {
    pub thresholds: Vec<Threshold>,
    /// Hysteresis window: how long a condition stays advertised after the
    /// last time one of its thresholds was met.
    pub pressure_transition_period: Duration,
    /// Grace period granted to workloads evicted for a soft threshold.
    pub max_workload_grace_period_secs: i64,
    /// Cgroup holding every workload; watched by the allocatable-memory
    /// notifier.
    pub workload_cgroup_root: String,
    /// Whether evicted workloads also get a disruption-target condition.
    pub enable_disruption_conditions: bool,
    /// Base interval of the synchronize loop.
    pub monitoring_interval: Duration,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        EvictionConfig {
            thresholds: Vec::new(),
            pressure_transition_period: Duration::from_secs(5 * 60),
            max_workload_grace_period_secs: 0,
            workload_cgroup_root: "/workloads".to_string(),
            enable_disruption_conditions: false,
            monitoring_interval: Duration::from_secs(10),
        }
    }
}

impl EvictionConfig {
    pub fn validate(&self) -> Result<(), EvictionError> {
        if self.pressure_transition_period.is_zero() {
            return Err(EvictionError::ConfigInvalid(
                "pressure transition period must be positive".to_string(),
            ));
        }
        if self.monitoring_interval.is_zero() {
            return Err(EvictionError::ConfigInvalid(
                "monitoring interval must be positive".to_string(),
            ));
        }
        if self.max_workload_grace_period_secs < 0 {
            return Err(EvictionError::ConfigInvalid(
                "max workload grace period must be non-negative".to_string(),
            ));
        }
        for threshold in &self.thresholds {
            threshold.validate()?;
        }
        Ok(())
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionResult {
    pub admit: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl AdmissionResult {
    fn admitted() -> Self {
        AdmissionResult {
            admit: true,
            reason: None,
            message: None,
        }
    }
}

/// Mutable engine state, owned exclusively by the synchronize loop.
#[derive(Default)]
struct EngineState {
    /// Threshold index -> when it was first continuously observed met.
    thresholds_first_observed_at: HashMap<usize, DateTime<Utc>>,
    /// Condition -> last time any of its thresholds was met.
    conditions_last_observed_at: HashMap<NodeCondition, DateTime<Utc>>,
    /// Thresholds met (past grace) on the previous cycle; these stay met
    /// until available climbs past threshold + min-reclaim.
    thresholds_met: Vec<usize>,
    last_observations: Observations,
    dedicated_image_fs: Option<bool>,
    last_notifier_refresh: Option<DateTime<Utc>>,
    last_notifier_capacity: Option<crate::types::Quantity>,
}

pub struct EvictionManager {
    config: EvictionConfig,
    clock: Arc<dyn Clock>,
    snapshot_provider: Arc<dyn SnapshotProvider>,
    killer: Arc<dyn WorkloadKiller>,
    image_gc: Arc<dyn ImageGc>,
    container_gc: Arc<dyn ContainerGc>,
    recorder: Arc<dyn EventRecorder>,
    notifiers: Vec<Arc<dyn ThresholdNotifier>>,
    metrics: EvictionMetrics,
    state: Mutex<EngineState>,
    conditions: ArcSwap<Vec<NodeCondition>>,
    last_synchronize: ArcSwapOption<DateTime<Utc>>,
    wakeup_tx: mpsc::Sender<()>,
    wakeup_rx: StdMutex<Option<mpsc::Receiver<()>>>,
}

pub struct EvictionManagerBuilder {
    config: EvictionConfig,
    clock: Arc<dyn Clock>,
    snapshot_provider: Option<Arc<dyn SnapshotProvider>>,
    killer: Option<Arc<dyn WorkloadKiller>>,
    image_gc: Option<Arc<dyn ImageGc>>,
    container_gc: Option<Arc<dyn ContainerGc>>,
    recorder: Option<Arc<dyn EventRecorder>>,
    notifiers: Vec<Arc<dyn ThresholdNotifier>>,
    notifier_factory: Option<Arc<dyn CgroupNotifierFactory>>,
}

impl EvictionManagerBuilder {
    pub fn new(config: EvictionConfig) -> Self {
        EvictionManagerBuilder {
            config,
            clock: Arc::new(SystemClock),
            snapshot_provider: None,
            killer: None,
            image_gc: None,
            container_gc: None,
            recorder: None,
            notifiers: Vec::new(),
            notifier_factory: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn snapshot_provider(mut self, provider: Arc<dyn SnapshotProvider>) -> Self {
        self.snapshot_provider = Some(provider);
        self
    }

    pub fn killer(mut self, killer: Arc<dyn WorkloadKiller>) -> Self {
        self.killer = Some(killer);
        self
    }

    pub fn image_gc(mut self, image_gc: Arc<dyn ImageGc>) -> Self {
        self.image_gc = Some(image_gc);
        self
    }

    pub fn container_gc(mut self, container_gc: Arc<dyn ContainerGc>) -> Self {
        self.container_gc = Some(container_gc);
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Add an already-built notifier; used by tests and by callers with
    /// their own notifier implementations.
    pub fn notifier(mut self, notifier: Arc<dyn ThresholdNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Build one memory threshold notifier per memory-family threshold
    /// through this factory.
    pub fn notifier_factory(mut self, factory: Arc<dyn CgroupNotifierFactory>) -> Self {
        self.notifier_factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<EvictionManager, EvictionError> {
        self.config.validate()?;
        let snapshot_provider = self.snapshot_provider.ok_or_else(|| {
            EvictionError::ConfigInvalid("a snapshot provider is required".to_string())
        })?;
        let killer = self
            .killer
            .ok_or_else(|| EvictionError::ConfigInvalid("a workload killer is required".to_string()))?;
        let image_gc = self.image_gc.ok_or_else(|| {
            EvictionError::ConfigInvalid("an image garbage collector is required".to_string())
        })?;
        let container_gc = self.container_gc.ok_or_else(|| {
            EvictionError::ConfigInvalid("a container garbage collector is required".to_string())
        })?;
        let recorder = self
            .recorder
            .ok_or_else(|| EvictionError::ConfigInvalid("an event recorder is required".to_string()))?;

        // Wakeups from kernel notifiers coalesce: one slot is enough because
        // the next synchronize reads fresh state anyway.
        let (wakeup_tx, wakeup_rx) = mpsc::channel(1);

        let mut notifiers = self.notifiers;
        if let Some(factory) = self.notifier_factory {
            for threshold in &self.config.thresholds {
                if matches!(
                    threshold.signal,
                    Signal::MemoryAvailable | Signal::AllocatableMemoryAvailable
                ) {
                    notifiers.push(Arc::new(MemoryThresholdNotifier::new(
                        threshold.clone(),
                        &self.config.workload_cgroup_root,
                        factory.clone(),
                        wakeup_tx.clone(),
                    )));
                }
            }
        }

        Ok(EvictionManager {
            config: self.config,
            clock: self.clock,
            snapshot_provider,
            killer,
            image_gc,
            container_gc,
            recorder,
            notifiers,
            metrics: EvictionMetrics::new(),
            state: Mutex::new(EngineState::default()),
            conditions: ArcSwap::from_pointee(Vec::new()),
            last_synchronize: ArcSwapOption::empty(),
            wakeup_tx,
            wakeup_rx: StdMutex::new(Some(wakeup_rx)),
        })
    }
}

impl EvictionManager {
    /// Run the synchronize loop until shutdown. Each iteration is driven by
    /// the monitoring interval or a notifier wakeup, whichever comes first;
    /// a cycle in flight always finishes before shutdown is honored.
    pub async fn start(
        self: Arc<Self>,
        disk_layout: Arc<dyn DiskLayoutProvider>,
        active_workloads: ActiveWorkloadsFn,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let taken = self
            .wakeup_rx
            .lock()
            .expect("wakeup receiver lock poisoned")
            .take();
        let Some(mut wakeups) = taken else {
            warn!("Eviction loop already started");
            return;
        };

        info!(
            interval_secs = self.config.monitoring_interval.as_secs(),
            thresholds = self.config.thresholds.len(),
            "Starting eviction manager loop"
        );
        let mut ticker = tokio::time::interval(self.config.monitoring_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wakeups.recv() => {
                    debug!("Woken by memory pressure notifier");
                }
                _ = shutdown.recv() => {
                    info!("Shutting down eviction manager loop");
                    break;
                }
            }

            let evicted = self.synchronize(disk_layout.as_ref(), &active_workloads).await;
            for workload in &evicted {
                info!(
                    workload = %workload.qualified_name(),
                    "Evicted workload under node pressure"
                );
            }
        }
    }

    /// One synchronize cycle. Returns the workloads evicted this cycle
    /// (at most one).
    pub async fn synchronize(
        &self,
        disk_layout: &dyn DiskLayoutProvider,
        active_workloads: &ActiveWorkloadsFn,
    ) -> Vec<WorkloadRef> {
        self.last_synchronize
            .store(Some(Arc::new(self.clock.now())));
        if self.config.thresholds.is_empty() {
            return Vec::new();
        }

        let mut state = self.state.lock().await;
        let (conditions, evicted) = self
            .run_cycle(&mut state, disk_layout, active_workloads)
            .await;
        if let Some(conditions) = conditions {
            self.publish_conditions(conditions);
        }
        evicted
    }

    async fn run_cycle(
        &self,
        state: &mut EngineState,
        disk_layout: &dyn DiskLayoutProvider,
        active_workloads: &ActiveWorkloadsFn,
    ) -> (Option<Vec<NodeCondition>>, Vec<WorkloadRef>) {
        let dedicated = match state.dedicated_image_fs {
            Some(dedicated) => dedicated,
            None => match disk_layout.has_dedicated_image_fs().await {
                Ok(dedicated) => {
                    state.dedicated_image_fs = Some(dedicated);
                    dedicated
                }
                Err(error) => {
                    warn!(error = %error, "Failed to determine disk layout; skipping cycle");
                    return (None, Vec::new());
                }
            },
        };

        let workloads = (active_workloads)();
        let now = self.clock.now();

        let snapshot = match self.snapshot_provider.get().await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                let error = EvictionError::SnapshotFetch(error);
                warn!(error = %error, "Skipping eviction cycle");
                // Advertised conditions keep decaying through the hysteresis
                // window while the stats source is unavailable.
                let active = conditions_observed_since(
                    &state.conditions_last_observed_at,
                    self.config.pressure_transition_period,
                    now,
                );
                return (Some(active), Vec::new());
            }
        };

        let observations = signal_observations(&snapshot);
        self.maybe_refresh_notifiers(state, &snapshot, &observations, now)
            .await;

        let all_indices: Vec<usize> = (0..self.config.thresholds.len()).collect();
        let mut met = thresholds_met(&self.config.thresholds, &all_indices, &observations, false);

        // Thresholds met on a previous cycle stay met until min-reclaim is
        // satisfied, so a reclaim that barely clears the line does not stop
        // eviction pressure.
        if !state.thresholds_met.is_empty() {
            let unresolved = thresholds_met(
                &self.config.thresholds,
                &state.thresholds_met,
                &observations,
                true,
            );
            met = merge_indices(met, unresolved);
        }

        let first_observed = first_observed_at(&met, &state.thresholds_first_observed_at, now);
        let observed_conditions = node_conditions(&self.config.thresholds, &met);
        let last_observed = conditions_last_observed_at(
            &observed_conditions,
            &state.conditions_last_observed_at,
            now,
        );
        let active_conditions = conditions_observed_since(
            &last_observed,
            self.config.pressure_transition_period,
            now,
        );
        let met_after_grace =
            thresholds_met_grace_period(&self.config.thresholds, &first_observed, now);

        state.thresholds_first_observed_at = first_observed;
        state.conditions_last_observed_at = last_observed;
        state.thresholds_met = met_after_grace.clone();

        let fresh = thresholds_updated_stats(
            &met_after_grace,
            &self.config.thresholds,
            &observations,
            &state.last_observations,
        );
        state.last_observations = observations;

        if fresh.is_empty() {
            debug!("No resources are starved");
            return (Some(active_conditions), Vec::new());
        }

        let mut candidates = fresh;
        sort_by_eviction_priority(&mut candidates, &self.config.thresholds);
        let threshold = self.config.thresholds[candidates[0]].clone();
        let resource = threshold.signal.resource();

        info!(signal = %threshold.signal, resource = %resource, "Eviction threshold met, attempting to reclaim");
        self.recorder.record(NodeEvent {
            reason: EventReason::EvictionThresholdMet,
            message: format!("Attempting to reclaim {resource}"),
            workload: None,
        });

        if self.reclaim_node_level(state, threshold.signal, dedicated).await {
            info!(resource = %resource, "Reduced resource pressure without evicting workloads");
            return (Some(active_conditions), Vec::new());
        }

        let Some((request_resource, usage_kind)) = ranker_for_signal(threshold.signal, dedicated)
        else {
            error!(signal = %threshold.signal, "No ranking recipe for signal");
            return (Some(active_conditions), Vec::new());
        };
        if workloads.is_empty() {
            error!("Eviction thresholds reached, but no workloads are active");
            return (Some(active_conditions), Vec::new());
        }

        info!(resource = %resource, "Must evict a workload to reclaim resource");
        let mut ranked = workloads;
        rank_workloads_for_eviction(&mut ranked, &snapshot, request_resource, &usage_kind);

        if let Some(observed) = state.last_observations.get(&threshold.signal) {
            if let Some(time) = observed.time {
                let age = now.signed_duration_since(time);
                self.metrics
                    .observe_stats_age(age.num_milliseconds() as f64 / 1000.0);
            }
        }

        let Some(victim) = ranked.into_iter().find(|workload| !workload.is_critical()) else {
            warn!(resource = %resource, "No evictable workload found");
            self.recorder.record(NodeEvent {
                reason: EventReason::FailedToFindEvictionCandidate,
                message: format!("No eviction candidate found while reclaiming {resource}"),
                workload: None,
            });
            return (Some(active_conditions), Vec::new());
        };

        self.evict(&victim, &threshold, state).await;
        (Some(active_conditions), vec![victim])
    }

    /// Refresh kernel watermark subscriptions when the refresh interval has
    /// elapsed or the memory capacity baseline has shifted.
    async fn maybe_refresh_notifiers(
        &self,
        state: &mut EngineState,
        snapshot: &Snapshot,
        observations: &Observations,
        now: DateTime<Utc>,
    ) {
        if self.notifiers.is_empty() {
            return;
        }
        let memory_capacity = observations
            .get(&Signal::MemoryAvailable)
            .map(|observed| observed.capacity);
        let due = match state.last_notifier_refresh {
            None => true,
            Some(at) => {
                now.signed_duration_since(at) > chrono_duration(NOTIFIER_REFRESH_INTERVAL)
                    || (memory_capacity.is_some()
                        && memory_capacity != state.last_notifier_capacity)
            }
        };
        if !due {
            return;
        }
        state.last_notifier_refresh = Some(now);
        state.last_notifier_capacity = memory_capacity;

        for notifier in &self.notifiers {
            if let Err(source) = notifier.update_threshold(snapshot).await {
                let description = notifier.description();
                let error = EvictionError::NotifierUpdate {
                    description: description.clone(),
                    source,
                };
                warn!(notifier = %description, error = %error, "Failed to refresh threshold notifier");
                self.metrics.inc_notifier_error();
            }
        }
    }

    /// Run the node-level reclaim actions registered for the signal,
    /// re-observing that signal after each one. Returns true when reclaim
    /// restored availability past threshold + min-reclaim for every
    /// threshold watching the signal, making eviction unnecessary this
    /// cycle. Thresholds on other signals keep their own bookkeeping.
    async fn reclaim_node_level(
        &self,
        state: &mut EngineState,
        signal: Signal,
        dedicated_image_fs: bool,
    ) -> bool {
        let actions = reclaim_actions_for_signal(signal, dedicated_image_fs);
        if actions.is_empty() {
            return false;
        }

        let signal_indices: Vec<usize> = (0..self.config.thresholds.len())
            .filter(|&idx| self.config.thresholds[idx].signal == signal)
            .collect();

        let mut satisfied = false;
        for action in actions {
            let result = match action {
                ReclaimAction::ImageGc => self.image_gc.delete_unused_images().await,
                ReclaimAction::ContainerGc => {
                    self.container_gc.delete_all_unused_containers().await
                }
            };
            if let Err(source) = result {
                let error = EvictionError::ReclaimAction { signal, source };
                warn!(error = %error, "Node-level reclaim action failed");
                self.metrics.inc_reclaim_error();
            }

            match self.snapshot_provider.get().await {
                Ok(snapshot) => {
                    let observations = signal_observations(&snapshot);
                    let still_met = thresholds_met(
                        &self.config.thresholds,
                        &signal_indices,
                        &observations,
                        true,
                    );
                    satisfied = still_met.is_empty();
                    state.thresholds_met.retain(|idx| {
                        self.config.thresholds[*idx].signal != signal || still_met.contains(idx)
                    });
                }
                Err(source) => {
                    let error = EvictionError::SnapshotFetch(source);
                    warn!(error = %error, "Failed to re-observe after reclaim");
                    satisfied = false;
                }
            }
        }
        satisfied
    }

    async fn evict(&self, victim: &WorkloadRef, threshold: &Threshold, state: &EngineState) {
        let grace_period_secs = if threshold.is_hard() {
            0
        } else {
            self.config.max_workload_grace_period_secs
        };
        let message = eviction_message(threshold, &state.last_observations);

        self.recorder.record(NodeEvent {
            reason: EventReason::Evicted,
            message: message.clone(),
            workload: Some(victim.qualified_name()),
        });

        let status_message = message.clone();
        let append_disruption = self.config.enable_disruption_conditions;
        let mutator: StatusMutator = Box::new(move |status: &mut WorkloadStatus| {
            status.phase = WorkloadPhase::Failed;
            status.reason = REASON_EVICTED.to_string();
            status.message = status_message.clone();
            if append_disruption {
                status.conditions.push(StatusCondition {
                    condition_type: DISRUPTION_TARGET_CONDITION.to_string(),
                    status: "True".to_string(),
                    reason: DISRUPTION_TARGET_REASON.to_string(),
                    message: status_message.clone(),
                });
            }
        });

        info!(
            workload = %victim.qualified_name(),
            grace_period_secs,
            signal = %threshold.signal,
            "Evicting workload"
        );
        if let Err(source) = self
            .killer
            .kill(victim, true, Some(grace_period_secs), mutator)
            .await
        {
            let error = EvictionError::KillWorkload {
                workload: victim.qualified_name(),
                source,
            };
            // The pressure persists, so the next cycle retries implicitly.
            warn!(error = %error, "Eviction kill failed");
        }
        self.metrics.inc_eviction(threshold.signal);
    }

    fn publish_conditions(&self, conditions: Vec<NodeCondition>) {
        for condition in NodeCondition::ALL {
            self.metrics
                .set_condition(condition, conditions.contains(&condition));
        }
        self.conditions.store(Arc::new(conditions));
    }

    /// Decide whether a candidate workload may start on this node. A pure
    /// function of the published condition set; safe to call concurrently
    /// with the loop.
    pub fn admit(&self, candidate: &WorkloadRef) -> AdmissionResult {
        let conditions = self.conditions.load();
        if conditions.is_empty() {
            return AdmissionResult::admitted();
        }

        let memory = conditions.contains(&NodeCondition::MemoryPressure);
        let disk = conditions.contains(&NodeCondition::DiskPressure);

        if memory && disk {
            return reject(&conditions);
        }
        if memory && candidate.qos == QosClass::BestEffort {
            if candidate.is_critical() || candidate.tolerates_memory_pressure {
                return AdmissionResult::admitted();
            }
            return reject(&conditions);
        }
        if disk {
            return reject(&conditions);
        }
        AdmissionResult::admitted()
    }

    pub fn is_under_memory_pressure(&self) -> bool {
        self.conditions
            .load()
            .contains(&NodeCondition::MemoryPressure)
    }

    pub fn is_under_disk_pressure(&self) -> bool {
        self.conditions.load().contains(&NodeCondition::DiskPressure)
    }

    pub fn is_under_pid_pressure(&self) -> bool {
        self.conditions.load().contains(&NodeCondition::PidPressure)
    }

    /// The currently advertised node conditions.
    pub fn node_conditions(&self) -> Vec<NodeCondition> {
        self.conditions.load().to_vec()
    }

    /// When the loop last ran a cycle; `None` until the first one.
    pub fn last_synchronize(&self) -> Option<DateTime<Utc>> {
        self.last_synchronize.load().as_deref().copied()
    }

    /// Sender that wakes the loop for an immediate synchronize; hand this to
    /// externally-built notifiers. Wakeups coalesce to a single pending slot.
    pub fn wakeup_sender(&self) -> mpsc::Sender<()> {
        self.wakeup_tx.clone()
    }
}

fn reject(conditions: &[NodeCondition]) -> AdmissionResult {
    let list = conditions
        .iter()
        .map(|condition| condition.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    AdmissionResult {
        admit: false,
        reason: Some(REASON_EVICTED.to_string()),
        message: Some(format!("The node had condition: {list}. ")),
    }
}

fn eviction_message(threshold: &Threshold, observations: &Observations) -> String {
    let resource = threshold.signal.resource();
    let mut message = format!("The node was low on resource: {resource}. ");
    if let Some(observed) = observations.get(&threshold.signal) {
        let quantity = threshold.value.resolve(observed.capacity);
        message.push_str(&format!(
            "Threshold quantity: {quantity}, available: {}. ",
            observed.available
        ));
    }
    message
}
