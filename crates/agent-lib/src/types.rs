//! Eviction signals, thresholds, and node conditions.
//!
//! A threshold declares when the node is considered pressured on one signal.
//! Thresholds with a zero grace period are hard (acted on immediately);
//! thresholds with a non-zero grace period are soft.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EvictionError;

/// Node-level eviction signals. The set is closed; configuration naming an
/// unknown signal is rejected before a threshold is ever constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "memory.available")]
    MemoryAvailable,
    #[serde(rename = "nodefs.available")]
    NodeFsAvailable,
    #[serde(rename = "nodefs.inodesFree")]
    NodeFsInodesFree,
    #[serde(rename = "imagefs.available")]
    ImageFsAvailable,
    #[serde(rename = "imagefs.inodesFree")]
    ImageFsInodesFree,
    #[serde(rename = "allocatableMemory.available")]
    AllocatableMemoryAvailable,
    #[serde(rename = "pid.available")]
    PidAvailable,
}

impl Signal {
    pub const ALL: [Signal; 7] = [
        Signal::MemoryAvailable,
        Signal::NodeFsAvailable,
        Signal::NodeFsInodesFree,
        Signal::ImageFsAvailable,
        Signal::ImageFsInodesFree,
        Signal::AllocatableMemoryAvailable,
        Signal::PidAvailable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::MemoryAvailable => "memory.available",
            Signal::NodeFsAvailable => "nodefs.available",
            Signal::NodeFsInodesFree => "nodefs.inodesFree",
            Signal::ImageFsAvailable => "imagefs.available",
            Signal::ImageFsInodesFree => "imagefs.inodesFree",
            Signal::AllocatableMemoryAvailable => "allocatableMemory.available",
            Signal::PidAvailable => "pid.available",
        }
    }

    pub fn parse(s: &str) -> Option<Signal> {
        Signal::ALL.iter().copied().find(|sig| sig.as_str() == s)
    }

    /// Node condition advertised when a threshold on this signal fires.
    pub fn condition(&self) -> NodeCondition {
        match self {
            Signal::MemoryAvailable | Signal::AllocatableMemoryAvailable => {
                NodeCondition::MemoryPressure
            }
            Signal::NodeFsAvailable
            | Signal::NodeFsInodesFree
            | Signal::ImageFsAvailable
            | Signal::ImageFsInodesFree => NodeCondition::DiskPressure,
            Signal::PidAvailable => NodeCondition::PidPressure,
        }
    }

    /// Resource named in eviction messages and used to look up workload
    /// requests during ranking.
    pub fn resource(&self) -> ResourceKind {
        match self {
            Signal::MemoryAvailable | Signal::AllocatableMemoryAvailable => ResourceKind::Memory,
            Signal::NodeFsAvailable | Signal::ImageFsAvailable => ResourceKind::EphemeralStorage,
            Signal::NodeFsInodesFree | Signal::ImageFsInodesFree => ResourceKind::Inodes,
            Signal::PidAvailable => ResourceKind::Pids,
        }
    }

    /// Whether per-workload usage of this signal can be read directly from
    /// workload stats. Pool-level signals fall back to working-set or process
    /// counts when ranking.
    pub fn workload_attributable(&self) -> bool {
        !matches!(
            self,
            Signal::AllocatableMemoryAvailable | Signal::PidAvailable
        )
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource family behind a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Memory,
    EphemeralStorage,
    Inodes,
    Pids,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Memory => "memory",
            ResourceKind::EphemeralStorage => "ephemeral-storage",
            ResourceKind::Inodes => "inodes",
            ResourceKind::Pids => "pids",
        };
        f.write_str(s)
    }
}

/// Node pressure conditions derived from met thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeCondition {
    MemoryPressure,
    DiskPressure,
    PidPressure,
}

impl NodeCondition {
    pub const ALL: [NodeCondition; 3] = [
        NodeCondition::MemoryPressure,
        NodeCondition::DiskPressure,
        NodeCondition::PidPressure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeCondition::MemoryPressure => "MemoryPressure",
            NodeCondition::DiskPressure => "DiskPressure",
            NodeCondition::PidPressure => "PIDPressure",
        }
    }
}

impl fmt::Display for NodeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A byte or count quantity. Parses and renders the binary-suffix forms used
/// in threshold configuration ("100Mi", "1.5Gi", bare integers for counts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Quantity(i64);

const BINARY_SUFFIXES: [(&str, i64); 4] = [
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
];

impl Quantity {
    pub const fn from_value(value: i64) -> Self {
        Quantity(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn parse(s: &str) -> Result<Quantity, EvictionError> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-')
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);
        if number.is_empty() {
            return Err(EvictionError::ConfigInvalid(format!(
                "invalid quantity {s:?}"
            )));
        }
        let multiplier = if suffix.is_empty() {
            1
        } else {
            BINARY_SUFFIXES
                .iter()
                .find(|(name, _)| *name == suffix)
                .map(|(_, m)| *m)
                .ok_or_else(|| {
                    EvictionError::ConfigInvalid(format!("unknown quantity suffix {suffix:?}"))
                })?
        };
        let value = if number.contains('.') {
            let fraction: f64 = number.parse().map_err(|_| {
                EvictionError::ConfigInvalid(format!("invalid quantity {s:?}"))
            })?;
            (fraction * multiplier as f64).round() as i64
        } else {
            let base: i64 = number.parse().map_err(|_| {
                EvictionError::ConfigInvalid(format!("invalid quantity {s:?}"))
            })?;
            base.checked_mul(multiplier).ok_or_else(|| {
                EvictionError::ConfigInvalid(format!("quantity {s:?} overflows"))
            })?
        };
        Ok(Quantity(value))
    }

    pub fn saturating_add(&self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(&self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("0");
        }
        for (suffix, unit) in BINARY_SUFFIXES.iter().rev() {
            if self.0.abs() >= *unit && self.0 % unit == 0 {
                return write!(f, "{}{}", self.0 / unit, suffix);
            }
        }
        write!(f, "{}", self.0)
    }
}

/// Threshold trigger value: an absolute quantity or a percentage of the
/// signal's observed capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdValue {
    Quantity(Quantity),
    /// Percent of capacity, exclusive range (0, 100).
    Percentage(f64),
}

impl ThresholdValue {
    /// Resolve to an absolute quantity against the signal capacity.
    pub fn resolve(&self, capacity: Quantity) -> Quantity {
        match self {
            ThresholdValue::Quantity(q) => *q,
            ThresholdValue::Percentage(pct) => {
                Quantity::from_value((capacity.value() as f64 * pct / 100.0) as i64)
            }
        }
    }
}

/// The only supported comparison; configuration naming any other operator is
/// rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOperator {
    LessThan,
}

impl fmt::Display for ThresholdOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LessThan")
    }
}

/// A declarative rule under which the node is considered pressured.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub signal: Signal,
    pub operator: ThresholdOperator,
    pub value: ThresholdValue,
    /// How long the threshold must be continuously met before it drives
    /// action. Zero makes the threshold hard.
    pub grace_period: Duration,
    /// Extra headroom beyond the threshold that reclaim must restore before
    /// eviction is skipped.
    pub min_reclaim: Option<ThresholdValue>,
}

impl Threshold {
    pub fn hard(signal: Signal, value: ThresholdValue) -> Self {
        Threshold {
            signal,
            operator: ThresholdOperator::LessThan,
            value,
            grace_period: Duration::ZERO,
            min_reclaim: None,
        }
    }

    pub fn soft(signal: Signal, value: ThresholdValue, grace_period: Duration) -> Self {
        Threshold {
            signal,
            operator: ThresholdOperator::LessThan,
            value,
            grace_period,
            min_reclaim: None,
        }
    }

    pub fn with_min_reclaim(mut self, min_reclaim: ThresholdValue) -> Self {
        self.min_reclaim = Some(min_reclaim);
        self
    }

    pub fn is_hard(&self) -> bool {
        self.grace_period.is_zero()
    }

    pub fn validate(&self) -> Result<(), EvictionError> {
        validate_threshold_value(self.signal, &self.value)?;
        if let Some(min_reclaim) = &self.min_reclaim {
            validate_threshold_value(self.signal, min_reclaim)?;
        }
        Ok(())
    }
}

fn validate_threshold_value(signal: Signal, value: &ThresholdValue) -> Result<(), EvictionError> {
    match value {
        ThresholdValue::Quantity(q) if q.value() < 0 => Err(EvictionError::ConfigInvalid(
            format!("threshold for {signal} must be a non-negative quantity, got {q}"),
        )),
        ThresholdValue::Percentage(pct) if *pct <= 0.0 || *pct >= 100.0 => {
            Err(EvictionError::ConfigInvalid(format!(
                "threshold percentage for {signal} must be in (0, 100), got {pct}"
            )))
        }
        _ => Ok(()),
    }
}
