//! Agent configuration and eviction threshold parsing.
//!
//! Threshold sets come in as comma-separated statements
//! (`memory.available<100Mi,nodefs.available<10%`), with soft-threshold grace
//! periods and per-signal min-reclaim as `signal=value` assignments.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use eviction_agent_lib::types::{Quantity, Signal, Threshold, ThresholdValue};
use eviction_agent_lib::EvictionConfig;

/// Agent configuration, loaded from `AGENT_`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name from the downward API.
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health, conditions, and metrics.
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Synchronize loop interval in seconds.
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval_secs: u64,

    /// Hysteresis window in seconds for advertised pressure conditions.
    #[serde(default = "default_pressure_transition_period")]
    pub pressure_transition_period_secs: u64,

    /// Grace period granted to workloads evicted for soft thresholds.
    #[serde(default)]
    pub max_workload_grace_period_secs: i64,

    /// Hard eviction thresholds, e.g. "memory.available<100Mi,nodefs.available<10%".
    #[serde(default)]
    pub eviction_hard: String,

    /// Soft eviction thresholds, same grammar as the hard set.
    #[serde(default)]
    pub eviction_soft: String,

    /// Soft threshold grace periods, e.g. "memory.available=1m30s".
    #[serde(default)]
    pub eviction_soft_grace_period: String,

    /// Minimum reclaim per signal, e.g. "nodefs.available=500Mi".
    #[serde(default)]
    pub eviction_min_reclaim: String,

    /// Cgroup that holds every workload on the node.
    #[serde(default = "default_workload_cgroup_root")]
    pub workload_cgroup_root: String,

    /// Whether evicted workloads get a disruption-target status condition.
    #[serde(default)]
    pub enable_disruption_conditions: bool,

    /// Whether container images live on their own filesystem.
    #[serde(default)]
    pub dedicated_image_fs: bool,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_monitoring_interval() -> u64 {
    10
}

fn default_pressure_transition_period() -> u64 {
    5 * 60
}

fn default_workload_cgroup_root() -> String {
    "/workloads".to_string()
}

impl AgentConfig {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("AGENT"))
            .build()?;
        config
            .try_deserialize()
            .context("Failed to deserialize agent configuration")
    }

    /// Build the validated engine configuration from the raw threshold specs.
    pub fn eviction_config(&self) -> Result<EvictionConfig> {
        let thresholds = parse_threshold_config(
            &self.eviction_hard,
            &self.eviction_soft,
            &self.eviction_soft_grace_period,
            &self.eviction_min_reclaim,
        )?;
        Ok(EvictionConfig {
            thresholds,
            pressure_transition_period: Duration::from_secs(self.pressure_transition_period_secs),
            max_workload_grace_period_secs: self.max_workload_grace_period_secs,
            workload_cgroup_root: self.workload_cgroup_root.clone(),
            enable_disruption_conditions: self.enable_disruption_conditions,
            monitoring_interval: Duration::from_secs(self.monitoring_interval_secs),
        })
    }
}

/// Parse the four threshold specs into the configured threshold list: hard
/// statements first, then soft statements with their grace periods, with
/// min-reclaim assignments applied per signal.
pub fn parse_threshold_config(
    hard: &str,
    soft: &str,
    soft_grace: &str,
    min_reclaim: &str,
) -> Result<Vec<Threshold>> {
    let mut thresholds = Vec::new();
    for (signal, value) in parse_statements(hard)? {
        thresholds.push(Threshold::hard(signal, value));
    }

    let grace_periods: HashMap<Signal, Duration> = parse_assignments(soft_grace)?
        .into_iter()
        .map(|(signal, value)| {
            let grace = humantime::parse_duration(value)
                .with_context(|| format!("invalid grace period {value:?} for {signal}"))?;
            if grace.is_zero() {
                bail!("grace period for soft eviction threshold {signal} must be positive");
            }
            Ok((signal, grace))
        })
        .collect::<Result<_>>()?;

    for (signal, value) in parse_statements(soft)? {
        let grace = grace_periods.get(&signal).copied().ok_or_else(|| {
            anyhow!("no grace period specified for soft eviction threshold {signal}")
        })?;
        thresholds.push(Threshold::soft(signal, value, grace));
    }

    for (signal, value) in parse_assignments(min_reclaim)? {
        let min = parse_threshold_value(value)?;
        let mut matched = false;
        for threshold in thresholds.iter_mut().filter(|t| t.signal == signal) {
            threshold.min_reclaim = Some(min);
            matched = true;
        }
        if !matched {
            bail!("min reclaim specified for {signal}, but no threshold watches it");
        }
    }

    Ok(thresholds)
}

fn parse_statements(spec: &str) -> Result<Vec<(Signal, ThresholdValue)>> {
    spec.split(',')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(parse_statement)
        .collect()
}

fn parse_statement(statement: &str) -> Result<(Signal, ThresholdValue)> {
    let (signal_name, value) = statement.split_once('<').ok_or_else(|| {
        anyhow!("invalid eviction threshold {statement:?}: only the < operator is supported")
    })?;
    let signal = parse_signal(signal_name)?;
    let value = parse_threshold_value(value.trim())?;
    Ok((signal, value))
}

fn parse_assignments(spec: &str) -> Result<Vec<(Signal, &str)>> {
    spec.split(',')
        .map(str::trim)
        .filter(|assignment| !assignment.is_empty())
        .map(|assignment| {
            let (signal_name, value) = assignment
                .split_once('=')
                .ok_or_else(|| anyhow!("invalid assignment {assignment:?}: expected signal=value"))?;
            Ok((parse_signal(signal_name)?, value.trim()))
        })
        .collect()
}

fn parse_signal(name: &str) -> Result<Signal> {
    let name = name.trim();
    Signal::parse(name).ok_or_else(|| anyhow!("unknown eviction signal {name:?}"))
}

fn parse_threshold_value(value: &str) -> Result<ThresholdValue> {
    if let Some(percentage) = value.strip_suffix('%') {
        let percentage: f64 = percentage
            .parse()
            .with_context(|| format!("invalid percentage threshold {value:?}"))?;
        if percentage <= 0.0 || percentage >= 100.0 {
            bail!("percentage threshold {value:?} must be in (0, 100)");
        }
        Ok(ThresholdValue::Percentage(percentage))
    } else {
        let quantity = Quantity::parse(value)?;
        if quantity.value() < 0 {
            bail!("eviction threshold {value:?} must be non-negative");
        }
        Ok(ThresholdValue::Quantity(quantity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hard_thresholds() {
        let thresholds =
            parse_threshold_config("memory.available<100Mi,nodefs.available<10%", "", "", "")
                .unwrap();
        assert_eq!(thresholds.len(), 2);
        assert_eq!(thresholds[0].signal, Signal::MemoryAvailable);
        assert!(thresholds[0].is_hard());
        assert_eq!(
            thresholds[0].value,
            ThresholdValue::Quantity(Quantity::parse("100Mi").unwrap())
        );
        assert_eq!(thresholds[1].signal, Signal::NodeFsAvailable);
        assert_eq!(thresholds[1].value, ThresholdValue::Percentage(10.0));
    }

    #[test]
    fn test_parse_soft_thresholds_with_grace() {
        let thresholds = parse_threshold_config(
            "",
            "memory.available<2Gi",
            "memory.available=1m30s",
            "",
        )
        .unwrap();
        assert_eq!(thresholds.len(), 1);
        assert!(!thresholds[0].is_hard());
        assert_eq!(thresholds[0].grace_period, Duration::from_secs(90));
    }

    #[test]
    fn test_soft_threshold_without_grace_is_rejected() {
        let result = parse_threshold_config("", "memory.available<2Gi", "", "");
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_grace_period_is_rejected() {
        let result = parse_threshold_config(
            "",
            "memory.available<2Gi",
            "memory.available=0s",
            "",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_min_reclaim_applies_to_matching_signals() {
        let thresholds = parse_threshold_config(
            "nodefs.available<1Gi",
            "nodefs.available<2Gi",
            "nodefs.available=2m",
            "nodefs.available=500Mi",
        )
        .unwrap();
        assert_eq!(thresholds.len(), 2);
        for threshold in &thresholds {
            assert_eq!(
                threshold.min_reclaim,
                Some(ThresholdValue::Quantity(Quantity::parse("500Mi").unwrap()))
            );
        }
    }

    #[test]
    fn test_min_reclaim_for_unwatched_signal_is_rejected() {
        let result =
            parse_threshold_config("memory.available<1Gi", "", "", "nodefs.available=500Mi");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_signal_is_rejected() {
        assert!(parse_threshold_config("cpu.available<1Gi", "", "", "").is_err());
    }

    #[test]
    fn test_unsupported_operator_is_rejected() {
        assert!(parse_threshold_config("memory.available>1Gi", "", "", "").is_err());
        assert!(parse_threshold_config("memory.available=1Gi", "", "", "").is_err());
    }

    #[test]
    fn test_out_of_range_percentage_is_rejected() {
        assert!(parse_threshold_config("memory.available<0%", "", "", "").is_err());
        assert!(parse_threshold_config("memory.available<100%", "", "", "").is_err());
        assert!(parse_threshold_config("memory.available<150%", "", "", "").is_err());
    }

    #[test]
    fn test_empty_specs_produce_no_thresholds() {
        assert!(parse_threshold_config("", "", "", "").unwrap().is_empty());
    }
}
