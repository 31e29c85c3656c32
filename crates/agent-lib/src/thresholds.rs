//! Threshold evaluation and the time-tracking that realizes grace periods
//! and post-pressure hysteresis.
//!
//! Thresholds are identified by their position in the configured threshold
//! list, so the tracking maps key on that stable index.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::observe::Observations;
use crate::types::{NodeCondition, Threshold};

pub(crate) fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Indices (within `candidates`, in order) of thresholds currently met by the
/// observations. With `enforce_min_reclaim`, a threshold only counts as
/// resolved once available climbs past threshold + min-reclaim.
pub fn thresholds_met(
    thresholds: &[Threshold],
    candidates: &[usize],
    observations: &Observations,
    enforce_min_reclaim: bool,
) -> Vec<usize> {
    let mut met = Vec::new();
    for &idx in candidates {
        let threshold = &thresholds[idx];
        let Some(observed) = observations.get(&threshold.signal) else {
            continue;
        };
        let mut resolved = threshold.value.resolve(observed.capacity);
        if enforce_min_reclaim {
            if let Some(min_reclaim) = &threshold.min_reclaim {
                resolved = resolved.saturating_add(min_reclaim.resolve(observed.capacity));
            }
        }
        if observed.available < resolved {
            met.push(idx);
        }
    }
    met
}

/// Union of two met sets, preserving the order of `a` then the novel entries
/// of `b`.
pub fn merge_indices(a: Vec<usize>, b: Vec<usize>) -> Vec<usize> {
    let mut merged = a;
    for idx in b {
        if !merged.contains(&idx) {
            merged.push(idx);
        }
    }
    merged
}

/// Track when each met threshold was first continuously observed. Thresholds
/// absent from `met` are dropped, clearing their first-observed time.
pub fn first_observed_at(
    met: &[usize],
    previous: &HashMap<usize, DateTime<Utc>>,
    now: DateTime<Utc>,
) -> HashMap<usize, DateTime<Utc>> {
    let mut result = HashMap::new();
    for &idx in met {
        let at = previous.get(&idx).copied().unwrap_or(now);
        result.insert(idx, at);
    }
    result
}

/// Conditions implied by the met thresholds, deduplicated in first-appearance
/// order.
pub fn node_conditions(thresholds: &[Threshold], met: &[usize]) -> Vec<NodeCondition> {
    let mut conditions = Vec::new();
    for &idx in met {
        let condition = thresholds[idx].signal.condition();
        if !conditions.contains(&condition) {
            conditions.push(condition);
        }
    }
    conditions
}

/// Record `now` for each observed condition, carrying previous timestamps
/// forward for the rest.
pub fn conditions_last_observed_at(
    observed: &[NodeCondition],
    previous: &HashMap<NodeCondition, DateTime<Utc>>,
    now: DateTime<Utc>,
) -> HashMap<NodeCondition, DateTime<Utc>> {
    let mut result = previous.clone();
    for condition in observed {
        result.insert(*condition, now);
    }
    result
}

/// Conditions observed within the transition period. This is the hysteresis:
/// a condition keeps being advertised for the whole window after it last
/// fired, suppressing flapping during recovery.
pub fn conditions_observed_since(
    last_observed: &HashMap<NodeCondition, DateTime<Utc>>,
    period: Duration,
    now: DateTime<Utc>,
) -> Vec<NodeCondition> {
    NodeCondition::ALL
        .into_iter()
        .filter(|condition| {
            last_observed
                .get(condition)
                .map(|at| now.signed_duration_since(*at) < chrono_duration(period))
                .unwrap_or(false)
        })
        .collect()
}

/// Thresholds whose grace period has fully elapsed, in configuration order.
pub fn thresholds_met_grace_period(
    thresholds: &[Threshold],
    first_observed: &HashMap<usize, DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<usize> {
    (0..thresholds.len())
        .filter(|idx| {
            first_observed
                .get(idx)
                .map(|at| {
                    now.signed_duration_since(*at) >= chrono_duration(thresholds[*idx].grace_period)
                })
                .unwrap_or(false)
        })
        .collect()
}

/// Thresholds whose observation is fresher than the previous cycle's. An
/// unstamped observation always counts as fresh.
pub fn thresholds_updated_stats(
    met: &[usize],
    thresholds: &[Threshold],
    observations: &Observations,
    last_observations: &Observations,
) -> Vec<usize> {
    met.iter()
        .copied()
        .filter(|idx| {
            let signal = thresholds[*idx].signal;
            let Some(observed) = observations.get(&signal) else {
                return false;
            };
            match (observed.time, last_observations.get(&signal)) {
                (_, None) => true,
                (None, Some(_)) => true,
                (Some(time), Some(last)) => match last.time {
                    None => true,
                    Some(last_time) => time > last_time,
                },
            }
        })
        .collect()
}
