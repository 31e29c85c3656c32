//! Node event emission.
//!
//! Events are fire-and-forget: recording never fails and never blocks the
//! synchronize loop.

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventReason {
    Evicted,
    EvictionThresholdMet,
    FailedToFindEvictionCandidate,
}

impl fmt::Display for EventReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventReason::Evicted => "Evicted",
            EventReason::EvictionThresholdMet => "EvictionThresholdMet",
            EventReason::FailedToFindEvictionCandidate => "FailedToFindEvictionCandidate",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeEvent {
    pub reason: EventReason,
    pub message: String,
    /// Qualified `namespace/name` of the workload the event concerns, when
    /// there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<String>,
}

pub trait EventRecorder: Send + Sync {
    fn record(&self, event: NodeEvent);
}

/// Recorder that emits events as structured log lines.
pub struct LogEventRecorder {
    node_name: String,
}

impl LogEventRecorder {
    pub fn new(node_name: impl Into<String>) -> Self {
        LogEventRecorder {
            node_name: node_name.into(),
        }
    }
}

impl EventRecorder for LogEventRecorder {
    fn record(&self, event: NodeEvent) {
        match event.reason {
            EventReason::Evicted | EventReason::FailedToFindEvictionCandidate => {
                warn!(
                    node = %self.node_name,
                    reason = %event.reason,
                    workload = ?event.workload,
                    message = %event.message,
                    "Node event"
                );
            }
            EventReason::EvictionThresholdMet => {
                info!(
                    node = %self.node_name,
                    reason = %event.reason,
                    message = %event.message,
                    "Node event"
                );
            }
        }
    }
}
