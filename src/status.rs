//! Status event envelopes pushed to UI/API observers.
//!
//! Architecture mirrors the logging path: publishers never block. The bundled
//! [`ChannelReporter`] forwards envelopes over a bounded crossbeam channel with
//! `try_send()`, counting drops instead of stalling the experiment thread.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default bounded channel capacity for status events.
const CHANNEL_CAPACITY: usize = 256;

// ──────────────────── event kinds ────────────────────

/// The fixed vocabulary of status notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    ExperimentStart,
    StepModeEnabled,
    StepModeDisabled,
    StepContinueIssued,
    StepIterationComplete,
    ExecutionHalted,
    ExecutionResumed,
    ExperimentEndRequested,
    StrategyComplete,
    ExperimentFailed,
}

impl StatusKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExperimentStart => "experiment_start",
            Self::StepModeEnabled => "step_mode_enabled",
            Self::StepModeDisabled => "step_mode_disabled",
            Self::StepContinueIssued => "step_continue_issued",
            Self::StepIterationComplete => "step_iteration_complete",
            Self::ExecutionHalted => "execution_halted",
            Self::ExecutionResumed => "execution_resumed",
            Self::ExperimentEndRequested => "experiment_end_requested",
            Self::StrategyComplete => "strategy_complete",
            Self::ExperimentFailed => "experiment_failed",
        }
    }
}

/// A status notification: kind, wall-clock timestamp, and a kind-specific
/// payload object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub kind: StatusKind,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl StatusEvent {
    #[must_use]
    pub fn new(kind: StatusKind, data: Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data,
        }
    }
}

// ──────────────────── reporter trait ────────────────────

/// Observer for status events. Implementations must not block: the experiment
/// thread publishes inline.
pub trait StatusReporter: Send + Sync {
    fn report_status(&self, event: &StatusEvent);
}

// ──────────────────── manager ────────────────────

/// Publication point owned by the framework. Reporting can be toggled without
/// touching the registered reporter.
pub struct StatusManager {
    reporter: Option<Arc<dyn StatusReporter>>,
    enabled: AtomicBool,
}

impl Default for StatusManager {
    fn default() -> Self {
        Self {
            reporter: None,
            enabled: AtomicBool::new(true),
        }
    }
}

impl StatusManager {
    #[must_use]
    pub fn new(reporter: Option<Arc<dyn StatusReporter>>) -> Self {
        Self {
            reporter,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Publish an event to the registered reporter, if any.
    pub fn publish(&self, kind: StatusKind, data: Value) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        if let Some(reporter) = &self.reporter {
            reporter.report_status(&StatusEvent::new(kind, data));
        }
    }
}

// ──────────────────── channel reporter ────────────────────

/// Non-blocking channel-backed reporter for UI threads.
#[derive(Clone)]
pub struct ChannelReporter {
    tx: Sender<StatusEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelReporter {
    /// Number of events dropped due to a full channel.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl StatusReporter for ChannelReporter {
    fn report_status(&self, event: &StatusEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event.clone()) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected means the consumer went away; nothing to do.
    }
}

/// Build a bounded reporter/receiver pair.
#[must_use]
pub fn status_channel(capacity: usize) -> (ChannelReporter, Receiver<StatusEvent>) {
    let cap = if capacity == 0 { CHANNEL_CAPACITY } else { capacity };
    let (tx, rx) = bounded(cap);
    (
        ChannelReporter {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_serializes_with_type_key() {
        let event = StatusEvent::new(StatusKind::ExperimentStart, json!({"total_iterations": 5}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "experiment_start");
        assert_eq!(value["data"]["total_iterations"], 5);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn channel_reporter_delivers_events() {
        let (reporter, rx) = status_channel(8);
        let manager = StatusManager::new(Some(Arc::new(reporter)));
        manager.publish(StatusKind::ExecutionHalted, json!({"current_iteration": 2}));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, StatusKind::ExecutionHalted);
        assert_eq!(event.data["current_iteration"], 2);
    }

    #[test]
    fn disabled_manager_publishes_nothing() {
        let (reporter, rx) = status_channel(8);
        let manager = StatusManager::new(Some(Arc::new(reporter)));
        manager.set_enabled(false);
        manager.publish(StatusKind::ExperimentStart, json!({}));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let (reporter, _rx) = status_channel(1);
        reporter.report_status(&StatusEvent::new(StatusKind::ExperimentStart, json!({})));
        reporter.report_status(&StatusEvent::new(StatusKind::ExperimentStart, json!({})));
        assert_eq!(reporter.dropped_events(), 1);
    }

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(StatusKind::StepIterationComplete.as_str(), "step_iteration_complete");
        assert_eq!(StatusKind::ExperimentEndRequested.as_str(), "experiment_end_requested");
    }
}
