//! External command facade: uniform response envelopes plus run-quality
//! heuristics for UI/automation clients.

#![allow(missing_docs)]

use std::sync::Arc;

use serde::Serialize;

use crate::exec::framework::Framework;
use crate::exec::results::TestResult;
use crate::exec::state::ExecutionState;

// ──────────────────── thresholds ────────────────────

/// Below this many completed iterations no recommendation is attempted.
const MIN_ITERATIONS_FOR_ANALYSIS: usize = 3;
/// Unconditional sufficient-data point.
const SUFFICIENT_TOTAL: usize = 10;
/// Early sufficient-data point when the rate is already decisive.
const EARLY_TOTAL: usize = 5;
const DECISIVE_HIGH_RATE: f64 = 95.0;
const DECISIVE_LOW_RATE: f64 = 20.0;
const GOOD_RATE: f64 = 90.0;
const POOR_RATE: f64 = 30.0;
/// Window for the recent-trend classification.
const TREND_WINDOW: usize = 3;

// ──────────────────── response envelope ────────────────────

/// Uniform response for every command: whether it was accepted, a
/// human-readable message, and the state snapshot taken right after.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    pub state: ExecutionState,
}

/// Run-quality digest for automation clients deciding whether to keep going.
#[derive(Debug, Clone, Serialize)]
pub struct IterationStatistics {
    pub total_completed: usize,
    pub pass_rate: f64,
    pub fail_rate: f64,
    pub sufficient_data: bool,
    pub recent_trend: String,
    pub recommendation: String,
    pub end_requested: bool,
}

// ──────────────────── facade ────────────────────

/// Thin command surface over a shared [`Framework`].
#[derive(Clone)]
pub struct ExternalApi {
    framework: Arc<Framework>,
}

impl ExternalApi {
    #[must_use]
    pub fn new(framework: Arc<Framework>) -> Self {
        Self { framework }
    }

    fn respond(&self, success: bool, message: impl Into<String>) -> ApiResponse {
        ApiResponse {
            success,
            message: message.into(),
            state: self.framework.get_execution_state(),
        }
    }

    pub fn end_experiment(&self) -> ApiResponse {
        if self.framework.end_experiment() {
            self.respond(true, "experiment will end after the current iteration")
        } else {
            self.respond(false, "no active experiment to end")
        }
    }

    pub fn halt_execution(&self) -> ApiResponse {
        if self.framework.halt_execution() {
            self.respond(true, "execution will halt at the next iteration boundary")
        } else {
            self.respond(false, "halt rejected")
        }
    }

    pub fn continue_execution(&self) -> ApiResponse {
        if self.framework.continue_execution() {
            self.respond(true, "execution resumed")
        } else {
            self.respond(false, "execution is not halted")
        }
    }

    pub fn cancel_experiment(&self) -> ApiResponse {
        self.framework.cancel_execution();
        self.respond(true, "experiment cancelled")
    }

    pub fn enable_step_mode(&self) -> ApiResponse {
        self.framework.enable_step_by_step_mode();
        self.respond(true, "step-by-step mode enabled")
    }

    pub fn disable_step_mode(&self) -> ApiResponse {
        self.framework.disable_step_by_step_mode();
        self.respond(true, "step-by-step mode disabled")
    }

    /// Release the pending step wait and run one more iteration.
    pub fn continue_next_iteration(&self) -> ApiResponse {
        if self.framework.step_continue() {
            self.respond(true, "next iteration released")
        } else {
            self.respond(false, "step continue rejected")
        }
    }

    #[must_use]
    pub fn current_state(&self) -> ExecutionState {
        self.framework.get_execution_state()
    }

    /// Statistics plus a continue/stop recommendation over the current run.
    #[must_use]
    pub fn iteration_statistics(&self) -> IterationStatistics {
        let state = self.framework.get_execution_state();
        let stats = &state.current_stats;
        let total = stats.total_completed;
        let rate = stats.pass_rate;

        let sufficient = total >= SUFFICIENT_TOTAL
            || (total >= EARLY_TOTAL && (rate >= DECISIVE_HIGH_RATE || rate <= DECISIVE_LOW_RATE));
        let recommendation = recommend(total, rate, sufficient);

        IterationStatistics {
            total_completed: total,
            pass_rate: rate,
            fail_rate: stats.fail_rate,
            sufficient_data: sufficient,
            recent_trend: recent_trend(&state.latest_results),
            recommendation,
            end_requested: state.end_requested,
        }
    }
}

/// Continue/stop recommendation from the completed count and pass rate.
fn recommend(total: usize, pass_rate: f64, sufficient: bool) -> String {
    if total < MIN_ITERATIONS_FOR_ANALYSIS {
        return "continue - not enough data yet".to_string();
    }
    if sufficient {
        if pass_rate >= GOOD_RATE {
            return "sufficient_data_good - consider ending, results look solid".to_string();
        }
        if pass_rate <= POOR_RATE {
            return "sufficient_data_poor - consider ending, unit is failing consistently"
                .to_string();
        }
        return "continue - results are mixed, more data may help".to_string();
    }
    if pass_rate >= DECISIVE_HIGH_RATE {
        return "trending_excellent - likely safe to end soon".to_string();
    }
    if pass_rate <= DECISIVE_LOW_RATE {
        return "trending_poor - likely failing, consider ending".to_string();
    }
    "continue - keep collecting data".to_string()
}

/// Classify the last few results: improving, declining, mixed, or not enough
/// data.
fn recent_trend(results: &[TestResult]) -> String {
    if results.len() < TREND_WINDOW {
        return "insufficient_data".to_string();
    }
    let window = &results[results.len() - TREND_WINDOW..];
    let passes: Vec<bool> = window
        .iter()
        .map(|r| r.outcome.is_pass_equivalent())
        .collect();
    if passes.iter().all(|p| *p) {
        "improving".to_string()
    } else if passes.iter().all(|p| !*p) {
        "declining".to_string()
    } else {
        "mixed".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::results::RunOutcome;

    fn results(outcomes: &[RunOutcome]) -> Vec<TestResult> {
        outcomes
            .iter()
            .enumerate()
            .map(|(i, o)| TestResult::new(i + 1, o.clone(), "t"))
            .collect()
    }

    #[test]
    fn too_few_iterations_always_continue() {
        let rec = recommend(2, 0.0, false);
        assert!(rec.starts_with("continue"));
    }

    #[test]
    fn sufficient_good_and_poor() {
        assert!(recommend(10, 95.0, true).starts_with("sufficient_data_good"));
        assert!(recommend(10, 20.0, true).starts_with("sufficient_data_poor"));
        assert!(recommend(10, 60.0, true).starts_with("continue"));
    }

    #[test]
    fn early_trends_without_sufficient_data() {
        assert!(recommend(4, 100.0, false).starts_with("trending_excellent"));
        assert!(recommend(4, 0.0, false).starts_with("trending_poor"));
        assert!(recommend(4, 50.0, false).starts_with("continue"));
    }

    #[test]
    fn trend_classification() {
        assert_eq!(
            recent_trend(&results(&[RunOutcome::Pass, RunOutcome::Pass])),
            "insufficient_data"
        );
        assert_eq!(
            recent_trend(&results(&[
                RunOutcome::Fail,
                RunOutcome::Pass,
                RunOutcome::Pass,
                RunOutcome::Pass
            ])),
            "improving"
        );
        assert_eq!(
            recent_trend(&results(&[
                RunOutcome::Pass,
                RunOutcome::Fail,
                RunOutcome::Fail,
                RunOutcome::Fail
            ])),
            "declining"
        );
        assert_eq!(
            recent_trend(&results(&[
                RunOutcome::Pass,
                RunOutcome::Fail,
                RunOutcome::Pass
            ])),
            "mixed"
        );
    }
}
