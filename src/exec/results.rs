//! Iteration results, aggregate statistics, shmoo matrices, and upload gating.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::Result;

// ──────────────────── outcome ────────────────────

/// Terminal status of a single iteration.
///
/// `Other` carries statuses reported verbatim by a content backend that do not
/// map onto the built-in set; they count as neither pass nor fail in the
/// statistics but still consume an iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum RunOutcome {
    Pass,
    Fail,
    /// Content session died outside of a verdict.
    Failed,
    Cancelled,
    /// Boot never produced a runnable unit, even after recovery.
    ExecutionFail,
    Other(String),
}

impl RunOutcome {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::ExecutionFail => "ExecutionFAIL",
            Self::Other(s) => s,
        }
    }

    #[must_use]
    pub fn from_literal(value: &str) -> Self {
        match value {
            "PASS" => Self::Pass,
            "FAIL" => Self::Fail,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            "ExecutionFAIL" => Self::ExecutionFail,
            other => Self::Other(other.to_string()),
        }
    }

    /// Pass-equivalent statuses: PASS, SUCCESS, and the shmoo pass cell `*`.
    #[must_use]
    pub fn is_pass_equivalent(&self) -> bool {
        matches!(self, Self::Pass) || matches!(self.as_str(), "SUCCESS" | "*")
    }

    /// Fail-equivalent statuses: FAIL, FAILED, ERROR.
    #[must_use]
    pub fn is_fail_equivalent(&self) -> bool {
        matches!(self, Self::Fail | Self::Failed) || self.as_str() == "ERROR"
    }

    /// Critical statuses that poison a run for upload purposes.
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::Cancelled | Self::ExecutionFail | Self::Failed)
    }
}

impl From<RunOutcome> for String {
    fn from(value: RunOutcome) -> Self {
        value.as_str().to_string()
    }
}

impl From<String> for RunOutcome {
    fn from(value: String) -> Self {
        Self::from_literal(&value)
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────── test result ────────────────────

/// Record of one completed (or aborted) iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub iteration: usize,
    pub outcome: RunOutcome,
    /// Content-reported run name, falls back to the experiment name.
    pub name: String,
    /// Scratchpad register contents captured after the run.
    pub scratchpad: String,
    /// Content seed, when the backend reports one.
    pub seed: String,
    pub timestamp: DateTime<Utc>,
}

impl TestResult {
    #[must_use]
    pub fn new(iteration: usize, outcome: RunOutcome, name: impl Into<String>) -> Self {
        Self {
            iteration,
            outcome,
            name: name.into(),
            scratchpad: String::new(),
            seed: String::new(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn cancelled(iteration: usize) -> Self {
        Self::new(iteration, RunOutcome::Cancelled, "cancelled")
    }

    #[must_use]
    pub fn execution_fail(iteration: usize, name: impl Into<String>) -> Self {
        Self::new(iteration, RunOutcome::ExecutionFail, name)
    }
}

// ──────────────────── statistics ────────────────────

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Aggregate statistics over a result list.
///
/// `valid_tests` excludes cancelled and execution-fail iterations; pass and
/// fail rates are percentages of the valid population, zero when nothing
/// valid completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_completed: usize,
    pub pass_count: usize,
    pub fail_count: usize,
    pub cancelled_count: usize,
    pub execution_fail_count: usize,
    pub other_count: usize,
    pub valid_tests: usize,
    pub pass_rate: f64,
    pub fail_rate: f64,
    pub latest_status: Option<String>,
    pub latest_iteration: Option<usize>,
}

impl RunStats {
    #[must_use]
    pub fn compute(results: &[TestResult]) -> Self {
        let total = results.len();
        let pass = results
            .iter()
            .filter(|r| r.outcome.is_pass_equivalent())
            .count();
        let fail = results
            .iter()
            .filter(|r| r.outcome.is_fail_equivalent())
            .count();
        let cancelled = results
            .iter()
            .filter(|r| r.outcome == RunOutcome::Cancelled)
            .count();
        let execution_fail = results
            .iter()
            .filter(|r| r.outcome == RunOutcome::ExecutionFail)
            .count();
        let other = total - pass - fail - cancelled - execution_fail;
        let valid = total - cancelled - execution_fail;

        #[allow(clippy::cast_precision_loss)]
        let (pass_rate, fail_rate) = if valid == 0 {
            (0.0, 0.0)
        } else {
            (
                round1(pass as f64 / valid as f64 * 100.0),
                round1(fail as f64 / valid as f64 * 100.0),
            )
        };

        Self {
            total_completed: total,
            pass_count: pass,
            fail_count: fail,
            cancelled_count: cancelled,
            execution_fail_count: execution_fail,
            other_count: other,
            valid_tests: valid,
            pass_rate,
            fail_rate,
            latest_status: results.last().map(|r| r.outcome.as_str().to_string()),
            latest_iteration: results.last().map(|r| r.iteration),
        }
    }

    /// Alias some report consumers expect.
    #[must_use]
    pub const fn success_rate(&self) -> f64 {
        self.pass_rate
    }
}

// ──────────────────── upload gating ────────────────────

/// Fraction of critical results above which a run ending on a critical status
/// is considered too degraded to upload.
const CRITICAL_RATE_SOFT_LIMIT: f64 = 0.5;
/// Fraction of critical results that blocks upload regardless of how the run
/// ended.
const CRITICAL_RATE_HARD_LIMIT: f64 = 0.8;

/// Decide whether a finished run is clean enough to upload.
///
/// Returns `None` when upload should proceed, or the reason string when the
/// run is dominated by cancelled / execution-fail / dead-session results.
#[must_use]
pub fn upload_skip_reason(results: &[TestResult]) -> Option<String> {
    if results.is_empty() {
        return Some("no results to upload".to_string());
    }
    let critical = results.iter().filter(|r| r.outcome.is_critical()).count();
    let total = results.len();
    #[allow(clippy::cast_precision_loss)]
    let critical_rate = critical as f64 / total as f64;

    if critical == total {
        return Some(format!("all {total} results are critical failures"));
    }
    if results
        .last()
        .is_some_and(|r| r.outcome.is_critical())
        && critical_rate > CRITICAL_RATE_SOFT_LIMIT
    {
        return Some(format!(
            "run ended on a critical status with {:.0}% critical results",
            critical_rate * 100.0
        ));
    }
    if critical_rate >= CRITICAL_RATE_HARD_LIMIT {
        return Some(format!(
            "{:.0}% of results are critical failures",
            critical_rate * 100.0
        ));
    }
    None
}

// ──────────────────── shmoo matrices ────────────────────

/// Spreadsheet-style column letters: A..Z then AA, AB, and so on.
#[must_use]
pub fn legend_letter(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index;
    loop {
        letters.push(b'A' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Rendered result matrix plus the failure legend.
///
/// Cells are `"*"` for passes, a legend letter for fails, and `"N/A"` for
/// positions a cancelled run never reached. Each legend entry pairs its
/// letter with the failing iteration's identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShmooTable {
    pub matrix: Vec<Vec<String>>,
    pub legend: Vec<String>,
}

fn cell_and_legend(result: &TestResult, legend: &mut Vec<String>) -> String {
    if matches!(result.outcome, RunOutcome::Fail | RunOutcome::Failed) {
        let letter = legend_letter(legend.len());
        legend.push(format!(
            "{letter} - {}:{}:{}",
            result.iteration, result.scratchpad, result.seed
        ));
        letter
    } else {
        "*".to_string()
    }
}

/// One-column matrix for loop and sweep runs: one row per iteration.
#[must_use]
pub fn table_1d(results: &[TestResult]) -> ShmooTable {
    let mut legend = Vec::new();
    let matrix = results
        .iter()
        .map(|r| vec![cell_and_legend(r, &mut legend)])
        .collect();
    ShmooTable { matrix, legend }
}

/// Two-axis matrix for shmoo runs, Y rows by X columns.
///
/// Iterations fill row-major (the Y axis is the outer loop); a short result
/// list pads the tail with `"N/A"`.
#[must_use]
pub fn table_2d(results: &[TestResult], x_len: usize, y_len: usize) -> ShmooTable {
    let mut legend = Vec::new();
    let mut matrix = vec![vec!["N/A".to_string(); x_len]; y_len];
    for (i, result) in results.iter().enumerate().take(x_len * y_len) {
        let row = i / x_len;
        let col = i % x_len;
        matrix[row][col] = cell_and_legend(result, &mut legend);
    }
    ShmooTable { matrix, legend }
}

/// Render a matrix with axis labels as log-friendly lines.
#[must_use]
pub fn render_table(table: &ShmooTable, x_labels: &[String], y_labels: &[String]) -> Vec<String> {
    let mut lines = Vec::new();
    if !x_labels.is_empty() {
        let header: Vec<String> = x_labels.iter().map(|l| format!("{l:>8}")).collect();
        lines.push(format!("{:>10} {}", "", header.join(" ")));
    }
    for (row_idx, row) in table.matrix.iter().enumerate() {
        let label = y_labels
            .get(row_idx)
            .cloned()
            .unwrap_or_else(|| (row_idx + 1).to_string());
        let cells: Vec<String> = row.iter().map(|c| format!("{c:>8}")).collect();
        lines.push(format!("{label:>10} {}", cells.join(" ")));
    }
    for entry in &table.legend {
        lines.push(format!("  {entry}"));
    }
    lines
}

// ──────────────────── run summary / sink ────────────────────

/// Everything a result sink needs to persist one finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub experiment: String,
    /// Strategy label: "Loops", "Sweep", or "Shmoo".
    pub strategy: String,
    pub visual_id: String,
    pub bucket: String,
    pub finished_at: DateTime<Utc>,
    pub stats: RunStats,
    pub table: ShmooTable,
    pub results: Vec<TestResult>,
}

/// Destination for finished-run summaries.
pub trait ResultSink: Send {
    fn store(&mut self, summary: &RunSummary) -> Result<()>;
}
