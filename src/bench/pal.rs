//! Bench platform abstraction: system control, content sessions, cancellation.
//!
//! The executor drives hardware exclusively through these traits, so the same
//! orchestration runs against real probe plumbing or the simulator in
//! [`crate::bench::sim`]. Long bench operations take a [`CancelToken`] and are
//! expected to bail out with [`BenchError::Interrupted`] when it trips.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use regex::RegexSet;

use crate::core::config::{TestConfiguration, TesterBootConfig};
use crate::core::errors::{BenchError, Result, SdhError};
use crate::exec::results::RunOutcome;

// ──────────────────── cancellation ────────────────────

/// Shared cooperative cancel flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sleep in short slices, returning early with `Interrupted` when the token
/// trips.
pub fn sleep_with_cancel(
    duration: Duration,
    token: &CancelToken,
) -> std::result::Result<(), BenchError> {
    const SLICE: Duration = Duration::from_millis(100);
    let mut remaining = duration;
    while !remaining.is_zero() {
        if token.is_cancelled() {
            return Err(BenchError::Interrupted);
        }
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
    if token.is_cancelled() {
        return Err(BenchError::Interrupted);
    }
    Ok(())
}

// ──────────────────── log matching ────────────────────

/// Verdict of a single content log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineVerdict {
    Pass,
    Fail,
}

/// Matches content log lines against the configured pass/fail literals.
///
/// Literals arrive comma-separated; each is matched as an escaped substring,
/// case-sensitively, the way the bench consoles print them. Fail literals win
/// over pass literals on the same line.
pub struct LogMatcher {
    pass: RegexSet,
    fail: RegexSet,
}

impl LogMatcher {
    pub fn new(pass_csv: &str, fail_csv: &str) -> Result<Self> {
        Ok(Self {
            pass: Self::build_set(pass_csv)?,
            fail: Self::build_set(fail_csv)?,
        })
    }

    pub fn from_config(config: &TestConfiguration) -> Result<Self> {
        Self::new(&config.pass_strings, &config.fail_strings)
    }

    fn build_set(csv: &str) -> Result<RegexSet> {
        let patterns: Vec<String> = csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(regex::escape)
            .collect();
        RegexSet::new(&patterns).map_err(|e| SdhError::InvalidConfig {
            details: format!("bad pass/fail literal: {e}"),
        })
    }

    #[must_use]
    pub fn classify_line(&self, line: &str) -> Option<LineVerdict> {
        if self.fail.is_match(line) {
            Some(LineVerdict::Fail)
        } else if self.pass.is_match(line) {
            Some(LineVerdict::Pass)
        } else {
            None
        }
    }
}

// ──────────────────── traits ────────────────────

/// Outcome of a completed content session.
#[derive(Debug, Clone)]
pub struct ContentVerdict {
    pub outcome: RunOutcome,
    /// Content-reported run name.
    pub run_name: String,
    pub seed: String,
}

/// Power, boot, and register-access control of the unit under test.
pub trait SystemController: Send {
    /// Apply the configuration (masks, licenses, voltages, frequencies) and
    /// boot the unit to its run state.
    fn configure_and_boot(
        &mut self,
        config: &TestConfiguration,
        boot: &TesterBootConfig,
        cancel: &CancelToken,
    ) -> std::result::Result<(), BenchError>;

    fn power_cycle(&mut self) -> std::result::Result<(), BenchError>;

    /// Re-establish the register-access session after a transient fault.
    fn reconnect_ipc(&mut self) -> std::result::Result<(), BenchError>;

    fn wait_for_postcode(
        &mut self,
        postcode: u32,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> std::result::Result<(), BenchError>;

    /// Scratchpad register contents, captured after a run for triage.
    fn read_scratchpad(&mut self) -> String;
}

/// Runs the configured content on a booted unit and classifies its output.
pub trait ContentSession: Send {
    fn run_content(
        &mut self,
        config: &TestConfiguration,
        matcher: &LogMatcher,
        cancel: &CancelToken,
    ) -> std::result::Result<ContentVerdict, BenchError>;
}

/// Full bench: boot control plus content execution.
pub trait Bench: SystemController + ContentSession {}
impl<T: SystemController + ContentSession> Bench for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        token.clear();
        assert!(!clone.is_cancelled());
    }

    #[test]
    fn sleep_with_cancel_returns_early() {
        let token = CancelToken::new();
        token.cancel();
        let start = std::time::Instant::now();
        let result = sleep_with_cancel(Duration::from_secs(60), &token);
        assert_eq!(result, Err(BenchError::Interrupted));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn matcher_splits_comma_separated_literals() {
        let matcher = LogMatcher::new("Test Complete, All Done", "Test Failed").unwrap();
        assert_eq!(
            matcher.classify_line("... All Done ..."),
            Some(LineVerdict::Pass)
        );
        assert_eq!(
            matcher.classify_line("xx Test Failed xx"),
            Some(LineVerdict::Fail)
        );
        assert_eq!(matcher.classify_line("still running"), None);
    }

    #[test]
    fn matcher_escapes_regex_metacharacters() {
        let matcher = LogMatcher::new("PASS (end)", "FAIL [fatal]").unwrap();
        assert_eq!(
            matcher.classify_line("run: PASS (end)"),
            Some(LineVerdict::Pass)
        );
        assert_eq!(
            matcher.classify_line("run: FAIL [fatal]"),
            Some(LineVerdict::Fail)
        );
        assert_eq!(matcher.classify_line("PASS Xend)"), None);
    }

    #[test]
    fn fail_literal_wins_over_pass_on_same_line() {
        let matcher = LogMatcher::new("Complete", "Failed").unwrap();
        assert_eq!(
            matcher.classify_line("Complete but Failed"),
            Some(LineVerdict::Fail)
        );
    }
}
