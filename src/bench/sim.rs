//! Scriptable in-process bench for development and tests.
//!
//! Boot attempts and content verdicts are driven by scripts consumed front to
//! back; once a script is exhausted the simulator boots clean and passes.
//! Counters are shared through [`SimCounters`] so tests can assert on the
//! recovery sequence (power cycles, reconnects) after the run finishes.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use rand::distr::Alphanumeric;

use crate::bench::pal::{
    CancelToken, ContentSession, ContentVerdict, LineVerdict, LogMatcher, SystemController,
};
use crate::core::config::{TestConfiguration, TesterBootConfig};
use crate::core::errors::BenchError;
use crate::exec::results::RunOutcome;

// ──────────────────── scripts ────────────────────

/// Scripted outcome of one boot attempt.
#[derive(Debug, Clone)]
pub enum BootScript {
    Ready,
    /// Raw fault string, classified at the boundary exactly like a real
    /// probe-layer message ("RSP 10" marks a transient connection fault).
    Fault(String),
}

/// Scripted outcome of one content session.
#[derive(Debug, Clone)]
pub enum ContentScript {
    Pass,
    Fail,
    /// Session dies with a content error instead of producing a verdict.
    Die(String),
}

// ──────────────────── counters ────────────────────

#[derive(Debug, Default)]
struct CounterInner {
    boot_attempts: AtomicUsize,
    successful_boots: AtomicUsize,
    power_cycles: AtomicUsize,
    ipc_reconnects: AtomicUsize,
    postcode_waits: AtomicUsize,
    content_runs: AtomicUsize,
}

/// Shared observation handle over a [`SimulatedBench`].
#[derive(Debug, Clone, Default)]
pub struct SimCounters(Arc<CounterInner>);

impl SimCounters {
    #[must_use]
    pub fn boot_attempts(&self) -> usize {
        self.0.boot_attempts.load(Ordering::SeqCst)
    }
    #[must_use]
    pub fn successful_boots(&self) -> usize {
        self.0.successful_boots.load(Ordering::SeqCst)
    }
    #[must_use]
    pub fn power_cycles(&self) -> usize {
        self.0.power_cycles.load(Ordering::SeqCst)
    }
    #[must_use]
    pub fn ipc_reconnects(&self) -> usize {
        self.0.ipc_reconnects.load(Ordering::SeqCst)
    }
    #[must_use]
    pub fn postcode_waits(&self) -> usize {
        self.0.postcode_waits.load(Ordering::SeqCst)
    }
    #[must_use]
    pub fn content_runs(&self) -> usize {
        self.0.content_runs.load(Ordering::SeqCst)
    }
}

// ──────────────────── simulator ────────────────────

pub struct SimulatedBench {
    boot_script: VecDeque<BootScript>,
    content_script: VecDeque<ContentScript>,
    counters: SimCounters,
    /// Artificial latency per bench operation.
    op_delay: Duration,
    last_scratchpad: String,
}

impl Default for SimulatedBench {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBench {
    #[must_use]
    pub fn new() -> Self {
        Self {
            boot_script: VecDeque::new(),
            content_script: VecDeque::new(),
            counters: SimCounters::default(),
            op_delay: Duration::ZERO,
            last_scratchpad: "0x00000000".to_string(),
        }
    }

    #[must_use]
    pub fn with_boot_script(mut self, script: impl IntoIterator<Item = BootScript>) -> Self {
        self.boot_script = script.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_content_script(mut self, script: impl IntoIterator<Item = ContentScript>) -> Self {
        self.content_script = script.into_iter().collect();
        self
    }

    #[must_use]
    pub const fn with_op_delay(mut self, delay: Duration) -> Self {
        self.op_delay = delay;
        self
    }

    #[must_use]
    pub fn counters(&self) -> SimCounters {
        self.counters.clone()
    }

    fn delay(&self) {
        if !self.op_delay.is_zero() {
            std::thread::sleep(self.op_delay);
        }
    }

    fn random_seed() -> String {
        let mut rng = rand::rng();
        (0..8).map(|_| rng.sample(Alphanumeric) as char).collect()
    }
}

impl SystemController for SimulatedBench {
    fn configure_and_boot(
        &mut self,
        _config: &TestConfiguration,
        _boot: &TesterBootConfig,
        cancel: &CancelToken,
    ) -> Result<(), BenchError> {
        if cancel.is_cancelled() {
            return Err(BenchError::Interrupted);
        }
        self.delay();
        self.counters.0.boot_attempts.fetch_add(1, Ordering::SeqCst);
        match self.boot_script.pop_front() {
            Some(BootScript::Fault(details)) => Err(BenchError::classify_boot_fault(&details)),
            Some(BootScript::Ready) | None => {
                self.counters
                    .0
                    .successful_boots
                    .fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    fn power_cycle(&mut self) -> Result<(), BenchError> {
        self.delay();
        self.counters.0.power_cycles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reconnect_ipc(&mut self) -> Result<(), BenchError> {
        self.delay();
        self.counters.0.ipc_reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn wait_for_postcode(
        &mut self,
        _postcode: u32,
        _timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<(), BenchError> {
        if cancel.is_cancelled() {
            return Err(BenchError::Interrupted);
        }
        self.delay();
        self.counters.0.postcode_waits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_scratchpad(&mut self) -> String {
        self.last_scratchpad.clone()
    }
}

impl ContentSession for SimulatedBench {
    fn run_content(
        &mut self,
        config: &TestConfiguration,
        matcher: &LogMatcher,
        cancel: &CancelToken,
    ) -> Result<ContentVerdict, BenchError> {
        if cancel.is_cancelled() {
            return Err(BenchError::Interrupted);
        }
        self.delay();
        let run_index = self.counters.0.content_runs.fetch_add(1, Ordering::SeqCst) + 1;
        self.last_scratchpad = format!("0x{run_index:08x}");

        let script = self.content_script.pop_front().unwrap_or(ContentScript::Pass);
        let final_line = match script {
            ContentScript::Pass => config
                .pass_strings
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .to_string(),
            ContentScript::Fail => config
                .fail_strings
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .to_string(),
            ContentScript::Die(details) => return Err(BenchError::Content { details }),
        };

        // Classify through the matcher, same path a live console reader takes.
        let outcome = match matcher.classify_line(&final_line) {
            Some(LineVerdict::Pass) => RunOutcome::Pass,
            Some(LineVerdict::Fail) | None => RunOutcome::Fail,
        };

        Ok(ContentVerdict {
            outcome,
            run_name: format!("{}_{run_index:04}", config.name),
            seed: Self::random_seed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> LogMatcher {
        LogMatcher::new("Test Complete", "Test Failed").unwrap()
    }

    #[test]
    fn exhausted_scripts_boot_clean_and_pass() {
        let mut bench = SimulatedBench::new();
        let config = TestConfiguration::default();
        let boot = TesterBootConfig::default();
        let cancel = CancelToken::new();

        bench.configure_and_boot(&config, &boot, &cancel).unwrap();
        let verdict = bench.run_content(&config, &matcher(), &cancel).unwrap();
        assert_eq!(verdict.outcome, RunOutcome::Pass);
        assert_eq!(verdict.seed.len(), 8);
        assert!(verdict.run_name.starts_with("Experiment_"));
        assert_eq!(bench.counters().successful_boots(), 1);
    }

    #[test]
    fn boot_fault_strings_are_classified() {
        let mut bench = SimulatedBench::new().with_boot_script([
            BootScript::Fault("ipc RSP 10".to_string()),
            BootScript::Fault("MRC hang".to_string()),
        ]);
        let config = TestConfiguration::default();
        let boot = TesterBootConfig::default();
        let cancel = CancelToken::new();

        let first = bench.configure_and_boot(&config, &boot, &cancel).unwrap_err();
        assert!(first.is_transient_connection());
        let second = bench.configure_and_boot(&config, &boot, &cancel).unwrap_err();
        assert!(!second.is_transient_connection());
        assert_eq!(bench.counters().boot_attempts(), 2);
        assert_eq!(bench.counters().successful_boots(), 0);
    }

    #[test]
    fn content_script_drives_verdicts() {
        let mut bench = SimulatedBench::new().with_content_script([
            ContentScript::Fail,
            ContentScript::Die("console went dark".to_string()),
        ]);
        let config = TestConfiguration::default();
        let cancel = CancelToken::new();

        let verdict = bench.run_content(&config, &matcher(), &cancel).unwrap();
        assert_eq!(verdict.outcome, RunOutcome::Fail);
        let err = bench.run_content(&config, &matcher(), &cancel).unwrap_err();
        assert_eq!(
            err,
            BenchError::Content {
                details: "console went dark".to_string()
            }
        );
    }

    #[test]
    fn cancelled_token_interrupts_operations() {
        let mut bench = SimulatedBench::new();
        let config = TestConfiguration::default();
        let boot = TesterBootConfig::default();
        let cancel = CancelToken::new();
        cancel.cancel();

        assert_eq!(
            bench.configure_and_boot(&config, &boot, &cancel).unwrap_err(),
            BenchError::Interrupted
        );
        assert_eq!(
            bench.run_content(&config, &matcher(), &cancel).unwrap_err(),
            BenchError::Interrupted
        );
    }

    #[test]
    fn scratchpad_tracks_latest_run() {
        let mut bench = SimulatedBench::new();
        let config = TestConfiguration::default();
        let cancel = CancelToken::new();
        assert_eq!(bench.read_scratchpad(), "0x00000000");
        bench.run_content(&config, &matcher(), &cancel).unwrap();
        assert_eq!(bench.read_scratchpad(), "0x00000001");
    }
}
