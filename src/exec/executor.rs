//! Single-iteration execution with boot-failure recovery.
//!
//! [`BenchExecutor`] runs one configure/boot/content cycle and maps every
//! failure to a terminal [`RunOutcome`]; it never panics the run loop. Boot
//! recovery policy dispatches on the typed [`BenchError`] variant:
//!
//! * `Interrupted` — no recovery, the iteration is `Cancelled`.
//! * `TransientConnection` — power cycle, recovery delay, IPC reconnect,
//!   retry once.
//! * anything else — power cycle, wait for the EFI postcode, retry once.
//!
//! A second boot failure yields `ExecutionFail`, which stops the strategy.

#![allow(missing_docs)]

use std::sync::Arc;

use crate::bench::pal::{Bench, CancelToken, LogMatcher, sleep_with_cancel};
use crate::core::config::{TestConfiguration, TesterBootConfig};
use crate::core::errors::BenchError;
use crate::exec::results::{RunOutcome, TestResult};
use crate::logger::bench::BenchLog;

/// One iteration of the experiment, whatever the strategy.
pub trait IterationDriver: Send {
    fn run_iteration(
        &mut self,
        config: &TestConfiguration,
        boot: &TesterBootConfig,
        iteration: usize,
    ) -> TestResult;
}

/// Drives a [`Bench`] through configure, boot, content, and triage capture.
pub struct BenchExecutor<B: Bench> {
    bench: B,
    cancel: CancelToken,
    logger: Arc<dyn BenchLog>,
}

impl<B: Bench> BenchExecutor<B> {
    pub fn new(bench: B, cancel: CancelToken, logger: Arc<dyn BenchLog>) -> Self {
        Self {
            bench,
            cancel,
            logger,
        }
    }

    /// Consume the executor and hand the bench back (test observation).
    pub fn into_bench(self) -> B {
        self.bench
    }

    /// Boot with the one-retry recovery policy.
    fn boot_with_recovery(
        &mut self,
        config: &TestConfiguration,
        boot: &TesterBootConfig,
    ) -> Result<(), BenchError> {
        let first = match self.bench.configure_and_boot(config, boot, &self.cancel) {
            Ok(()) => return Ok(()),
            Err(BenchError::Interrupted) => return Err(BenchError::Interrupted),
            Err(e) => e,
        };
        self.logger
            .error(&format!("Boot failed: {first} - attempting recovery"));
        if self.cancel.is_cancelled() {
            return Err(BenchError::Interrupted);
        }

        if first.is_transient_connection() {
            // Register-access wedge: the unit needs a full power cycle and a
            // settle window before the IPC session can come back.
            self.logger.info(&format!(
                "Power cycling unit, then waiting {}s for the register-access layer",
                boot.recovery_delay_secs
            ));
            self.bench.power_cycle()?;
            sleep_with_cancel(boot.recovery_delay(), &self.cancel)?;
            self.bench.reconnect_ipc()?;
        } else {
            self.logger.info("Power cycling unit and waiting for EFI postcode");
            self.bench.power_cycle()?;
            self.bench
                .wait_for_postcode(boot.efi_postcode, boot.efi_postcode_wait(), &self.cancel)?;
        }

        self.logger.info("Retrying boot after recovery");
        self.bench.configure_and_boot(config, boot, &self.cancel)
    }
}

impl<B: Bench> IterationDriver for BenchExecutor<B> {
    fn run_iteration(
        &mut self,
        config: &TestConfiguration,
        boot: &TesterBootConfig,
        iteration: usize,
    ) -> TestResult {
        self.logger.debug(&format!(
            "Iteration {iteration}: content={} target={:?} reset={} fastboot={} \
             freq_core={:?} freq_mesh={:?} volt_core={:?} volt_mesh={:?}",
            config.content.as_str(),
            config.target,
            config.reset,
            config.fastboot,
            config.freq_core,
            config.freq_mesh,
            config.volt_core,
            config.volt_mesh,
        ));

        if self.cancel.is_cancelled() {
            return TestResult::cancelled(iteration);
        }

        match self.boot_with_recovery(config, boot) {
            Ok(()) => {}
            Err(BenchError::Interrupted) => {
                self.logger.info(&format!("Iteration {iteration} cancelled during boot"));
                return TestResult::cancelled(iteration);
            }
            Err(e) => {
                let wrapped = crate::core::errors::SdhError::from(e);
                self.logger
                    .error(&format!("Boot failed after recovery: {wrapped}"));
                return TestResult::execution_fail(iteration, config.name.clone());
            }
        }

        let matcher = match LogMatcher::from_config(config) {
            Ok(m) => m,
            Err(e) => {
                self.logger.error(&e.to_string());
                return TestResult::execution_fail(iteration, config.name.clone());
            }
        };

        let mut result = match self.bench.run_content(config, &matcher, &self.cancel) {
            Ok(verdict) => {
                let mut r = TestResult::new(iteration, verdict.outcome, verdict.run_name);
                r.seed = verdict.seed;
                r
            }
            Err(BenchError::Interrupted) => {
                self.logger
                    .info(&format!("Iteration {iteration} cancelled during content"));
                TestResult::cancelled(iteration)
            }
            Err(e) => {
                self.logger.error(&format!("Content session failed: {e}"));
                TestResult::new(iteration, RunOutcome::Failed, config.name.clone())
            }
        };
        result.scratchpad = self.bench.read_scratchpad();

        self.logger.info(&format!(
            "Iteration {iteration} finished: {} (name={} seed={} scratchpad={})",
            result.outcome, result.name, result.seed, result.scratchpad
        ));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::sim::{BootScript, ContentScript, SimulatedBench};
    use crate::logger::bench::MemoryLog;

    fn zero_delay_boot() -> TesterBootConfig {
        TesterBootConfig {
            recovery_delay_secs: 0,
            ..TesterBootConfig::default()
        }
    }

    fn executor(bench: SimulatedBench) -> (BenchExecutor<SimulatedBench>, Arc<MemoryLog>) {
        let log = MemoryLog::new();
        let exec = BenchExecutor::new(bench, CancelToken::new(), log.clone());
        (exec, log)
    }

    #[test]
    fn clean_pass_iteration() {
        let bench = SimulatedBench::new();
        let counters = bench.counters();
        let (mut exec, _log) = executor(bench);
        let result =
            exec.run_iteration(&TestConfiguration::default(), &zero_delay_boot(), 1);
        assert_eq!(result.outcome, RunOutcome::Pass);
        assert_eq!(result.iteration, 1);
        assert!(!result.scratchpad.is_empty());
        assert_eq!(counters.boot_attempts(), 1);
        assert_eq!(counters.power_cycles(), 0);
    }

    #[test]
    fn transient_fault_recovers_with_reconnect() {
        let bench = SimulatedBench::new()
            .with_boot_script([BootScript::Fault("probe RSP 10".to_string())]);
        let counters = bench.counters();
        let (mut exec, log) = executor(bench);
        let result =
            exec.run_iteration(&TestConfiguration::default(), &zero_delay_boot(), 1);

        assert_eq!(result.outcome, RunOutcome::Pass);
        assert_eq!(counters.boot_attempts(), 2);
        assert_eq!(counters.power_cycles(), 1);
        assert_eq!(counters.ipc_reconnects(), 1);
        assert_eq!(counters.postcode_waits(), 0);
        assert!(log.contains("register-access layer"));
    }

    #[test]
    fn boot_config_fault_recovers_with_postcode_wait() {
        let bench =
            SimulatedBench::new().with_boot_script([BootScript::Fault("MRC hang".to_string())]);
        let counters = bench.counters();
        let (mut exec, _log) = executor(bench);
        let result =
            exec.run_iteration(&TestConfiguration::default(), &zero_delay_boot(), 1);

        assert_eq!(result.outcome, RunOutcome::Pass);
        assert_eq!(counters.boot_attempts(), 2);
        assert_eq!(counters.power_cycles(), 1);
        assert_eq!(counters.ipc_reconnects(), 0);
        assert_eq!(counters.postcode_waits(), 1);
    }

    #[test]
    fn second_boot_failure_is_execution_fail() {
        let bench = SimulatedBench::new().with_boot_script([
            BootScript::Fault("MRC hang".to_string()),
            BootScript::Fault("MRC hang again".to_string()),
        ]);
        let counters = bench.counters();
        let (mut exec, log) = executor(bench);
        let result =
            exec.run_iteration(&TestConfiguration::default(), &zero_delay_boot(), 3);

        assert_eq!(result.outcome, RunOutcome::ExecutionFail);
        assert_eq!(result.iteration, 3);
        assert_eq!(counters.boot_attempts(), 2);
        assert!(log.contains("Boot failed after recovery"));
    }

    #[test]
    fn cancel_during_boot_yields_cancelled() {
        let bench = SimulatedBench::new();
        let log = MemoryLog::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut exec = BenchExecutor::new(bench, cancel, log);
        let result =
            exec.run_iteration(&TestConfiguration::default(), &zero_delay_boot(), 2);
        assert_eq!(result.outcome, RunOutcome::Cancelled);
    }

    #[test]
    fn dead_content_session_is_failed_not_execution_fail() {
        let bench = SimulatedBench::new()
            .with_content_script([ContentScript::Die("console gone".to_string())]);
        let (mut exec, log) = executor(bench);
        let result =
            exec.run_iteration(&TestConfiguration::default(), &zero_delay_boot(), 1);
        assert_eq!(result.outcome, RunOutcome::Failed);
        assert!(log.contains("Content session failed"));
    }

    #[test]
    fn fail_verdict_carries_scratchpad() {
        let bench = SimulatedBench::new().with_content_script([ContentScript::Fail]);
        let (mut exec, _log) = executor(bench);
        let result =
            exec.run_iteration(&TestConfiguration::default(), &zero_delay_boot(), 1);
        assert_eq!(result.outcome, RunOutcome::Fail);
        assert_eq!(result.scratchpad, "0x00000001");
        assert_eq!(result.seed.len(), 8);
    }
}
