//! Experiment orchestration: the shared drive loop, command surface, and
//! post-run reporting.
//!
//! A [`Framework`] is shared behind an `Arc`: the experiment thread calls one
//! of the `run_*` entry points with an [`IterationDriver`], while UI/API
//! threads issue commands (`halt_execution`, `step_continue`, ...) and poll
//! [`Framework::get_execution_state`]. All strategies funnel through the same
//! per-iteration loop: gate, apply the planned point, execute, record, gate
//! again.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;

use crate::bench::pal::{CancelToken, sleep_with_cancel};
use crate::core::config::{ExecutionMode, FrameworkOptions, TestConfiguration, TesterBootConfig};
use crate::core::errors::{Result, SdhError};
use crate::core::recipe::{ConfigUpdates, Recipe, RecipeSet, ShmooDefinition, StrategySpec};
use crate::exec::executor::IterationDriver;
use crate::exec::results::{
    ResultSink, RunOutcome, RunStats, RunSummary, ShmooTable, TestResult, render_table, table_1d,
    table_2d, upload_skip_reason,
};
use crate::exec::state::{
    ExecutionState, ExperimentControl, GateDecision, StepContinueOutcome, StepWait,
};
use crate::exec::strategy::Strategy;
use crate::logger::bench::BenchLog;
use crate::status::{StatusKind, StatusManager, StatusReporter};

// ──────────────────── framework ────────────────────

pub struct Framework {
    config: Mutex<TestConfiguration>,
    boot: Mutex<TesterBootConfig>,
    options: FrameworkOptions,
    control: ExperimentControl,
    status: StatusManager,
    logger: Arc<dyn BenchLog>,
    sink: Mutex<Option<Box<dyn ResultSink>>>,
}

impl Framework {
    #[must_use]
    pub fn new(logger: Arc<dyn BenchLog>, options: FrameworkOptions) -> Self {
        Self {
            config: Mutex::new(TestConfiguration::default()),
            boot: Mutex::new(TesterBootConfig::default()),
            options,
            control: ExperimentControl::new(),
            status: StatusManager::default(),
            logger,
            sink: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_status_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.status = StatusManager::new(Some(reporter));
        self
    }

    #[must_use]
    pub fn with_result_sink(self, sink: Box<dyn ResultSink>) -> Self {
        *self.sink.lock() = Some(sink);
        self
    }

    #[must_use]
    pub fn with_test_config(self, config: TestConfiguration) -> Self {
        *self.config.lock() = config;
        self
    }

    #[must_use]
    pub fn with_boot_config(self, boot: TesterBootConfig) -> Self {
        *self.boot.lock() = boot;
        self
    }

    /// Token the bench executor must share so cancel reaches in-flight
    /// operations.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.control.cancel_token()
    }

    #[must_use]
    pub fn logger(&self) -> Arc<dyn BenchLog> {
        Arc::clone(&self.logger)
    }

    // ──────────────────── configuration ────────────────────

    pub fn update_configuration(&self, updates: &ConfigUpdates) {
        updates.apply(&mut self.config.lock());
    }

    #[must_use]
    pub fn configuration(&self) -> TestConfiguration {
        self.config.lock().clone()
    }

    #[must_use]
    pub fn boot_configuration(&self) -> TesterBootConfig {
        self.boot.lock().clone()
    }

    pub fn set_boot_configuration(&self, boot: TesterBootConfig) {
        *self.boot.lock() = boot;
    }

    // ──────────────────── run entry points ────────────────────

    /// Fixed-configuration loop run.
    pub fn run_loops(
        &self,
        driver: &mut dyn IterationDriver,
        iterations: usize,
        updates: &ConfigUpdates,
    ) -> Result<Vec<String>> {
        self.execute(driver, &Strategy::loops(iterations)?, updates)
    }

    /// One-axis sweep run.
    pub fn run_sweep(
        &self,
        driver: &mut dyn IterationDriver,
        spec: &crate::core::recipe::SweepAxisSpec,
        updates: &ConfigUpdates,
    ) -> Result<Vec<String>> {
        self.execute(driver, &Strategy::sweep(spec)?, updates)
    }

    /// Two-axis shmoo run from a labelled definition file.
    pub fn run_shmoo(
        &self,
        driver: &mut dyn IterationDriver,
        file: &Path,
        label: &str,
        updates: &ConfigUpdates,
    ) -> Result<Vec<String>> {
        let definition = ShmooDefinition::load(file, label)?;
        self.execute(driver, &Strategy::shmoo(&definition)?, updates)
    }

    /// Run a parsed recipe.
    pub fn run_recipe(
        &self,
        driver: &mut dyn IterationDriver,
        recipe: &Recipe,
    ) -> Result<Vec<String>> {
        match &recipe.strategy {
            StrategySpec::Loops { iterations } => {
                self.run_loops(driver, *iterations, &recipe.updates)
            }
            StrategySpec::Sweep { axis } => self.run_sweep(driver, axis, &recipe.updates),
            StrategySpec::Shmoo { file, label } => {
                self.run_shmoo(driver, file, label, &recipe.updates)
            }
        }
    }

    /// Run every enabled recipe in a set, skipping named entries. A failed
    /// experiment is logged and the batch moves on.
    pub fn run_recipe_batch(
        &self,
        driver: &mut dyn IterationDriver,
        set: &RecipeSet,
        skip: &[String],
    ) -> Vec<(String, Vec<String>)> {
        let mut outcomes = Vec::with_capacity(set.entries.len());
        for (name, recipe) in &set.entries {
            if skip.iter().any(|s| s == name) {
                self.logger.info(&format!("Skipping experiment '{name}' (skip list)"));
                continue;
            }
            if !recipe.enabled {
                self.logger.info(&format!("Skipping experiment '{name}' (disabled)"));
                continue;
            }
            self.logger.info(&format!("Running experiment '{name}'"));
            match self.run_recipe(driver, recipe) {
                Ok(statuses) => outcomes.push((name.clone(), statuses)),
                Err(e) => {
                    self.logger
                        .error(&format!("Experiment '{name}' failed to run: {e}"));
                    outcomes.push((name.clone(), Vec::new()));
                }
            }
        }
        outcomes
    }

    /// Shared execution path for all strategies. Returns the per-iteration
    /// status strings, oldest first.
    pub fn execute(
        &self,
        driver: &mut dyn IterationDriver,
        strategy: &Strategy,
        updates: &ConfigUpdates,
    ) -> Result<Vec<String>> {
        let (name, mode) = {
            let mut config = self.config.lock();
            updates.apply(&mut config);
            if let Strategy::Shmoo { baseline, .. } = strategy {
                baseline.apply(&mut config);
            }
            (config.name.clone(), config.execution_mode)
        };
        let total = strategy.total_iterations();
        if !self.control.try_begin_run(&name, total) {
            return Err(SdhError::Runtime {
                details: "an experiment is already running".to_string(),
            });
        }

        self.logger.separator();
        self.logger.info(&format!(
            "Starting {} experiment '{name}' ({total} iterations)",
            strategy.label()
        ));
        self.status.publish(
            StatusKind::ExperimentStart,
            json!({
                "experiment_name": name,
                "strategy": strategy.label(),
                "total_iterations": total,
                "execution_mode": mode.as_str(),
            }),
        );

        let results = self.drive(driver, strategy);
        Ok(self.finish(strategy, &results))
    }

    // ──────────────────── drive loop ────────────────────

    fn drive(&self, driver: &mut dyn IterationDriver, strategy: &Strategy) -> Vec<TestResult> {
        let plan = strategy.plan();
        let total = plan.len();

        for (index, point) in plan.iter().enumerate() {
            let iteration = index + 1;
            match self.control.gate_decision() {
                GateDecision::Cancelled => {
                    self.logger.info("Cancel requested - stopping experiment");
                    self.control.push_result(TestResult::cancelled(iteration));
                    break;
                }
                GateDecision::End => {
                    self.logger
                        .info(&format!("End requested - stopping before iteration {iteration}"));
                    break;
                }
                GateDecision::Proceed => {}
            }

            self.control.record_iteration_start(iteration);
            let (config, boot) = {
                let mut config = self.config.lock();
                point.apply(&mut config);
                (config.clone(), self.boot.lock().clone())
            };
            self.logger
                .info(&format!("Iteration {iteration}/{total} ({point})"));

            let result = driver.run_iteration(&config, &boot, iteration);
            let outcome = result.outcome.clone();
            self.control.push_result(result);

            match outcome {
                RunOutcome::Cancelled => {
                    self.logger.info("Iteration cancelled - stopping experiment");
                    break;
                }
                RunOutcome::ExecutionFail => {
                    self.logger
                        .error("Unit could not be recovered - stopping experiment");
                    break;
                }
                _ => {}
            }

            // Reset policy: a fail always forces a reset before the next
            // iteration; a pass defers to the reset-on-pass knob.
            {
                let mut config = self.config.lock();
                config.reset = if outcome.is_pass_equivalent() {
                    config.reset_on_pass
                } else {
                    true
                };
            }

            if iteration == total {
                break;
            }
            match self.between_iterations_gate(iteration, total) {
                GateDecision::Proceed => {}
                GateDecision::End => {
                    self.logger.info("End requested - stopping experiment");
                    break;
                }
                GateDecision::Cancelled => {
                    self.logger.info("Cancel requested - stopping experiment");
                    self.control.push_result(TestResult::cancelled(iteration + 1));
                    break;
                }
            }

            let settle = self.options.iteration_settle();
            if !settle.is_zero() {
                // Cancel during the settle pause is observed by the next gate.
                let _ = sleep_with_cancel(settle, &self.control.cancel_token());
            }
        }
        self.control.finish_run();
        self.control.results()
    }

    /// Gate between iterations: end and cancel first, then the halt or step
    /// wait depending on mode.
    fn between_iterations_gate(&self, iteration: usize, total: usize) -> GateDecision {
        match self.control.gate_decision() {
            GateDecision::Proceed => {}
            decision => return decision,
        }

        if self.control.step_mode_enabled() {
            self.control.begin_step_wait();
            let stats = self.control.stats();
            let latest = self.control.results().last().cloned();
            self.status.publish(
                StatusKind::StepIterationComplete,
                json!({
                    "current_iteration": iteration,
                    "total_iterations": total,
                    "latest_result": latest,
                    "current_stats": stats,
                    "waiting_for_command": true,
                }),
            );
            self.logger.info(&format!(
                "Iteration {iteration}/{total} complete - waiting for step command \
                 (step_continue / end / cancel)"
            ));
            return match self
                .control
                .wait_for_step(self.options.halt_poll(), self.options.step_wait_timeout())
            {
                StepWait::Released => {
                    self.logger.info("Step command received - continuing");
                    GateDecision::Proceed
                }
                StepWait::TimedOut => {
                    self.logger.error("Step wait timed out - continuing");
                    GateDecision::Proceed
                }
                StepWait::End => GateDecision::End,
                StepWait::Cancelled => GateDecision::Cancelled,
            };
        }

        if self.control.halt_pending() {
            self.status.publish(
                StatusKind::ExecutionHalted,
                json!({
                    "current_iteration": iteration,
                    "total_iterations": total,
                }),
            );
            self.logger
                .info(&format!("Execution halted after iteration {iteration}"));
            return match self.control.wait_while_halted(self.options.halt_poll()) {
                GateDecision::Proceed => {
                    self.status.publish(
                        StatusKind::ExecutionResumed,
                        json!({ "current_iteration": iteration }),
                    );
                    self.logger.info("Execution resumed");
                    GateDecision::Proceed
                }
                // Cancel during a halt stops without an extra result.
                decision => decision,
            };
        }

        GateDecision::Proceed
    }

    // ──────────────────── post-run reporting ────────────────────

    fn finish(&self, strategy: &Strategy, results: &[TestResult]) -> Vec<String> {
        let statuses: Vec<String> = results
            .iter()
            .map(|r| r.outcome.as_str().to_string())
            .collect();
        let stats = RunStats::compute(results);

        // Only cancel / execution-fail tails abort reporting. A run ending on
        // a dead content session (FAILED) still summarizes and faces the
        // upload gate.
        let aborted = results.last().is_none_or(|r| {
            matches!(r.outcome, RunOutcome::Cancelled | RunOutcome::ExecutionFail)
        });
        if aborted {
            let reason = stats
                .latest_status
                .clone()
                .unwrap_or_else(|| "no iterations completed".to_string());
            let snapshot = self.get_execution_state();
            self.logger.error(&format!(
                "Experiment '{}' did not complete cleanly: {reason} \
                 ({} of {} iterations ran)",
                snapshot.experiment_name,
                results.len(),
                snapshot.total_iterations,
            ));
            self.status.publish(
                StatusKind::ExperimentFailed,
                json!({
                    "reason": reason,
                    "completed_iterations": results.len(),
                    "stats": stats,
                }),
            );
            return statuses;
        }

        let table = self.log_summary(strategy, results, &stats);
        self.status.publish(
            StatusKind::StrategyComplete,
            json!({
                "strategy": strategy.label(),
                "stats": stats,
                "legend": table.legend,
            }),
        );

        if self.options.upload_results {
            self.upload(strategy, results, &stats, table);
        }
        statuses
    }

    fn log_summary(
        &self,
        strategy: &Strategy,
        results: &[TestResult],
        stats: &RunStats,
    ) -> ShmooTable {
        let table = strategy.matrix_dims().map_or_else(
            || table_1d(results),
            |(x_len, y_len)| table_2d(results, x_len, y_len),
        );
        let (x_labels, y_labels) = strategy.axis_labels();

        self.logger.separator();
        self.logger.info(&format!(
            "{} summary: {} completed, {} pass / {} fail ({}% pass rate, {} valid)",
            strategy.label(),
            stats.total_completed,
            stats.pass_count,
            stats.fail_count,
            stats.pass_rate,
            stats.valid_tests,
        ));
        for line in render_table(&table, &x_labels, &y_labels) {
            self.logger.info(&line);
        }
        table
    }

    fn upload(
        &self,
        strategy: &Strategy,
        results: &[TestResult],
        stats: &RunStats,
        table: ShmooTable,
    ) {
        if let Some(reason) = upload_skip_reason(results) {
            self.logger.info(&format!("Skipping result upload: {reason}"));
            return;
        }
        let config = self.config.lock().clone();
        let summary = RunSummary {
            experiment: config.name,
            strategy: strategy.label().to_string(),
            visual_id: config.visual_id,
            bucket: config.bucket,
            finished_at: Utc::now(),
            stats: stats.clone(),
            table,
            results: results.to_vec(),
        };
        let mut sink = self.sink.lock();
        if let Some(sink) = sink.as_mut() {
            match sink.store(&summary) {
                Ok(()) => self.logger.info("Run summary uploaded"),
                Err(e) => self.logger.error(&format!("Result upload failed: {e}")),
            }
        }
    }

    // ──────────────────── command surface ────────────────────

    /// Request a graceful end after the current iteration. `false` (with a
    /// warning) when nothing is running; idempotent while running.
    pub fn end_experiment(&self) -> bool {
        if self.control.request_end() {
            self.logger.info("End requested - experiment will stop after this iteration");
            self.status.publish(
                StatusKind::ExperimentEndRequested,
                json!({ "current_iteration": self.get_execution_state().current_iteration }),
            );
            true
        } else {
            self.logger.error("No active experiment to end");
            false
        }
    }

    /// Halt at the next iteration boundary (continuous mode).
    pub fn halt_execution(&self) -> bool {
        if self.control.request_halt() {
            self.logger.info("Halt requested - pausing at the next iteration boundary");
            true
        } else {
            self.logger.error("Halt rejected: no running experiment or already halted");
            false
        }
    }

    /// Lift a pending halt.
    pub fn continue_execution(&self) -> bool {
        if self.control.request_continue() {
            self.logger.info("Continue requested - resuming execution");
            true
        } else {
            self.logger.error("Continue rejected: execution is not halted");
            false
        }
    }

    /// Hard cancel: abandons the current iteration as soon as the bench
    /// observes the token and releases every parked wait.
    pub fn cancel_execution(&self) {
        self.logger.info("Cancel requested - aborting experiment");
        self.control.request_cancel();
    }

    pub fn enable_step_by_step_mode(&self) {
        self.control.enable_step_mode();
        self.config.lock().execution_mode = ExecutionMode::StepByStep;
        self.logger.info("Step-by-step mode enabled");
        self.status
            .publish(StatusKind::StepModeEnabled, json!({}));
    }

    pub fn disable_step_by_step_mode(&self) {
        self.control.disable_step_mode();
        self.config.lock().execution_mode = ExecutionMode::Continuous;
        self.logger.info("Step-by-step mode disabled");
        self.status
            .publish(StatusKind::StepModeDisabled, json!({}));
    }

    /// Release the pending step wait. `false` when step mode is off, nothing
    /// is waiting, or an end is already pending.
    pub fn step_continue(&self) -> bool {
        match self.control.step_continue() {
            StepContinueOutcome::Issued => {
                self.logger.info("Step continue issued");
                self.status
                    .publish(StatusKind::StepContinueIssued, json!({}));
                true
            }
            StepContinueOutcome::StepModeDisabled => {
                self.logger.error("Step continue rejected: step mode is not enabled");
                false
            }
            StepContinueOutcome::NothingWaiting => {
                self.logger.error("Step continue rejected: no iteration is waiting");
                false
            }
            StepContinueOutcome::EndPending => {
                self.logger.error("Step continue rejected: end already requested");
                false
            }
        }
    }

    /// Consistent snapshot for UI/API consumers.
    #[must_use]
    pub fn get_execution_state(&self) -> ExecutionState {
        self.control.snapshot(self.config.lock().execution_mode)
    }
}
