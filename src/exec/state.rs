//! Experiment control state machine.
//!
//! One mutex guards the whole control state; one condvar wakes parked waits.
//! The experiment thread owns the run loop and parks itself in
//! [`ExperimentControl::wait_while_halted`] / [`ExperimentControl::wait_for_step`];
//! command threads mutate flags through the `request_*` methods and notify.
//! Waits tick at the configured poll interval and re-check cancel on every
//! wakeup, so a lost notification can only delay a reaction by one tick.
//!
//! Phase diagram:
//!
//! ```text
//! Idle ─ begin_run ─▶ Running ─▶ WaitingHalt ─▶ Running
//!                        │  ╲──▶ WaitingStep ─▶ Running
//!                        │           │
//!                        ▼           ▼
//!                  Ending / Cancelled ─ finish_run ─▶ Idle
//! ```

#![allow(missing_docs)]

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::bench::pal::CancelToken;
use crate::core::config::ExecutionMode;
use crate::exec::results::{RunStats, TestResult};

// ──────────────────── phases ────────────────────

/// Where the experiment thread currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    /// Parked in a halt wait, continuous mode.
    WaitingHalt,
    /// Parked after an iteration, step mode.
    WaitingStep,
    /// End acknowledged, finishing the current bookkeeping.
    Ending,
    Cancelled,
}

impl RunPhase {
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Pre/post-iteration gate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    /// Graceful end was requested; stop without running further iterations.
    End,
    Cancelled,
}

/// Outcome of a step-mode wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepWait {
    Released,
    End,
    Cancelled,
    TimedOut,
}

/// Why a step-continue command was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepContinueOutcome {
    Issued,
    StepModeDisabled,
    NothingWaiting,
    EndPending,
}

// ──────────────────── inner state ────────────────────

#[derive(Debug)]
struct ControlInner {
    phase: RunPhase,
    step_mode: bool,
    halt_requested: bool,
    /// One-shot permit consumed by the next step wait.
    step_release: bool,
    /// An iteration has completed and the run loop is about to park (or is
    /// parked) for a step command. Set before the completion event is
    /// published so an immediate `step_continue` is never lost.
    awaiting_step: bool,
    end_requested: bool,
    cancel_requested: bool,
    current_iteration: usize,
    total_iterations: usize,
    experiment_name: String,
    results: Vec<TestResult>,
}

impl ControlInner {
    const fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            step_mode: false,
            halt_requested: false,
            step_release: false,
            awaiting_step: false,
            end_requested: false,
            cancel_requested: false,
            current_iteration: 0,
            total_iterations: 0,
            experiment_name: String::new(),
            results: Vec::new(),
        }
    }

    fn waiting_for_command(&self) -> bool {
        self.awaiting_step || matches!(self.phase, RunPhase::WaitingHalt | RunPhase::WaitingStep)
    }
}

// ──────────────────── snapshot ────────────────────

/// Point-in-time view of the control state, safe to hand to UI/API consumers.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionState {
    pub is_running: bool,
    pub phase: RunPhase,
    pub execution_mode: ExecutionMode,
    pub step_mode_enabled: bool,
    pub waiting_for_command: bool,
    pub end_requested: bool,
    pub current_iteration: usize,
    pub total_iterations: usize,
    pub experiment_name: String,
    pub current_stats: RunStats,
    /// Most recent results, newest last.
    pub latest_results: Vec<TestResult>,
    pub available_commands: Vec<&'static str>,
}

/// How many trailing results a snapshot carries.
const SNAPSHOT_RESULT_WINDOW: usize = 5;

// ──────────────────── control ────────────────────

/// Shared control surface between the experiment thread and command threads.
pub struct ExperimentControl {
    inner: Mutex<ControlInner>,
    cond: Condvar,
    cancel: CancelToken,
}

impl Default for ExperimentControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentControl {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ControlInner::new()),
            cond: Condvar::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Token shared with the bench layer so in-flight boot/content operations
    /// observe cancellation.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // ──────────────────── run-loop side ────────────────────

    /// Atomically claim the control surface for a new run. Returns `false`
    /// when an experiment is already active.
    #[must_use]
    pub fn try_begin_run(&self, experiment_name: &str, total_iterations: usize) -> bool {
        let mut inner = self.inner.lock();
        if inner.phase.is_active() {
            return false;
        }
        Self::reset_for_run(&mut inner, experiment_name, total_iterations);
        self.cancel.clear();
        true
    }

    /// Reset per-run flags and enter `Running`. Step mode survives across
    /// runs; end/cancel/halt flags do not.
    pub fn begin_run(&self, experiment_name: &str, total_iterations: usize) {
        let mut inner = self.inner.lock();
        Self::reset_for_run(&mut inner, experiment_name, total_iterations);
        self.cancel.clear();
    }

    fn reset_for_run(inner: &mut ControlInner, experiment_name: &str, total_iterations: usize) {
        inner.phase = RunPhase::Running;
        inner.halt_requested = false;
        inner.step_release = false;
        inner.awaiting_step = false;
        inner.end_requested = false;
        inner.cancel_requested = false;
        inner.current_iteration = 0;
        inner.total_iterations = total_iterations;
        inner.experiment_name = experiment_name.to_string();
        inner.results.clear();
    }

    pub fn finish_run(&self) {
        let mut inner = self.inner.lock();
        inner.phase = RunPhase::Idle;
        inner.halt_requested = false;
        inner.awaiting_step = false;
        inner.step_release = false;
        self.cond.notify_all();
    }

    pub fn record_iteration_start(&self, iteration: usize) {
        self.inner.lock().current_iteration = iteration;
    }

    pub fn push_result(&self, result: TestResult) {
        self.inner.lock().results.push(result);
    }

    /// Check for end/cancel before (or right after) an iteration. Cancel wins
    /// over a plain end so the run records its cancelled status.
    #[must_use]
    pub fn gate_decision(&self) -> GateDecision {
        let mut inner = self.inner.lock();
        if inner.cancel_requested {
            inner.phase = RunPhase::Cancelled;
            GateDecision::Cancelled
        } else if inner.end_requested {
            inner.phase = RunPhase::Ending;
            GateDecision::End
        } else {
            GateDecision::Proceed
        }
    }

    #[must_use]
    pub fn halt_pending(&self) -> bool {
        self.inner.lock().halt_requested
    }

    /// Park while a halt is in force. Returns when the halt is lifted, the
    /// run is ended, or cancelled. Ticks at `tick` re-checking cancel.
    pub fn wait_while_halted(&self, tick: Duration) -> GateDecision {
        let mut inner = self.inner.lock();
        inner.phase = RunPhase::WaitingHalt;
        let decision = loop {
            if inner.cancel_requested {
                break GateDecision::Cancelled;
            }
            if inner.end_requested {
                break GateDecision::End;
            }
            if !inner.halt_requested {
                break GateDecision::Proceed;
            }
            self.cond.wait_for(&mut inner, tick);
        };
        inner.phase = match decision {
            GateDecision::Proceed => RunPhase::Running,
            GateDecision::End => RunPhase::Ending,
            GateDecision::Cancelled => RunPhase::Cancelled,
        };
        decision
    }

    /// Mark that the run loop is about to park for a step command. Must be
    /// called before publishing the iteration-complete event so commands
    /// issued in response find the wait armed.
    pub fn begin_step_wait(&self) {
        let mut inner = self.inner.lock();
        inner.awaiting_step = true;
    }

    /// Park until a step-continue (or mode change, end, cancel, timeout).
    pub fn wait_for_step(&self, tick: Duration, timeout: Option<Duration>) -> StepWait {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();
        inner.phase = RunPhase::WaitingStep;
        let outcome = loop {
            if inner.cancel_requested {
                break StepWait::Cancelled;
            }
            if inner.end_requested {
                break StepWait::End;
            }
            if !inner.step_mode {
                // Step mode switched off mid-wait: resume continuous.
                break StepWait::Released;
            }
            if inner.step_release {
                inner.step_release = false;
                break StepWait::Released;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break StepWait::TimedOut;
            }
            self.cond.wait_for(&mut inner, tick);
        };
        inner.awaiting_step = false;
        inner.phase = match outcome {
            StepWait::Released | StepWait::TimedOut => RunPhase::Running,
            StepWait::End => RunPhase::Ending,
            StepWait::Cancelled => RunPhase::Cancelled,
        };
        outcome
    }

    // ──────────────────── command side ────────────────────

    /// Request a graceful end after the current iteration. Returns `false`
    /// when no experiment is active. Idempotent while running.
    #[must_use]
    pub fn request_end(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.phase.is_active() {
            return false;
        }
        inner.end_requested = true;
        self.cond.notify_all();
        true
    }

    /// Request a halt at the next iteration boundary (continuous mode).
    #[must_use]
    pub fn request_halt(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.phase.is_active() || inner.halt_requested {
            return false;
        }
        inner.halt_requested = true;
        self.cond.notify_all();
        true
    }

    /// Lift a halt. Returns `false` when nothing is halted.
    #[must_use]
    pub fn request_continue(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.halt_requested {
            return false;
        }
        inner.halt_requested = false;
        self.cond.notify_all();
        true
    }

    /// Hard cancel: trips the bench token, forces the end flag, and releases
    /// any parked wait.
    pub fn request_cancel(&self) {
        let mut inner = self.inner.lock();
        inner.cancel_requested = true;
        inner.end_requested = true;
        inner.halt_requested = false;
        self.cancel.cancel();
        self.cond.notify_all();
    }

    pub fn enable_step_mode(&self) {
        let mut inner = self.inner.lock();
        inner.step_mode = true;
        inner.step_release = false;
        self.cond.notify_all();
    }

    /// Turn step mode off; a parked step wait resumes as continuous.
    pub fn disable_step_mode(&self) {
        let mut inner = self.inner.lock();
        inner.step_mode = false;
        self.cond.notify_all();
    }

    #[must_use]
    pub fn step_mode_enabled(&self) -> bool {
        self.inner.lock().step_mode
    }

    /// Release the pending step wait, if one is armed.
    #[must_use]
    pub fn step_continue(&self) -> StepContinueOutcome {
        let mut inner = self.inner.lock();
        if !inner.step_mode {
            return StepContinueOutcome::StepModeDisabled;
        }
        if inner.end_requested {
            return StepContinueOutcome::EndPending;
        }
        if !inner.awaiting_step {
            return StepContinueOutcome::NothingWaiting;
        }
        inner.step_release = true;
        self.cond.notify_all();
        StepContinueOutcome::Issued
    }

    // ──────────────────── observation ────────────────────

    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.inner.lock().phase
    }

    #[must_use]
    pub fn end_requested(&self) -> bool {
        self.inner.lock().end_requested
    }

    #[must_use]
    pub fn results(&self) -> Vec<TestResult> {
        self.inner.lock().results.clone()
    }

    #[must_use]
    pub fn stats(&self) -> RunStats {
        RunStats::compute(&self.inner.lock().results)
    }

    /// Consistent snapshot of the whole control state, stats recomputed from
    /// the live result list.
    #[must_use]
    pub fn snapshot(&self, mode: ExecutionMode) -> ExecutionState {
        let inner = self.inner.lock();
        let stats = RunStats::compute(&inner.results);
        let recent = inner
            .results
            .iter()
            .rev()
            .take(SNAPSHOT_RESULT_WINDOW)
            .rev()
            .cloned()
            .collect();
        ExecutionState {
            is_running: inner.phase.is_active(),
            phase: inner.phase,
            execution_mode: mode,
            step_mode_enabled: inner.step_mode,
            waiting_for_command: inner.waiting_for_command(),
            end_requested: inner.end_requested,
            current_iteration: inner.current_iteration,
            total_iterations: inner.total_iterations,
            experiment_name: inner.experiment_name.clone(),
            current_stats: stats,
            latest_results: recent,
            available_commands: Self::available_commands(&inner),
        }
    }

    fn available_commands(inner: &ControlInner) -> Vec<&'static str> {
        if !inner.phase.is_active() {
            return vec!["start"];
        }
        let mut commands = vec!["cancel"];
        if !inner.end_requested {
            commands.push("end");
        }
        if inner.step_mode {
            if inner.awaiting_step && !inner.end_requested {
                commands.push("step_continue");
            }
        } else if inner.halt_requested {
            commands.push("continue");
        } else {
            commands.push("halt");
        }
        commands
    }
}
