//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use silicon_debug_harness::prelude::*;
//! ```

// Core
pub use crate::core::config::{
    BenchConfig, ExecutionMode, FrameworkOptions, SweepDomain, SweepKind, TestConfiguration,
    TesterBootConfig,
};
pub use crate::core::errors::{BenchError, Result, SdhError};
pub use crate::core::recipe::{ConfigUpdates, Recipe, RecipeSet, ShmooDefinition};

// Bench
pub use crate::bench::pal::{Bench, CancelToken, ContentSession, LogMatcher, SystemController};
pub use crate::bench::sim::SimulatedBench;

// Execution
pub use crate::exec::api::{ApiResponse, ExternalApi, IterationStatistics};
pub use crate::exec::executor::{BenchExecutor, IterationDriver};
pub use crate::exec::framework::Framework;
pub use crate::exec::results::{ResultSink, RunOutcome, RunStats, RunSummary, TestResult};
pub use crate::exec::state::{ExecutionState, RunPhase};
pub use crate::exec::strategy::Strategy;

// Logging and status
pub use crate::logger::bench::{BenchLog, ConsoleLogger, LogLevel};
#[cfg(feature = "sqlite")]
pub use crate::logger::store::SqliteResultStore;
pub use crate::status::{StatusEvent, StatusKind, StatusReporter, status_channel};
