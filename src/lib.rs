#![forbid(unsafe_code)]

//! Silicon Debug Harness (sdh) — bench test orchestration for post-silicon
//! debug.
//!
//! One experiment thread drives loop, sweep, or shmoo runs against a bench;
//! UI/API threads steer it live through halt, continue, cancel, end, and
//! step-by-step commands:
//!
//! 1. **Strategies** — plain loops, one-axis frequency/voltage sweeps, and
//!    two-axis shmoos with letter-coded failure matrices
//! 2. **Recovery** — failed boots get one power-cycle retry, with a dedicated
//!    path for wedged register-access sessions
//! 3. **Reporting** — live statistics, status events, and upload gating that
//!    keeps degraded runs out of the result store
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use silicon_debug_harness::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use silicon_debug_harness::core::recipe::Recipe;
//! use silicon_debug_harness::exec::framework::Framework;
//! ```

pub mod prelude;

pub mod bench;
pub mod core;
pub mod exec;
pub mod logger;
pub mod status;
