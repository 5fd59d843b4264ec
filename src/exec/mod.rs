//! Experiment execution: state machine, strategies, executor, orchestration.

pub mod api;
pub mod executor;
pub mod framework;
pub mod results;
pub mod state;
pub mod strategy;
