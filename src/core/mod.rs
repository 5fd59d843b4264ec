//! Configuration, recipes, and error types.

pub mod config;
pub mod errors;
pub mod recipe;
