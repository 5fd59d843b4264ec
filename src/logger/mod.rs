//! Harness logging and result persistence.

pub mod bench;
#[cfg(feature = "sqlite")]
pub mod store;
