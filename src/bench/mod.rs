//! Bench abstraction and the in-process simulator.

pub mod pal;
pub mod sim;
