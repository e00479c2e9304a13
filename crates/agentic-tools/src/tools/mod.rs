//! Tool implementations.

pub mod scheduler;
pub mod shell;
