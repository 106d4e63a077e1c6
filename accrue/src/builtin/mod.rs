//! Producers shipped with the crate.
//!
//! - [`OsProducer`]: eager producer `OS` with process and host resource usage
//! - [`MethodCallProducer`]: on-demand producer with per-method call counters

pub mod calls;
pub mod os;

pub use calls::{CallStats, MethodCallProducer};
pub use os::{OS_PRODUCER_ID, OsProducer};

/// Subsystem reported by the built-in producers.
pub const BUILTIN_SUBSYSTEM: &str = "builtin";
