//! General utility code that didn't fit anywhere else
// (c) 2026 Ross Younger

mod tracing;
pub use tracing::{
    ConsoleTraceType, TimeFormat, is_initialized as tracing_is_initialised, setup as setup_tracing,
    trace_level,
};

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod test_node;
