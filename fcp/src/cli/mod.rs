//! Command Line Interface for fcp
// (c) 2026 Ross Younger
mod args;
mod cli_main;
pub use cli_main::cli;
