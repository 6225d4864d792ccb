//! fcp utility - main entrypoint
// (c) 2026 Ross Younger

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::process::ExitCode;

#[cfg_attr(coverage_nightly, coverage(off))]
fn main() -> ExitCode {
    fcp::main(std::env::args_os())
}
