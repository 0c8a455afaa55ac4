//! This binary is the command-line entry point of the slot-based execution engine.
//!
//! It loads a collection from a JSON file, builds the pipeline executor for it, and prints the
//! results or the chosen plan.

#[macro_use]
extern crate tracing;

mod cli;
mod cnf;
mod telemetry;

use std::process::ExitCode;

fn main() -> ExitCode {
	cli::init()
}
