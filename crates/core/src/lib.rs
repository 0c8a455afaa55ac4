//! # SBE Core
//!
//! This crate is the core library of the slot-based execution engine. It contains the tagged
//! value runtime, the evaluation-stage primitives, the MQL expression compiler, and the
//! aggregation pipeline executor builder on top of which the `sbe` binary is implemented.
//!
//! <section class="warning">
//! <h3>Unstable!</h3>
//! This crate is an internal API. It does not adhere to semver and its API is free to change
//! and break code even between patch versions.
//! </section>

#[macro_use]
extern crate tracing;

#[macro_use]
mod mac;

pub mod cnf;
pub mod compiler;
pub mod err;
pub mod expr;
pub mod mem;
pub mod pipeline;
pub mod sbe;
pub mod val;
