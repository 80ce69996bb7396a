//! Integration tests for the LLM provider gateway
//!
//! This crate covers behavior that spans crates:
//! - Adapter registry and hot reload under concurrent readers
//! - Streaming relay ordering, cancellation and exactly-once logging
//! - Request log saturation
//! - End-to-end HTTP flows against mock upstreams

pub mod helpers;

pub use helpers::*;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod log_writer_tests;
#[cfg(test)]
mod registry_tests;
#[cfg(test)]
mod relay_tests;
