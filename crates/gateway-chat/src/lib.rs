//! # Gateway Chat
//!
//! Drives chat exchanges against live provider adapters.
//!
//! This crate provides:
//! - Buffered chat with request logging
//! - Streaming chat with ordered forwarding, cancellation and exactly-once logging

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod relay;

pub use relay::{ChatRelay, ChatStreamHandle, StreamEvent, StreamSummary, DEFAULT_STREAM_BUFFER};
