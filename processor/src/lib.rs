//! Processing engine for the event ingestion pipeline.
//!
//! Consumes inflight records from the events topic, runs each through the
//! persist state machine (committed / duplicate / dead-lettered / retried),
//! fans processed events out to the broadcast sink, and commits offsets only
//! after a terminal outcome.

pub mod config;
pub mod consumer;
pub mod error;
pub mod fanout;
pub mod metrics;
pub mod pipeline;

pub use config::Config;
pub use error::{AppError, Result};
