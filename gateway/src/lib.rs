//! Ingress endpoint for the event ingestion pipeline.
//!
//! Validates envelopes, registers ingestion attempts in the idempotency
//! registry, and publishes accepted records to the events topic with
//! per-stream partition keys and injected trace context.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod producer;

pub use config::Config;
pub use error::{AppError, Result};
