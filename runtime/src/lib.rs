//! # Album Store Runtime
//!
//! Infrastructure shared by the event-driven services:
//!
//! - [`consumer`]: the subscribe → handle → commit loop with redelivery on
//!   transient failure
//! - [`retry`]: exponential backoff
//! - [`metrics`]: Prometheus recorder and metric helpers
//!
//! A service implements [`consumer::MessageHandler`] for each topic it reads
//! and hands it to an [`consumer::EventConsumer`]; everything about offsets,
//! reconnection and shutdown stays here.

pub mod consumer;
pub mod metrics;
pub mod retry;

pub use consumer::{Disposition, EventConsumer, HandlerError, MessageHandler};
pub use retry::{RetryPolicy, retry_with_backoff};
