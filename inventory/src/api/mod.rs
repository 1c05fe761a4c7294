//! HTTP API handlers.

pub mod error;
pub mod inventory;

pub use error::AppError;
