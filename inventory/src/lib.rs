//! # Inventory Service
//!
//! Owns the per-album Ledger and resolves every order exactly once.
//!
//! - [`reservation`]: the Reservation Coordinator consuming `order-created`
//! - [`catalog`]: the Catalog Bootstrap Listener consuming `album-created`
//! - [`publisher`]: outcome publishing with retries and trace propagation
//! - [`service`]: the synchronous reservation path used over HTTP
//! - [`server`] and [`api`]: the axum surface (health, metrics, inventory)
//! - [`lifecycle`]: wiring, startup and graceful shutdown
//! - [`config`]: environment configuration
//!
//! Storage and transport are injected as trait objects
//! ([`album_store_core::inventory::InventoryStore`],
//! [`album_store_core::event_bus::EventBus`]), so everything here runs
//! unchanged against the in-memory doubles of `album-store-testing`.

pub mod api;
pub mod catalog;
pub mod config;
pub mod lifecycle;
pub mod publisher;
pub mod reservation;
pub mod server;
pub mod service;

pub use catalog::CatalogBootstrapListener;
pub use config::Config;
pub use lifecycle::{Application, LifecycleError};
pub use publisher::{OutcomePublisher, OutcomeTopics, PublishError};
pub use reservation::{ReservationCoordinator, Resolution};
pub use service::{InventoryService, ReserveError};
