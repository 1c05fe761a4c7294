//! Application lifecycle and graceful shutdown.
//!
//! 1. **Startup**: bind the HTTP listener, build both consumers
//! 2. **Runtime**: serve HTTP while the reservation and catalog consumers run
//!    as independent tasks
//! 3. **Shutdown**: on Ctrl+C or SIGTERM stop accepting connections, broadcast
//!    shutdown, wait for each consumer to finish its current message
//!
//! # Example
//!
//! ```rust,ignore
//! let app = Application::build(&config, store, event_bus, clock, metrics).await?;
//! app.run().await?;
//! ```

use crate::catalog::CatalogBootstrapListener;
use crate::config::Config;
use crate::publisher::{OutcomePublisher, OutcomeTopics};
use crate::reservation::ReservationCoordinator;
use crate::server::{AppState, build_router};
use crate::service::InventoryService;
use album_store_core::environment::Clock;
use album_store_core::event_bus::EventBus;
use album_store_core::inventory::InventoryStore;
use album_store_runtime::consumer::ConsumerBuildError;
use album_store_runtime::metrics::PrometheusMetrics;
use album_store_runtime::EventConsumer;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Errors assembling the application.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The HTTP listener could not be bound.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// Address that was requested
        address: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// A consumer was misconfigured.
    #[error(transparent)]
    Consumer(#[from] ConsumerBuildError),

    /// The HTTP server failed.
    #[error("HTTP server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Running application with all background tasks.
pub struct Application {
    listener: tokio::net::TcpListener,
    app: axum::Router,
    consumers: Vec<EventConsumer>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl Application {
    /// Wire the coordinator, listener and HTTP surface onto `store` and
    /// `event_bus`, and bind the configured address.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Bind`] if the address is unavailable.
    pub async fn build<S>(
        config: &Config,
        store: Arc<S>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        metrics: PrometheusMetrics,
    ) -> Result<Self, LifecycleError>
    where
        S: InventoryStore + 'static,
    {
        let address = config.bind_address();
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|source| LifecycleError::Bind {
                address: address.clone(),
                source,
            })?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let redpanda = &config.redpanda;

        let publisher = OutcomePublisher::new(Arc::clone(&event_bus))
            .with_topics(OutcomeTopics {
                succeeded: redpanda.order_succeeded_topic.clone(),
                failed: redpanda.order_failed_topic.clone(),
            })
            .with_retry(config.publish_retry());
        let coordinator = ReservationCoordinator::new(store.clone(), publisher, Arc::clone(&clock))
            .with_failure_reason_mode(config.reservation.failure_reason_mode);

        let reservations = EventConsumer::builder()
            .name("reservation")
            .topic(redpanda.order_created_topic.clone())
            .consumer_group(redpanda.reservation_group.clone())
            .event_bus(Arc::clone(&event_bus))
            .handler(Arc::new(coordinator))
            .shutdown(shutdown_tx.subscribe())
            .backoff(config.consumer_backoff())
            .build()?;

        let catalog = EventConsumer::builder()
            .name("catalog-bootstrap")
            .topic(redpanda.album_created_topic.clone())
            .consumer_group(redpanda.catalog_group.clone())
            .event_bus(event_bus)
            .handler(Arc::new(CatalogBootstrapListener::new(store.clone())))
            .shutdown(shutdown_tx.subscribe())
            .backoff(config.consumer_backoff())
            .build()?;

        let state = AppState::new(InventoryService::new(store), clock, metrics);

        Ok(Self {
            listener,
            app: build_router(state),
            consumers: vec![reservations, catalog],
            shutdown_tx,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// Address the HTTP listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns the socket error if the address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Serve`] if the HTTP server fails.
    pub async fn run(self) -> Result<(), LifecycleError> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` resolves, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Serve`] if the HTTP server fails.
    pub async fn run_until<F>(self, signal: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(consumer_count = self.consumers.len(), "Starting event consumers");
        let consumer_handles: Vec<_> = self
            .consumers
            .into_iter()
            .map(EventConsumer::spawn)
            .collect();

        info!(address = ?self.listener.local_addr().ok(), "HTTP server listening");
        let served = axum::serve(self.listener, self.app)
            .with_graceful_shutdown(signal)
            .await;

        info!("HTTP server stopped, initiating graceful shutdown");
        let _ = self.shutdown_tx.send(());
        Self::await_shutdown(consumer_handles, self.shutdown_timeout).await;
        info!("Graceful shutdown complete");

        served.map_err(LifecycleError::from)
    }

    async fn await_shutdown(handles: Vec<tokio::task::JoinHandle<()>>, timeout: Duration) {
        for (idx, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(consumer = idx, "Consumer stopped gracefully"),
                Ok(Err(e)) => warn!(consumer = idx, error = %e, "Consumer task failed"),
                Err(_) => warn!(consumer = idx, "Consumer shutdown timed out"),
            }
        }
    }
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
///
/// If a handler cannot be installed the failure is logged and that signal
/// is never awaited.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
