//! Servio - a model serving gateway.
//!
//! Servio turns a directory of exported model artifacts into a network
//! inference service. A servable is a named, versioned deployment unit: a
//! model artifact plus a manifest declaring callable methods with named
//! inputs and outputs.
//!
//! # Features
//!
//! - **Servable Registry**: discovers `<model>/<version>/<artifact>` trees
//!   with `servable.json` manifests, with versioning and a deploy lifecycle.
//! - **Inference Runtime**: format-specific execution backends, signature
//!   validation, pre/postprocessing pipelines, bounded concurrency, and
//!   optional dynamic batching.
//! - **Request Server**: an HTTP API accepting batches of instances and
//!   returning one prediction per instance.
//! - **Client Stub**: a thin client that serializes instance dictionaries
//!   and deserializes predictions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Servio                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Access Layer: HTTP API | Client Stub | CLI                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Gateway: Endpoint Routing | Canary | Instance Dispatch     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Runtime: Backends | Pipelines | Batching | Concurrency     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Registry: Manifest Discovery | Versioning | Lifecycle      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use servio::config::ServioConfig;
//!
//! #[tokio::main]
//! async fn main() -> servio::Result<()> {
//!     // Use development configuration
//!     let config = ServioConfig::development();
//!
//!     // Start the Servio gateway
//!     servio::run(config).await
//! }
//! ```

pub mod config;
pub mod error;

pub mod client;
pub mod health;
pub mod observability;
pub mod ratelimit;
pub mod runtime;
pub mod servable;
pub mod server;
pub mod serving;
pub mod shutdown;

// Re-exports
pub use error::{Result, ServioError};
pub use serving::ModelGateway;

use config::ServioConfig;
use shutdown::{ServiceHandle, ShutdownCoordinator, ShutdownManager, SignalHandler};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Run the Servio gateway with the given configuration.
pub async fn run(config: ServioConfig) -> Result<()> {
    info!(addr = %config.server.bind_addr, "Starting Servio gateway");

    // Initialize observability
    observability::init(&config.observability)?;

    // Ensure the model root exists
    std::fs::create_dir_all(&config.registry.model_root)?;

    // Discover servables and start the gateway
    let gateway = Arc::new(ModelGateway::new(config.clone()));
    let registered = gateway.registry().scan().await?;
    info!(versions = registered, "Servables registered");
    gateway.start().await?;

    let registry_stats = gateway.registry().stats();
    observability::update_registry_metrics(
        registry_stats.models_registered,
        registry_stats.total_versions,
        registry_stats.models_deployed,
    );
    observability::update_runtime_metrics(gateway.engine().list_loaded().await.len());

    // Create shutdown coordinator
    let coordinator = ShutdownCoordinator::new();
    let mut shutdown_manager = ShutdownManager::new(coordinator.clone());

    let mut handles = Vec::new();

    // Serving API
    {
        let server_gateway = Arc::clone(&gateway);
        let server_config = config.server.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = server::run_server(server_gateway, server_config).await {
                error!("Serving API error: {}", e);
            }
        });
        handles.push(("server", handle));

        let stop_gateway = Arc::clone(&gateway);
        shutdown_manager.register(ServiceHandle::new("server", async move {
            if let Err(e) = stop_gateway.stop().await {
                warn!("Gateway stop error: {}", e);
            }
            info!(service = "server", "Service shutdown complete");
        }));
    }

    // Metrics server
    if config.observability.metrics_enabled {
        info!("Starting metrics server on {}", config.observability.metrics_addr);
        let obs_config = config.observability.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = observability::run_metrics_server(obs_config).await {
                error!("Metrics server error: {}", e);
            }
        });
        handles.push(("metrics", handle));
        shutdown_manager.register(ServiceHandle::simple("metrics"));
    }

    // Start signal handler in background
    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        SignalHandler::new(signal_coordinator).run().await;
    });

    // Wait for shutdown signal
    coordinator.wait_for_shutdown().await;

    info!("Shutting down Servio gracefully...");

    // Run the shutdown manager
    shutdown_manager.run().await;

    // Abort any remaining handles
    for (name, handle) in handles {
        if !handle.is_finished() {
            warn!(service = %name, "Force aborting service");
            handle.abort();
        }
    }

    info!("Servio shutdown complete");
    Ok(())
}
