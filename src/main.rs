//! reel-guard service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ correlation id ─▶ request guard ─────▶ access guard ─▶ secure store ─▶ RecordStore
//!                                       (identity +          (owner check)    (owner-scoped)
//!                                        rate limit)                │               │
//!                                                                   ▼               ▼
//!                                                              audit logger ─▶ writer task ─▶ AuditSink
//!
//!     Cross-cutting: config, observability (tracing + metrics), lifecycle (signals, drain)
//! ```

use std::time::Duration;

use tokio::net::TcpListener;

use reel_guard::config::load_from_env;
use reel_guard::lifecycle::{drain_audit, wait_for_signal, Shutdown};
use reel_guard::observability::{logging, metrics};
use reel_guard::{AppState, Dependencies, HttpServer};

const AUDIT_DRAIN_DEADLINE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_from_env()?;
    logging::init_logging(&config.observability)?;

    tracing::info!("reel-guard v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        audit_sink = ?config.audit.sink,
        webhook_enabled = config.webhook.enabled,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let deps = Dependencies::from_config(&config).await?;
    let (state, audit_writer) = AppState::build(config.clone(), deps);
    let audit = state.audit.clone();

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(state);
    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    wait_for_signal().await;
    shutdown.trigger();

    if let Err(e) = server_task.await? {
        tracing::error!(error = %e, "HTTP server exited with error");
    }

    if !drain_audit(audit, audit_writer, AUDIT_DRAIN_DEADLINE).await {
        tracing::error!("Audit queue not fully drained at exit");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
