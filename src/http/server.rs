//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Wire the security layer, stores and audit pipeline into `AppState`
//! - Create the Axum router with all handlers
//! - Wire up middleware (correlation id, tracing, timeouts, body limits)
//! - Serve until the shutdown broadcast fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin;
use crate::audit::logger::AuditLogger;
use crate::audit::sink::{AuditError, AuditSink, JsonLinesAuditSink, MemoryAuditSink};
use crate::config::{AppConfig, AuditSinkKind};
use crate::http::handlers;
use crate::http::request::correlation_middleware;
use crate::http::webhook;
use crate::resilience::RetryPolicy;
use crate::security::access_control::AccessGuard;
use crate::security::clock::{Clock, SystemClock};
use crate::security::identity::{ChainResolver, Identity, IdentityResolver, SessionTable, TrustedHeaderResolver};
use crate::security::rate_limit::{InMemoryWindowStore, RateLimiter, WindowStore};
use crate::security::request_guard::RequestGuard;
use crate::security::webhook::WebhookVerifier;
use crate::store::resource::{ProcessingJob, StoreRegistry, Upload, Video};
use crate::store::secure::SecureStore;

/// Collaborators the service is assembled from.
pub struct Dependencies {
    pub resolver: Arc<dyn IdentityResolver>,
    pub registry: StoreRegistry,
    pub audit_sink: Arc<dyn AuditSink>,
    pub window_store: Arc<dyn WindowStore>,
    pub clock: Arc<dyn Clock>,
}

impl Dependencies {
    /// Production wiring: resolvers and audit sink from config, in-process
    /// stores and wall-clock time.
    pub async fn from_config(config: &AppConfig) -> Result<Self, AuditError> {
        let audit_sink: Arc<dyn AuditSink> = match config.audit.sink {
            AuditSinkKind::Memory => Arc::new(MemoryAuditSink::new()),
            AuditSinkKind::File => Arc::new(JsonLinesAuditSink::open(&config.audit.path).await?),
        };

        Ok(Self {
            resolver: resolver_from_config(config),
            registry: StoreRegistry::in_memory(),
            audit_sink,
            window_store: Arc::new(InMemoryWindowStore::new()),
            clock: Arc::new(SystemClock),
        })
    }
}

/// Bearer sessions first, then the trusted upstream header if enabled.
pub fn resolver_from_config(config: &AppConfig) -> Arc<dyn IdentityResolver> {
    let mut resolvers: Vec<Box<dyn IdentityResolver>> = Vec::new();

    if !config.auth.sessions.is_empty() {
        let sessions = SessionTable::new();
        for (token, identity) in &config.auth.sessions {
            sessions.insert(token.clone(), Identity::new(identity.clone()));
        }
        resolvers.push(Box::new(sessions));
    }
    if config.auth.trust_identity_header {
        resolvers.push(Box::new(TrustedHeaderResolver::new(config.auth.identity_header.clone())));
    }
    Arc::new(ChainResolver::new(resolvers))
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub guard: RequestGuard,
    pub access: AccessGuard,
    pub store: SecureStore,
    pub audit: AuditLogger,
    pub limiter: Arc<RateLimiter>,
    pub webhook: Option<Arc<WebhookVerifier>>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Assembles the state and spawns the audit writer, whose handle is
    /// returned so shutdown can wait for it to drain.
    pub fn build(config: AppConfig, deps: Dependencies) -> (Self, JoinHandle<()>) {
        let (audit, writer) = AuditLogger::spawn(
            deps.audit_sink,
            config.audit.queue_capacity,
            RetryPolicy::from(&config.audit),
        );
        let audit = audit.with_confirm_timeout(Duration::from_millis(config.audit.confirm_timeout_ms));
        let limiter = Arc::new(RateLimiter::new(deps.window_store, deps.clock.clone()));
        let store = SecureStore::new(Arc::new(deps.registry), audit.clone());
        let guard = RequestGuard::new(deps.resolver, limiter.clone(), config.rate_limit.clone(), audit.clone());
        let webhook = config
            .webhook
            .enabled
            .then(|| Arc::new(WebhookVerifier::from_config(&config.webhook, deps.clock.clone())));

        let state = Self {
            guard,
            access: AccessGuard::new(store.clone()),
            store,
            audit,
            limiter,
            webhook,
            config: Arc::new(config),
        };
        (state, writer)
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let mut api = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/videos", get(handlers::list::<Video>).post(handlers::create::<Video>))
        .route(
            "/api/videos/{id}",
            get(handlers::get_one::<Video>)
                .patch(handlers::update::<Video>)
                .delete(handlers::delete::<Video>),
        )
        .route("/api/uploads", get(handlers::list::<Upload>).post(handlers::create::<Upload>))
        .route(
            "/api/uploads/{id}",
            get(handlers::get_one::<Upload>)
                .patch(handlers::update::<Upload>)
                .delete(handlers::delete::<Upload>),
        )
        .route("/api/jobs", get(handlers::list_jobs).post(handlers::create::<ProcessingJob>))
        .route("/api/jobs/{id}", get(handlers::get_one::<ProcessingJob>));

    if state.webhook.is_some() {
        api = api.route("/webhooks/transcode", post(webhook::transcode_callback));
    }

    let mut router = api.with_state(state.clone());
    if config.admin.enabled {
        router = router.merge(admin::setup_admin_router(state));
    }

    router
        .layer(RequestBodyLimitLayer::new(config.limits.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(middleware::from_fn(correlation_middleware))
        .layer(TraceLayer::new_for_http())
}

/// HTTP server for the service.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let router = build_router(state.clone());
        Self { router, state }
    }

    /// Run the server, accepting connections on the given listener, until
    /// `shutdown` fires. The rate-limit window sweeper runs alongside.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let sweep_interval = Duration::from_secs(self.state.config.rate_limit.sweep_interval_secs);
        let sweeper = tokio::spawn(
            self.state
                .limiter
                .clone()
                .run_sweeper(sweep_interval, shutdown.resubscribe()),
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        sweeper.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }
}
