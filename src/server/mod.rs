//! Broker server: the HTTP surface over [`crate::registry::Registry`] and
//! [`crate::stream::StreamStore`]. Handler shape is grounded on
//! `server/{server,endpoints}.go` in the Go original; the axum wiring
//! (router, middleware, graceful shutdown) follows a `tokio::main` +
//! `env_logger` binary shape, adapted to an HTTP service the way an axum
//! SSE/upload handler does it.

pub mod archive;
pub mod endpoints;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::registry::Registry;
use crate::stream::StreamStore;

/// Heartbeat default, mirrored from [`crate::stream::store::DEFAULT_CONTENT_TTL`]'s
/// sibling constant in the original — fires often enough to survive a
/// typical intermediary's idle-connection pruning window.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(15);

/// Server-side configuration. The HTTP listen address and the shared-token
/// authentication are this crate's stand-in for collaborator-provided auth
/// middleware — a real deployment would replace [`Config::credentials`]
/// with whatever the surrounding platform's middleware enforces.
#[derive(Clone, Debug)]
pub struct Config {
    pub heartbeat: Duration,
    /// If set, `createStream` requires an `Authorization: Bearer <token>`
    /// header carrying this exact value.
    pub credentials: Option<String>,
    /// Default archival destination (`STORAGE_BASE_URL`). Per-host overrides
    /// are resolved at archive time; see [`archive::resolve_storage_base_url`].
    pub storage_base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat: DEFAULT_HEARTBEAT,
            credentials: None,
            storage_base_url: None,
        }
    }
}

pub struct AppState {
    pub registry: Arc<Registry>,
    pub store: Arc<StreamStore>,
    pub config: Config,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, store: Arc<StreamStore>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            registry,
            store,
            config,
            http: reqwest::Client::new(),
        })
    }
}

/// Adds a `Request-Id` response header mirrored from the request, generating
/// one if absent. Mirrors `server/middleware.go`'s `addDefaultHeaders`
/// reading the request-scoped id through to the response.
async fn propagate_request_id(req: Request<axum::body::Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("Request-Id")
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("-"));
    let mut resp = next.run(req).await;
    resp.headers_mut().insert("Request-Id", request_id);
    resp
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(endpoints::health))
        .route(
            "/streams/:key",
            put(endpoints::create_stream)
                .post(endpoints::publish)
                .get(endpoints::subscribe)
                .delete(endpoints::close_stream),
        )
        .layer(middleware::from_fn(propagate_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves until ctrl-c, mirroring the Go original's use of
/// `braintree/manners` for a connection-draining graceful shutdown.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening addr={addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("shutdown signal received, draining connections");
}
