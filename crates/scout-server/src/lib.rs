//! WebSocket gateway server: one duplex `/enrich` route, a liveness probe,
//! and the per-connection dispatch core in [`session`].

mod processor;
mod session;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::{HeaderValue, Method, header};
use axum::response::IntoResponse;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use scout_llm::VisionProvider;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen port. `0` picks an ephemeral port (used by tests).
    pub port: u16,
    /// Single origin allowed by the CORS layer.
    pub allowed_origin: String,
    /// Capacity of each connection's outbound frame queue.
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            allowed_origin: "http://localhost:5173".into(),
            outbound_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The enrichment provider every request processor calls.
    pub provider: Arc<dyn VisionProvider>,
    /// Outbound queue capacity for new connections.
    outbound_queue: usize,
    /// Connections currently inside their session loop (including drain).
    active_connections: Arc<AtomicUsize>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/enrich", get(ws_handler))
        .route("/", get(health_handler))
        .with_state(state)
        .layer(cors)
}

/// CORS layer allowing exactly one origin, with credentials.
fn build_cors(allowed_origin: &str) -> CorsLayer {
    match allowed_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        Err(e) => {
            warn!(origin = allowed_origin, error = %e, "invalid allowed origin, denying cross-origin requests");
            CorsLayer::new()
        }
    }
}

/// Create and start the server. Returns a handle once the listener is bound.
pub async fn start(
    config: ServerConfig,
    provider: Arc<dyn VisionProvider>,
) -> Result<ServerHandle, std::io::Error> {
    let active_connections = Arc::new(AtomicUsize::new(0));
    let state = AppState {
        provider,
        outbound_queue: config.outbound_queue,
        active_connections: Arc::clone(&active_connections),
    };

    let router = build_router(state, build_cors(&config.allowed_origin));
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(port = local_addr.port(), "scout gateway started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        active_connections,
        _server: server,
    })
}

/// Handle returned by [`start`] — keeps the accept loop alive.
pub struct ServerHandle {
    /// Bound port.
    pub port: u16,
    active_connections: Arc<AtomicUsize>,
    _server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Connections whose session loop (including teardown drain) is still
    /// running. Zero means every in-flight unit has terminated.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// WebSocket upgrade handler for `/enrich`.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, state))
}

/// Run one connection's session, tracking it in the active counter.
async fn run_session(socket: WebSocket, state: AppState) {
    let _ = state.active_connections.fetch_add(1, Ordering::Relaxed);
    session::handle_socket(socket, state.provider, state.outbound_queue).await;
    let _ = state.active_connections.fetch_sub(1, Ordering::Relaxed);
}

/// Liveness probe. No interaction with the dispatcher.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({"status": "ok"}))
}
