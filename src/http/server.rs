//! Front-end HTTP server.
//!
//! # Responsibilities
//! - Create the Axum router for the front-end
//! - Wire up middleware (request ID, tracing, body limit)
//! - Route every call to the tunnel serving its session id
//! - Record front-end metrics

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::http::request::{self, RequestIdExt};
use crate::http::response::{error_response, from_tunnel};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::protocol;
use crate::tunnel::{SessionRegistry, TunnelError};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub max_body_size: usize,
}

/// Front-end server handing calls to tunnels.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &ServerConfig, registry: Arc<SessionRegistry>) -> Self {
        let state = AppState {
            registry,
            max_body_size: config.security.max_body_size,
        };
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ServerConfig, state: AppState) -> Router {
        // `get` would also answer HEAD; only the five forwarded methods are served.
        let forward = get(forward_handler)
            .head(method_not_allowed)
            .post(forward_handler)
            .put(forward_handler)
            .delete(forward_handler)
            .patch(forward_handler);

        Router::new()
            .route("/{*path}", forward.clone())
            .route("/", forward)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(RequestBodyLimitLayer::new(config.security.max_body_size)),
            )
    }

    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve until `shutdown` fires, then drain in-flight calls.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Front-end server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown.signalled())
            .await?;

        tracing::info!("Front-end server stopped");
        Ok(())
    }
}

/// Forward one caller request through the tunnel named by its session id.
async fn forward_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let response = forward(&state, request).await;
    metrics::record_request(&method, response.status().as_u16(), start);
    response
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

async fn forward(state: &AppState, request: Request<Body>) -> Response {
    let request_id = request.request_id().to_string();

    let Some(session_id) = protocol::session_id(request.headers()).map(str::to_owned) else {
        tracing::debug!(request_id = %request_id, "Request without session id");
        return error_response(StatusCode::BAD_REQUEST, "missing session id");
    };

    let Some(tunnel) = state.registry.find(&session_id) else {
        tracing::debug!(request_id = %request_id, session_id = %session_id, "No tunnel for session");
        return error_response(StatusCode::NOT_FOUND, "unknown session");
    };

    let request = match request::into_tunnel_request(request, state.max_body_size).await {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Failed to read request body");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read request body");
        }
    };

    match tunnel.request(request).await {
        Ok(response) => from_tunnel(response),
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                session_id = %session_id,
                connection_id = %tunnel.id(),
                error = %e,
                "Tunnel call failed"
            );
            match e {
                TunnelError::HeadTooLarge(_) => {
                    error_response(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE, "request headers too large")
                }
                TunnelError::Timeout(_) => {
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, "tunnel request timed out")
                }
                _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, "tunnel request failed"),
            }
        }
    }
}
