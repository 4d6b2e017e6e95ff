//! The HTTP API.

use std::{any::Any, future::Future, net::SocketAddr, sync::Arc};

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tokio::net::{TcpListener, TcpSocket};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::{config::ServiceConfig, runner::RunnerService};

mod err;
mod handlers;
pub mod rate_limit;

pub use err::ApiError;
use rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<ServiceConfig>,
    pub runner: Arc<RunnerService>,
}

impl AppState {
    pub fn new(cfg: Arc<ServiceConfig>, runner: Arc<RunnerService>) -> AppState {
        AppState { cfg, runner }
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic"
    };
    tracing::error!("Handler panicked: {}", detail);
    ApiError::Internal.into_response()
}

pub fn router(state: AppState) -> Router {
    let limiter = Arc::new(RateLimiter::per_minute(state.cfg.rate_limit_per_minute));

    let api = Router::new()
        .route("/api/:runner/start", post(handlers::start_run))
        .route_layer(middleware::from_fn_with_state(
            limiter,
            rate_limit::rate_limit,
        ));

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .merge(api)
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(state.cfg.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

/// Bind the listening socket, with `SO_REUSEPORT` if asked for.
pub fn bind_listener(addr: SocketAddr, reuse_port: bool) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    if reuse_port {
        socket.set_reuseport(true)?;
    }
    #[cfg(not(unix))]
    let _ = reuse_port;
    socket.bind(addr)?;
    socket.listen(1024)
}

/// Serve the API until `shutdown` resolves. In-flight requests are allowed
/// to finish.
pub async fn serve(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = bind_listener(state.cfg.bind, state.cfg.reuse_port)?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("Server stopped");
    Ok(())
}
