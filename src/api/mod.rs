//! REST API and WebSocket server for the hub
//!
//! ## Architecture
//!
//! - **Axum** web framework with tower-http tracing and CORS layers
//! - **Component handles** (registry, poller, alerts, deployments) in [`ApiState`]
//! - **WebSocket** sessions registered with the connection registry
//!
//! ## Endpoints
//!
//! - `GET  /api/v1/health` - Liveness of the hub itself
//! - `GET  /api/v1/targets` - Health records of every polled target
//! - `GET  /api/v1/targets/:name` - One target's record
//! - `POST /api/v1/targets/:name/reset` - Clear a target's failure counter
//! - `PUT  /api/v1/poller/interval` - Change the polling period
//! - `GET  /api/v1/alerts` - Open alerts; `POST` raises one
//! - `GET  /api/v1/alerts/history` - Closed and suppressed alerts
//! - `GET  /api/v1/alerts/stats` - Alert statistics
//! - `POST /api/v1/alerts/sweep` - Run an escalation sweep now
//! - `POST /api/v1/alerts/mute` - Silence notifications for a while
//! - `POST /api/v1/alerts/unmute` - Resume notifications
//! - `GET  /api/v1/alerts/:id` - One open alert
//! - `POST /api/v1/alerts/:id/ack` - Acknowledge
//! - `POST /api/v1/alerts/:id/resolve` - Resolve
//! - `GET  /api/v1/deployments` - Finished runs; `POST` starts one
//! - `GET  /api/v1/deployments/current` - The active run
//! - `POST /api/v1/deployments/current/complete` - Finalize the active run
//! - `GET  /api/v1/sessions` - Connected clients
//! - `GET  /api/v1/sessions/stats` - Session and queue figures
//! - `POST /api/v1/sessions/:client_id/send` - Message one client
//! - `POST /api/v1/broadcast` - Message every connected client
//! - `WS   /api/v1/connect/:client_id` - Open a client session

pub mod error;
pub mod routes;
pub mod state;
pub mod types;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post, put},
};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ApiSettings;

pub fn router(state: ApiState, enable_cors: bool) -> Router {
    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/targets", get(routes::health::list_targets))
        .route("/api/v1/targets/:name", get(routes::health::get_target))
        .route(
            "/api/v1/targets/:name/reset",
            post(routes::health::reset_target),
        )
        .route(
            "/api/v1/poller/interval",
            put(routes::health::update_interval),
        )
        .route(
            "/api/v1/alerts",
            get(routes::alerts::list_active).post(routes::alerts::create_alert),
        )
        .route("/api/v1/alerts/history", get(routes::alerts::history))
        .route("/api/v1/alerts/stats", get(routes::alerts::stats))
        .route("/api/v1/alerts/sweep", post(routes::alerts::sweep))
        .route("/api/v1/alerts/mute", post(routes::alerts::mute))
        .route("/api/v1/alerts/unmute", post(routes::alerts::unmute))
        .route("/api/v1/alerts/:id", get(routes::alerts::get_alert))
        .route("/api/v1/alerts/:id/ack", post(routes::alerts::acknowledge))
        .route("/api/v1/alerts/:id/resolve", post(routes::alerts::resolve))
        .route(
            "/api/v1/deployments",
            get(routes::deployments::history).post(routes::deployments::start),
        )
        .route(
            "/api/v1/deployments/current",
            get(routes::deployments::current),
        )
        .route(
            "/api/v1/deployments/current/complete",
            post(routes::deployments::complete),
        )
        .route("/api/v1/sessions", get(routes::sessions::list_sessions))
        .route("/api/v1/sessions/stats", get(routes::sessions::stats))
        .route(
            "/api/v1/sessions/:client_id/send",
            post(routes::sessions::send),
        )
        .route("/api/v1/broadcast", post(routes::sessions::broadcast))
        .route(
            "/api/v1/connect/:client_id",
            get(websocket::websocket_handler),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server
///
/// Returns the bound address and the server task.
pub async fn spawn_api_server(
    settings: &ApiSettings,
    state: ApiState,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    info!("starting API server on {}", settings.bind);

    let app = router(state, settings.enable_cors);

    let listener = tokio::net::TcpListener::bind(settings.bind).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok((addr, task))
}
