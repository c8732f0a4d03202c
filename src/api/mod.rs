//! REST API server for ResQ-Eye.
//!
//! Provides HTTP endpoints for:
//! - Live status
//! - Operator commands (camera switch, mute, voice mode, drills)

pub mod error;
pub mod routes;

use crate::controller::{ControllerHandle, LiveStatusHandle};
use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tracing::info;

pub use routes::live::LiveState;

pub struct ApiServer {
    port: u16,
    live_state: LiveState,
}

impl ApiServer {
    pub fn new(controller: ControllerHandle, status: LiveStatusHandle, port: u16) -> Self {
        Self {
            port,
            live_state: LiveState { controller, status },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(service_info))
            .route("/version", get(version))
            .merge(routes::live::router(self.live_state.clone()))
            .layer(ServiceBuilder::new())
    }

    pub async fn start(self) -> Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /               - Service info");
        info!("  GET  /version        - Get version info");
        info!("  GET  /status         - Get live status");
        info!("  GET  /commands       - List operator commands");
        info!("  POST /command/:name  - Run an operator command");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "resq-eye",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "resq-eye"
    }))
}
