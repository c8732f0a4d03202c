//! Live feed endpoints.
//!
//! Provides HTTP endpoints for:
//! - Reading the live status (GET /status)
//! - Sending operator commands (POST /command/:name)
//! - Listing available commands (GET /commands)

use crate::api::error::{ApiError, ApiResult};
use crate::controller::{ControllerHandle, LiveCommand, LiveStatus, LiveStatusHandle};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

#[derive(Clone)]
pub struct LiveState {
    pub controller: ControllerHandle,
    pub status: LiveStatusHandle,
}

/// Creates the router with all live-feed endpoints.
pub fn router(state: LiveState) -> Router {
    Router::new()
        .route("/status", get(live_status))
        .route("/commands", get(list_commands))
        .route("/command/:name", post(send_command))
        .with_state(state)
}

/// Gets the current live status.
///
/// `style=waybar` returns a compact `text`/`class`/`tooltip` object instead.
async fn live_status(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<LiveState>,
) -> ApiResult<Json<Value>> {
    let status = state.status.get().await;

    if params.get("style").map(String::as_str) == Some("waybar") {
        return Ok(Json(waybar_response(&status)));
    }

    let value = serde_json::to_value(&status)
        .map_err(|e| ApiError::internal(format!("Failed to encode status: {e}")))?;
    Ok(Json(value))
}

async fn list_commands() -> Json<Value> {
    let commands: Vec<&str> = LiveCommand::ALL.iter().map(|c| c.as_str()).collect();
    Json(json!({ "commands": commands }))
}

/// Runs one operator command and returns the resulting status.
async fn send_command(
    Path(name): Path<String>,
    State(state): State<LiveState>,
) -> ApiResult<Json<Value>> {
    let command: LiveCommand = name.parse().map_err(ApiError::not_found)?;
    info!("Command {} received via API", command.as_str());

    state
        .controller
        .command(command)
        .await
        .map_err(ApiError::conflict)?;

    let status = state.status.get().await;
    Ok(Json(json!({
        "success": true,
        "command": command.as_str(),
        "mode": status.mode.as_str(),
        "status_text": status.status_text,
        "audio_enabled": status.audio_enabled,
    })))
}

fn waybar_response(status: &LiveStatus) -> Value {
    let (text, class) = if status.last_error.is_some() {
        ("SIGNAL LOST", "resq-error")
    } else if status.is_danger {
        ("ALERT", "resq-danger")
    } else if status.is_busy {
        ("SCANNING", "resq-busy")
    } else {
        ("SAFE", "resq-safe")
    };

    json!({
        "text": text,
        "class": class,
        "tooltip": status
            .last_error
            .clone()
            .unwrap_or_else(|| status.status_text.clone()),
    })
}
