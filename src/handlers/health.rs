use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /` — unconditional liveness (original_source `main.go`). No auth,
/// no dependency checks: reachability of the process is the only claim.
pub async fn liveness() -> Json<Value> {
    Json(json!({ "status": "Service is running" }))
}

/// `GET /health` — bearer-gated telemetry (§6, supplemented from
/// original_source's admin surface per SPEC_FULL.md §C). Disabled entirely
/// when `AdminPassword` is unset.
pub async fn health(State(state): State<AppState>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    let Some(expected) = state.config.admin_password.as_deref() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "not found" })),
        );
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented != Some(expected) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "unauthorized" })),
        );
    }

    let connections = state.hub.registry.connection_count().await;
    let users = state.hub.registry.user_count().await;
    let rooms = state.hub.rooms.room_count().await;
    let typing_keys = state.hub.typing.active_key_count().await;

    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "presence-gateway",
            "version": env!("CARGO_PKG_VERSION"),
            "connections": connections,
            "users": users,
            "rooms": rooms,
            "typingKeys": typing_keys,
        })),
    )
}
