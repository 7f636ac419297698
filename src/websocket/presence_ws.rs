use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::timeout;

use crate::error::AppError;
use crate::hub::registry::OutboundFrame;
use crate::hub::presence::Status;
use crate::ping::PING_TIMEOUT;
use crate::state::AppState;
use crate::websocket::events::{
    GetStatusPayload, PresenceInbound, TypingPayload, UpdateStatusPayload, GET_USER_STATUS,
    START_TYPING, STOP_TYPING, UPDATE_USER_STATUS,
};
use crate::websocket::origin;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// GET /ws — presence/typing upgrade (§4.10).
pub async fn handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let origin_header = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    if !origin::is_allowed(origin_header, &state.config.allowed_origins) {
        return AppError::Unauthenticated("origin not allowed".into()).into_response();
    }

    let Some(token) = extract_token(&headers, &params) else {
        return AppError::Unauthenticated("missing session token".into()).into_response();
    };

    let user_id = match state.auth.verify(&token).await {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

/// Accepts the session token from `Sec-WebSocket-Protocol: cookie-<token>`
/// or the `token` query parameter (§4.10).
fn extract_token(headers: &HeaderMap, params: &WsParams) -> Option<String> {
    if let Some(value) = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("cookie-") {
            return Some(token.to_owned());
        }
    }
    params.token.clone()
}

async fn handle_socket(socket: WebSocket, user_id: String, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (handle, mut rx, is_first) = state.hub.registry.register(user_id.clone()).await;
    state.hub.presence.on_connect(&user_id, is_first).await;

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let result = match frame {
                OutboundFrame::Text(text) => sender.send(Message::Text(text)).await,
                OutboundFrame::Ping => timeout(PING_TIMEOUT, sender.send(Message::Ping(Vec::new())))
                    .await
                    .unwrap_or_else(|_| {
                        Err(axum::Error::new(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "ping deadline exceeded",
                        )))
                    }),
            };
            if result.is_err() {
                break;
            }
        }
    });

    let hub = state.hub.clone();
    let reader_user_id = user_id.clone();
    let reader_handle = handle.clone();
    let mut reader = tokio::spawn(async move {
        loop {
            match receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    handle_inbound(&hub, &reader_user_id, &reader_handle, &text).await;
                }
                Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(user_id = %reader_user_id, error = ?e, "presence WS read error");
                    break;
                }
                None => break,
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    let is_last = state.hub.registry.remove(&handle).await;
    state.hub.typing.stop_all(&user_id).await;
    state.hub.presence.on_disconnect(user_id, is_last);
}

async fn handle_inbound(
    hub: &crate::hub::Hub,
    user_id: &str,
    handle: &std::sync::Arc<crate::hub::registry::ConnectionHandle>,
    text: &str,
) {
    let Ok(inbound) = serde_json::from_str::<PresenceInbound>(text) else {
        tracing::debug!(user_id, "malformed presence envelope; dropping");
        return;
    };

    match inbound.event_type.as_str() {
        UPDATE_USER_STATUS => {
            let Ok(payload) = serde_json::from_value::<UpdateStatusPayload>(inbound.payload)
            else {
                return;
            };
            // §7 "Invalid status value — ignored; no state change; no client reply."
            if let Some(status) = Status::parse(&payload.status) {
                hub.presence.update_status(&user_id.to_owned(), status).await;
            }
        }
        GET_USER_STATUS => {
            let Ok(payload) = serde_json::from_value::<GetStatusPayload>(inbound.payload) else {
                return;
            };
            let statuses = hub.presence.status_of(&payload.user_ids).await;
            let reply: Vec<_> = statuses
                .into_iter()
                .map(|(user_id, status)| {
                    serde_json::json!({ "userId": user_id, "status": status.wire() })
                })
                .collect();
            if let Ok(frame) = serde_json::to_string(&reply) {
                hub.registry.send(handle, frame);
            }
        }
        START_TYPING => {
            let Ok(payload) = serde_json::from_value::<TypingPayload>(inbound.payload) else {
                return;
            };
            hub.typing
                .start(user_id.to_owned(), payload.channel_id, payload.guild_id)
                .await;
        }
        STOP_TYPING => {
            let Ok(payload) = serde_json::from_value::<TypingPayload>(inbound.payload) else {
                return;
            };
            hub.typing
                .stop(user_id.to_owned(), payload.channel_id, payload.guild_id)
                .await;
        }
        other => {
            tracing::debug!(user_id, event_type = other, "unrecognized presence event");
        }
    }
}
