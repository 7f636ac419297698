use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::time::timeout;

use crate::error::AppError;
use crate::hub::registry::OutboundFrame;
use crate::ping::PING_TIMEOUT;
use crate::state::AppState;
use crate::websocket::events::{
    JoinRoomPayload, SignalDataPayload, VoiceInbound, JOIN_ROOM, LEAVE_ROOM, TOGGLE_DEAFEN,
    TOGGLE_MUTE, VOICE_DATA, VOICE_PING,
};
use crate::websocket::origin;
use crate::websocket::presence_ws::WsParams;

/// GET /video-ws — voice signaling upgrade (§4.10). Shares the same
/// authentication contract as the presence WS.
pub async fn handler(
    ws: WebSocketUpgrade,
    headers: axum::http::HeaderMap,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let origin_header = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
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

fn extract_token(headers: &axum::http::HeaderMap, params: &WsParams) -> Option<String> {
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

    let existing = state.hub.rooms.existing_user_list(&user_id).await;
    state.hub.registry.send(&handle, existing);

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
                    tracing::debug!(user_id = %reader_user_id, error = ?e, "voice WS read error");
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

    state.hub.rooms.leave(&handle).await;
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
    let Ok(inbound) = serde_json::from_str::<VoiceInbound>(text) else {
        tracing::debug!(user_id, "malformed voice envelope; dropping");
        return;
    };

    match inbound.event.as_str() {
        JOIN_ROOM => {
            let Ok(payload) = serde_json::from_value::<JoinRoomPayload>(inbound.data) else {
                return;
            };
            hub.rooms.join(handle, payload.room_id, payload.guild_id).await;
        }
        LEAVE_ROOM => {
            hub.rooms.leave(handle).await;
        }
        TOGGLE_MUTE => {
            hub.rooms.toggle_mute(handle).await;
        }
        TOGGLE_DEAFEN => {
            hub.rooms.toggle_deafen(handle).await;
        }
        VOICE_DATA => {
            let Ok(payload) = serde_json::from_value::<SignalDataPayload>(inbound.data.clone())
            else {
                return;
            };
            hub.signaling.forward(user_id, &payload.target_id, inbound.data).await;
        }
        VOICE_PING => {
            // Client keepalive; the server-side ping sweep (§5) is the
            // authoritative liveness check, so there is nothing to do here.
        }
        other => {
            tracing::debug!(user_id, event = other, "unrecognized voice event");
        }
    }
}
