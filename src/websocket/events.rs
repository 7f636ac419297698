use serde::Deserialize;
use serde_json::Value;

// ── Presence WS inbound event tags (§6) ─────────────────────────────────────

pub const UPDATE_USER_STATUS: &str = "UPDATE_USER_STATUS";
pub const GET_USER_STATUS: &str = "GET_USER_STATUS";
pub const START_TYPING: &str = "START_TYPING";
pub const STOP_TYPING: &str = "STOP_TYPING";

// ── Voice WS inbound event tags (§6) ─────────────────────────────────────────

pub const JOIN_ROOM: &str = "joinRoom";
pub const LEAVE_ROOM: &str = "leaveRoom";
pub const TOGGLE_MUTE: &str = "toggleMute";
pub const TOGGLE_DEAFEN: &str = "toggleDeafen";
pub const VOICE_PING: &str = "ping";
pub const VOICE_DATA: &str = "data";

/// The presence/typing wire envelope: `{event_type, payload}` (§6).
#[derive(Debug, Deserialize)]
pub struct PresenceInbound {
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

/// The voice wire envelope: `{event, data}` (§6).
#[derive(Debug, Deserialize)]
pub struct VoiceInbound {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusPayload {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct GetStatusPayload {
    pub user_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TypingPayload {
    #[serde(rename = "channelId")]
    pub channel_id: String,
    #[serde(rename = "guildId", default)]
    pub guild_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JoinRoomPayload {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "guildId")]
    pub guild_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SignalDataPayload {
    #[serde(rename = "targetId")]
    pub target_id: String,
}
