use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::broker::membership::MembershipSource;
use crate::hub::registry::{ConnectionHandle, ConnectionRegistry, RoomId};

struct RoomState {
    guild_id: String,
    /// Insertion order, per §3 ("an insertion-order list used when a
    /// deterministic enumeration is required").
    members: Vec<Arc<ConnectionHandle>>,
}

#[derive(Serialize)]
struct MemberInfo<'a> {
    id: &'a str,
    #[serde(rename = "isNoisy")]
    is_noisy: bool,
    #[serde(rename = "isMuted")]
    is_muted: bool,
    #[serde(rename = "isDeafened")]
    is_deafened: bool,
}

fn member_info(handle: &Arc<ConnectionHandle>) -> MemberInfo<'_> {
    MemberInfo {
        id: &handle.user_id,
        is_noisy: handle.voice.is_noisy(),
        is_muted: handle.voice.is_muted(),
        is_deafened: handle.voice.is_deafened(),
    }
}

#[derive(Serialize)]
struct UserListPayload<'a> {
    list: Vec<MemberInfo<'a>>,
    #[serde(rename = "rtcUserId")]
    rtc_user_id: &'a str,
}

#[derive(Serialize)]
struct SidPayload<'a> {
    sid: &'a str,
}

#[derive(Serialize)]
struct JoinedPayload<'a> {
    #[serde(rename = "channelId")]
    channel_id: &'a str,
    #[serde(rename = "guildId")]
    guild_id: &'a str,
}

#[derive(Serialize)]
struct VideoStatusPayload<'a> {
    id: &'a str,
    #[serde(rename = "isNoisy")]
    is_noisy: bool,
    #[serde(rename = "isMuted")]
    is_muted: bool,
    #[serde(rename = "isDeafened")]
    is_deafened: bool,
}

#[derive(Serialize)]
struct ExistingUserListPayload<'a> {
    #[serde(rename = "Guilds")]
    guilds: HashMap<RoomId, Vec<MemberInfo<'a>>>,
}

fn envelope<T: Serialize>(event: &str, data: &T) -> String {
    #[derive(Serialize)]
    struct Envelope<'a, T> {
        event: &'a str,
        data: &'a T,
    }
    serde_json::to_string(&Envelope { event, data }).unwrap_or_else(|e| {
        tracing::error!(error = ?e, event, "failed to serialize voice envelope");
        String::new()
    })
}

/// §4.6 Room Manager — voice room membership, join/leave notifications, and
/// per-connection audio flag toggles.
#[derive(Clone)]
pub struct RoomManager {
    registry: ConnectionRegistry,
    membership: Arc<dyn MembershipSource>,
    rooms: Arc<RwLock<HashMap<RoomId, RoomState>>>,
}

impl RoomManager {
    pub fn new(registry: ConnectionRegistry, membership: Arc<dyn MembershipSource>) -> Self {
        Self {
            registry,
            membership,
            rooms: Default::default(),
        }
    }

    pub async fn join(&self, conn: &Arc<ConnectionHandle>, room_id: RoomId, guild_id: String) {
        if room_id.is_empty() {
            return;
        }

        let (others, member_list_frame);
        {
            let mut rooms = self.rooms.write().await;
            let room = rooms.entry(room_id.clone()).or_insert_with(|| RoomState {
                guild_id: guild_id.clone(),
                members: Vec::new(),
            });
            if !room.members.iter().any(|m| m.id == conn.id) {
                room.members.push(conn.clone());
            }
            others = room
                .members
                .iter()
                .filter(|m| m.id != conn.id)
                .cloned()
                .collect::<Vec<_>>();
            member_list_frame = envelope(
                "userList",
                &UserListPayload {
                    list: room.members.iter().map(member_info).collect(),
                    rtc_user_id: &conn.user_id,
                },
            );
        }

        conn.voice.set_room(Some(room_id.clone())).await;

        self.registry.send(conn, member_list_frame);

        let connect_frame = envelope("userConnect", &SidPayload { sid: &conn.user_id });
        for other in &others {
            self.registry.send(other, connect_frame.clone());
        }

        let joined_frame = envelope(
            "joined",
            &JoinedPayload {
                channel_id: &room_id,
                guild_id: &guild_id,
            },
        );
        self.registry.send(conn, joined_frame);
    }

    /// Removes `conn` from whatever room it currently occupies. A connection
    /// with no current room is a no-op, matching §4.6's "empty roomId
    /// short-circuits" rule (we derive "empty" from the connection's own
    /// room state rather than a client-supplied field).
    pub async fn leave(&self, conn: &ConnectionHandle) {
        let Some(room_id) = conn.voice.room().await else {
            return;
        };

        let remaining = {
            let mut rooms = self.rooms.write().await;
            let Some(room) = rooms.get_mut(&room_id) else {
                return;
            };
            room.members.retain(|m| m.id != conn.id);
            let remaining = room.members.clone();
            if remaining.is_empty() {
                rooms.remove(&room_id);
            }
            remaining
        };

        conn.voice.set_room(None).await;

        let frame = envelope("userDisconnect", &SidPayload { sid: &conn.user_id });
        for member in &remaining {
            self.registry.send(member, frame.clone());
        }
    }

    pub async fn toggle_mute(&self, conn: &ConnectionHandle) {
        conn.voice.toggle_mute();
        self.broadcast_audio_status(conn).await;
    }

    pub async fn toggle_deafen(&self, conn: &ConnectionHandle) {
        conn.voice.toggle_deafen();
        self.broadcast_audio_status(conn).await;
    }

    async fn broadcast_audio_status(&self, conn: &ConnectionHandle) {
        let Some(room_id) = conn.voice.room().await else {
            return;
        };

        let members = {
            let rooms = self.rooms.read().await;
            rooms
                .get(&room_id)
                .map(|r| r.members.clone())
                .unwrap_or_default()
        };

        let frame = envelope(
            "VideoUserStatusUpdate",
            &VideoStatusPayload {
                id: &conn.user_id,
                is_noisy: conn.voice.is_noisy(),
                is_muted: conn.voice.is_muted(),
                is_deafened: conn.voice.is_deafened(),
            },
        );
        for member in &members {
            self.registry.send(member, frame.clone());
        }
    }

    /// Sent once on voice WS connect: every room intersecting the caller's
    /// guilds, excluding rooms in guilds the caller does not belong to.
    pub async fn existing_user_list(&self, user_id: &str) -> String {
        let guild_ids: HashSet<String> = match self.membership.guilds_of(user_id).await {
            Ok(memberships) => memberships.into_keys().collect(),
            Err(e) => {
                tracing::warn!(user_id, error = ?e, "membership lookup failed; existingUserList will be empty");
                HashSet::new()
            }
        };

        let rooms = self.rooms.read().await;
        let mut guilds: HashMap<RoomId, Vec<MemberInfo>> = HashMap::new();
        for (room_id, room) in rooms.iter() {
            if guild_ids.contains(&room.guild_id) {
                guilds.insert(room_id.clone(), room.members.iter().map(member_info).collect());
            }
        }

        envelope("existingUserList", &ExistingUserListPayload { guilds })
    }

    /// Number of live voice rooms. Telemetry only (`GET /health`).
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
