use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::UserId;
use crate::hub::fanout::GuildFanout;
use crate::hub::registry::ConnectionRegistry;

/// 30-second reconnect grace window (§4.4, state machine).
const GRACE_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Online,
    Idle,
    DoNotDisturb,
    Invisible,
    Offline,
}

impl Status {
    /// Parses the wire values from §6, rejecting anything else. Invalid
    /// values are ignored by the caller (§7 "Invalid status value") rather
    /// than surfaced as an error.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "online" => Some(Self::Online),
            "idle" => Some(Self::Idle),
            "do-not-disturb" => Some(Self::DoNotDisturb),
            "invisible" => Some(Self::Invisible),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }

    pub fn wire(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Idle => "idle",
            Self::DoNotDisturb => "do-not-disturb",
            Self::Invisible => "invisible",
            Self::Offline => "offline",
        }
    }
}

#[derive(Serialize)]
struct UserStatusPayload<'a> {
    #[serde(rename = "userId")]
    user_id: &'a str,
    status: &'a str,
}

/// §4.4 Presence Engine. Holds the declared-status half of the per-user
/// presence record; the connectivity half lives in [`ConnectionRegistry`]
/// and is reported to us by the caller via `is_first`/`is_last` rather than
/// re-derived here, so there is exactly one source of truth for "is this
/// user connected".
#[derive(Clone)]
pub struct PresenceEngine {
    registry: ConnectionRegistry,
    fanout: GuildFanout,
    statuses: std::sync::Arc<tokio::sync::RwLock<HashMap<UserId, Status>>>,
}

impl PresenceEngine {
    pub fn new(registry: ConnectionRegistry, fanout: GuildFanout) -> Self {
        Self {
            registry,
            fanout,
            statuses: Default::default(),
        }
    }

    /// Called by the ingress right after `ConnectionRegistry::register`.
    /// Only the connected-transition edge (first live connection) broadcasts
    /// — additional connections for an already-connected user are silent,
    /// matching §4.4's broadcast-suppression rule.
    pub async fn on_connect(&self, user_id: &UserId, is_first: bool) {
        if !is_first {
            return;
        }

        let status = {
            let mut statuses = self.statuses.write().await;
            *statuses.entry(user_id.clone()).or_insert(Status::Online)
        };

        self.broadcast_status(user_id, status).await;
    }

    /// Called by the ingress right after `ConnectionRegistry::remove`. Arms
    /// the grace timer only when this was the user's last live connection;
    /// the timer checks current connectivity at fire time rather than being
    /// cancellable, per §9.
    pub fn on_disconnect(&self, user_id: UserId, is_last: bool) {
        if !is_last {
            return;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(GRACE_PERIOD).await;
            engine.expire_if_still_absent(&user_id).await;
        });
    }

    async fn expire_if_still_absent(&self, user_id: &str) {
        if self.registry.is_connected(user_id).await {
            return;
        }

        let status = {
            let mut statuses = self.statuses.write().await;
            let status = statuses.get(user_id).copied();
            statuses.remove(user_id);
            status
        };

        if status != Some(Status::Invisible) {
            self.broadcast_status(user_id, Status::Offline).await;
        }
    }

    /// `UPDATE_USER_STATUS` event (§6). Invalid values are already filtered
    /// out by the caller via `Status::parse`, so this always broadcasts.
    pub async fn update_status(&self, user_id: &UserId, status: Status) {
        self.statuses.write().await.insert(user_id.clone(), status);
        self.broadcast_status(user_id, status).await;
    }

    /// `GET_USER_STATUS` event (§6): missing users default to `offline`.
    pub async fn status_of(&self, user_ids: &[String]) -> Vec<(String, Status)> {
        let statuses = self.statuses.read().await;
        user_ids
            .iter()
            .map(|id| (id.clone(), statuses.get(id).copied().unwrap_or(Status::Offline)))
            .collect()
    }

    async fn broadcast_status(&self, user_id: &str, status: Status) {
        self.fanout
            .broadcast(
                user_id,
                "UPDATE_USER_STATUS",
                &UserStatusPayload {
                    user_id,
                    status: status.wire(),
                },
            )
            .await;
    }
}
