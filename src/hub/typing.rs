use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::auth::UserId;
use crate::hub::fanout::GuildFanout;

/// Typing auto-expires 5 seconds after the last `START_TYPING` (§4.5).
const TYPING_TTL: Duration = Duration::from_secs(5);

type TypingKey = (String, String);

#[derive(Serialize)]
struct TypingPayload<'a> {
    #[serde(rename = "userId")]
    user_id: &'a str,
    #[serde(rename = "channelId")]
    channel_id: &'a str,
    #[serde(rename = "guildId", skip_serializing_if = "Option::is_none")]
    guild_id: Option<&'a str>,
    #[serde(rename = "typingStopped", skip_serializing_if = "Option::is_none")]
    typing_stopped: Option<bool>,
}

/// §4.5 Typing Engine. One coarse lock over the whole `(channelId, guildId)
/// -> {userId: expiry}` map — acceptable given the traffic volume per §4.5's
/// own note, and it keeps the "has a later start superseded this expiry"
/// check trivially race-free.
#[derive(Clone)]
pub struct TypingEngine {
    fanout: GuildFanout,
    state: Arc<Mutex<HashMap<TypingKey, HashMap<UserId, Instant>>>>,
}

impl TypingEngine {
    pub fn new(fanout: GuildFanout) -> Self {
        Self {
            fanout,
            state: Default::default(),
        }
    }

    pub async fn start(&self, user_id: UserId, channel_id: String, guild_id: Option<String>) {
        let key = (channel_id.clone(), guild_id.clone().unwrap_or_default());
        let expires_at = Instant::now() + TYPING_TTL;

        {
            let mut state = self.state.lock().await;
            state
                .entry(key.clone())
                .or_default()
                .insert(user_id.clone(), expires_at);
        }

        self.emit(&user_id, &channel_id, guild_id.as_deref(), "START_TYPING", None)
            .await;

        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TYPING_TTL).await;
            engine.expiry_check(&user_id, key).await;
        });
    }

    pub async fn stop(&self, user_id: UserId, channel_id: String, guild_id: Option<String>) {
        let key = (channel_id.clone(), guild_id.clone().unwrap_or_default());
        let present = {
            let mut state = self.state.lock().await;
            let removed = state
                .get_mut(&key)
                .map(|users| users.remove(&user_id).is_some())
                .unwrap_or(false);
            if matches!(state.get(&key), Some(users) if users.is_empty()) {
                state.remove(&key);
            }
            removed
        };

        if present {
            self.emit(&user_id, &channel_id, guild_id.as_deref(), "STOP_TYPING", None)
                .await;
        }
    }

    /// Cancels every pending typing entry for `user_id` across all channels,
    /// emitting `STOP_TYPING` for each. Called on connection teardown (§5
    /// "cancel pending typing timers for that user").
    pub async fn stop_all(&self, user_id: &str) {
        let affected: Vec<TypingKey> = {
            let mut state = self.state.lock().await;
            let mut affected = Vec::new();
            state.retain(|key, users| {
                if users.remove(user_id).is_some() {
                    affected.push(key.clone());
                }
                !users.is_empty()
            });
            affected
        };

        for (channel_id, guild_id) in affected {
            let guild_id = (!guild_id.is_empty()).then_some(guild_id);
            self.emit(user_id, &channel_id, guild_id.as_deref(), "STOP_TYPING", None)
                .await;
        }
    }

    /// Runs at the scheduled expiry. If a later `start()` replaced the
    /// expiry for this user, this check is a no-op — the stale stop is
    /// silently swallowed, per §4.5 and §9.
    async fn expiry_check(&self, user_id: &str, key: TypingKey) {
        let should_stop = {
            let mut state = self.state.lock().await;
            let Some(users) = state.get_mut(&key) else {
                return;
            };
            match users.get(user_id) {
                Some(expiry) if *expiry <= Instant::now() => {
                    users.remove(user_id);
                    if users.is_empty() {
                        state.remove(&key);
                    }
                    true
                }
                _ => false,
            }
        };

        if should_stop {
            let (channel_id, guild_id) = key;
            let guild_id = (!guild_id.is_empty()).then_some(guild_id);
            self.emit(
                user_id,
                &channel_id,
                guild_id.as_deref(),
                "STOP_TYPING",
                Some(true),
            )
            .await;
        }
    }

    /// Number of `(channelId, guildId)` keys with at least one active typist.
    /// Telemetry only (`GET /health`).
    pub async fn active_key_count(&self) -> usize {
        self.state.lock().await.len()
    }

    async fn emit(
        &self,
        user_id: &str,
        channel_id: &str,
        guild_id: Option<&str>,
        event: &str,
        typing_stopped: Option<bool>,
    ) {
        self.fanout
            .broadcast(
                user_id,
                event,
                &TypingPayload {
                    user_id,
                    channel_id,
                    guild_id,
                    typing_stopped,
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MembershipError;
    use crate::hub::registry::ConnectionRegistry;
    use axum::async_trait;
    use std::collections::HashMap as Map;

    struct SharedGuild;

    #[async_trait]
    impl crate::broker::MembershipSource for SharedGuild {
        async fn guilds_of(&self, _user_id: &str) -> Result<Map<String, Vec<String>>, MembershipError> {
            let mut m = Map::new();
            m.insert("g1".to_owned(), vec!["alice".to_owned(), "bob".to_owned()]);
            Ok(m)
        }
    }

    fn engine_and_registry() -> (TypingEngine, ConnectionRegistry) {
        let registry = ConnectionRegistry::new();
        let fanout = GuildFanout::new(registry.clone(), Arc::new(SharedGuild));
        (TypingEngine::new(fanout), registry)
    }

    #[tokio::test]
    async fn start_emits_start_typing_to_co_member() {
        let (engine, registry) = engine_and_registry();
        let (_h_bob, mut rx_bob, _) = registry.register("bob".into()).await;

        engine
            .start("alice".to_owned(), "c1".to_owned(), Some("g1".to_owned()))
            .await;

        let frame = rx_bob.recv().await.unwrap().into_text().unwrap();
        assert!(frame.contains("START_TYPING"));
        assert!(frame.contains("\"userId\":\"alice\""));
    }

    #[tokio::test]
    async fn explicit_stop_emits_stop_typing_without_expiry_flag() {
        let (engine, registry) = engine_and_registry();
        let (_h_bob, mut rx_bob, _) = registry.register("bob".into()).await;

        engine
            .start("alice".to_owned(), "c1".to_owned(), Some("g1".to_owned()))
            .await;
        rx_bob.recv().await.unwrap();

        engine
            .stop("alice".to_owned(), "c1".to_owned(), Some("g1".to_owned()))
            .await;
        let frame = rx_bob.recv().await.unwrap().into_text().unwrap();
        assert!(frame.contains("STOP_TYPING"));
        assert!(!frame.contains("typingStopped"));
    }

    #[tokio::test]
    async fn stop_on_absent_entry_emits_nothing() {
        let (engine, registry) = engine_and_registry();
        let (_h_bob, mut rx_bob, _) = registry.register("bob".into()).await;

        engine
            .stop("alice".to_owned(), "c1".to_owned(), Some("g1".to_owned()))
            .await;

        assert!(rx_bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_all_cancels_every_channel_for_the_user() {
        let (engine, registry) = engine_and_registry();
        let (_h_bob, mut rx_bob, _) = registry.register("bob".into()).await;

        engine
            .start("alice".to_owned(), "c1".to_owned(), Some("g1".to_owned()))
            .await;
        rx_bob.recv().await.unwrap();
        engine
            .start("alice".to_owned(), "c2".to_owned(), Some("g1".to_owned()))
            .await;
        rx_bob.recv().await.unwrap();

        engine.stop_all("alice").await;

        let first = rx_bob.recv().await.unwrap().into_text().unwrap();
        let second = rx_bob.recv().await.unwrap().into_text().unwrap();
        assert!(first.contains("STOP_TYPING"));
        assert!(second.contains("STOP_TYPING"));
    }

    #[tokio::test]
    async fn expiry_check_is_noop_when_user_restarted_typing() {
        let (engine, registry) = engine_and_registry();
        let (_h_bob, _rx_bob, _) = registry.register("bob".into()).await;

        let key = ("c1".to_owned(), "g1".to_owned());
        {
            // Simulate an expiry scheduled in the past racing a fresh start.
            let mut state = engine.state.lock().await;
            state
                .entry(key.clone())
                .or_default()
                .insert("alice".to_owned(), Instant::now() + Duration::from_secs(60));
        }

        engine.expiry_check("alice", key).await;

        let state = engine.state.lock().await;
        assert!(state.get(&("c1".to_owned(), "g1".to_owned())).is_some());
    }
}
