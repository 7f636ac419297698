use std::collections::HashMap;

use axum::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;

use crate::auth::UserId;

pub type GuildId = String;

/// A guild membership snapshot: guild id -> the member ids of that guild.
/// Only guilds the queried user actually belongs to are included.
pub type GuildMemberships = HashMap<GuildId, Vec<UserId>>;

#[derive(Error, Debug)]
pub enum MembershipError {
    #[error("broker scan failed: {0}")]
    Broker(#[from] redis::RedisError),
}

const KEY_PREFIX: &str = "guild_memberships:";

/// §4.2 Membership Resolver — `guildsOf(userId) -> {guildId: [userId]}`.
///
/// This call is assumed bounded but not cheap (it scans the full keyspace
/// prefix on every call); callers must snapshot and reuse the result within
/// one broadcast operation rather than calling it per-target.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    async fn guilds_of(&self, user_id: &str) -> Result<GuildMemberships, MembershipError>;
}

/// Stand-in used when the broker is unreachable at startup (§9 "Broker
/// unreachable on startup — process may continue without fan-out"). Every
/// user resolves to no guilds, so presence/typing/fan-out become local
/// no-ops instead of crashing the hub.
pub struct NullMembershipSource;

#[async_trait]
impl MembershipSource for NullMembershipSource {
    async fn guilds_of(&self, _user_id: &str) -> Result<GuildMemberships, MembershipError> {
        Ok(GuildMemberships::new())
    }
}

#[derive(Clone)]
pub struct RedisMembershipResolver {
    conn: ConnectionManager,
}

impl RedisMembershipResolver {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl MembershipSource for RedisMembershipResolver {
    async fn guilds_of(&self, user_id: &str) -> Result<GuildMemberships, MembershipError> {
        let mut conn = self.conn.clone();
        let mut result = GuildMemberships::new();
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{KEY_PREFIX}*"))
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            for key in keys {
                let Some(guild_id) = key.strip_prefix(KEY_PREFIX) else {
                    continue;
                };

                let raw: Option<String> = conn.get(&key).await?;
                let Some(raw) = raw else { continue };

                let members: Vec<UserId> = match serde_json::from_str(&raw) {
                    Ok(members) => members,
                    Err(e) => {
                        tracing::debug!(
                            guild_id = %guild_id,
                            error = ?e,
                            "skipping undecodable guild_memberships entry"
                        );
                        continue;
                    }
                };

                if members.iter().any(|m| m == user_id) {
                    result.insert(guild_id.to_owned(), members);
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// An in-memory stand-in for `RedisMembershipResolver`, used by fan-out
    /// and presence tests that should not depend on a live broker.
    #[derive(Default)]
    pub struct FakeMembershipSource {
        pub guilds: Mutex<GuildMemberships>,
    }

    #[async_trait]
    impl MembershipSource for FakeMembershipSource {
        async fn guilds_of(&self, user_id: &str) -> Result<GuildMemberships, MembershipError> {
            let guilds = self.guilds.lock().unwrap();
            Ok(guilds
                .iter()
                .filter(|(_, members)| members.iter().any(|m| m == user_id))
                .map(|(g, m)| (g.clone(), m.clone()))
                .collect())
        }
    }

    #[tokio::test]
    async fn fake_source_filters_by_membership() {
        let source = FakeMembershipSource::default();
        source.guilds.lock().unwrap().insert(
            "g1".into(),
            vec!["alice".into(), "bob".into()],
        );
        source
            .guilds
            .lock()
            .unwrap()
            .insert("g2".into(), vec!["carol".into()]);

        let memberships = source.guilds_of("alice").await.unwrap();
        assert_eq!(memberships.len(), 1);
        assert!(memberships.contains_key("g1"));
    }

    #[tokio::test]
    async fn null_source_always_resolves_to_no_guilds() {
        let memberships = NullMembershipSource.guilds_of("alice").await.unwrap();
        assert!(memberships.is_empty());
    }
}
