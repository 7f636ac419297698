use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::broker::membership::MembershipSource;
use crate::hub::registry::ConnectionRegistry;

/// §4.8 Guild Fan-out — for a source user, notify every co-member across
/// every shared guild exactly once, regardless of how many guilds they
/// share with the source.
#[derive(Clone)]
pub struct GuildFanout {
    registry: ConnectionRegistry,
    membership: Arc<dyn MembershipSource>,
}

impl GuildFanout {
    pub fn new(registry: ConnectionRegistry, membership: Arc<dyn MembershipSource>) -> Self {
        Self {
            registry,
            membership,
        }
    }

    /// Broadcast `(event, payload)` to every distinct co-member of
    /// `source_user_id` across all guilds they share, at most once per
    /// target user. Guild membership is fetched once per call and reused
    /// across all of that user's guilds — a single, bounded-but-not-cheap
    /// lookup, per §4.2.
    pub async fn broadcast<T: Serialize>(&self, source_user_id: &str, event: &str, payload: &T) {
        let memberships = match self.membership.guilds_of(source_user_id).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(
                    user_id = %source_user_id,
                    error = ?e,
                    "failed to resolve guild memberships; broadcast skipped"
                );
                return;
            }
        };

        #[derive(Serialize)]
        struct Envelope<'a, T> {
            event_type: &'a str,
            payload: &'a T,
        }

        let frame = match serde_json::to_string(&Envelope {
            event_type: event,
            payload,
        }) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error = ?e, "failed to serialize fan-out payload");
                return;
            }
        };

        let mut notified: HashSet<String> = HashSet::new();
        for members in memberships.values() {
            for member in members {
                if member == source_user_id || !notified.insert(member.clone()) {
                    continue;
                }
                self.registry.send_to_user(member, &frame).await;
            }
        }
    }
}
