use serde_json::Value;

use crate::hub::registry::ConnectionRegistry;

#[derive(serde::Serialize)]
struct DataEnvelope<'a> {
    event: &'a str,
    data: Value,
}

/// §4.7 Signaling Relay — opaque forwarding of WebRTC offer/answer/candidate
/// envelopes between two peers. Never inspects or validates `sdp`/`candidate`
/// (§9): the only thing we touch is stamping `senderId`.
#[derive(Clone)]
pub struct SignalingRelay {
    registry: ConnectionRegistry,
}

impl SignalingRelay {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// `signal_data` is whatever the client sent, which still carries the
    /// `targetId` used for routing; this strips it, attaches `senderId`, and
    /// enqueues the resulting `{type, sdp?, candidate?, senderId}` to every
    /// connection of `target_user_id` (spec.md's worked scenario: the
    /// recipient sees `senderId`, never `targetId`). Silent no-op if the
    /// target has no connections or its queue is full — matching "Target
    /// absent" / "Backpressure" in §7.
    pub async fn forward(&self, from_user_id: &str, target_user_id: &str, mut signal_data: Value) {
        if let Value::Object(ref mut map) = signal_data {
            map.remove("targetId");
            map.insert("senderId".to_owned(), Value::String(from_user_id.to_owned()));
        }

        let frame = match serde_json::to_string(&DataEnvelope {
            event: "data",
            data: signal_data,
        }) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error = ?e, "failed to serialize signaling envelope");
                return;
            }
        };

        self.registry.send_to_user(target_user_id, &frame).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::registry::ConnectionRegistry;

    #[tokio::test]
    async fn forward_attaches_sender_id_and_delivers_to_target_only() {
        let registry = ConnectionRegistry::new();
        let (_h_alice, mut rx_alice, _) = registry.register("alice".into()).await;
        let (_h_bob, mut rx_bob, _) = registry.register("bob".into()).await;

        let relay = SignalingRelay::new(registry);
        relay
            .forward(
                "alice",
                "bob",
                serde_json::json!({"type": "offer", "sdp": {"k": "v"}}),
            )
            .await;

        let frame = rx_bob.recv().await.unwrap().into_text().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["data"]["senderId"], "alice");
        assert_eq!(value["data"]["type"], "offer");
        assert_eq!(value["data"]["sdp"]["k"], "v");

        assert!(rx_alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn forward_strips_target_id_before_delivery() {
        let registry = ConnectionRegistry::new();
        let (_h_bob, mut rx_bob, _) = registry.register("bob".into()).await;

        let relay = SignalingRelay::new(registry);
        relay
            .forward(
                "alice",
                "bob",
                serde_json::json!({"type": "offer", "sdp": {"k": "v"}, "targetId": "bob"}),
            )
            .await;

        let frame = rx_bob.recv().await.unwrap().into_text().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert!(value["data"].get("targetId").is_none());
        assert_eq!(value["data"]["senderId"], "alice");
    }

    #[tokio::test]
    async fn forward_to_absent_target_is_silent() {
        let registry = ConnectionRegistry::new();
        let relay = SignalingRelay::new(registry);
        relay
            .forward("alice", "ghost", serde_json::json!({"type": "offer"}))
            .await;
    }
}
