use std::path::{Path, PathBuf};

use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::Serialize;
use thiserror::Error;

use crate::hub::registry::ConnectionRegistry;

const STREAM_NAME: &str = "event_stream";
const READ_COUNT: usize = 100;
const CHECKPOINT_FILE: &str = "last_redis_id.txt";

#[derive(Error, Debug)]
pub enum SubscriberError {
    #[error("broker read failed: {0}")]
    Broker(#[from] redis::RedisError),
}

/// The JSON shape dispatched to each target connection. Field names match
/// the wire contract verbatim (§6): `event_type` / `payload`.
#[derive(Serialize)]
struct DispatchedEvent<'a> {
    event_type: &'a str,
    payload: serde_json::Value,
}

/// §4.9 Stream Subscriber — consumes `event_stream`, dispatches to addressed
/// users, and checkpoints its position to `last_redis_id.txt` only after a
/// dispatch attempt has been made for every target (at-least-once delivery).
pub struct StreamSubscriber {
    conn: ConnectionManager,
    registry: ConnectionRegistry,
    checkpoint_path: PathBuf,
}

impl StreamSubscriber {
    pub fn new(conn: ConnectionManager, registry: ConnectionRegistry) -> Self {
        Self::with_checkpoint_path(conn, registry, CHECKPOINT_FILE)
    }

    pub fn with_checkpoint_path(
        conn: ConnectionManager,
        registry: ConnectionRegistry,
        checkpoint_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            conn,
            registry,
            checkpoint_path: checkpoint_path.into(),
        }
    }

    /// Runs until the broker read fails, at which point the loop exits and
    /// returns the error — per §7, restarting the subscriber is left to the
    /// supervising caller, not handled here.
    pub async fn run(&mut self) -> Result<(), SubscriberError> {
        let mut last_id = load_checkpoint(&self.checkpoint_path).await;

        loop {
            let opts = StreamReadOptions::default().count(READ_COUNT).block(0);
            let reply: StreamReadReply = self
                .conn
                .xread_options(&[STREAM_NAME], &[last_id.as_str()], &opts)
                .await?;

            for stream_key in reply.keys {
                for entry in stream_key.ids {
                    self.dispatch_entry(&entry).await;
                    last_id = entry.id.clone();
                }
            }

            save_checkpoint(&self.checkpoint_path, &last_id).await;
        }
    }

    async fn dispatch_entry(&self, entry: &redis::streams::StreamId) {
        let Some(event_type) = field_str(entry, "EventType") else {
            tracing::warn!(id = %entry.id, "stream entry missing EventType; skipping");
            return;
        };
        let Some(payload_raw) = field_str(entry, "Payload") else {
            tracing::warn!(id = %entry.id, "stream entry missing Payload; skipping");
            return;
        };
        let Some(user_ids_raw) = field_str(entry, "UserIDs") else {
            tracing::warn!(id = %entry.id, "stream entry missing UserIDs; skipping");
            return;
        };

        let payload: serde_json::Value = match serde_json::from_str(&payload_raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(id = %entry.id, error = ?e, "malformed Payload; skipping entry");
                return;
            }
        };
        let user_ids: Vec<String> = match serde_json::from_str(&user_ids_raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(id = %entry.id, error = ?e, "malformed UserIDs; skipping entry");
                return;
            }
        };

        let dispatched = DispatchedEvent {
            event_type: &event_type,
            payload,
        };
        let frame = match serde_json::to_string(&dispatched) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error = ?e, "failed to serialize dispatched event");
                return;
            }
        };

        for user_id in user_ids {
            self.registry.send_to_user(&user_id, &frame).await;
        }
    }
}

fn field_str(entry: &redis::streams::StreamId, field: &str) -> Option<String> {
    match entry.map.get(field)? {
        redis::Value::Data(bytes) => String::from_utf8(bytes.clone()).ok(),
        redis::Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

async fn load_checkpoint(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            let trimmed = contents.trim();
            if trimmed.is_empty() {
                "0".to_owned()
            } else {
                trimmed.to_owned()
            }
        }
        Err(_) => "0".to_owned(),
    }
}

async fn save_checkpoint(path: &Path, last_id: &str) {
    if let Err(e) = tokio::fs::write(path, last_id).await {
        tracing::warn!(error = ?e, path = %path.display(), "failed to persist stream checkpoint");
    }
}
