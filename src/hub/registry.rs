use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::auth::UserId;

/// Bounded outbound queue depth per connection (§3). A full queue means the
/// writer task is not keeping up; the offending frame is dropped rather than
/// applying backpressure to the sender.
pub const SEND_QUEUE_CAPACITY: usize = 256;

pub type ConnectionId = Uuid;
pub type RoomId = String;

/// Mutable audio state for a voice connection. Presence/typing connections
/// never touch this — it is only meaningful once a connection has joined a
/// room via §4.6.
#[derive(Default)]
pub struct VoiceFlags {
    room_id: Mutex<Option<RoomId>>,
    is_noisy: AtomicBool,
    is_muted: AtomicBool,
    is_deafened: AtomicBool,
}

impl VoiceFlags {
    pub async fn room(&self) -> Option<RoomId> {
        self.room_id.lock().await.clone()
    }

    pub async fn set_room(&self, room: Option<RoomId>) {
        *self.room_id.lock().await = room;
    }

    pub fn is_noisy(&self) -> bool {
        self.is_noisy.load(Ordering::Relaxed)
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted.load(Ordering::Relaxed)
    }

    pub fn is_deafened(&self) -> bool {
        self.is_deafened.load(Ordering::Relaxed)
    }

    /// Flips the mute flag and returns the new value.
    pub fn toggle_mute(&self) -> bool {
        toggle(&self.is_muted)
    }

    /// Flips the deafen flag and returns the new value.
    pub fn toggle_deafen(&self) -> bool {
        toggle(&self.is_deafened)
    }
}

fn toggle(flag: &AtomicBool) -> bool {
    let mut current = flag.load(Ordering::Relaxed);
    loop {
        match flag.compare_exchange_weak(
            current,
            !current,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return !current,
            Err(actual) => current = actual,
        }
    }
}

/// What the writer task actually puts on the wire. A plain text frame for
/// every application-level event, or a bare control ping for the periodic
/// liveness sweep (§5/§9) — kept out of `ConnectionRegistry::send`'s public
/// text-frame API so callers can't accidentally enqueue one as JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Ping,
}

impl OutboundFrame {
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s),
            Self::Ping => None,
        }
    }
}

/// One live bidirectional channel to a specific client instance (§3).
///
/// Shared (via `Arc`) between the registry, the owning reader/writer tasks,
/// and — for voice connections — the room manager. The only mutable state
/// here is `VoiceFlags`; everything else is set once at construction.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    outbox: mpsc::Sender<OutboundFrame>,
    pub voice: VoiceFlags,
}

impl ConnectionHandle {
    /// Non-blocking enqueue. Returns `false` if the queue was full and the
    /// frame was dropped — the caller (always the registry or a relay) does
    /// not treat this as an error; it is logged once at the call site.
    fn try_enqueue(&self, frame: OutboundFrame) -> bool {
        self.outbox.try_send(frame).is_ok()
    }
}

/// §4.3 Connection Registry — maps user id to the set of its live
/// connections, with structural mutation serialized by a short-held lock.
///
/// No upstream call, broker call, or blocking send ever happens while the
/// lock is held: callers take a [`Self::snapshot`] and act on it afterwards.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<UserId, Vec<Arc<ConnectionHandle>>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new connection for `user_id`. Returns the handle (used by the
    /// caller to build its reader/writer tasks) and whether this was the
    /// user's first live connection (`previous count == 0`), which the
    /// presence engine uses to gate its connected-transition broadcast.
    pub async fn register(
        &self,
        user_id: UserId,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundFrame>, bool) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let handle = Arc::new(ConnectionHandle {
            id: Uuid::new_v4(),
            user_id: user_id.clone(),
            outbox: tx,
            voice: VoiceFlags::default(),
        });

        let mut conns = self.connections.write().await;
        let entry = conns.entry(user_id).or_default();
        let is_first = entry.is_empty();
        entry.push(handle.clone());

        (handle, rx, is_first)
    }

    /// Detach a connection. Idempotent — removing a handle that is no longer
    /// present (e.g. double teardown) is a no-op. Returns whether the user
    /// now has zero remaining connections, so the presence engine can arm
    /// its grace timer.
    pub async fn remove(&self, handle: &ConnectionHandle) -> bool {
        let mut conns = self.connections.write().await;
        let Some(list) = conns.get_mut(&handle.user_id) else {
            return true;
        };
        list.retain(|h| h.id != handle.id);
        let now_empty = list.is_empty();
        if now_empty {
            conns.remove(&handle.user_id);
        }
        now_empty
    }

    /// Copy the mapping for a fan-out pass. Callers must not hold any lock
    /// while iterating the result — this is the only way to read the map.
    pub async fn snapshot(&self) -> HashMap<UserId, Vec<Arc<ConnectionHandle>>> {
        self.connections.read().await.clone()
    }

    pub async fn is_connected(&self, user_id: &str) -> bool {
        self.connections.read().await.contains_key(user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .map(Vec::len)
            .sum()
    }

    pub async fn user_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Non-blocking enqueue of a text frame to a single connection. A full
    /// queue drops the frame and is logged, never propagated as an error.
    pub fn send(&self, handle: &ConnectionHandle, frame: String) {
        self.send_frame(handle, OutboundFrame::Text(frame));
    }

    /// Non-blocking enqueue of a bare control ping (§5 ping sweep).
    pub fn send_ping(&self, handle: &ConnectionHandle) {
        self.send_frame(handle, OutboundFrame::Ping);
    }

    fn send_frame(&self, handle: &ConnectionHandle, frame: OutboundFrame) {
        if !handle.try_enqueue(frame) {
            tracing::warn!(
                connection_id = %handle.id,
                user_id = %handle.user_id,
                "outbound queue full; dropping frame"
            );
        }
    }

    /// Send to every live connection of one user. Silently a no-op if the
    /// user has no connections.
    pub async fn send_to_user(&self, user_id: &str, frame: &str) {
        let conns = self.connections.read().await;
        let Some(handles) = conns.get(user_id) else {
            return;
        };
        for handle in handles {
            self.send(handle, frame.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_registration_reports_is_first() {
        let registry = ConnectionRegistry::new();
        let (_h1, _rx1, first1) = registry.register("alice".into()).await;
        assert!(first1);

        let (_h2, _rx2, first2) = registry.register("alice".into()).await;
        assert!(!first2, "second connection for the same user is not first");
    }

    #[tokio::test]
    async fn remove_reports_whether_last_connection() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1, _) = registry.register("alice".into()).await;
        let (h2, _rx2, _) = registry.register("alice".into()).await;

        assert!(!registry.remove(&h1).await, "one connection remains");
        assert!(registry.remove(&h2).await, "now zero connections remain");
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1, _) = registry.register("alice".into()).await;
        assert!(registry.remove(&h1).await);
        assert!(registry.remove(&h1).await, "second removal is a no-op");
    }

    #[tokio::test]
    async fn empty_user_entry_is_pruned() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1, _) = registry.register("alice".into()).await;
        registry.remove(&h1).await;
        assert!(!registry.is_connected("alice").await);
    }

    #[tokio::test]
    async fn send_to_user_delivers_to_all_connections() {
        let registry = ConnectionRegistry::new();
        let (_h1, mut rx1, _) = registry.register("alice".into()).await;
        let (_h2, mut rx2, _) = registry.register("alice".into()).await;

        registry.send_to_user("alice", "hello").await;

        assert_eq!(rx1.recv().await.unwrap(), OutboundFrame::Text("hello".into()));
        assert_eq!(rx2.recv().await.unwrap(), OutboundFrame::Text("hello".into()));
    }

    #[tokio::test]
    async fn send_to_disconnected_user_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.send_to_user("nobody", "dropped").await;
    }

    #[tokio::test]
    async fn full_queue_drops_frame_without_panic() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx, _) = registry.register("alice".into()).await;
        for i in 0..SEND_QUEUE_CAPACITY + 10 {
            registry.send(&handle, format!("msg-{i}"));
        }
        // No panic and the registry is still usable afterwards.
        assert!(registry.is_connected("alice").await);
    }

    #[tokio::test]
    async fn send_ping_enqueues_a_bare_control_frame() {
        let registry = ConnectionRegistry::new();
        let (handle, mut rx, _) = registry.register("alice".into()).await;
        registry.send_ping(&handle);
        assert_eq!(rx.recv().await.unwrap(), OutboundFrame::Ping);
    }

    #[tokio::test]
    async fn voice_flags_toggle_independently() {
        let flags = VoiceFlags::default();
        assert!(!flags.is_muted());
        assert!(flags.toggle_mute());
        assert!(flags.is_muted());
        assert!(!flags.toggle_mute());
        assert!(!flags.is_deafened());
    }
}
