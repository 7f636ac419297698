pub mod fanout;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod signaling;
pub mod typing;

use std::sync::Arc;

use crate::broker::MembershipSource;

pub use fanout::GuildFanout;
pub use presence::{PresenceEngine, Status};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, RoomId};
pub use rooms::RoomManager;
pub use signaling::SignalingRelay;
pub use typing::TypingEngine;

/// The connection hub (§1 "the core"): every consistency-critical in-memory
/// subsystem, wired together. Each subsystem keeps its own lock; nothing
/// here introduces a lock spanning more than one of them (§9).
#[derive(Clone)]
pub struct Hub {
    pub registry: ConnectionRegistry,
    pub presence: PresenceEngine,
    pub typing: TypingEngine,
    pub rooms: RoomManager,
    pub signaling: SignalingRelay,
    pub fanout: GuildFanout,
}

impl Hub {
    pub fn new(membership: Arc<dyn MembershipSource>) -> Self {
        let registry = ConnectionRegistry::new();
        let fanout = GuildFanout::new(registry.clone(), membership.clone());
        let presence = PresenceEngine::new(registry.clone(), fanout.clone());
        let typing = TypingEngine::new(fanout.clone());
        let rooms = RoomManager::new(registry.clone(), membership);
        let signaling = SignalingRelay::new(registry.clone());

        Self {
            registry,
            presence,
            typing,
            rooms,
            signaling,
            fanout,
        }
    }
}
