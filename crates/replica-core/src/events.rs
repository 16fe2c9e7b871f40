//! Change notifications published to observers.

use replica_shared::{SyncState, UnifiedMessageKey};
use replica_store::{Chat, Contact, Dialog, Message, User};
use serde::Serialize;
use tokio::sync::broadcast;

/// Stable identity of a cached entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityKey {
    User(i32),
    Chat(i32),
    Dialog(i32),
    Contact(i32),
    Message(UnifiedMessageKey),
}

/// Copy of an entity as it stands after an upsert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EntitySnapshot {
    User(User),
    Chat(Chat),
    Dialog(Dialog),
    Contact(Contact),
    Message(Message),
}

impl EntitySnapshot {
    pub fn key(&self) -> EntityKey {
        match self {
            Self::User(u) => EntityKey::User(u.id),
            Self::Chat(c) => EntityKey::Chat(c.id),
            Self::Dialog(d) => EntityKey::Dialog(d.id()),
            Self::Contact(c) => EntityKey::Contact(c.user_id),
            Self::Message(m) => EntityKey::Message(m.key()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ReplicaEvent {
    /// An entity was created or changed.
    EntityUpserted(EntitySnapshot),
    /// An entity left the cache.
    EntityRemoved(EntityKey),
    /// The feed position of a scope moved. Scope 0 is the global feed.
    StateChanged { scope: i32, state: SyncState },
}

/// Broadcast fan-out of [`ReplicaEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReplicaEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReplicaEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ReplicaEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("no event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_shared::Peer;

    #[test]
    fn snapshot_key_matches_entity() {
        let msg = Message {
            id: 9,
            to: Peer::Channel(4),
            ..Default::default()
        };
        assert_eq!(
            EntitySnapshot::Message(msg).key(),
            EntityKey::Message(UnifiedMessageKey::new(4, 9))
        );
        let dialog = Dialog {
            peer: Peer::Chat(12),
            ..Default::default()
        };
        assert_eq!(EntitySnapshot::Dialog(dialog).key(), EntityKey::Dialog(12));
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(ReplicaEvent::EntityRemoved(EntityKey::User(1)));
        bus.emit(ReplicaEvent::StateChanged {
            scope: 0,
            state: SyncState::with_seq(3),
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            ReplicaEvent::EntityRemoved(EntityKey::User(1))
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            ReplicaEvent::StateChanged { scope: 0, .. }
        ));
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        EventBus::new(1).emit(ReplicaEvent::EntityRemoved(EntityKey::Chat(1)));
    }
}
