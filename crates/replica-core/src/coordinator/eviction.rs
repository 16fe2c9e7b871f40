//! Message eviction, local history deletion and timed housekeeping.

use std::collections::HashSet;

use replica_shared::UnifiedMessageKey;
use replica_store::Message;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{Coordinator, ViewId};
use crate::cache::Origin;
use crate::events::{EntityKey, EntitySnapshot};

impl Coordinator {
    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    pub(crate) fn attach_view(&mut self, view: ViewId, dialog_id: i32) {
        self.observers.views.insert(view, dialog_id);
    }

    pub(crate) fn detach_view(&mut self, view: ViewId) {
        if self.observers.views.remove(&view).is_some() {
            self.request_cleanup(true);
        }
    }

    pub(crate) fn set_search_results(&mut self, search: u64, keys: Vec<UnifiedMessageKey>) {
        self.observers.searches.insert(search, keys);
    }

    pub(crate) fn clear_search(&mut self, search: u64) {
        self.observers.searches.remove(&search);
    }

    pub(crate) fn transfer_started(&mut self, key: UnifiedMessageKey) {
        self.observers.transfers.insert(key);
    }

    pub(crate) fn transfer_finished(&mut self, key: UnifiedMessageKey) {
        self.observers.transfers.remove(&key);
    }

    /// Cache an outgoing message until the feed acknowledges it.
    pub(crate) fn send_message(&mut self, random_id: i64, message: Message) {
        let key = message.key();
        if self.apply_message(message, false, Origin::Local).is_some() {
            self.pending_sends.insert(random_id, key);
        }
    }

    // -----------------------------------------------------------------------
    // Eviction
    // -----------------------------------------------------------------------

    /// Schedule an eviction sweep after the cleanup delay. Requests coming
    /// from a detached view are ignored while auto cleanup is off.
    pub fn request_cleanup(&mut self, from_view: bool) {
        if from_view && !self.config.auto_cleanup {
            return;
        }
        self.cleanup_at = Some(Instant::now() + self.config.cleanup_delay);
    }

    pub(crate) fn set_auto_cleanup(&mut self, enabled: bool) {
        self.config.auto_cleanup = enabled;
    }

    /// Messages that must stay cached.
    pub fn locked_messages(&self) -> HashSet<UnifiedMessageKey> {
        let mut locked: HashSet<UnifiedMessageKey> = self
            .cache
            .dialogs()
            .map(|dialog| dialog.top_message_key())
            .filter(|key| !key.is_zero())
            .collect();

        for keys in self.observers.searches.values() {
            locked.extend(keys.iter().copied());
        }
        for dialog_id in self.observers.views.values() {
            locked.extend(self.cache.dialog_messages(*dialog_id).iter().copied());
        }
        locked.extend(self.observers.transfers.iter().copied());
        locked.extend(self.pending_sends.values().copied());
        for waiting in self.pending_replies.values() {
            locked.extend(waiting.iter().copied());
        }
        locked
    }

    /// Retire every cached message nobody holds. Returns how many went.
    pub fn cleanup_messages(&mut self) -> usize {
        let locked = self.locked_messages();
        let evicted = self.cache.evict_messages_except(&locked, Instant::now());
        for key in &evicted {
            self.emit_removed(EntityKey::Message(*key));
        }
        evicted.len()
    }

    /// Forget the local history of a dialog, optionally with the dialog.
    pub fn delete_local_history(&mut self, peer_id: i32, delete_dialog: bool) {
        info!(peer_id, delete_dialog, "deleting local history");
        let now = Instant::now();

        if let Some(dialog) = self.cache.dialog_mut(peer_id) {
            dialog.top_message = 0;
            dialog.unread_count = 0;
            let dialog = dialog.clone();
            if !delete_dialog {
                self.store.insert_dialog(dialog.clone());
            }
            self.emit_upserted(EntitySnapshot::Dialog(dialog));
        }
        self.store.delete_history(peer_id);

        let keys = self.cache.dialog_messages(peer_id).to_vec();
        for key in keys {
            if self.cache.retire_message(key, now) {
                self.emit_removed(EntityKey::Message(key));
            }
        }

        if delete_dialog {
            self.store.delete_dialog(peer_id);
            if self.cache.retire_chat(peer_id, now) {
                self.emit_removed(EntityKey::Chat(peer_id));
            }
            if self.cache.retire_dialog(peer_id, now) {
                self.emit_removed(EntityKey::Dialog(peer_id));
            }
        }
        self.schedule_dialog_refresh();
    }

    // -----------------------------------------------------------------------
    // Housekeeping
    // -----------------------------------------------------------------------

    /// Earliest pending cleanup, dialog refresh or garbage sweep.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.cleanup_at,
            self.dialog_refresh_at,
            self.cache.garbage_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Run whatever is due at `now`.
    pub fn run_housekeeping(&mut self, now: Instant) {
        if self.cleanup_at.is_some_and(|at| at <= now) {
            self.cleanup_at = None;
            let evicted = self.cleanup_messages();
            debug!(evicted, "cleanup sweep");
        }
        if self.dialog_refresh_at.is_some_and(|at| at <= now) {
            self.dialog_refresh_at = None;
            self.request_dialogs();
        }
        self.cache.collect_garbage(now);
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{message, Harness};
    use super::*;
    use crate::cache::Retired;
    use crate::config::ReplicaConfig;
    use crate::feed::{FeedEvent, Update, UpstreamRequest};
    use replica_shared::Peer;
    use replica_store::Dialog;
    use std::time::Duration;

    fn dialog_with_top(h: &mut Harness, chat: i32, top: i32) {
        h.coordinator.apply_dialog(
            Dialog {
                peer: Peer::Chat(chat),
                top_message: top,
                ..Default::default()
            },
            Origin::Live,
        );
    }

    #[tokio::test(start_paused = true)]
    async fn top_message_survives_sweeps_until_unlocked() {
        let mut h = Harness::new();
        let top = message(Peer::Chat(7), 100, "top");
        h.coordinator.apply_message(top.clone(), false, Origin::Live);
        dialog_with_top(&mut h, 7, 100);

        assert_eq!(h.coordinator.cleanup_messages(), 0);
        assert!(h.coordinator.cache().contains_message(top.key()));

        dialog_with_top(&mut h, 7, 101);
        assert_eq!(h.coordinator.cleanup_messages(), 1);
        assert!(!h.coordinator.cache().contains_message(top.key()));
        assert!(h
            .coordinator
            .cache()
            .peek_retired(EntityKey::Message(top.key()))
            .is_some());

        tokio::time::advance(Duration::from_secs(3)).await;
        h.coordinator.run_housekeeping(Instant::now());
        assert!(h
            .coordinator
            .cache()
            .peek_retired(EntityKey::Message(top.key()))
            .is_none());
    }

    #[tokio::test]
    async fn observers_lock_their_messages() {
        let mut h = Harness::new();
        for id in 1..=5 {
            h.coordinator
                .apply_message(message(Peer::Chat(7), id, "x"), false, Origin::Live);
        }
        h.coordinator
            .send_message(99, message(Peer::Chat(9), 500, "sending"));

        h.coordinator.attach_view(1, 7);
        h.coordinator
            .set_search_results(4, vec![UnifiedMessageKey::new(0, 1)]);

        assert_eq!(h.coordinator.cache().message_count(), 6);
        assert_eq!(h.coordinator.cleanup_messages(), 0);

        h.coordinator.detach_view(1);
        h.coordinator.clear_search(4);
        h.coordinator.transfer_started(UnifiedMessageKey::new(0, 3));
        assert_eq!(h.coordinator.cleanup_messages(), 4);
        assert!(h.coordinator.cache().contains_message(UnifiedMessageKey::new(0, 3)));
        assert!(h.coordinator.cache().contains_message(UnifiedMessageKey::new(0, 500)));
    }

    #[tokio::test(start_paused = true)]
    async fn detach_schedules_cleanup_only_with_auto_cleanup() {
        let mut h = Harness::with_config(ReplicaConfig {
            auto_cleanup: false,
            ..Default::default()
        });
        h.coordinator.attach_view(1, 7);
        h.coordinator.detach_view(1);
        assert!(h.coordinator.next_deadline().is_none());

        h.coordinator.request_cleanup(false);
        assert_eq!(
            h.coordinator.next_deadline(),
            Some(Instant::now() + Duration::from_secs(60))
        );

        h.coordinator.set_auto_cleanup(true);
        h.coordinator.attach_view(2, 7);
        tokio::time::advance(Duration::from_secs(10)).await;
        h.coordinator.detach_view(2);
        assert_eq!(
            h.coordinator.next_deadline(),
            Some(Instant::now() + Duration::from_secs(60))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_runs_when_due() {
        let mut h = Harness::new();
        h.coordinator
            .apply_message(message(Peer::Chat(7), 1, "x"), false, Origin::Live);
        h.coordinator.request_cleanup(false);

        h.coordinator.run_housekeeping(Instant::now());
        assert_eq!(h.coordinator.cache().message_count(), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        h.coordinator.run_housekeeping(Instant::now());
        assert_eq!(h.coordinator.cache().message_count(), 0);
    }

    #[tokio::test]
    async fn acknowledged_send_moves_to_server_id() {
        let mut h = Harness::new();
        let draft = Message {
            out: true,
            ..message(Peer::Chat(7), 900, "hello")
        };
        h.coordinator.send_message(42, draft.clone());

        let store = h.coordinator.store().clone();
        store.flush().await;
        assert!(store.message(draft.key()).await.is_none());

        h.feed(FeedEvent::Updates {
            updates: vec![Update::MessageId {
                random_id: 42,
                id: 120,
            }],
            users: Vec::new(),
            chats: Vec::new(),
            date: 0,
            seq_start: 0,
            seq: 0,
        });
        let acked = UnifiedMessageKey::new(0, 120);
        assert!(!h.coordinator.cache().contains_message(draft.key()));
        assert!(matches!(
            h.coordinator.cache().peek_retired(EntityKey::Message(draft.key())),
            Some(Retired::Message(_))
        ));
        assert_eq!(h.coordinator.cache().message(acked).unwrap().message.text, "hello");
        assert_eq!(h.coordinator.cache().dialog(7).unwrap().top_message, 120);

        store.flush().await;
        assert!(store.message(acked).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_local_history_clears_dialog() {
        let mut h = Harness::new();
        for id in 1..=3 {
            h.coordinator
                .apply_message(message(Peer::Chat(7), id, "x"), false, Origin::Live);
        }
        dialog_with_top(&mut h, 7, 3);
        h.coordinator.apply_chat(
            replica_store::Chat {
                id: 7,
                ..Default::default()
            },
            Origin::Live,
        );

        h.coordinator.delete_local_history(7, false);
        let dialog = h.coordinator.cache().dialog(7).unwrap();
        assert_eq!((dialog.top_message, dialog.unread_count), (0, 0));
        assert!(h.coordinator.cache().dialog_messages(7).is_empty());

        let store = h.coordinator.store().clone();
        store.flush().await;
        assert_eq!(store.messages_available(Peer::Chat(7)).await, 0);

        h.coordinator.delete_local_history(7, true);
        assert!(h.coordinator.cache().dialog(7).is_none());
        assert!(h.coordinator.cache().chat(7).is_none());
        store.flush().await;
        assert!(store.dialog(7).await.is_none());

        tokio::time::advance(Duration::from_secs(3)).await;
        h.coordinator.run_housekeeping(Instant::now());
        assert_eq!(h.drain_requests(), vec![UpstreamRequest::GetDialogs]);
    }
}
