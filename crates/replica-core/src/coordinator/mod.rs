//! Replica coordinator.
//!
//! Routes records from the feed and from store replay into the identity
//! cache, forwards live changes to the store worker and keeps the sync
//! tracker in step. All cache mutation happens here, on the task that runs
//! [`Replica::run`].

mod eviction;
mod runner;
mod updates;

use std::collections::{HashMap, HashSet};

use replica_shared::{Peer, UnifiedMessageKey};
use replica_store::{Chat, Contact, Dialog, MediaKey, Message, StoreEvent, StoreHandle, User};
use tokio::time::Instant;
use tracing::debug;

pub use runner::{Control, Replica, ReplicaHandle, ReplicaQuery, ViewId};

use crate::cache::{IdentityCache, Origin, Upsert};
use crate::config::ReplicaConfig;
use crate::events::{EntityKey, EntitySnapshot, EventBus, ReplicaEvent};
use crate::feed::{Upstream, UpstreamRequest};
use crate::sync::SyncTracker;

/// Everything that currently holds on to cached messages.
#[derive(Debug, Default)]
pub struct Observers {
    /// Attached message views and the dialog each one shows.
    views: HashMap<ViewId, i32>,
    searches: HashMap<u64, Vec<UnifiedMessageKey>>,
    transfers: HashSet<UnifiedMessageKey>,
}

pub struct Coordinator {
    config: ReplicaConfig,
    store: StoreHandle,
    tracker: SyncTracker,
    cache: IdentityCache,
    events: EventBus,
    upstream: Upstream,
    observers: Observers,
    media_keys: HashMap<i64, MediaKey>,
    /// Reply target → messages waiting for it.
    pending_replies: HashMap<UnifiedMessageKey, Vec<UnifiedMessageKey>>,
    /// Random id of an unacknowledged send → its provisional key.
    pending_sends: HashMap<i64, UnifiedMessageKey>,
    connected: bool,
    dialogs_in_flight: bool,
    /// Dialogs known when the running dialog fetch was issued.
    stale_dialogs: HashSet<i32>,
    cleanup_at: Option<Instant>,
    dialog_refresh_at: Option<Instant>,
}

impl Coordinator {
    pub fn new(
        config: ReplicaConfig,
        store: StoreHandle,
        tracker: SyncTracker,
        events: EventBus,
        upstream: Upstream,
    ) -> Self {
        let cache = IdentityCache::new(config.gc_grace);
        Self {
            config,
            store,
            tracker,
            cache,
            events,
            upstream,
            observers: Observers::default(),
            media_keys: HashMap::new(),
            pending_replies: HashMap::new(),
            pending_sends: HashMap::new(),
            connected: false,
            dialogs_in_flight: false,
            stale_dialogs: HashSet::new(),
            cleanup_at: None,
            dialog_refresh_at: None,
        }
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    pub fn tracker(&self) -> &SyncTracker {
        &self.tracker
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn media_key(&self, media_id: i64) -> Option<&MediaKey> {
        self.media_keys.get(&media_id)
    }

    /// Replay the persisted state into the cache.
    pub fn start(&mut self) {
        self.store.read_full_dialogs();
    }

    fn emit(&self, event: ReplicaEvent) {
        self.events.emit(event);
    }

    fn emit_upserted(&self, snapshot: EntitySnapshot) {
        self.emit(ReplicaEvent::EntityUpserted(snapshot));
    }

    fn emit_removed(&self, key: EntityKey) {
        self.emit(ReplicaEvent::EntityRemoved(key));
    }

    // -----------------------------------------------------------------------
    // Entity application
    // -----------------------------------------------------------------------

    pub(crate) fn apply_user(&mut self, user: User, origin: Origin) -> Upsert {
        let outcome = self.cache.upsert_user(user.clone(), origin);
        if !outcome.changed() {
            return outcome;
        }
        if origin == Origin::Live {
            self.store.insert_user(user.clone());
        }
        self.emit_upserted(EntitySnapshot::User(user));
        outcome
    }

    pub(crate) fn apply_chat(&mut self, mut chat: Chat, origin: Origin) -> Upsert {
        if chat.participants_count == 0 {
            if let Some(cached) = self.cache.chat(chat.id) {
                chat.participants_count = cached.participants_count;
            }
        }

        let outcome = self.cache.upsert_chat(chat.clone(), origin);
        if !outcome.changed() {
            return outcome;
        }
        if origin == Origin::Live {
            self.store.insert_chat(chat.clone());
        }
        self.emit_upserted(EntitySnapshot::Chat(chat));
        outcome
    }

    pub(crate) fn apply_dialog(&mut self, dialog: Dialog, origin: Origin) -> Upsert {
        let outcome = self.cache.upsert_dialog(dialog.clone(), origin);
        if !outcome.changed() {
            return outcome;
        }
        if origin == Origin::Live {
            self.store.insert_dialog(dialog.clone());
        }
        if dialog.encrypted {
            self.adopt_secret_history(dialog.id());
        }
        self.emit_upserted(EntitySnapshot::Dialog(dialog));
        outcome
    }

    pub(crate) fn apply_contact(&mut self, contact: Contact, origin: Origin) -> Upsert {
        let outcome = self.cache.upsert_contact(contact.clone(), origin);
        if outcome.changed() {
            if origin == Origin::Live {
                self.store.insert_contact(contact.clone());
            }
            self.emit_upserted(EntitySnapshot::Contact(contact));
        }
        outcome
    }

    /// Store replay reports a dialog after its newest message, so messages of
    /// a secret chat may have been cached as plain ones.
    fn adopt_secret_history(&mut self, dialog_id: i32) {
        let keys = self.cache.dialog_messages(dialog_id).to_vec();
        for key in keys {
            if let Some(cached) = self.cache.message_mut(key) {
                cached.encrypted = true;
            }
        }
    }

    /// Cache a message and, when live, persist it.
    ///
    /// Returns `None` for records that carry nothing to show.
    pub(crate) fn apply_message(
        &mut self,
        mut message: Message,
        encrypted: bool,
        origin: Origin,
    ) -> Option<Upsert> {
        if message.id == 0 || message.has_no_content() {
            return None;
        }
        let key = message.key();

        if message.reply_to_msg_id != 0 {
            let target = message.reply_key();
            if !self.cache.contains_message(target) {
                self.await_reply_target(&message, target, key);
                message.reply_to_msg_id = 0;
            }
        }

        let dialog_id = message.dialog_id();
        let outcome = self
            .cache
            .upsert_message(dialog_id, message.clone(), encrypted, origin);
        if !outcome.changed() {
            return Some(outcome);
        }
        if origin == Origin::Live {
            self.store.insert_message(message.clone(), encrypted);
        }
        let id = message.id;
        self.emit_upserted(EntitySnapshot::Message(message));

        if let Some(waiting) = self.pending_replies.remove(&key) {
            self.resolve_replies(id, waiting);
        }
        Some(outcome)
    }

    fn await_reply_target(
        &mut self,
        message: &Message,
        target: UnifiedMessageKey,
        waiting: UnifiedMessageKey,
    ) {
        let waiters = self.pending_replies.entry(target).or_default();
        if !waiters.contains(&waiting) {
            waiters.push(waiting);
        }

        let channel_id = message.to.channel_id();
        let access_hash = self
            .cache
            .chat(channel_id)
            .map(|c| c.access_hash)
            .unwrap_or_default();
        debug!(%target, %waiting, "reply target missing, fetching");
        self.upstream.request(UpstreamRequest::GetMessages {
            channel_id,
            access_hash,
            ids: vec![message.reply_to_msg_id],
        });
    }

    /// Drop every reply waiter after a failed fetch. Redelivery of a
    /// waiting message asks for its target again.
    pub(crate) fn abandon_reply_targets(&mut self) {
        if !self.pending_replies.is_empty() {
            debug!(targets = self.pending_replies.len(), "reply fetch failed, releasing waiters");
            self.pending_replies.clear();
        }
    }

    fn resolve_replies(&mut self, target_id: i32, waiting: Vec<UnifiedMessageKey>) {
        for key in waiting {
            let Some(cached) = self.cache.message_mut(key) else {
                continue;
            };
            cached.message.reply_to_msg_id = target_id;
            let message = cached.message.clone();
            let encrypted = cached.encrypted;
            if !self.is_pending_send(key) {
                self.store.insert_message(message.clone(), encrypted);
            }
            self.emit_upserted(EntitySnapshot::Message(message));
        }
    }

    fn is_pending_send(&self, key: UnifiedMessageKey) -> bool {
        self.pending_sends.values().any(|k| *k == key)
    }

    /// Move a dialog's top message forward to `message`, creating the dialog
    /// if it is unknown. Incoming unread messages raise the unread count.
    pub(crate) fn bump_dialog(&mut self, message: &Message) {
        let dialog_id = message.dialog_id();
        let counts = !message.out && message.unread;

        let dialog = match self.cache.dialog(dialog_id) {
            Some(existing) => {
                let mut dialog = existing.clone();
                if message.id > dialog.top_message {
                    dialog.top_message = message.id;
                }
                if counts {
                    dialog.unread_count = dialog.unread_count.saturating_add(1);
                }
                dialog
            }
            None => Dialog {
                peer: match message.to {
                    Peer::User(_) => Peer::User(dialog_id),
                    peer => peer,
                },
                top_message: message.id,
                unread_count: i32::from(counts),
                ..Default::default()
            },
        };
        self.apply_dialog(dialog, Origin::Live);
    }

    // -----------------------------------------------------------------------
    // Store replay
    // -----------------------------------------------------------------------

    pub fn handle_store_event(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::UserFound(user) => {
                self.apply_user(user, Origin::Store);
            }
            StoreEvent::ChatFound(chat) => {
                self.apply_chat(chat, Origin::Store);
            }
            StoreEvent::ContactFound(contact) => {
                self.apply_contact(contact, Origin::Store);
            }
            StoreEvent::DialogFound(dialog) => {
                self.apply_dialog(dialog, Origin::Store);
            }
            StoreEvent::MessageFound(message) => {
                let encrypted = match message.to {
                    Peer::Chat(id) => self.cache.dialog(id).is_some_and(|d| d.encrypted),
                    _ => false,
                };
                self.apply_message(message, encrypted, Origin::Store);
            }
            StoreEvent::MediaKeyFound(key) => {
                self.media_keys.insert(key.media_id, key);
            }
        }
    }
}
