//! In-memory identity cache.
//!
//! One canonical instance per entity key, updated in place. Upserts report
//! whether anything changed so callers can skip redundant writes and
//! notifications. Removal is immediate from the maps; the removed value goes
//! to the [`Graveyard`] and stays readable until the grace period ends.

pub mod garbage;

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::time::Duration;

use replica_shared::UnifiedMessageKey;
use replica_store::{Chat, Contact, Dialog, Message, User};
use tokio::time::Instant;
use tracing::debug;

pub use garbage::{Graveyard, Retired};

use crate::events::EntityKey;

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// From the feed or a local action. Overwrites cached state.
    Live,
    /// Replayed from the store. Never overrides what the cache already holds.
    Store,
    /// Created locally and not acknowledged yet. Cached but never persisted.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

impl Upsert {
    pub fn changed(self) -> bool {
        self != Self::Unchanged
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedMessage {
    pub message: Message,
    /// Belongs to a secret chat.
    pub encrypted: bool,
    /// Dialog whose message list holds this key.
    pub dialog_id: i32,
}

#[derive(Debug)]
pub struct IdentityCache {
    users: HashMap<i32, User>,
    chats: HashMap<i32, Chat>,
    dialogs: HashMap<i32, Dialog>,
    contacts: HashMap<i32, Contact>,
    messages: HashMap<UnifiedMessageKey, CachedMessage>,
    /// Message keys per dialog, in arrival order.
    lists: HashMap<i32, Vec<UnifiedMessageKey>>,
    graveyard: Graveyard,
}

fn upsert_in<K: Hash + Eq, V: PartialEq>(
    map: &mut HashMap<K, V>,
    key: K,
    value: V,
    origin: Origin,
) -> Upsert {
    match map.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(value);
            Upsert::Inserted
        }
        Entry::Occupied(_) if origin == Origin::Store => Upsert::Unchanged,
        Entry::Occupied(mut slot) => {
            if *slot.get() == value {
                Upsert::Unchanged
            } else {
                *slot.get_mut() = value;
                Upsert::Updated
            }
        }
    }
}

impl IdentityCache {
    pub fn new(gc_grace: Duration) -> Self {
        Self {
            users: HashMap::new(),
            chats: HashMap::new(),
            dialogs: HashMap::new(),
            contacts: HashMap::new(),
            messages: HashMap::new(),
            lists: HashMap::new(),
            graveyard: Graveyard::new(gc_grace),
        }
    }

    // -- users, chats, dialogs, contacts --

    pub fn upsert_user(&mut self, user: User, origin: Origin) -> Upsert {
        upsert_in(&mut self.users, user.id, user, origin)
    }

    pub fn user(&self, id: i32) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn user_mut(&mut self, id: i32) -> Option<&mut User> {
        self.users.get_mut(&id)
    }

    pub fn upsert_chat(&mut self, chat: Chat, origin: Origin) -> Upsert {
        upsert_in(&mut self.chats, chat.id, chat, origin)
    }

    pub fn chat(&self, id: i32) -> Option<&Chat> {
        self.chats.get(&id)
    }

    pub fn chat_mut(&mut self, id: i32) -> Option<&mut Chat> {
        self.chats.get_mut(&id)
    }

    pub fn chats(&self) -> impl Iterator<Item = &Chat> {
        self.chats.values()
    }

    pub fn upsert_dialog(&mut self, dialog: Dialog, origin: Origin) -> Upsert {
        upsert_in(&mut self.dialogs, dialog.id(), dialog, origin)
    }

    pub fn dialog(&self, id: i32) -> Option<&Dialog> {
        self.dialogs.get(&id)
    }

    pub fn dialog_mut(&mut self, id: i32) -> Option<&mut Dialog> {
        self.dialogs.get_mut(&id)
    }

    pub fn dialogs(&self) -> impl Iterator<Item = &Dialog> {
        self.dialogs.values()
    }

    pub fn upsert_contact(&mut self, contact: Contact, origin: Origin) -> Upsert {
        upsert_in(&mut self.contacts, contact.user_id, contact, origin)
    }

    pub fn contact(&self, user_id: i32) -> Option<&Contact> {
        self.contacts.get(&user_id)
    }

    // -- messages --

    /// Insert or update a message, appending new keys to `dialog_id`'s list.
    ///
    /// A store replay never overrides a cached plain message; cached secret
    /// chat messages still take the replayed (decrypted) copy.
    pub fn upsert_message(
        &mut self,
        dialog_id: i32,
        message: Message,
        encrypted: bool,
        origin: Origin,
    ) -> Upsert {
        let key = message.key();
        match self.messages.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(CachedMessage {
                    message,
                    encrypted,
                    dialog_id,
                });
                self.lists.entry(dialog_id).or_default().push(key);
                Upsert::Inserted
            }
            Entry::Occupied(_) if origin == Origin::Store && !encrypted => Upsert::Unchanged,
            Entry::Occupied(mut slot) => {
                let cached = slot.get_mut();
                if cached.message == message && cached.encrypted == encrypted {
                    return Upsert::Unchanged;
                }
                cached.message = message;
                cached.encrypted = encrypted;
                Upsert::Updated
            }
        }
    }

    pub fn message(&self, key: UnifiedMessageKey) -> Option<&CachedMessage> {
        self.messages.get(&key)
    }

    pub fn message_mut(&mut self, key: UnifiedMessageKey) -> Option<&mut CachedMessage> {
        self.messages.get_mut(&key)
    }

    pub fn contains_message(&self, key: UnifiedMessageKey) -> bool {
        self.messages.contains_key(&key)
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Keys of the cached messages of a dialog, oldest arrival first.
    pub fn dialog_messages(&self, dialog_id: i32) -> &[UnifiedMessageKey] {
        self.lists.get(&dialog_id).map(Vec::as_slice).unwrap_or(&[])
    }

    // -- retirement --

    pub fn retire_message(&mut self, key: UnifiedMessageKey, now: Instant) -> bool {
        let Some(cached) = self.messages.remove(&key) else {
            return false;
        };
        if let Some(list) = self.lists.get_mut(&cached.dialog_id) {
            list.retain(|k| *k != key);
            if list.is_empty() {
                self.lists.remove(&cached.dialog_id);
            }
        }
        self.graveyard.bury(Retired::Message(cached), now);
        true
    }

    pub fn retire_user(&mut self, id: i32, now: Instant) -> bool {
        match self.users.remove(&id) {
            Some(user) => {
                self.graveyard.bury(Retired::User(user), now);
                true
            }
            None => false,
        }
    }

    pub fn retire_chat(&mut self, id: i32, now: Instant) -> bool {
        match self.chats.remove(&id) {
            Some(chat) => {
                self.graveyard.bury(Retired::Chat(chat), now);
                true
            }
            None => false,
        }
    }

    pub fn retire_dialog(&mut self, id: i32, now: Instant) -> bool {
        match self.dialogs.remove(&id) {
            Some(dialog) => {
                self.graveyard.bury(Retired::Dialog(dialog), now);
                true
            }
            None => false,
        }
    }

    /// Retire every cached message not in `locked`. Returns the retired keys.
    pub fn evict_messages_except(
        &mut self,
        locked: &HashSet<UnifiedMessageKey>,
        now: Instant,
    ) -> Vec<UnifiedMessageKey> {
        let victims: Vec<_> = self
            .messages
            .keys()
            .filter(|key| !locked.contains(key))
            .copied()
            .collect();
        for key in &victims {
            self.retire_message(*key, now);
        }
        debug!(
            evicted = victims.len(),
            kept = self.messages.len(),
            "message eviction"
        );
        victims
    }

    // -- garbage --

    /// A retired entity that has not been swept yet.
    pub fn peek_retired(&self, key: EntityKey) -> Option<&Retired> {
        self.graveyard.peek(key)
    }

    pub fn garbage_deadline(&self) -> Option<Instant> {
        self.graveyard.deadline()
    }

    pub fn collect_garbage(&mut self, now: Instant) -> usize {
        let dropped = self.graveyard.sweep(now);
        if dropped > 0 {
            debug!(dropped, "garbage collected");
        }
        dropped
    }
}
