//! Deferred reclamation of entities that left the cache.
//!
//! Retired entries stay readable through [`Graveyard::peek`] until the grace
//! deadline passes. Every burial re-arms the deadline, so a steady trickle of
//! retirements keeps the whole yard alive until things go quiet.

use std::time::Duration;

use replica_store::{Chat, Dialog, User};
use tokio::time::Instant;

use super::CachedMessage;
use crate::events::EntityKey;

#[derive(Debug, Clone, PartialEq)]
pub enum Retired {
    User(User),
    Chat(Chat),
    Dialog(Dialog),
    Message(CachedMessage),
}

impl Retired {
    pub fn key(&self) -> EntityKey {
        match self {
            Self::User(u) => EntityKey::User(u.id),
            Self::Chat(c) => EntityKey::Chat(c.id),
            Self::Dialog(d) => EntityKey::Dialog(d.id()),
            Self::Message(m) => EntityKey::Message(m.message.key()),
        }
    }
}

#[derive(Debug)]
pub struct Graveyard {
    grace: Duration,
    entries: Vec<Retired>,
    deadline: Option<Instant>,
}

impl Graveyard {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            entries: Vec::new(),
            deadline: None,
        }
    }

    pub fn bury(&mut self, entry: Retired, now: Instant) {
        self.entries.push(entry);
        self.deadline = Some(now + self.grace);
    }

    /// Most recently retired entry under `key`, if not yet swept.
    pub fn peek(&self, key: EntityKey) -> Option<&Retired> {
        self.entries.iter().rev().find(|e| e.key() == key)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drop everything once the deadline has passed. Returns the number of
    /// entries dropped.
    pub fn sweep(&mut self, now: Instant) -> usize {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                let dropped = self.entries.len();
                self.entries.clear();
                self.deadline = None;
                dropped
            }
            _ => 0,
        }
    }
}
