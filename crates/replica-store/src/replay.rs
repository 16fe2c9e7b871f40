//! Bulk reads that replay stored state back to the coordinator.
//!
//! Every record read is reported through a sink as a [`StoreEvent`]. A part
//! that fails to read is logged and skipped; the rest of the replay goes on.

use replica_shared::Peer;
use tracing::{debug, warn};

use crate::database::Database;
use crate::models::{Chat, Contact, Dialog, MediaKey, Message, User};

/// A record read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    UserFound(User),
    ChatFound(Chat),
    ContactFound(Contact),
    /// Emitted after the dialog's newest message has been reported.
    DialogFound(Dialog),
    MessageFound(Message),
    MediaKeyFound(MediaKey),
}

impl Database {
    /// Replay users, chats, contacts and dialogs, each dialog preceded by its
    /// newest stored message. Returns the number of events emitted.
    pub fn read_full_dialogs(&self, sink: &mut dyn FnMut(StoreEvent)) -> usize {
        let mut emitted = 0;
        let mut emit = |event: StoreEvent| {
            emitted += 1;
            sink(event);
        };

        match self.list_users() {
            Ok(users) => users.into_iter().for_each(|u| emit(StoreEvent::UserFound(u))),
            Err(e) => warn!(error = %e, "failed to read users"),
        }
        match self.list_chats() {
            Ok(chats) => chats.into_iter().for_each(|c| emit(StoreEvent::ChatFound(c))),
            Err(e) => warn!(error = %e, "failed to read chats"),
        }
        match self.list_contacts() {
            Ok(contacts) => contacts
                .into_iter()
                .for_each(|c| emit(StoreEvent::ContactFound(c))),
            Err(e) => warn!(error = %e, "failed to read contacts"),
        }

        let dialogs = match self.list_dialogs() {
            Ok(dialogs) => dialogs,
            Err(e) => {
                warn!(error = %e, "failed to read dialogs");
                Vec::new()
            }
        };
        for dialog in dialogs {
            self.emit_messages(dialog.history_peer(), 0, 1, &mut emit);
            emit(StoreEvent::DialogFound(dialog));
        }

        debug!(events = emitted, "full dialog replay finished");
        emitted
    }

    /// Replay one page of a peer's history, newest first, with the media key
    /// of every message that has one. Returns the number of messages read.
    pub fn replay_messages(
        &self,
        peer: Peer,
        offset: i64,
        limit: i64,
        sink: &mut dyn FnMut(StoreEvent),
    ) -> usize {
        self.emit_messages(peer, offset, limit, sink)
    }

    fn emit_messages(
        &self,
        peer: Peer,
        offset: i64,
        limit: i64,
        emit: &mut dyn FnMut(StoreEvent),
    ) -> usize {
        let messages = match self.read_messages(peer, offset, limit) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(%peer, error = %e, "failed to read messages");
                return 0;
            }
        };

        let count = messages.len();
        for message in messages {
            let key = message.media.file_id().and_then(|id| {
                self.read_media_key(id).unwrap_or_else(|e| {
                    warn!(media_id = id, error = %e, "failed to read media key");
                    None
                })
            });
            emit(StoreEvent::MessageFound(message));
            if let Some(key) = key {
                emit(StoreEvent::MediaKeyFound(key));
            }
        }
        count
    }
}
