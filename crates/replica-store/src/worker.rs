//! Dedicated store worker thread.
//!
//! A [`Database`] is moved onto its own OS thread and driven by an ordered
//! queue of [`StoreCommand`]s. Writes are fire-and-forget: callers enqueue and
//! return immediately, and every failure is logged on the worker. Queries
//! answer through a `tokio::sync::oneshot` channel, replays through the
//! [`StoreEvent`] channel handed out at spawn time.
//!
//! The worker wakes on whichever comes first: the next command or the commit
//! deadline of the open write batch.

use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use replica_shared::{Peer, UnifiedMessageKey};
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::database::{Database, StoreOptions};
use crate::encryptor::MessageEncryptor;
use crate::error::Result;
use crate::models::{Chat, Contact, Dialog, MediaKey, Message, User};
use crate::replay::StoreEvent;

// ---------------------------------------------------------------------------
// Command types
// ---------------------------------------------------------------------------

/// Commands sent *into* the store worker.
pub enum StoreCommand {
    InsertUser(User),
    InsertChat(Chat),
    InsertDialog(Dialog),
    InsertContact(Contact),
    InsertMessage {
        message: Message,
        secret_chat: bool,
    },
    InsertMediaKey(MediaKey),
    UpdateUnreadCount {
        peer_id: i32,
        unread_count: i32,
    },
    MarkReadUpTo {
        peer: Peer,
        max_id: i32,
    },
    MarkReadFromMaxDate {
        chat_id: i32,
        max_date: i32,
    },
    DeleteMessage(UnifiedMessageKey),
    DeleteDialog(i32),
    DeleteHistory(i32),
    BlockUser(i32),
    UnblockUser(i32),
    SetValue {
        key: String,
        value: String,
    },
    SetEncryptor(Arc<dyn MessageEncryptor>),
    /// Replay users, chats, contacts and dialogs as [`StoreEvent`]s.
    ReadFullDialogs,
    /// Replay a page of history as [`StoreEvent`]s.
    ReadMessages {
        peer: Peer,
        offset: i64,
        limit: i64,
    },
    Query(StoreQuery),
    /// Commit the open batch now and acknowledge.
    Flush(oneshot::Sender<()>),
    /// Commit and stop the worker.
    Shutdown,
}

/// Point reads answered over a oneshot channel.
#[derive(Debug)]
pub enum StoreQuery {
    User(i32, oneshot::Sender<Option<User>>),
    Chat(i32, oneshot::Sender<Option<Chat>>),
    Dialog(i32, oneshot::Sender<Option<Dialog>>),
    Message(UnifiedMessageKey, oneshot::Sender<Option<Message>>),
    Value(String, oneshot::Sender<Option<String>>),
    BlockedUsers(oneshot::Sender<Vec<i32>>),
    MessagesAvailable(Peer, oneshot::Sender<i64>),
    MediaOwners(oneshot::Sender<HashMap<i32, Vec<i64>>>),
    Version(oneshot::Sender<u32>),
}

impl StoreCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::InsertUser(_) => "insert_user",
            Self::InsertChat(_) => "insert_chat",
            Self::InsertDialog(_) => "insert_dialog",
            Self::InsertContact(_) => "insert_contact",
            Self::InsertMessage { .. } => "insert_message",
            Self::InsertMediaKey(_) => "insert_media_key",
            Self::UpdateUnreadCount { .. } => "update_unread_count",
            Self::MarkReadUpTo { .. } => "mark_read_up_to",
            Self::MarkReadFromMaxDate { .. } => "mark_read_from_max_date",
            Self::DeleteMessage(_) => "delete_message",
            Self::DeleteDialog(_) => "delete_dialog",
            Self::DeleteHistory(_) => "delete_history",
            Self::BlockUser(_) => "block_user",
            Self::UnblockUser(_) => "unblock_user",
            Self::SetValue { .. } => "set_value",
            Self::SetEncryptor(_) => "set_encryptor",
            Self::ReadFullDialogs => "read_full_dialogs",
            Self::ReadMessages { .. } => "read_messages",
            Self::Query(_) => "query",
            Self::Flush(_) => "flush",
            Self::Shutdown => "shutdown",
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable handle to the store worker.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl StoreHandle {
    /// Open the database at `path` and start the worker.
    ///
    /// Opening (and migrating) happens on the calling thread so that a store
    /// which cannot be opened is reported here.
    pub fn open(
        path: &Path,
        options: StoreOptions,
    ) -> Result<(Self, tokio_mpsc::UnboundedReceiver<StoreEvent>)> {
        let db = Database::open_at(path, options)?;
        Self::spawn(db)
    }

    /// Start the worker on an already opened database.
    pub fn spawn(db: Database) -> Result<(Self, tokio_mpsc::UnboundedReceiver<StoreEvent>)> {
        let (tx, rx) = mpsc::channel();
        let (event_tx, event_rx) = tokio_mpsc::unbounded_channel();

        let thread = std::thread::Builder::new()
            .name("replica-store".into())
            .spawn(move || run_worker(db, rx, event_tx))?;

        info!("store worker started");
        Ok((
            Self {
                tx,
                thread: Arc::new(Mutex::new(Some(thread))),
            },
            event_rx,
        ))
    }

    /// Enqueue a command. Never blocks.
    pub fn send(&self, cmd: StoreCommand) {
        if let Err(e) = self.tx.send(cmd) {
            warn!(command = e.0.name(), "store worker is gone, dropping command");
        }
    }

    pub fn insert_user(&self, user: User) {
        self.send(StoreCommand::InsertUser(user));
    }

    pub fn insert_chat(&self, chat: Chat) {
        self.send(StoreCommand::InsertChat(chat));
    }

    pub fn insert_dialog(&self, dialog: Dialog) {
        self.send(StoreCommand::InsertDialog(dialog));
    }

    pub fn insert_contact(&self, contact: Contact) {
        self.send(StoreCommand::InsertContact(contact));
    }

    pub fn insert_message(&self, message: Message, secret_chat: bool) {
        self.send(StoreCommand::InsertMessage {
            message,
            secret_chat,
        });
    }

    pub fn insert_media_key(&self, key: MediaKey) {
        self.send(StoreCommand::InsertMediaKey(key));
    }

    pub fn update_unread_count(&self, peer_id: i32, unread_count: i32) {
        self.send(StoreCommand::UpdateUnreadCount {
            peer_id,
            unread_count,
        });
    }

    pub fn mark_read_up_to(&self, peer: Peer, max_id: i32) {
        self.send(StoreCommand::MarkReadUpTo { peer, max_id });
    }

    pub fn mark_read_from_max_date(&self, chat_id: i32, max_date: i32) {
        self.send(StoreCommand::MarkReadFromMaxDate { chat_id, max_date });
    }

    pub fn delete_message(&self, key: UnifiedMessageKey) {
        self.send(StoreCommand::DeleteMessage(key));
    }

    pub fn delete_dialog(&self, peer_id: i32) {
        self.send(StoreCommand::DeleteDialog(peer_id));
    }

    pub fn delete_history(&self, peer_id: i32) {
        self.send(StoreCommand::DeleteHistory(peer_id));
    }

    pub fn block_user(&self, user_id: i32) {
        self.send(StoreCommand::BlockUser(user_id));
    }

    pub fn unblock_user(&self, user_id: i32) {
        self.send(StoreCommand::UnblockUser(user_id));
    }

    pub fn set_value(&self, key: impl Into<String>, value: impl Into<String>) {
        self.send(StoreCommand::SetValue {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn set_encryptor(&self, encryptor: Arc<dyn MessageEncryptor>) {
        self.send(StoreCommand::SetEncryptor(encryptor));
    }

    pub fn read_full_dialogs(&self) {
        self.send(StoreCommand::ReadFullDialogs);
    }

    pub fn read_messages(&self, peer: Peer, offset: i64, limit: i64) {
        self.send(StoreCommand::ReadMessages {
            peer,
            offset,
            limit,
        });
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    async fn ask<T: Default>(&self, make: impl FnOnce(oneshot::Sender<T>) -> StoreQuery) -> T {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Query(make(reply)));
        rx.await.unwrap_or_default()
    }

    pub async fn user(&self, id: i32) -> Option<User> {
        self.ask(|r| StoreQuery::User(id, r)).await
    }

    pub async fn chat(&self, id: i32) -> Option<Chat> {
        self.ask(|r| StoreQuery::Chat(id, r)).await
    }

    pub async fn dialog(&self, peer_id: i32) -> Option<Dialog> {
        self.ask(|r| StoreQuery::Dialog(peer_id, r)).await
    }

    pub async fn message(&self, key: UnifiedMessageKey) -> Option<Message> {
        self.ask(|r| StoreQuery::Message(key, r)).await
    }

    pub async fn value(&self, key: impl Into<String>) -> Option<String> {
        let key = key.into();
        self.ask(|r| StoreQuery::Value(key, r)).await
    }

    pub async fn blocked_users(&self) -> Vec<i32> {
        self.ask(StoreQuery::BlockedUsers).await
    }

    pub async fn messages_available(&self, peer: Peer) -> i64 {
        self.ask(|r| StoreQuery::MessagesAvailable(peer, r)).await
    }

    pub async fn media_owners(&self) -> HashMap<i32, Vec<i64>> {
        self.ask(StoreQuery::MediaOwners).await
    }

    pub async fn version(&self) -> u32 {
        self.ask(StoreQuery::Version).await
    }

    /// Commit any open batch and wait until it is on disk.
    pub async fn flush(&self) {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Flush(reply));
        let _ = rx.await;
    }

    /// Commit pending writes and stop the worker, waiting for it to exit.
    ///
    /// Blocks the calling thread for the duration of the final commit.
    pub fn shutdown(&self) {
        self.send(StoreCommand::Shutdown);
        let thread = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("store worker panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

fn run_worker(
    mut db: Database,
    rx: mpsc::Receiver<StoreCommand>,
    events: tokio_mpsc::UnboundedSender<StoreEvent>,
) {
    loop {
        let cmd = match db.commit_deadline() {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(cmd) => cmd,
                    Err(RecvTimeoutError::Timeout) => {
                        db.commit_if_due(Instant::now());
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => break,
            },
        };

        if matches!(cmd, StoreCommand::Shutdown) {
            break;
        }
        apply(&mut db, cmd, &events);
    }

    db.commit();
    info!("store worker stopped");
}

fn apply(db: &mut Database, cmd: StoreCommand, events: &tokio_mpsc::UnboundedSender<StoreEvent>) {
    let name = cmd.name();
    let mut emit = |event: StoreEvent| {
        if events.send(event).is_err() {
            debug!("store event receiver dropped");
        }
    };

    let result = match cmd {
        StoreCommand::InsertUser(user) => db.insert_user(&user),
        StoreCommand::InsertChat(chat) => db.insert_chat(&chat),
        StoreCommand::InsertDialog(dialog) => db.insert_dialog(&dialog),
        StoreCommand::InsertContact(contact) => db.insert_contact(&contact),
        StoreCommand::InsertMessage {
            message,
            secret_chat,
        } => db.insert_message(&message, secret_chat),
        StoreCommand::InsertMediaKey(key) => db.insert_media_key(&key),
        StoreCommand::UpdateUnreadCount {
            peer_id,
            unread_count,
        } => db.update_unread_count(peer_id, unread_count),
        StoreCommand::MarkReadUpTo { peer, max_id } => db.mark_read_up_to(peer, max_id).map(drop),
        StoreCommand::MarkReadFromMaxDate { chat_id, max_date } => {
            db.mark_read_from_max_date(chat_id, max_date).map(drop)
        }
        StoreCommand::DeleteMessage(key) => db.delete_message(key).map(drop),
        StoreCommand::DeleteDialog(peer_id) => db.delete_dialog(peer_id).map(drop),
        StoreCommand::DeleteHistory(peer_id) => db.delete_history(peer_id).map(drop),
        StoreCommand::BlockUser(user_id) => db.block_user(user_id),
        StoreCommand::UnblockUser(user_id) => db.unblock_user(user_id),
        StoreCommand::SetValue { key, value } => db.set_value(&key, &value),
        StoreCommand::SetEncryptor(encryptor) => {
            db.set_encryptor(encryptor);
            Ok(())
        }
        StoreCommand::ReadFullDialogs => {
            db.read_full_dialogs(&mut emit);
            Ok(())
        }
        StoreCommand::ReadMessages {
            peer,
            offset,
            limit,
        } => {
            db.replay_messages(peer, offset, limit, &mut emit);
            Ok(())
        }
        StoreCommand::Query(query) => {
            answer(db, query);
            Ok(())
        }
        StoreCommand::Flush(reply) => {
            db.commit();
            let _ = reply.send(());
            Ok(())
        }
        StoreCommand::Shutdown => Ok(()),
    };

    if let Err(e) = result {
        warn!(command = name, error = %e, "store command failed");
    }
}

/// Answer a point read. Errors read as "nothing found".
fn answer(db: &Database, query: StoreQuery) {
    fn or_log<T: Default>(what: &'static str, r: Result<T>) -> T {
        r.unwrap_or_else(|e| {
            warn!(query = what, error = %e, "store query failed");
            T::default()
        })
    }

    // A dropped receiver only means the asker stopped waiting.
    match query {
        StoreQuery::User(id, reply) => {
            let _ = reply.send(or_log("user", db.get_user(id)));
        }
        StoreQuery::Chat(id, reply) => {
            let _ = reply.send(or_log("chat", db.get_chat(id)));
        }
        StoreQuery::Dialog(id, reply) => {
            let _ = reply.send(or_log("dialog", db.get_dialog(id)));
        }
        StoreQuery::Message(key, reply) => {
            let _ = reply.send(or_log("message", db.get_message(key)));
        }
        StoreQuery::Value(key, reply) => {
            let _ = reply.send(db.value(&key));
        }
        StoreQuery::BlockedUsers(reply) => {
            let _ = reply.send(or_log("blocked_users", db.blocked_users()));
        }
        StoreQuery::MessagesAvailable(peer, reply) => {
            let _ = reply.send(or_log("messages_available", db.messages_available(peer)));
        }
        StoreQuery::MediaOwners(reply) => {
            let _ = reply.send(or_log("media_owners", db.media_owners()));
        }
        StoreQuery::Version(reply) => {
            let _ = reply.send(db.version());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn open(dir: &tempfile::TempDir) -> (StoreHandle, tokio_mpsc::UnboundedReceiver<StoreEvent>) {
        StoreHandle::open(&dir.path().join("worker.db"), StoreOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn writes_are_ordered_and_queryable() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _events) = open(&dir);

        store.insert_user(User { id: 42, first_name: "a".into(), ..Default::default() });
        store.insert_user(User { id: 42, first_name: "b".into(), ..Default::default() });
        store.block_user(9);
        store.set_value("k", "v");

        assert_eq!(store.user(42).await.unwrap().first_name, "b");
        assert_eq!(store.blocked_users().await, vec![9]);
        assert_eq!(store.value("k").await.as_deref(), Some("v"));
        assert_eq!(store.version().await, crate::migrations::LATEST_VERSION);
        store.shutdown();
    }

    #[tokio::test]
    async fn user_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let user = User { id: 42, username: "ada".into(), ..Default::default() };

        let (store, _events) = open(&dir);
        store.insert_user(user.clone());
        store.shutdown();

        let (store, _events) = open(&dir);
        assert_eq!(store.user(42).await, Some(user));
        store.shutdown();
    }

    #[tokio::test]
    async fn batch_commits_after_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.db");
        let options = StoreOptions { commit_window: Duration::from_millis(50) };
        let (store, _events) = StoreHandle::open(&path, options).unwrap();

        store.insert_contact(Contact { user_id: 1, mutual: true });
        tokio::time::sleep(Duration::from_millis(300)).await;

        // A second connection only sees committed rows.
        let reader = rusqlite::Connection::open(&path).unwrap();
        let count: i64 = reader
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        store.shutdown();
    }

    #[tokio::test]
    async fn replay_goes_to_event_channel() {
        let dir = tempfile::tempdir().unwrap();
        let (store, mut events) = open(&dir);

        store.insert_chat(Chat { id: 3, title: "c".into(), ..Default::default() });
        store.read_full_dialogs();
        store.flush().await;

        match events.recv().await {
            Some(StoreEvent::ChatFound(chat)) => assert_eq!(chat.id, 3),
            other => panic!("unexpected event {other:?}"),
        }
        store.shutdown();
    }

    #[tokio::test]
    async fn commands_after_shutdown_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _events) = open(&dir);
        store.shutdown();

        store.insert_user(User { id: 1, ..Default::default() });
        assert_eq!(store.user(1).await, None);
    }
}
