//! The replica run loop and the handle used to drive it.

use std::future::pending;
use std::sync::Arc;

use replica_shared::{Peer, SyncState, UnifiedMessageKey};
use replica_store::{
    Chat, Dialog, MediaKey, Message, MessageEncryptor, StoreEvent, StoreHandle, User,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{error, info};

use super::Coordinator;
use crate::config::ReplicaConfig;
use crate::error::{ReplicaError, Result};
use crate::events::{EventBus, ReplicaEvent};
use crate::feed::{FeedEvent, Upstream};
use crate::sync::{spawn_resync_waiter, CatchUp, ResyncSignal, SyncTracker};

/// Caller-chosen id of an attached message view.
pub type ViewId = u64;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Commands sent from [`ReplicaHandle`] to the run loop.
pub enum Control {
    AttachView { view: ViewId, dialog_id: i32 },
    DetachView(ViewId),
    SetSearchResults {
        search: u64,
        keys: Vec<UnifiedMessageKey>,
    },
    ClearSearch(u64),
    TransferStarted(UnifiedMessageKey),
    TransferFinished(UnifiedMessageKey),
    /// Cache an outgoing message until `Update::MessageId` names it.
    SendMessage { random_id: i64, message: Message },
    DeleteLocalHistory { peer_id: i32, delete_dialog: bool },
    RequestCleanup,
    SetAutoCleanup(bool),
    /// Replay a page of stored history into the cache.
    LoadHistory { peer: Peer, offset: i64, limit: i64 },
    SetEncryptor(Arc<dyn MessageEncryptor>),
    /// Remember the key material of an encrypted media file.
    StoreMediaKey(MediaKey),
    Query(ReplicaQuery),
    Shutdown,
}

/// Point reads answered from the cache.
pub enum ReplicaQuery {
    User(i32, oneshot::Sender<Option<User>>),
    Chat(i32, oneshot::Sender<Option<Chat>>),
    Dialog(i32, oneshot::Sender<Option<Dialog>>),
    Message(UnifiedMessageKey, oneshot::Sender<Option<Message>>),
    DialogMessages(i32, oneshot::Sender<Vec<UnifiedMessageKey>>),
    MediaKey(i64, oneshot::Sender<Option<MediaKey>>),
    State(i32, oneshot::Sender<SyncState>),
}

impl Coordinator {
    fn handle_control(&mut self, control: Control) {
        match control {
            Control::AttachView { view, dialog_id } => self.attach_view(view, dialog_id),
            Control::DetachView(view) => self.detach_view(view),
            Control::SetSearchResults { search, keys } => self.set_search_results(search, keys),
            Control::ClearSearch(search) => self.clear_search(search),
            Control::TransferStarted(key) => self.transfer_started(key),
            Control::TransferFinished(key) => self.transfer_finished(key),
            Control::SendMessage { random_id, message } => self.send_message(random_id, message),
            Control::DeleteLocalHistory {
                peer_id,
                delete_dialog,
            } => self.delete_local_history(peer_id, delete_dialog),
            Control::RequestCleanup => self.request_cleanup(false),
            Control::SetAutoCleanup(enabled) => self.set_auto_cleanup(enabled),
            Control::LoadHistory {
                peer,
                offset,
                limit,
            } => self.store.read_messages(peer, offset, limit),
            Control::SetEncryptor(encryptor) => self.store.set_encryptor(encryptor),
            Control::StoreMediaKey(key) => {
                self.store.insert_media_key(key.clone());
                self.media_keys.insert(key.media_id, key);
            }
            Control::Query(query) => self.answer(query),
            Control::Shutdown => {}
        }
    }

    fn answer(&self, query: ReplicaQuery) {
        // A dropped receiver only means the caller stopped waiting.
        match query {
            ReplicaQuery::User(id, reply) => {
                let _ = reply.send(self.cache.user(id).cloned());
            }
            ReplicaQuery::Chat(id, reply) => {
                let _ = reply.send(self.cache.chat(id).cloned());
            }
            ReplicaQuery::Dialog(id, reply) => {
                let _ = reply.send(self.cache.dialog(id).cloned());
            }
            ReplicaQuery::Message(key, reply) => {
                let _ = reply.send(self.cache.message(key).map(|m| m.message.clone()));
            }
            ReplicaQuery::DialogMessages(id, reply) => {
                let _ = reply.send(self.cache.dialog_messages(id).to_vec());
            }
            ReplicaQuery::MediaKey(media_id, reply) => {
                let _ = reply.send(self.media_keys.get(&media_id).cloned());
            }
            ReplicaQuery::State(scope, reply) => {
                let _ = reply.send(self.tracker.get_state(scope));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Replica
// ---------------------------------------------------------------------------

struct Inbox {
    store_events: mpsc::UnboundedReceiver<StoreEvent>,
    catch_up: mpsc::UnboundedReceiver<CatchUp>,
    control: mpsc::UnboundedReceiver<Control>,
}

/// A coordinator together with the queues that feed it.
pub struct Replica {
    coordinator: Coordinator,
    inbox: Inbox,
    resync_waiter: JoinHandle<()>,
}

impl Replica {
    /// Open the store named by `config` and wire up a replica.
    ///
    /// Must be called inside a Tokio runtime. This is the only fallible step:
    /// a store that cannot be opened is reported here.
    pub fn open(config: ReplicaConfig, upstream: Upstream) -> Result<(Self, ReplicaHandle)> {
        let path = config.resolve_db_path()?;
        info!(path = %path.display(), "opening replica store");
        let (store, store_events) = StoreHandle::open(&path, config.store_options())?;
        Ok(Self::with_store(config, store, store_events, upstream))
    }

    /// Wire up a replica around an already running store worker.
    pub fn with_store(
        config: ReplicaConfig,
        store: StoreHandle,
        store_events: mpsc::UnboundedReceiver<StoreEvent>,
        upstream: Upstream,
    ) -> (Self, ReplicaHandle) {
        let signal = ResyncSignal::new();
        let (catch_up_tx, catch_up) = mpsc::unbounded_channel();
        let resync_waiter = spawn_resync_waiter(signal.clone(), config.resync_debounce, catch_up_tx);

        let events = EventBus::new(config.event_capacity);
        let (control_tx, control) = mpsc::unbounded_channel();
        let handle = ReplicaHandle {
            tx: control_tx,
            events: events.clone(),
        };

        let tracker = SyncTracker::new(signal);
        let coordinator = Coordinator::new(config, store, tracker, events, upstream);
        let replica = Self {
            coordinator,
            inbox: Inbox {
                store_events,
                catch_up,
                control,
            },
            resync_waiter,
        };
        (replica, handle)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReplicaEvent> {
        self.coordinator.events.subscribe()
    }

    /// Run until the feed closes or [`ReplicaHandle::shutdown`] is called,
    /// then commit and stop the store worker.
    pub async fn run(self, mut feed: mpsc::UnboundedReceiver<FeedEvent>) {
        let Replica {
            mut coordinator,
            mut inbox,
            resync_waiter,
        } = self;

        coordinator.start();
        let period = coordinator.config.channel_poll_interval;
        let mut poll = interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("replica running");
        loop {
            let deadline = coordinator.next_deadline();
            tokio::select! {
                event = feed.recv() => match event {
                    Some(event) => coordinator.handle_feed_event(event),
                    None => {
                        info!("feed closed");
                        break;
                    }
                },
                Some(event) = inbox.store_events.recv() => coordinator.handle_store_event(event),
                Some(CatchUp) = inbox.catch_up.recv() => coordinator.catch_up(),
                Some(control) = inbox.control.recv() => {
                    if matches!(control, Control::Shutdown) {
                        info!("shutdown requested");
                        break;
                    }
                    coordinator.handle_control(control);
                }
                _ = poll.tick() => coordinator.poll_channels(),
                _ = sleep_until_deadline(deadline) => coordinator.run_housekeeping(Instant::now()),
            }
        }

        resync_waiter.abort();
        let store = coordinator.store.clone();
        if tokio::task::spawn_blocking(move || store.shutdown())
            .await
            .is_err()
        {
            error!("store shutdown task failed");
        }
        info!("replica stopped");
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable handle to a running [`Replica`]. Commands are queued and
/// return immediately.
#[derive(Clone)]
pub struct ReplicaHandle {
    tx: mpsc::UnboundedSender<Control>,
    events: EventBus,
}

impl ReplicaHandle {
    pub fn send(&self, control: Control) -> Result<()> {
        self.tx.send(control).map_err(|_| ReplicaError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReplicaEvent> {
        self.events.subscribe()
    }

    pub fn attach_view(&self, view: ViewId, dialog_id: i32) -> Result<()> {
        self.send(Control::AttachView { view, dialog_id })
    }

    pub fn detach_view(&self, view: ViewId) -> Result<()> {
        self.send(Control::DetachView(view))
    }

    pub fn set_search_results(&self, search: u64, keys: Vec<UnifiedMessageKey>) -> Result<()> {
        self.send(Control::SetSearchResults { search, keys })
    }

    pub fn clear_search(&self, search: u64) -> Result<()> {
        self.send(Control::ClearSearch(search))
    }

    pub fn transfer_started(&self, key: UnifiedMessageKey) -> Result<()> {
        self.send(Control::TransferStarted(key))
    }

    pub fn transfer_finished(&self, key: UnifiedMessageKey) -> Result<()> {
        self.send(Control::TransferFinished(key))
    }

    pub fn send_message(&self, random_id: i64, message: Message) -> Result<()> {
        self.send(Control::SendMessage { random_id, message })
    }

    pub fn delete_local_history(&self, peer_id: i32, delete_dialog: bool) -> Result<()> {
        self.send(Control::DeleteLocalHistory {
            peer_id,
            delete_dialog,
        })
    }

    pub fn request_cleanup(&self) -> Result<()> {
        self.send(Control::RequestCleanup)
    }

    pub fn set_auto_cleanup(&self, enabled: bool) -> Result<()> {
        self.send(Control::SetAutoCleanup(enabled))
    }

    pub fn load_history(&self, peer: Peer, offset: i64, limit: i64) -> Result<()> {
        self.send(Control::LoadHistory {
            peer,
            offset,
            limit,
        })
    }

    pub fn set_encryptor(&self, encryptor: Arc<dyn MessageEncryptor>) -> Result<()> {
        self.send(Control::SetEncryptor(encryptor))
    }

    pub fn store_media_key(&self, key: MediaKey) -> Result<()> {
        self.send(Control::StoreMediaKey(key))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Control::Shutdown)
    }

    async fn ask<T>(&self, query: impl FnOnce(oneshot::Sender<T>) -> ReplicaQuery) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(Control::Query(query(reply)))?;
        rx.await.map_err(|_| ReplicaError::Closed)
    }

    pub async fn user(&self, id: i32) -> Result<Option<User>> {
        self.ask(|reply| ReplicaQuery::User(id, reply)).await
    }

    pub async fn chat(&self, id: i32) -> Result<Option<Chat>> {
        self.ask(|reply| ReplicaQuery::Chat(id, reply)).await
    }

    pub async fn dialog(&self, id: i32) -> Result<Option<Dialog>> {
        self.ask(|reply| ReplicaQuery::Dialog(id, reply)).await
    }

    pub async fn message(&self, key: UnifiedMessageKey) -> Result<Option<Message>> {
        self.ask(|reply| ReplicaQuery::Message(key, reply)).await
    }

    pub async fn dialog_messages(&self, dialog_id: i32) -> Result<Vec<UnifiedMessageKey>> {
        self.ask(|reply| ReplicaQuery::DialogMessages(dialog_id, reply))
            .await
    }

    pub async fn media_key(&self, media_id: i64) -> Result<Option<MediaKey>> {
        self.ask(|reply| ReplicaQuery::MediaKey(media_id, reply)).await
    }

    pub async fn state(&self, scope: i32) -> Result<SyncState> {
        self.ask(|reply| ReplicaQuery::State(scope, reply)).await
    }
}
