//! Feed event handling: updates, differences, dialogs and catch-up.

use replica_shared::{Peer, SyncState, UnifiedMessageKey};
use replica_store::{Chat, Message, User};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::Coordinator;
use crate::cache::{Origin, Upsert};
use crate::events::{EntityKey, EntitySnapshot, ReplicaEvent};
use crate::feed::{ChannelDifference, ChannelDifferenceKind, FeedEvent, RequestKind, Update, UpstreamRequest};
use crate::sync::{SequenceCheck, GLOBAL_SCOPE};

impl Coordinator {
    pub fn handle_feed_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Connected => {
                info!("feed connected");
                self.connected = true;
                self.upstream.request(UpstreamRequest::GetState);
                self.poll_channels();
            }
            FeedEvent::Disconnected => {
                info!("feed disconnected");
                self.connected = false;
            }
            FeedEvent::State(state) => self.on_state(state),
            FeedEvent::Updates {
                updates,
                users,
                chats,
                date,
                seq_start,
                seq,
            } => {
                self.apply_entities(users, chats);
                for update in updates {
                    self.apply_update(update);
                }
                if let Some(SequenceCheck::Applied(state)) =
                    self.tracker.check_sequence(seq_start, seq, date)
                {
                    self.state_changed(GLOBAL_SCOPE, state);
                }
            }
            FeedEvent::TooLong => {
                warn!("update feed too long");
                self.tracker.request_resync();
            }
            FeedEvent::Difference {
                new_messages,
                other_updates,
                users,
                chats,
                state,
                intermediate,
            } => {
                debug!(
                    messages = new_messages.len(),
                    updates = other_updates.len(),
                    intermediate,
                    "difference received"
                );
                self.apply_entities(users, chats);
                for update in other_updates {
                    self.apply_update(update);
                }
                for message in new_messages {
                    self.apply_new_message(message);
                }
                self.tracker.set_state(state, GLOBAL_SCOPE);
                self.state_changed(GLOBAL_SCOPE, state);
                if intermediate {
                    self.tracker.request_resync();
                }
            }
            FeedEvent::DifferenceEmpty { date, seq } => {
                let mut state = self.tracker.get_state(GLOBAL_SCOPE);
                state.date = date;
                state.seq = seq;
                self.tracker.set_state(state, GLOBAL_SCOPE);
                self.state_changed(GLOBAL_SCOPE, state);
            }
            FeedEvent::ChannelDifference(diff) => self.on_channel_difference(diff),
            FeedEvent::Dialogs {
                dialogs,
                messages,
                users,
                chats,
            } => {
                self.apply_entities(users, chats);
                for message in messages {
                    self.apply_message(message, false, Origin::Live);
                }
                for dialog in dialogs {
                    self.stale_dialogs.remove(&dialog.id());
                    self.apply_dialog(dialog, Origin::Live);
                }
                self.prune_stale_dialogs();
            }
            FeedEvent::Messages {
                messages,
                users,
                chats,
            } => {
                self.apply_entities(users, chats);
                for message in messages {
                    self.apply_message(message, false, Origin::Live);
                }
            }
            FeedEvent::Error {
                request,
                code,
                message,
            } => {
                warn!(?request, code, %message, "upstream request failed");
                match request {
                    RequestKind::GetDialogs => {
                        self.dialogs_in_flight = false;
                        self.stale_dialogs.clear();
                    }
                    RequestKind::GetMessages => self.abandon_reply_targets(),
                    _ => {}
                }
            }
        }
    }

    fn apply_entities(&mut self, users: Vec<User>, chats: Vec<Chat>) {
        for user in users {
            self.apply_user(user, Origin::Live);
        }
        for chat in chats {
            self.apply_chat(chat, Origin::Live);
        }
    }

    fn state_changed(&self, scope: i32, state: SyncState) {
        self.emit(ReplicaEvent::StateChanged { scope, state });
    }

    fn on_state(&mut self, state: SyncState) {
        if self.tracker.get_state(GLOBAL_SCOPE).date == 0 {
            info!(seq = state.seq, pts = state.pts, "adopting initial state");
            self.tracker.set_state(state, GLOBAL_SCOPE);
            self.state_changed(GLOBAL_SCOPE, state);
            self.request_dialogs();
        } else if !self.tracker.is_synced(&state, GLOBAL_SCOPE) {
            warn!(
                current = self.tracker.get_state(GLOBAL_SCOPE).seq,
                remote = state.seq,
                "replica is behind"
            );
            self.tracker.request_resync();
        }
    }

    /// Ask for everything since the acknowledged global state.
    pub fn catch_up(&mut self) {
        let state = self.tracker.get_state(GLOBAL_SCOPE);
        if state.date == 0 {
            self.upstream.request(UpstreamRequest::GetState);
            return;
        }
        info!(pts = state.pts, date = state.date, qts = state.qts, "fetching difference");
        self.upstream.request(UpstreamRequest::GetDifference {
            pts: state.pts,
            date: state.date,
            qts: state.qts,
        });
    }

    // -----------------------------------------------------------------------
    // Channels
    // -----------------------------------------------------------------------

    /// Ask for the difference of every broadcast channel with a dialog.
    pub fn poll_channels(&mut self) {
        if !self.connected {
            return;
        }
        let channels: Vec<i32> = self
            .cache
            .chats()
            .filter(|chat| chat.is_broadcast_channel())
            .map(|chat| chat.id)
            .filter(|id| self.cache.dialog(*id).is_some())
            .collect();
        for channel_id in channels {
            self.request_channel_difference(channel_id);
        }
    }

    pub(crate) fn request_channel_difference(&mut self, channel_id: i32) {
        if !self.connected {
            return;
        }
        let mut state = self.tracker.get_state(channel_id);
        if state.pts == 0 {
            if let Some(dialog) = self.cache.dialog(channel_id) {
                state.pts = dialog.pts;
                self.tracker.set_state(state, channel_id);
            }
        }
        let access_hash = self
            .cache
            .chat(channel_id)
            .map(|chat| chat.access_hash)
            .unwrap_or_default();

        self.upstream.request(UpstreamRequest::GetChannelDifference {
            channel_id,
            access_hash,
            pts: state.pts,
            limit: self.config.channel_difference_limit,
        });
    }

    fn on_channel_difference(&mut self, diff: ChannelDifference) {
        let ChannelDifference {
            channel_id,
            kind,
            pts,
            new_messages,
            other_updates,
            users,
            chats,
        } = diff;

        if kind != ChannelDifferenceKind::Empty {
            self.apply_entities(users, chats);
            for update in other_updates {
                self.apply_update(update);
            }
            for message in new_messages {
                self.apply_new_message(message);
            }
        }

        let mut state = self.tracker.get_state(channel_id);
        if state.pts != pts {
            state.pts = pts;
            self.tracker.set_state(state, channel_id);
            self.state_changed(channel_id, state);
            self.remember_channel_pts(channel_id, pts);
        }

        if kind == ChannelDifferenceKind::TooLong {
            debug!(channel_id, pts, "channel difference too long, continuing");
            self.request_channel_difference(channel_id);
        }
    }

    /// Persist the channel position with its dialog so a restart resumes
    /// from it.
    fn remember_channel_pts(&mut self, channel_id: i32, pts: i32) {
        if let Some(dialog) = self.cache.dialog(channel_id) {
            let mut dialog = dialog.clone();
            dialog.pts = pts;
            self.apply_dialog(dialog, Origin::Live);
        }
    }

    // -----------------------------------------------------------------------
    // Dialogs
    // -----------------------------------------------------------------------

    /// Fetch the dialog list unless a fetch is already running. Dialogs not
    /// in the answer are deleted locally.
    pub(crate) fn request_dialogs(&mut self) {
        if self.dialogs_in_flight {
            return;
        }
        self.dialogs_in_flight = true;
        self.stale_dialogs = self.cache.dialogs().map(|d| d.id()).collect();
        self.upstream.request(UpstreamRequest::GetDialogs);
    }

    pub(crate) fn schedule_dialog_refresh(&mut self) {
        self.dialog_refresh_at = Some(Instant::now() + self.config.dialog_refresh_delay);
    }

    fn prune_stale_dialogs(&mut self) {
        self.dialogs_in_flight = false;
        let now = Instant::now();
        let stale: Vec<i32> = self.stale_dialogs.drain().collect();
        for id in stale {
            if self.cache.dialog(id).map_or(true, |d| d.encrypted) {
                continue;
            }
            info!(dialog_id = id, "dialog gone upstream, removing");
            self.store.delete_dialog(id);
            self.cache.retire_dialog(id, now);
            self.emit_removed(EntityKey::Dialog(id));
        }
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    fn apply_new_message(&mut self, message: Message) {
        let snapshot = message.clone();
        if self.apply_message(message, false, Origin::Live) == Some(Upsert::Inserted) {
            self.bump_dialog(&snapshot);
        }
    }

    pub(crate) fn apply_update(&mut self, update: Update) {
        match update {
            Update::NewMessage(message) => {
                self.apply_new_message(message);
                self.schedule_dialog_refresh();
            }
            Update::EditMessage(message) => {
                self.apply_message(message, false, Origin::Live);
            }
            Update::MessageId { random_id, id } => self.acknowledge_send(random_id, id),
            Update::DeleteMessages { channel_id, ids } => {
                let now = Instant::now();
                for id in ids {
                    let key = UnifiedMessageKey::new(channel_id, id);
                    self.store.delete_message(key);
                    if self.cache.retire_message(key, now) {
                        self.emit_removed(EntityKey::Message(key));
                    }
                }
                self.schedule_dialog_refresh();
            }
            Update::ReadHistoryInbox { peer, .. } => self.clear_unread(peer.id()),
            Update::ReadHistoryOutbox { peer, max_id } => self.mark_outbox_read(peer, max_id),
            Update::ChannelMessageViews {
                channel_id,
                id,
                views,
            } => {
                let key = UnifiedMessageKey::new(channel_id, id);
                self.edit_message(key, |m| m.views = views);
            }
            Update::UserStatus { user_id, status } => {
                self.edit_user(user_id, |u| u.status = status);
            }
            Update::UserName {
                user_id,
                first_name,
                last_name,
                username,
            } => {
                self.edit_user(user_id, |u| {
                    u.first_name = first_name;
                    u.last_name = last_name;
                    u.username = username;
                });
                self.schedule_dialog_refresh();
            }
            Update::UserPhoto { user_id, photo } => {
                self.edit_user(user_id, |u| u.photo = photo);
            }
            Update::UserBlocked { user_id, blocked } => {
                if blocked {
                    self.store.block_user(user_id);
                } else {
                    self.store.unblock_user(user_id);
                }
            }
            Update::ChatParticipantAdd { chat_id } => self.adjust_participants(chat_id, 1),
            Update::ChatParticipantDelete { chat_id } => self.adjust_participants(chat_id, -1),
            Update::EncryptedMessagesRead { chat_id, max_date } => {
                let keys = self.cache.dialog_messages(chat_id).to_vec();
                for key in keys {
                    self.edit_message_local(key, |m| {
                        if m.date <= max_date {
                            m.unread = false;
                        }
                    });
                }
                self.store.mark_read_from_max_date(chat_id, max_date);
            }
        }
    }

    /// Swap a provisional message for its acknowledged copy.
    fn acknowledge_send(&mut self, random_id: i64, id: i32) {
        let Some(provisional) = self.pending_sends.remove(&random_id) else {
            debug!(random_id, "acknowledgement for unknown send");
            return;
        };
        let Some(cached) = self.cache.message(provisional).cloned() else {
            return;
        };
        let now = Instant::now();
        self.cache.retire_message(provisional, now);
        self.emit_removed(EntityKey::Message(provisional));

        let mut message = cached.message;
        message.id = id;
        let snapshot = message.clone();
        if self.apply_message(message, cached.encrypted, Origin::Live).is_some() {
            self.bump_dialog(&snapshot);
        }
        self.schedule_dialog_refresh();
    }

    fn clear_unread(&mut self, dialog_id: i32) {
        if let Some(dialog) = self.cache.dialog(dialog_id) {
            let mut dialog = dialog.clone();
            dialog.unread_count = 0;
            // The store row is reset below either way.
            if self.cache.upsert_dialog(dialog.clone(), Origin::Live).changed() {
                self.emit_upserted(EntitySnapshot::Dialog(dialog));
            }
        }
        self.store.update_unread_count(dialog_id, 0);
    }

    /// In groups every message up to `max_id` counts as read; in private
    /// conversations only our own.
    fn mark_outbox_read(&mut self, peer: Peer, max_id: i32) {
        let group = peer.is_group();
        let keys = self.cache.dialog_messages(peer.id()).to_vec();
        for key in keys {
            self.edit_message_local(key, |m| {
                if (group || m.out) && m.id <= max_id {
                    m.unread = false;
                }
            });
        }
        self.store.mark_read_up_to(peer, max_id);
    }

    fn adjust_participants(&mut self, chat_id: i32, delta: i32) {
        let Some(chat) = self.cache.chat_mut(chat_id) else {
            return;
        };
        chat.participants_count = chat.participants_count.saturating_add(delta).max(0);
        let chat = chat.clone();
        self.store.insert_chat(chat.clone());
        self.emit_upserted(EntitySnapshot::Chat(chat));
    }

    fn edit_user(&mut self, user_id: i32, edit: impl FnOnce(&mut User)) {
        if let Some(user) = self.cache.user(user_id) {
            let mut user = user.clone();
            edit(&mut user);
            self.apply_user(user, Origin::Live);
        }
    }

    /// Change a cached message and persist the change.
    fn edit_message(&mut self, key: UnifiedMessageKey, edit: impl FnOnce(&mut Message)) {
        if let Some((message, encrypted)) = self.edit_message_local(key, edit) {
            if !self.is_pending_send(key) {
                self.store.insert_message(message, encrypted);
            }
        }
    }

    /// Change a cached message without writing it. Returns the new copy when
    /// something changed.
    fn edit_message_local(
        &mut self,
        key: UnifiedMessageKey,
        edit: impl FnOnce(&mut Message),
    ) -> Option<(Message, bool)> {
        let cached = self.cache.message_mut(key)?;
        let before = cached.message.clone();
        edit(&mut cached.message);
        if cached.message == before {
            return None;
        }
        let message = cached.message.clone();
        let encrypted = cached.encrypted;
        self.emit_upserted(EntitySnapshot::Message(message.clone()));
        Some((message, encrypted))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{message, Harness};
    use super::*;
    use replica_store::{ChatKind, Dialog, UserStatus};
    use std::time::Duration;

    fn updates(updates: Vec<Update>, seq: i32) -> FeedEvent {
        FeedEvent::Updates {
            updates,
            users: Vec::new(),
            chats: Vec::new(),
            date: 100,
            seq_start: 0,
            seq,
        }
    }

    fn channel(id: i32) -> Chat {
        Chat {
            id,
            kind: ChatKind::Channel,
            access_hash: 77,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn connect_asks_for_state() {
        let mut h = Harness::new();
        h.feed(FeedEvent::Connected);
        assert_eq!(h.drain_requests(), vec![UpstreamRequest::GetState]);
    }

    #[tokio::test]
    async fn first_state_is_adopted_and_dialogs_fetched() {
        let mut h = Harness::new();
        let state = SyncState::new(10, 0, 5, 1000);
        h.feed(FeedEvent::State(state));
        assert_eq!(h.coordinator.tracker().get_state(GLOBAL_SCOPE), state);
        assert_eq!(h.drain_requests(), vec![UpstreamRequest::GetDialogs]);

        h.feed(FeedEvent::State(SyncState::new(10, 0, 5, 1100)));
        assert!(!h.coordinator.tracker().resync_pending());
        h.feed(FeedEvent::State(SyncState::new(10, 0, 6, 1200)));
        assert!(h.coordinator.tracker().resync_pending());
    }

    #[tokio::test]
    async fn sequenced_batch_advances_state() {
        let mut h = Harness::new();
        h.coordinator
            .tracker()
            .set_state(SyncState::new(1, 0, 5, 10), GLOBAL_SCOPE);
        h.feed(updates(Vec::new(), 6));
        assert_eq!(h.coordinator.tracker().get_state(GLOBAL_SCOPE).seq, 6);
        assert!(h
            .drain_events()
            .iter()
            .any(|e| matches!(e, ReplicaEvent::StateChanged { scope: 0, .. })));

        h.feed(updates(Vec::new(), 9));
        assert_eq!(h.coordinator.tracker().get_state(GLOBAL_SCOPE).seq, 6);
        assert!(h.coordinator.tracker().resync_pending());
    }

    #[tokio::test]
    async fn catch_up_requests_difference_from_state() {
        let mut h = Harness::new();
        h.coordinator.catch_up();
        assert_eq!(h.drain_requests(), vec![UpstreamRequest::GetState]);

        h.coordinator
            .tracker()
            .set_state(SyncState::new(10, 2, 5, 1000), GLOBAL_SCOPE);
        h.coordinator.catch_up();
        assert_eq!(
            h.drain_requests(),
            vec![UpstreamRequest::GetDifference {
                pts: 10,
                date: 1000,
                qts: 2
            }]
        );
    }

    #[tokio::test]
    async fn intermediate_difference_requests_more() {
        let mut h = Harness::new();
        let state = SyncState::new(20, 0, 8, 2000);
        h.feed(FeedEvent::Difference {
            new_messages: vec![message(Peer::Chat(7), 100, "hi")],
            other_updates: Vec::new(),
            users: vec![User { id: 1, ..Default::default() }],
            chats: Vec::new(),
            state,
            intermediate: true,
        });
        assert_eq!(h.coordinator.tracker().get_state(GLOBAL_SCOPE), state);
        assert!(h.coordinator.tracker().resync_pending());
        assert!(h.coordinator.cache().contains_message(UnifiedMessageKey::new(0, 100)));
        assert_eq!(h.coordinator.cache().dialog(7).unwrap().top_message, 100);
    }

    #[tokio::test]
    async fn empty_difference_fast_forwards() {
        let mut h = Harness::new();
        h.coordinator
            .tracker()
            .set_state(SyncState::new(10, 1, 5, 1000), GLOBAL_SCOPE);
        h.feed(FeedEvent::DifferenceEmpty { date: 1500, seq: 7 });
        assert_eq!(
            h.coordinator.tracker().get_state(GLOBAL_SCOPE),
            SyncState::new(10, 1, 7, 1500)
        );
    }

    #[tokio::test]
    async fn channel_poll_seeds_pts_from_dialog_and_recurses() {
        let mut h = Harness::new();
        h.coordinator.apply_chat(channel(9), Origin::Live);
        h.coordinator.apply_dialog(
            Dialog {
                peer: Peer::Channel(9),
                pts: 40,
                ..Default::default()
            },
            Origin::Live,
        );
        h.feed(FeedEvent::Connected);
        let requests = h.drain_requests();
        assert_eq!(
            requests[1],
            UpstreamRequest::GetChannelDifference {
                channel_id: 9,
                access_hash: 77,
                pts: 40,
                limit: 50
            }
        );
        assert_eq!(h.coordinator.tracker().get_state(9).pts, 40);

        h.feed(FeedEvent::ChannelDifference(ChannelDifference {
            channel_id: 9,
            kind: ChannelDifferenceKind::TooLong,
            pts: 90,
            new_messages: vec![message(Peer::Channel(9), 5, "post")],
            other_updates: Vec::new(),
            users: Vec::new(),
            chats: Vec::new(),
        }));
        assert_eq!(h.coordinator.tracker().get_state(9).pts, 90);
        assert_eq!(h.coordinator.cache().dialog(9).unwrap().pts, 90);
        assert!(h
            .coordinator
            .cache()
            .contains_message(UnifiedMessageKey::new(9, 5)));
        assert!(matches!(
            h.drain_requests().as_slice(),
            [UpstreamRequest::GetChannelDifference { pts: 90, .. }]
        ));
    }

    #[tokio::test]
    async fn megagroups_are_not_polled() {
        let mut h = Harness::new();
        h.coordinator.apply_chat(
            Chat {
                megagroup: true,
                ..channel(9)
            },
            Origin::Live,
        );
        h.coordinator.apply_dialog(
            Dialog {
                peer: Peer::Channel(9),
                ..Default::default()
            },
            Origin::Live,
        );
        h.feed(FeedEvent::Connected);
        assert_eq!(h.drain_requests(), vec![UpstreamRequest::GetState]);
    }

    #[tokio::test]
    async fn dialog_fetch_prunes_missing_plain_dialogs() {
        let mut h = Harness::new();
        for (peer, encrypted) in [(Peer::Chat(1), false), (Peer::Chat(2), false), (Peer::User(3), true)] {
            h.coordinator.apply_dialog(
                Dialog {
                    peer,
                    encrypted,
                    ..Default::default()
                },
                Origin::Live,
            );
        }
        h.coordinator.request_dialogs();
        h.coordinator.request_dialogs();
        assert_eq!(h.drain_requests(), vec![UpstreamRequest::GetDialogs]);

        h.feed(FeedEvent::Dialogs {
            dialogs: vec![Dialog {
                peer: Peer::Chat(1),
                ..Default::default()
            }],
            messages: Vec::new(),
            users: Vec::new(),
            chats: Vec::new(),
        });
        assert!(h.coordinator.cache().dialog(1).is_some());
        assert!(h.coordinator.cache().dialog(2).is_none());
        assert!(h.coordinator.cache().dialog(3).is_some());

        let store = h.coordinator.store().clone();
        store.flush().await;
        assert!(store.dialog(2).await.is_none());
        assert!(store.dialog(1).await.is_some());
    }

    #[tokio::test]
    async fn new_message_bumps_dialog_once() {
        let mut h = Harness::new();
        let msg = Message {
            unread: true,
            ..message(Peer::Chat(7), 100, "hi")
        };
        h.feed(updates(vec![Update::NewMessage(msg.clone())], 0));
        h.feed(updates(vec![Update::NewMessage(msg)], 0));
        let dialog = h.coordinator.cache().dialog(7).unwrap();
        assert_eq!((dialog.top_message, dialog.unread_count), (100, 1));
    }

    #[tokio::test]
    async fn deletes_retire_and_remove_rows() {
        let mut h = Harness::new();
        let msg = message(Peer::Channel(9), 5, "post");
        h.coordinator.apply_message(msg.clone(), false, Origin::Live);
        h.drain_events();

        h.feed(updates(
            vec![Update::DeleteMessages {
                channel_id: 9,
                ids: vec![5],
            }],
            0,
        ));
        assert!(!h.coordinator.cache().contains_message(msg.key()));
        assert_eq!(
            h.drain_events(),
            vec![ReplicaEvent::EntityRemoved(EntityKey::Message(msg.key()))]
        );
        let store = h.coordinator.store().clone();
        store.flush().await;
        assert!(store.message(msg.key()).await.is_none());
    }

    #[tokio::test]
    async fn read_updates_touch_cache_and_store() {
        let mut h = Harness::new();
        h.coordinator.apply_dialog(
            Dialog {
                peer: Peer::User(5),
                top_message: 2,
                unread_count: 4,
                ..Default::default()
            },
            Origin::Live,
        );
        let mine = Message {
            out: true,
            unread: true,
            ..message(Peer::User(5), 2, "yo")
        };
        h.coordinator.apply_message(mine.clone(), false, Origin::Live);

        h.feed(updates(
            vec![
                Update::ReadHistoryInbox {
                    peer: Peer::User(5),
                    max_id: 2,
                },
                Update::ReadHistoryOutbox {
                    peer: Peer::User(5),
                    max_id: 2,
                },
            ],
            0,
        ));
        assert_eq!(h.coordinator.cache().dialog(5).unwrap().unread_count, 0);
        assert!(!h.coordinator.cache().message(mine.key()).unwrap().message.unread);

        let store = h.coordinator.store().clone();
        store.flush().await;
        assert_eq!(store.dialog(5).await.unwrap().unread_count, 0);
        assert!(!store.message(mine.key()).await.unwrap().unread);
    }

    #[tokio::test]
    async fn user_updates_mutate_in_place() {
        let mut h = Harness::new();
        h.coordinator.apply_user(User { id: 4, ..Default::default() }, Origin::Live);
        h.feed(updates(
            vec![
                Update::UserStatus {
                    user_id: 4,
                    status: UserStatus::Online { expires: 60 },
                },
                Update::UserName {
                    user_id: 4,
                    first_name: "Kim".into(),
                    last_name: "Lee".into(),
                    username: "kl".into(),
                },
            ],
            0,
        ));
        let user = h.coordinator.cache().user(4).unwrap();
        assert_eq!(user.status, UserStatus::Online { expires: 60 });
        assert_eq!(user.first_name, "Kim");
    }

    #[tokio::test]
    async fn participant_count_never_negative() {
        let mut h = Harness::new();
        h.coordinator.apply_chat(
            Chat {
                id: 3,
                participants_count: 1,
                ..Default::default()
            },
            Origin::Live,
        );
        h.feed(updates(
            vec![
                Update::ChatParticipantDelete { chat_id: 3 },
                Update::ChatParticipantDelete { chat_id: 3 },
                Update::ChatParticipantAdd { chat_id: 3 },
            ],
            0,
        ));
        assert_eq!(h.coordinator.cache().chat(3).unwrap().participants_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn structural_updates_schedule_dialog_refresh() {
        let mut h = Harness::new();
        h.feed(updates(
            vec![Update::NewMessage(message(Peer::Chat(7), 1, "a"))],
            0,
        ));
        let deadline = h.coordinator.dialog_refresh_at.unwrap();
        assert_eq!(deadline, Instant::now() + Duration::from_secs(3));
    }

    #[tokio::test]
    async fn failed_reply_fetch_is_retried_on_redelivery() {
        let mut h = Harness::new();
        let reply = Message {
            reply_to_msg_id: 10,
            ..message(Peer::Channel(9), 11, "re")
        };
        let fetch = UpstreamRequest::GetMessages {
            channel_id: 9,
            access_hash: 0,
            ids: vec![10],
        };
        h.coordinator.apply_message(reply.clone(), false, Origin::Live);
        assert_eq!(h.drain_requests(), vec![fetch.clone()]);
        assert!(h.coordinator.locked_messages().contains(&reply.key()));

        h.feed(FeedEvent::Error {
            request: RequestKind::GetMessages,
            code: 400,
            message: "MESSAGE_ID_INVALID".into(),
        });
        assert!(!h.coordinator.locked_messages().contains(&reply.key()));

        h.coordinator.apply_message(reply.clone(), false, Origin::Live);
        assert_eq!(h.drain_requests(), vec![fetch]);
    }

    #[tokio::test]
    async fn abandoned_reply_waiter_can_be_evicted() {
        let mut h = Harness::new();
        let reply = Message {
            reply_to_msg_id: 10,
            ..message(Peer::Channel(9), 11, "re")
        };
        h.coordinator.apply_message(reply.clone(), false, Origin::Live);
        h.feed(FeedEvent::Error {
            request: RequestKind::GetMessages,
            code: 400,
            message: "MESSAGE_ID_INVALID".into(),
        });

        assert_eq!(h.coordinator.cleanup_messages(), 1);
        assert!(h.coordinator.cache().message(reply.key()).is_none());
    }

    #[tokio::test]
    async fn counts_saturate_instead_of_overflowing() {
        let mut h = Harness::new();
        h.coordinator.apply_chat(
            Chat {
                id: 3,
                participants_count: i32::MAX,
                ..Default::default()
            },
            Origin::Live,
        );
        h.feed(updates(vec![Update::ChatParticipantAdd { chat_id: 3 }], 0));
        assert_eq!(h.coordinator.cache().chat(3).unwrap().participants_count, i32::MAX);

        h.coordinator.apply_dialog(
            Dialog {
                peer: Peer::User(5),
                top_message: 1,
                unread_count: i32::MAX,
                ..Default::default()
            },
            Origin::Live,
        );
        let incoming = Message {
            unread: true,
            from_id: 5,
            ..message(Peer::User(5), 2, "hi")
        };
        h.coordinator.bump_dialog(&incoming);
        let dialog = h.coordinator.cache().dialog(5).unwrap();
        assert_eq!((dialog.top_message, dialog.unread_count), (2, i32::MAX));
    }
}
