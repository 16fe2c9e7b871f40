//! Boundary with the remote update feed.
//!
//! The transport decodes wire objects into [`FeedEvent`]s and executes the
//! [`UpstreamRequest`]s the coordinator issues. Nothing here knows the wire
//! format.

use replica_shared::{Peer, SyncState};
use replica_store::{Chat, Dialog, Message, ProfilePhoto, User, UserStatus};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// One incremental update carried by a batch or a difference.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// New message on the global feed or in a channel.
    NewMessage(Message),
    EditMessage(Message),
    /// Server id assigned to a message sent with `random_id`.
    MessageId { random_id: i64, id: i32 },
    /// Messages deleted. `channel_id` is 0 on the global feed.
    DeleteMessages { channel_id: i32, ids: Vec<i32> },
    ReadHistoryInbox { peer: Peer, max_id: i32 },
    ReadHistoryOutbox { peer: Peer, max_id: i32 },
    ChannelMessageViews { channel_id: i32, id: i32, views: i32 },
    UserStatus { user_id: i32, status: UserStatus },
    UserName {
        user_id: i32,
        first_name: String,
        last_name: String,
        username: String,
    },
    UserPhoto {
        user_id: i32,
        photo: Option<ProfilePhoto>,
    },
    UserBlocked { user_id: i32, blocked: bool },
    ChatParticipantAdd { chat_id: i32 },
    ChatParticipantDelete { chat_id: i32 },
    EncryptedMessagesRead { chat_id: i32, max_date: i32 },
}

/// Outcome of a channel difference request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelDifferenceKind {
    Empty,
    Difference,
    /// More data remains; ask again from the returned pts.
    TooLong,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDifference {
    pub channel_id: i32,
    pub kind: ChannelDifferenceKind,
    pub pts: i32,
    pub new_messages: Vec<Message>,
    pub other_updates: Vec<Update>,
    pub users: Vec<User>,
    pub chats: Vec<Chat>,
}

/// Request that a [`FeedEvent::Error`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    GetState,
    GetDifference,
    GetChannelDifference,
    GetDialogs,
    GetMessages,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Connected,
    Disconnected,
    /// Full state snapshot, the answer to [`UpstreamRequest::GetState`].
    State(SyncState),
    /// Incremental batch. `seq` 0 means the batch is not sequenced;
    /// combined batches carry the first sequence number in `seq_start`.
    Updates {
        updates: Vec<Update>,
        users: Vec<User>,
        chats: Vec<Chat>,
        date: i32,
        seq_start: i32,
        seq: i32,
    },
    /// The feed dropped updates; a full catch-up is needed.
    TooLong,
    Difference {
        new_messages: Vec<Message>,
        other_updates: Vec<Update>,
        users: Vec<User>,
        chats: Vec<Chat>,
        state: SyncState,
        /// A slice: more differences remain past `state`.
        intermediate: bool,
    },
    DifferenceEmpty { date: i32, seq: i32 },
    ChannelDifference(ChannelDifference),
    /// Answer to [`UpstreamRequest::GetDialogs`]: the complete dialog list.
    Dialogs {
        dialogs: Vec<Dialog>,
        messages: Vec<Message>,
        users: Vec<User>,
        chats: Vec<Chat>,
    },
    /// Answer to [`UpstreamRequest::GetMessages`].
    Messages {
        messages: Vec<Message>,
        users: Vec<User>,
        chats: Vec<Chat>,
    },
    Error {
        request: RequestKind,
        code: i32,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamRequest {
    GetState,
    GetDifference { pts: i32, date: i32, qts: i32 },
    GetChannelDifference {
        channel_id: i32,
        access_hash: i64,
        pts: i32,
        limit: i32,
    },
    GetDialogs,
    /// Fetch specific messages. `channel_id` 0 targets the global feed.
    GetMessages {
        channel_id: i32,
        access_hash: i64,
        ids: Vec<i32>,
    },
}

impl UpstreamRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::GetState => RequestKind::GetState,
            Self::GetDifference { .. } => RequestKind::GetDifference,
            Self::GetChannelDifference { .. } => RequestKind::GetChannelDifference,
            Self::GetDialogs => RequestKind::GetDialogs,
            Self::GetMessages { .. } => RequestKind::GetMessages,
        }
    }
}

/// Sending half of the request queue drained by the transport.
#[derive(Clone)]
pub struct Upstream {
    tx: mpsc::UnboundedSender<UpstreamRequest>,
}

impl Upstream {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UpstreamRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn request(&self, request: UpstreamRequest) {
        let kind = request.kind();
        if self.tx.send(request).is_err() {
            tracing::warn!(request = ?kind, "upstream is gone, dropping request");
        }
    }
}
