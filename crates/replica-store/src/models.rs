//! Domain model structs persisted in the local replica database.
//!
//! Every struct derives `Serialize` and `Deserialize` so snapshots can be
//! handed to observers as-is. Equality is field-by-field and is what the
//! identity cache uses to decide whether an incoming record changed anything.

use replica_shared::{Peer, PeerKind, UnifiedMessageKey};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// File locations & photos
// ---------------------------------------------------------------------------

/// Where a remote file part lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileLocation {
    pub local_id: i32,
    pub secret: i64,
    pub dc_id: i32,
    pub volume_id: i64,
}

/// Big + small variant of an avatar (users and chats).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfilePhoto {
    /// Remote photo id. Chats have no id and store `1` as a presence marker.
    pub photo_id: i64,
    pub big: FileLocation,
    pub small: FileLocation,
}

/// One rendition of a photo (or a document thumbnail).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhotoSize {
    /// Size class letter (`s`, `m`, `x`, ...).
    pub kind: String,
    pub w: i32,
    pub h: i32,
    pub size: i32,
    pub location: FileLocation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Photo {
    pub id: i64,
    pub access_hash: i64,
    pub date: i32,
    pub sizes: Vec<PhotoSize>,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserKind {
    #[default]
    Empty,
    Regular,
    Deleted,
}

impl UserKind {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Empty => 0,
            Self::Regular => 1,
            Self::Deleted => 2,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => Self::Regular,
            2 => Self::Deleted,
            _ => Self::Empty,
        }
    }
}

/// Last-seen information as reported by the feed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserStatus {
    #[default]
    Empty,
    Online {
        expires: i32,
    },
    Offline {
        was_online: i32,
    },
    Recently,
    LastWeek,
    LastMonth,
}

impl UserStatus {
    /// `(statusType, statusWasOnline, statusExpires)` column triple.
    pub fn to_columns(self) -> (i64, i32, i32) {
        match self {
            Self::Empty => (0, 0, 0),
            Self::Online { expires } => (1, 0, expires),
            Self::Offline { was_online } => (2, was_online, 0),
            Self::Recently => (3, 0, 0),
            Self::LastWeek => (4, 0, 0),
            Self::LastMonth => (5, 0, 0),
        }
    }

    pub fn from_columns(kind: i64, was_online: i32, expires: i32) -> Self {
        match kind {
            1 => Self::Online { expires },
            2 => Self::Offline { was_online },
            3 => Self::Recently,
            4 => Self::LastWeek,
            5 => Self::LastMonth,
            _ => Self::Empty,
        }
    }

}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i32,
    pub access_hash: i64,
    pub kind: UserKind,
    pub phone: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub photo: Option<ProfilePhoto>,
    pub status: UserStatus,
}

// ---------------------------------------------------------------------------
// Chats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatKind {
    #[default]
    Empty,
    Group,
    Forbidden,
    Channel,
    ChannelForbidden,
}

impl ChatKind {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Empty => 0,
            Self::Group => 1,
            Self::Forbidden => 2,
            Self::Channel => 3,
            Self::ChannelForbidden => 4,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => Self::Group,
            2 => Self::Forbidden,
            3 => Self::Channel,
            4 => Self::ChannelForbidden,
            _ => Self::Empty,
        }
    }
}

/// A group chat or a channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: i32,
    pub kind: ChatKind,
    pub title: String,
    pub participants_count: i32,
    pub version: i32,
    pub date: i32,
    pub left: bool,
    /// Supergroup flag. Megagroups are channels that are not polled as feeds.
    pub megagroup: bool,
    pub access_hash: i64,
    pub photo: Option<ProfilePhoto>,
}

impl Chat {
    /// Broadcast channels carry their own update feed.
    pub fn is_broadcast_channel(&self) -> bool {
        self.kind == ChatKind::Channel && !self.megagroup
    }
}

// ---------------------------------------------------------------------------
// Dialogs & contacts
// ---------------------------------------------------------------------------

/// One conversation, keyed by its peer id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dialog {
    pub peer: Peer,
    /// Per-feed id of the newest message.
    pub top_message: i32,
    pub unread_count: i32,
    /// Channel feed position persisted with the dialog.
    pub pts: i32,
    /// Secret chat. The peer holds the secret chat id in its user slot.
    pub encrypted: bool,
}

impl Dialog {
    pub fn id(&self) -> i32 {
        self.peer.id()
    }

    pub fn top_message_key(&self) -> UnifiedMessageKey {
        UnifiedMessageKey::for_peer(&self.peer, self.top_message)
    }

    /// Peer under which this dialog's history is stored.
    ///
    /// Secret chat messages are addressed to a chat peer carrying the id
    /// that the dialog keeps in its user slot.
    pub fn history_peer(&self) -> Peer {
        if self.encrypted {
            Peer::Chat(self.peer.user_id())
        } else {
            self.peer
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub user_id: i32,
    pub mutual: bool,
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub id: i64,
    pub access_hash: i64,
    pub dc_id: i32,
    pub mime_type: String,
    pub date: i32,
    pub size: i32,
    pub file_name: String,
    pub thumb: Option<PhotoSize>,
    /// Set on read for `webp` documents.
    pub sticker: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub long: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Video {
    pub id: i64,
    pub access_hash: i64,
    pub dc_id: i32,
    pub date: i32,
    pub duration: i32,
    pub mime_type: String,
    pub size: i32,
    pub w: i32,
    pub h: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Audio {
    pub id: i64,
    pub access_hash: i64,
    pub dc_id: i32,
    pub date: i32,
    pub duration: i32,
    pub mime_type: String,
    pub size: i32,
}

/// Media attached to a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum MessageMedia {
    #[default]
    Empty,
    Photo(Photo),
    Document(Document),
    Geo(GeoPoint),
    Contact {
        user_id: i32,
        phone_number: String,
        first_name: String,
        last_name: String,
    },
    Video(Video),
    Audio(Audio),
}

impl MessageMedia {
    pub fn type_code(&self) -> i64 {
        match self {
            Self::Empty => 0,
            Self::Photo(_) => 1,
            Self::Document(_) => 2,
            Self::Geo(_) => 3,
            Self::Contact { .. } => 4,
            Self::Video(_) => 5,
            Self::Audio(_) => 6,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Id of the downloadable file behind this media, if any.
    pub fn file_id(&self) -> Option<i64> {
        match self {
            Self::Photo(p) => Some(p.id),
            Self::Document(d) => Some(d.id),
            Self::Video(v) => Some(v.id),
            Self::Audio(a) => Some(a.id),
            Self::Empty | Self::Geo(_) | Self::Contact { .. } => None,
        }
    }
}

/// Opaque key material for an encrypted media file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaKey {
    pub media_id: i64,
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActionKind {
    #[default]
    Empty,
    ChatCreate,
    ChatEditTitle,
    ChatEditPhoto,
    ChatDeletePhoto,
    ChatAddUser,
    ChatDeleteUser,
    ChannelCreate,
}

impl ActionKind {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Empty => 0,
            Self::ChatCreate => 1,
            Self::ChatEditTitle => 2,
            Self::ChatEditPhoto => 3,
            Self::ChatDeletePhoto => 4,
            Self::ChatAddUser => 5,
            Self::ChatDeleteUser => 6,
            Self::ChannelCreate => 7,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => Self::ChatCreate,
            2 => Self::ChatEditTitle,
            3 => Self::ChatEditPhoto,
            4 => Self::ChatDeletePhoto,
            5 => Self::ChatAddUser,
            6 => Self::ChatDeleteUser,
            7 => Self::ChannelCreate,
            _ => Self::Empty,
        }
    }
}

/// Service action carried by a message (chat created, title changed, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageAction {
    pub kind: ActionKind,
    pub user_id: i32,
    pub title: String,
    pub users: Vec<i32>,
    pub photo: Option<Photo>,
}

impl MessageAction {
    pub fn is_empty(&self) -> bool {
        self.kind == ActionKind::Empty
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForwardHeader {
    /// Original author, or the source channel when the author is hidden.
    pub from_id: i32,
    pub date: i32,
    pub from_kind: Option<PeerKind>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Per-feed id. Only unique together with the channel of `to`.
    pub id: i32,
    pub to: Peer,
    pub from_id: i32,
    pub date: i32,
    pub unread: bool,
    pub out: bool,
    pub fwd_from: Option<ForwardHeader>,
    pub reply_to_msg_id: i32,
    pub text: String,
    pub action: MessageAction,
    pub media: MessageMedia,
    pub views: i32,
}

impl Message {
    pub fn key(&self) -> UnifiedMessageKey {
        UnifiedMessageKey::for_peer(&self.to, self.id)
    }

    pub fn reply_key(&self) -> UnifiedMessageKey {
        UnifiedMessageKey::for_peer(&self.to, self.reply_to_msg_id)
    }

    /// Dialog this message belongs to: the channel, else the chat, else the
    /// other side of a private conversation.
    pub fn dialog_id(&self) -> i32 {
        match self.to {
            Peer::Channel(id) | Peer::Chat(id) => id,
            Peer::User(id) => {
                if self.out {
                    id
                } else {
                    self.from_id
                }
            }
        }
    }

    /// Nothing to show: no body, no service action and no media.
    pub fn has_no_content(&self) -> bool {
        self.text.is_empty() && self.action.is_empty() && self.media.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialog_id_follows_peer_and_direction() {
        let mut msg = Message {
            id: 1,
            to: Peer::User(10),
            from_id: 20,
            ..Default::default()
        };
        assert_eq!(msg.dialog_id(), 20);
        msg.out = true;
        assert_eq!(msg.dialog_id(), 10);
        msg.to = Peer::Chat(30);
        assert_eq!(msg.dialog_id(), 30);
        msg.to = Peer::Channel(40);
        assert_eq!(msg.dialog_id(), 40);
    }

    #[test]
    fn encrypted_dialog_aliases_history_peer() {
        let dialog = Dialog {
            peer: Peer::User(77),
            encrypted: true,
            ..Default::default()
        };
        assert_eq!(dialog.history_peer(), Peer::Chat(77));
        assert_eq!(Dialog::default().history_peer(), Peer::User(0));
    }

    #[test]
    fn status_columns_round_trip() {
        for status in [
            UserStatus::Empty,
            UserStatus::Online { expires: 5 },
            UserStatus::Offline { was_online: 9 },
            UserStatus::Recently,
            UserStatus::LastMonth,
        ] {
            let (k, w, e) = status.to_columns();
            assert_eq!(UserStatus::from_columns(k, w, e), status);
        }
    }

    #[test]
    fn empty_message_has_no_content() {
        assert!(Message::default().has_no_content());
        let geo = Message {
            media: MessageMedia::Geo(GeoPoint { lat: 1.0, long: 2.0 }),
            ..Default::default()
        };
        assert!(!geo.has_no_content());
    }
}
