use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Peers
// ---------------------------------------------------------------------------

/// Discriminant persisted next to every peer id (`peerType` / `toPeerType`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PeerKind {
    User = 1,
    Chat = 2,
    Channel = 3,
}

impl PeerKind {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(Self::User),
            2 => Some(Self::Chat),
            3 => Some(Self::Channel),
            _ => None,
        }
    }
}

/// The owner of a conversation: a user, a group chat or a broadcast channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Peer {
    User(i32),
    Chat(i32),
    Channel(i32),
}

impl Peer {
    pub fn from_parts(kind: PeerKind, id: i32) -> Self {
        match kind {
            PeerKind::User => Self::User(id),
            PeerKind::Chat => Self::Chat(id),
            PeerKind::Channel => Self::Channel(id),
        }
    }

    pub fn kind(&self) -> PeerKind {
        match self {
            Self::User(_) => PeerKind::User,
            Self::Chat(_) => PeerKind::Chat,
            Self::Channel(_) => PeerKind::Channel,
        }
    }

    /// Raw id regardless of kind.
    pub fn id(&self) -> i32 {
        match *self {
            Self::User(id) | Self::Chat(id) | Self::Channel(id) => id,
        }
    }

    pub fn user_id(&self) -> i32 {
        match *self {
            Self::User(id) => id,
            _ => 0,
        }
    }

    pub fn chat_id(&self) -> i32 {
        match *self {
            Self::Chat(id) => id,
            _ => 0,
        }
    }

    /// Channel id, or 0 for peers that live on the global feed.
    pub fn channel_id(&self) -> i32 {
        match *self {
            Self::Channel(id) => id,
            _ => 0,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Chat(_) | Self::Channel(_))
    }
}

impl Default for Peer {
    fn default() -> Self {
        Self::User(0)
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Chat(id) => write!(f, "chat:{id}"),
            Self::Channel(id) => write!(f, "channel:{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Unified message key
// ---------------------------------------------------------------------------

/// Message id disambiguated across feeds.
///
/// The channel id occupies the high 32 bits and the per-feed message id the
/// low 32 bits. Messages outside channels use channel id 0. A message id of 0
/// always yields the zero key.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct UnifiedMessageKey(i64);

impl UnifiedMessageKey {
    pub const ZERO: Self = Self(0);

    pub fn new(channel_id: i32, message_id: i32) -> Self {
        if message_id == 0 {
            return Self::ZERO;
        }
        Self(((channel_id as i64) << 32) | (message_id as u32 as i64))
    }

    /// Key for message `message_id` addressed to `peer`.
    pub fn for_peer(peer: &Peer, message_id: i32) -> Self {
        Self::new(peer.channel_id(), message_id)
    }

    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn channel_id(self) -> i32 {
        (self.0 >> 32) as i32
    }

    pub fn message_id(self) -> i32 {
        self.0 as i32
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for UnifiedMessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.channel_id(), self.message_id())
    }
}

// ---------------------------------------------------------------------------
// Sync state
// ---------------------------------------------------------------------------

/// Position in an update feed.
///
/// The global feed uses all four counters; channel feeds rely on `pts`, plus
/// `seq` when a channel state is compared for freshness.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncState {
    pub pts: i32,
    pub qts: i32,
    pub seq: i32,
    pub date: i32,
}

impl SyncState {
    pub fn new(pts: i32, qts: i32, seq: i32, date: i32) -> Self {
        Self { pts, qts, seq, date }
    }

    pub fn with_pts(pts: i32) -> Self {
        Self {
            pts,
            ..Self::default()
        }
    }

    pub fn with_seq(seq: i32) -> Self {
        Self {
            seq,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unified_key_unpacks_to_its_parts() {
        for &(peer, msg) in &[(7, 100), (0, 1), (i32::MAX, i32::MAX), (-5, 42), (12, -3)] {
            let key = UnifiedMessageKey::new(peer, msg);
            assert_eq!(key.channel_id(), peer);
            assert_eq!(key.message_id(), msg);
        }
    }

    #[test]
    fn zero_message_id_gives_zero_key() {
        assert!(UnifiedMessageKey::new(99, 0).is_zero());
        assert_eq!(UnifiedMessageKey::new(0, 0), UnifiedMessageKey::ZERO);
    }

    #[test]
    fn same_message_id_differs_across_feeds() {
        let global = UnifiedMessageKey::for_peer(&Peer::Chat(7), 100);
        let channel = UnifiedMessageKey::for_peer(&Peer::Channel(7), 100);
        assert_ne!(global, channel);
        assert_eq!(global.raw(), 100);
        assert_eq!(channel.raw(), (7i64 << 32) + 100);
    }

    #[test]
    fn peer_kind_round_trips_through_storage_value() {
        for kind in [PeerKind::User, PeerKind::Chat, PeerKind::Channel] {
            assert_eq!(PeerKind::from_i64(kind.as_i64()), Some(kind));
        }
        assert_eq!(PeerKind::from_i64(0), None);
    }

    #[test]
    fn peer_accessors() {
        let p = Peer::Channel(9);
        assert_eq!(p.channel_id(), 9);
        assert_eq!(p.chat_id(), 0);
        assert_eq!(p.user_id(), 0);
        assert!(p.is_group());
        assert!(!Peer::User(1).is_group());
        assert_eq!(Peer::from_parts(PeerKind::Chat, 4), Peer::Chat(4));
    }

    #[test]
    fn sync_state_serializes() {
        let s = SyncState::new(1, 2, 3, 4);
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(serde_json::from_str::<SyncState>(&json).unwrap(), s);
    }
}
