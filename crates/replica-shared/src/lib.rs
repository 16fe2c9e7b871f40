//! Types shared by the replica store and the replica coordinator.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod types;

pub use types::{Peer, PeerKind, SyncState, UnifiedMessageKey};
