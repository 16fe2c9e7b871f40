//! # replica-core
//!
//! Keeps an in-memory replica of the chat state converging with a remote
//! update feed. The [`Replica`] run loop owns the identity cache, applies
//! feed events and store replay to it, forwards live changes to the store
//! worker and tracks feed positions with a debounced catch-up.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod feed;
pub mod sync;

mod error;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ReplicaConfig;
pub use coordinator::{Control, Coordinator, Replica, ReplicaHandle, ReplicaQuery, ViewId};
pub use error::{ReplicaError, Result};
pub use events::{EntityKey, EntitySnapshot, EventBus, ReplicaEvent};
pub use feed::{FeedEvent, Update, Upstream, UpstreamRequest};
pub use sync::{SyncTracker, GLOBAL_SCOPE};

/// Install the global tracing subscriber.
///
/// Honours `RUST_LOG`. Calling it again once a subscriber is installed is a
/// no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("replica_core=debug,replica_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
