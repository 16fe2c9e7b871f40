//! Feed position tracking.
//!
//! [`SyncTracker`] keeps the last acknowledged [`SyncState`] per scope
//! (0 for the global feed, the channel id otherwise) and decides whether a
//! received state is current. Anything that shows the replica fell behind
//! raises the debounced [`ResyncSignal`].

pub mod resync;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use replica_shared::SyncState;
use tracing::{debug, warn};

pub use resync::{spawn_resync_waiter, CatchUp, ResyncSignal};

/// Scope of the global feed.
pub const GLOBAL_SCOPE: i32 = 0;

/// Result of checking an incremental batch against the global sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// The batch was next in line and the state moved forward.
    Applied(SyncState),
    /// The batch does not follow the current state; a resync was requested.
    Gap,
}

#[derive(Clone)]
pub struct SyncTracker {
    states: Arc<Mutex<HashMap<i32, SyncState>>>,
    signal: ResyncSignal,
}

impl SyncTracker {
    pub fn new(signal: ResyncSignal) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            signal,
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<i32, SyncState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state of `scope`, or the zero state if never seen.
    pub fn get_state(&self, scope: i32) -> SyncState {
        self.states().get(&scope).copied().unwrap_or_default()
    }

    pub fn set_state(&self, state: SyncState, scope: i32) {
        self.states().insert(scope, state);
    }

    pub fn knows(&self, scope: i32) -> bool {
        self.states().contains_key(&scope)
    }

    /// Whether `candidate` matches what has been acknowledged.
    ///
    /// On the global feed the sequence numbers must be equal. A channel is
    /// current when `candidate` is exactly one past the known state; an
    /// unseen channel is never current.
    pub fn is_synced(&self, candidate: &SyncState, scope: i32) -> bool {
        let states = self.states();
        if scope == GLOBAL_SCOPE {
            let current = states.get(&GLOBAL_SCOPE).copied().unwrap_or_default();
            return candidate.seq == current.seq;
        }
        match states.get(&scope) {
            Some(current) => current.seq.checked_add(1) == Some(candidate.seq),
            None => false,
        }
    }

    /// Advance the global sequence for a batch spanning `seq_start..=seq`.
    ///
    /// Anything other than the next sequence number is a gap and raises a
    /// resync. Unsequenced batches (`seq == 0`) never touch the state.
    pub fn check_sequence(&self, seq_start: i32, seq: i32, date: i32) -> Option<SequenceCheck> {
        if seq <= 0 {
            return None;
        }
        let first = if seq_start > 0 { seq_start } else { seq };

        let mut states = self.states();
        let current = states.entry(GLOBAL_SCOPE).or_default();
        if current.seq.checked_add(1) == Some(first) {
            current.seq = seq;
            current.date = date;
            let state = *current;
            drop(states);
            return Some(SequenceCheck::Applied(state));
        }

        warn!(current = current.seq, received = first, "sequence gap");
        drop(states);
        self.request_resync();
        Some(SequenceCheck::Gap)
    }

    /// Schedule a debounced catch-up.
    pub fn request_resync(&self) {
        if self.signal.raise() {
            debug!("resync scheduled");
        }
    }

    pub fn resync_pending(&self) -> bool {
        self.signal.is_pending()
    }
}
