//! Write batching.
//!
//! The first write after an idle period opens a transaction and arms a
//! commit deadline. Every further write before the deadline pushes it out by
//! one window instead of opening a new transaction. When the deadline passes
//! the worker issues a single `COMMIT`.
//!
//! [`WriteBatch`] only does the bookkeeping; [`Database`](crate::Database)
//! issues the SQL.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct WriteBatch {
    window: Duration,
    deadline: Option<Instant>,
}

impl WriteBatch {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Record a write at `now`. Returns `true` when this write starts a new
    /// batch and the caller must open a transaction.
    pub fn touch(&mut self, now: Instant) -> bool {
        let opened = self.deadline.is_none();
        self.deadline = Some(now + self.window);
        opened
    }

    pub fn is_open(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Close the batch. Returns `true` when one was open.
    pub fn close(&mut self) -> bool {
        self.deadline.take().is_some()
    }
}
