//! crates/litura_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the engine's collaborators.
//! These traits form the boundary of the hexagonal architecture, allowing the rules
//! core to stay independent of the content database, the preference store and the
//! analytics pipeline that the surrounding application provides.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::domain::{
    BadgeRecord, Bite, BiteCompletion, Book, PeerRecord, Question, ReadingProgress,
    TelemetryEvent,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from the underlying stores.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Read-only access to imported books, bites and questions.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn get_book(&self, book_id: &str) -> PortResult<Book>;

    async fn get_bite(&self, bite_id: &str) -> PortResult<Bite>;

    /// The bite at `order_index` within the book, if any.
    async fn get_bite_by_index(&self, book_id: &str, order_index: u32) -> PortResult<Option<Bite>>;

    /// The first bite ordered strictly after `order_index`, if any.
    async fn get_next_bite(&self, book_id: &str, order_index: u32) -> PortResult<Option<Bite>>;

    /// Up to `count` questions for the bite, sampled at random without replacement.
    async fn sample_questions(&self, bite_id: &str, count: usize) -> PortResult<Vec<Question>>;
}

/// Reading progress and the append-only bite completion history.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get_progress(&self, user_id: &str, book_id: &str)
        -> PortResult<Option<ReadingProgress>>;

    async fn upsert_progress(&self, progress: ReadingProgress) -> PortResult<()>;

    async fn append_bite_completion(&self, completion: BiteCompletion) -> PortResult<()>;

    /// Number of distinct bites of the book the user has completed.
    async fn completed_bite_count(&self, user_id: &str, book_id: &str) -> PortResult<u32>;

    /// Mean competency over the user's completed bites of the book
    /// (latest record per bite), `None` when there is no history.
    async fn average_competency(&self, user_id: &str, book_id: &str) -> PortResult<Option<f64>>;
}

/// A single value held by the key-value preference store.
#[derive(Debug, Clone, PartialEq)]
pub enum PrefValue {
    Int(i64),
    Bool(bool),
    Text(String),
}

/// A flat key-value store for user-level counters and flags.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Returns every stored entry. Missing keys are simply absent.
    async fn load(&self) -> PortResult<HashMap<String, PrefValue>>;

    /// Writes all entries as one atomic edit.
    async fn write(&self, entries: Vec<(String, PrefValue)>) -> PortResult<()>;
}

#[async_trait]
pub trait BadgeStore: Send + Sync {
    async fn has_badge(&self, user_id: &str, badge_id: &str) -> PortResult<bool>;

    /// Inserts the record unless `(user_id, badge_id)` already exists.
    /// Returns `true` if a row was inserted.
    async fn insert_if_absent(&self, badge: BadgeRecord) -> PortResult<bool>;

    async fn badges_for_user(&self, user_id: &str) -> PortResult<Vec<BadgeRecord>>;
}

#[async_trait]
pub trait PeerStore: Send + Sync {
    async fn count(&self) -> PortResult<usize>;

    async fn all_peers(&self) -> PortResult<Vec<PeerRecord>>;

    /// Inserts the peers only if the store is empty. Returns `true` if they were inserted.
    async fn insert_all_if_empty(&self, peers: Vec<PeerRecord>) -> PortResult<bool>;

    /// Adds the deltas to the peer's running totals.
    async fn apply_progress(&self, peer_id: &str, xp_delta: u32, bite_delta: u32)
        -> PortResult<()>;
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, event: TelemetryEvent, at: DateTime<Utc>) -> PortResult<()>;
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
