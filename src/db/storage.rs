use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::models::{Record, RecordId, RecordKey};
use crate::deletion::{DeletionEvent, EventStatus};


#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("record not found: {0}")]
    RecordNotFound(RecordKey),

    #[error("duplicate primary key: {0}")]
    DuplicateKey(RecordKey),

    /// Delete refused: a surviving row still points at the deleted one.
    #[error("{referencing} still references {referenced} via {relation}")]
    ForeignKeyViolation {
        relation: String,
        referenced: RecordKey,
        referencing: RecordKey,
    },

    /// Insert refused: the row points at something that does not exist.
    #[error("{record} points at missing {referenced} via {relation}")]
    MissingReference {
        relation: String,
        record: RecordKey,
        referenced: RecordKey,
    },

    #[error("deletion event not found")]
    EventNotFound,

    #[error("deletion event token collision")]
    DuplicateEvent,

    /// Compare-and-set on an event status lost: the stored status was not the
    /// expected one.
    #[error("event status is {actual}, expected {expected}")]
    StatusConflict {
        expected: EventStatus,
        actual: EventStatus,
    },

    #[error("storage backend error: {0}")]
    Backend(String),
}


/// Relational store the engine runs against.
///
/// All reads and writes happen inside a transaction handle obtained from
/// [`UndoStorage::begin`]. `commit` makes every change durable at once;
/// `rollback` (or dropping the handle) discards all of them.
///
/// Implementations must enforce foreign keys on insert and delete, and must make
/// [`UndoStorage::transition_event`] a real compare-and-set: two transactions
/// that both expect `pending` can never both succeed.
#[async_trait]
pub trait UndoStorage: Send + Sync + 'static {
    type Tx: Send;

    // ── Transaction lifecycle ────────────────────────────────────────────────

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError>;

    // ── Rows ─────────────────────────────────────────────────────────────────

    async fn find_record(
        &self,
        tx: &mut Self::Tx,
        key: &RecordKey,
    ) -> Result<Option<Record>, StoreError>;

    /// Rows of `model` whose `column` equals `value`, ordered by primary key.
    async fn find_records_by(
        &self,
        tx: &mut Self::Tx,
        model: &str,
        column: &str,
        value: RecordId,
    ) -> Result<Vec<Record>, StoreError>;

    /// Inserts with the given primary key. Fails with `DuplicateKey` if the row
    /// exists and `MissingReference` if a foreign key dangles.
    async fn insert_record(&self, tx: &mut Self::Tx, record: Record) -> Result<(), StoreError>;

    /// Deletes exactly one row. Fails with `ForeignKeyViolation` if any other
    /// row still references it.
    async fn delete_record(&self, tx: &mut Self::Tx, key: &RecordKey) -> Result<(), StoreError>;

    // ── Deletion events ──────────────────────────────────────────────────────

    async fn insert_event(&self, tx: &mut Self::Tx, event: DeletionEvent)
        -> Result<(), StoreError>;

    async fn find_event(
        &self,
        tx: &mut Self::Tx,
        token: &str,
    ) -> Result<Option<DeletionEvent>, StoreError>;

    /// Moves an event from `expected` to `next`. Stamps `consumed_at` when
    /// `next` is consumed. Returns the updated event.
    async fn transition_event(
        &self,
        tx: &mut Self::Tx,
        token: &str,
        expected: EventStatus,
        next: EventStatus,
        at: DateTime<Utc>,
    ) -> Result<DeletionEvent, StoreError>;

    /// Tokens of pending events whose deadline is strictly before `now`,
    /// earliest deadline first.
    async fn overdue_events(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;
}
