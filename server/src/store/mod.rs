//! Durable storage contracts for events, users and participation records.
//!
//! All serialization of admission decisions is delegated to the store: a
//! [`StoreTransaction`] can take a transaction-scoped lock keyed by event id
//! and a blocking lock on a single participation row. Both are released when
//! the transaction commits or is dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    Event, EventId, EventStatus, NewEvent, ParticipationRecord, User, UserId,
};

pub mod keyed_lock;
pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A participation row for the same (event, user) pair already exists.
    #[error("participation record already exists")]
    UniqueViolation,

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let unique = err
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation());
        if unique {
            StoreError::UniqueViolation
        } else {
            StoreError::Database(err)
        }
    }
}

#[async_trait]
pub trait RegistrationStore: Send + Sync + 'static {
    type Tx: StoreTransaction;

    /// Opens a unit of work. Dropping it without [`StoreTransaction::commit`]
    /// rolls everything back.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, StoreError>;

    /// Inserts a new event with an already derived initial status.
    async fn create_event(
        &self,
        event: &NewEvent,
        creator_id: UserId,
        status: EventStatus,
    ) -> Result<Event, StoreError>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    /// Exclusive lock keyed by event id, held until the transaction ends.
    /// Taking it twice in one transaction does not block.
    async fn lock_event(&mut self, event_id: EventId) -> Result<(), StoreError>;

    async fn fetch_event(&mut self, event_id: EventId) -> Result<Option<Event>, StoreError>;

    /// Live number of `joined` participation records.
    async fn count_joined(&mut self, event_id: EventId) -> Result<i64, StoreError>;

    /// Reads the (event, user) record, blocking until its row lock is free.
    async fn fetch_participation_for_update(
        &mut self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Option<ParticipationRecord>, StoreError>;

    /// Inserts a `joined`, visible record. Fails with
    /// [`StoreError::UniqueViolation`] if the pair already has one.
    async fn insert_participation(
        &mut self,
        event_id: EventId,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> Result<ParticipationRecord, StoreError>;

    /// Persists status, visibility and joined-at of an existing record.
    async fn update_participation(
        &mut self,
        record: &ParticipationRecord,
    ) -> Result<(), StoreError>;

    async fn update_event_status(
        &mut self,
        event_id: EventId,
        status: EventStatus,
    ) -> Result<(), StoreError>;

    /// Sweep pass 1: every non-past event scheduled at or before `now`
    /// becomes `past`.
    async fn mark_elapsed_past(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Sweep pass 2: `open` upcoming events at or over capacity become `closed`.
    async fn close_full_events(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Sweep pass 3: `closed` upcoming events with a free slot (or no
    /// maximum at all) become `open`.
    async fn reopen_available_events(&mut self, now: DateTime<Utc>)
        -> Result<u64, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;
}
