use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::{
    Event, EventId, EventStatus, NewEvent, ParticipationRecord, User, UserId,
};
use crate::store::{RegistrationStore, StoreError, StoreTransaction};

const SQL_FIND_USER: &str = r#"
SELECT id, username, full_name, city, gender, role, created_at
FROM users
WHERE id = $1
"#;

const SQL_INSERT_EVENT: &str = r#"
INSERT INTO events (
  creator_id, title, description, location, city,
  date_time, gender_restriction, max_participants, status
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
RETURNING id, creator_id, title, description, location, city,
          date_time, gender_restriction, max_participants, status, created_at
"#;

const SQL_FETCH_EVENT: &str = r#"
SELECT id, creator_id, title, description, location, city,
       date_time, gender_restriction, max_participants, status, created_at
FROM events
WHERE id = $1
"#;

const SQL_COUNT_JOINED: &str = r#"
SELECT COUNT(*)
FROM event_participants
WHERE event_id = $1 AND status = 'joined'
"#;

const SQL_PARTICIPATION_FOR_UPDATE: &str = r#"
SELECT id, event_id, user_id, status, is_visible, joined_at
FROM event_participants
WHERE event_id = $1 AND user_id = $2
FOR UPDATE
"#;

const SQL_INSERT_PARTICIPATION: &str = r#"
INSERT INTO event_participants (event_id, user_id, status, is_visible, joined_at)
VALUES ($1, $2, 'joined', TRUE, $3)
ON CONFLICT (event_id, user_id) DO NOTHING
RETURNING id, event_id, user_id, status, is_visible, joined_at
"#;

const SQL_UPDATE_PARTICIPATION: &str = r#"
UPDATE event_participants
SET status = $3, is_visible = $4, joined_at = $5
WHERE event_id = $1 AND user_id = $2
"#;

const SQL_UPDATE_EVENT_STATUS: &str = r#"
UPDATE events SET status = $2 WHERE id = $1
"#;

const SQL_SWEEP_PAST: &str = r#"
UPDATE events
SET status = 'past'
WHERE status <> 'past'
  AND date_time <= $1
"#;

const SQL_SWEEP_CLOSE_FULL: &str = r#"
UPDATE events e
SET status = 'closed'
WHERE e.status = 'open'
  AND e.date_time > $1
  AND e.max_participants IS NOT NULL
  AND (
    SELECT COUNT(*) FROM event_participants p
    WHERE p.event_id = e.id AND p.status = 'joined'
  ) >= e.max_participants
"#;

const SQL_SWEEP_REOPEN: &str = r#"
UPDATE events e
SET status = 'open'
WHERE e.status = 'closed'
  AND e.date_time > $1
  AND (
    e.max_participants IS NULL
    OR (
      SELECT COUNT(*) FROM event_participants p
      WHERE p.event_id = e.id AND p.status = 'joined'
    ) < e.max_participants
  )
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RegistrationStore for PgStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgTransaction { tx })
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(SQL_FIND_USER)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn create_event(
        &self,
        event: &NewEvent,
        creator_id: UserId,
        status: EventStatus,
    ) -> Result<Event, StoreError> {
        let created = sqlx::query_as::<_, Event>(SQL_INSERT_EVENT)
            .bind(creator_id)
            .bind(&event.title)
            .bind(&event.description)
            .bind(&event.location)
            .bind(&event.city)
            .bind(event.date_time)
            .bind(event.gender_restriction)
            .bind(event.max_participants)
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }
}

/// One Postgres transaction. Rolled back by sqlx when dropped uncommitted,
/// which also releases the advisory and row locks.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn lock_event(&mut self, event_id: EventId) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(event_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn fetch_event(&mut self, event_id: EventId) -> Result<Option<Event>, StoreError> {
        let event = sqlx::query_as::<_, Event>(SQL_FETCH_EVENT)
            .bind(event_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(event)
    }

    async fn count_joined(&mut self, event_id: EventId) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(SQL_COUNT_JOINED)
            .bind(event_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    async fn fetch_participation_for_update(
        &mut self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Option<ParticipationRecord>, StoreError> {
        let record = sqlx::query_as::<_, ParticipationRecord>(SQL_PARTICIPATION_FOR_UPDATE)
            .bind(event_id)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(record)
    }

    async fn insert_participation(
        &mut self,
        event_id: EventId,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> Result<ParticipationRecord, StoreError> {
        // ON CONFLICT keeps the transaction usable after a lost race, where a
        // raw unique violation would abort it.
        sqlx::query_as::<_, ParticipationRecord>(SQL_INSERT_PARTICIPATION)
            .bind(event_id)
            .bind(user_id)
            .bind(joined_at)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(StoreError::UniqueViolation)
    }

    async fn update_participation(
        &mut self,
        record: &ParticipationRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(SQL_UPDATE_PARTICIPATION)
            .bind(record.event_id)
            .bind(record.user_id)
            .bind(record.status)
            .bind(record.is_visible)
            .bind(record.joined_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_event_status(
        &mut self,
        event_id: EventId,
        status: EventStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(SQL_UPDATE_EVENT_STATUS)
            .bind(event_id)
            .bind(status)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn mark_elapsed_past(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let res = sqlx::query(SQL_SWEEP_PAST)
            .bind(now)
            .execute(&mut *self.tx)
            .await?;
        Ok(res.rows_affected())
    }

    async fn close_full_events(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let res = sqlx::query(SQL_SWEEP_CLOSE_FULL)
            .bind(now)
            .execute(&mut *self.tx)
            .await?;
        Ok(res.rows_affected())
    }

    async fn reopen_available_events(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let res = sqlx::query(SQL_SWEEP_REOPEN)
            .bind(now)
            .execute(&mut *self.tx)
            .await?;
        Ok(res.rows_affected())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
