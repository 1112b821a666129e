//! Keeps `Event::status` consistent with time and live participant counts.
//!
//! Two entry points share [`derive_status`]: [`StatusReconciler::recompute`]
//! for a single event right after a mutation, and [`StatusReconciler::sweep`]
//! for the periodic set-based pass over all events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::models::{Event, EventId, EventStatus, NewEvent, UserId};
use crate::store::{RegistrationStore, StoreError, StoreTransaction};

/// Conditional bulk updates executed by one sweep.
pub const SWEEP_PASSES: u32 = 3;

/// Status an event should have. `past` wins over capacity; `closed` needs a
/// maximum that the joined count has reached.
pub fn derive_status(now: DateTime<Utc>, event: &Event, joined_count: i64) -> EventStatus {
    if event.has_started(now) {
        EventStatus::Past
    } else if event.is_full(joined_count) {
        EventStatus::Closed
    } else {
        EventStatus::Open
    }
}

/// Status a freshly published event starts with: nobody has joined yet.
pub fn initial_status(now: DateTime<Utc>, event: &NewEvent) -> EventStatus {
    if event.date_time <= now {
        EventStatus::Past
    } else {
        EventStatus::Open
    }
}

/// Recomputes one event inside an open transaction, writing only on change.
/// `None` when the event does not exist.
pub async fn recompute_in<T>(
    tx: &mut T,
    event_id: EventId,
    now: DateTime<Utc>,
) -> Result<Option<EventStatus>, StoreError>
where
    T: StoreTransaction,
{
    let Some(event) = tx.fetch_event(event_id).await? else {
        return Ok(None);
    };

    // Past is absorbing and needs no count.
    let joined = if event.has_started(now) || event.max_participants.is_none() {
        None
    } else {
        Some(tx.count_joined(event_id).await?)
    };

    let desired = derive_status(now, &event, joined.unwrap_or(0));
    if desired != event.status {
        tx.update_event_status(event_id, desired).await?;
        match joined {
            Some(joined) => info!(
                event_id,
                from = ?event.status,
                to = ?desired,
                joined,
                "Event status reconciled"
            ),
            None => info!(
                event_id,
                from = ?event.status,
                to = ?desired,
                "Event status reconciled"
            ),
        }
    }
    Ok(Some(desired))
}

pub struct StatusReconciler<S: RegistrationStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: RegistrationStore> StatusReconciler<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Stores a new event with its derived status in a single write.
    pub async fn publish(
        &self,
        new_event: &NewEvent,
        creator_id: UserId,
    ) -> Result<Event, StoreError> {
        let status = initial_status(self.clock.now(), new_event);
        self.store.create_event(new_event, creator_id, status).await
    }

    /// Re-evaluates a single event under its event lock.
    pub async fn recompute(&self, event_id: EventId) -> Result<Option<EventStatus>, StoreError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        tx.lock_event(event_id).await?;
        let status = recompute_in(&mut tx, event_id, now).await?;
        tx.commit().await?;

        if status.is_none() {
            debug!(event_id, "Recompute skipped, event not found");
        }
        Ok(status)
    }

    /// Set-based pass over all events. Does not take event locks; every
    /// update is guarded by its own predicate. Returns the number of passes.
    pub async fn sweep(&self) -> Result<u32, StoreError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        // Order matters: an elapsed event must be past before the capacity
        // passes look at it.
        let past = tx.mark_elapsed_past(now).await?;
        let closed = tx.close_full_events(now).await?;
        let reopened = tx.reopen_available_events(now).await?;
        tx.commit().await?;

        if past + closed + reopened > 0 {
            info!(past, closed, reopened, "Status sweep updated events");
        } else {
            debug!("Status sweep found nothing to update");
        }
        Ok(SWEEP_PASSES)
    }
}
