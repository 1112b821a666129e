//! Serialized join / leave / visibility decisions.
//!
//! Every operation runs in one store transaction that first takes the
//! event's exclusive lock, so the joined count read for the capacity check
//! is exact for the whole decision. Join and leave reconcile the event's
//! status in the same transaction before committing.
//!
//! Check order for join: event exists, already joined (idempotent success),
//! scheduled time not yet reached, capacity, status `open`, then gender
//! policy. A full event reports [`AdmissionError::Full`] even once its status
//! has been flipped to `closed`, and a request that is both over capacity and
//! gender-mismatched also gets `Full`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::models::{
    EventId, EventStatus, GenderRestriction, ParticipationRecord, ParticipationStatus,
    UserGender, UserId, UserIdentity,
};
use crate::services::reconciler::recompute_in;
use crate::store::{RegistrationStore, StoreError, StoreTransaction};

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("event not found")]
    NotFound,

    #[error("event is not joinable")]
    NotJoinable,

    #[error("event is full")]
    Full,

    #[error("fill in your gender in your profile")]
    GenderUnset,

    #[error("{}", gender_mismatch_message(.restriction))]
    GenderMismatch { restriction: GenderRestriction },

    #[error("not joined")]
    NotJoined,

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn gender_mismatch_message(restriction: &GenderRestriction) -> &'static str {
    match restriction {
        GenderRestriction::Female => "this event is for women only",
        _ => "this event is for men only",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinOutcome {
    pub event_id: EventId,
    pub joined: bool,
    pub event_status: EventStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaveOutcome {
    pub event_id: EventId,
    pub left: bool,
    pub event_status: EventStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisibilityOutcome {
    pub event_id: EventId,
    pub user_id: UserId,
    pub is_visible: bool,
    pub status: ParticipationStatus,
}

/// What a join did to the caller's participation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinTransition {
    Created,
    Rejoined,
    Unchanged,
}

/// Rejects users the event's gender policy excludes.
pub fn check_gender(
    restriction: GenderRestriction,
    gender: UserGender,
) -> Result<(), AdmissionError> {
    let allowed = match restriction {
        GenderRestriction::All => return Ok(()),
        GenderRestriction::Male => UserGender::Male,
        GenderRestriction::Female => UserGender::Female,
    };
    if gender == UserGender::Unknown {
        return Err(AdmissionError::GenderUnset);
    }
    if gender != allowed {
        return Err(AdmissionError::GenderMismatch { restriction });
    }
    Ok(())
}

pub struct AdmissionController<S: RegistrationStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: RegistrationStore> AdmissionController<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn join(
        &self,
        event_id: EventId,
        user: &UserIdentity,
    ) -> Result<JoinOutcome, AdmissionError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        tx.lock_event(event_id).await?;

        let event = tx
            .fetch_event(event_id)
            .await?
            .ok_or(AdmissionError::NotFound)?;
        let upcoming = !event.has_started(now);

        let existing = tx.fetch_participation_for_update(event_id, user.id).await?;
        if upcoming && existing.as_ref().is_some_and(ParticipationRecord::is_joined) {
            let event_status = recompute_in(&mut tx, event_id, now)
                .await?
                .ok_or(AdmissionError::NotFound)?;
            tx.commit().await?;
            debug!(event_id, user_id = user.id, "Join is a no-op, already joined");
            return Ok(JoinOutcome {
                event_id,
                joined: true,
                event_status,
            });
        }

        if !upcoming {
            return Err(AdmissionError::NotJoinable);
        }

        let joined = tx.count_joined(event_id).await?;
        if event.is_full(joined) {
            return Err(AdmissionError::Full);
        }
        if event.status != EventStatus::Open {
            return Err(AdmissionError::NotJoinable);
        }

        check_gender(event.gender_restriction, user.gender)?;

        let transition = Self::apply_join(&mut tx, existing, event_id, user.id, now).await?;
        let event_status = recompute_in(&mut tx, event_id, now)
            .await?
            .ok_or(AdmissionError::NotFound)?;
        tx.commit().await?;

        if transition == JoinTransition::Unchanged {
            debug!(event_id, user_id = user.id, "Join found the row already joined");
        } else {
            info!(
                event_id,
                user_id = user.id,
                transition = ?transition,
                joined = joined + 1,
                "User joined event"
            );
        }
        Ok(JoinOutcome {
            event_id,
            joined: true,
            event_status,
        })
    }

    /// Moves the pair to `joined`. A lost insert race is reconciled by
    /// re-reading the winner's row and applying the same transition to it.
    async fn apply_join(
        tx: &mut S::Tx,
        existing: Option<ParticipationRecord>,
        event_id: EventId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<JoinTransition, AdmissionError> {
        let mut record = match existing {
            Some(record) => record,
            None => match tx.insert_participation(event_id, user_id, now).await {
                Ok(_) => return Ok(JoinTransition::Created),
                Err(StoreError::UniqueViolation) => {
                    debug!(event_id, user_id, "Concurrent insert won, re-reading row");
                    tx.fetch_participation_for_update(event_id, user_id)
                        .await?
                        .ok_or(StoreError::UniqueViolation)?
                }
                Err(err) => return Err(err.into()),
            },
        };

        if record.rejoin(now) {
            tx.update_participation(&record).await?;
            Ok(JoinTransition::Rejoined)
        } else {
            Ok(JoinTransition::Unchanged)
        }
    }

    pub async fn leave(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<LeaveOutcome, AdmissionError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        tx.lock_event(event_id).await?;

        if tx.fetch_event(event_id).await?.is_none() {
            return Err(AdmissionError::NotFound);
        }

        let left = match tx.fetch_participation_for_update(event_id, user_id).await? {
            Some(mut record) if record.is_joined() => {
                record.leave();
                tx.update_participation(&record).await?;
                true
            }
            _ => false,
        };
        if left {
            info!(event_id, user_id, "User left event");
        } else {
            debug!(event_id, user_id, "Leave is a no-op, not joined");
        }

        let event_status = recompute_in(&mut tx, event_id, now)
            .await?
            .ok_or(AdmissionError::NotFound)?;
        tx.commit().await?;

        Ok(LeaveOutcome {
            event_id,
            left: true,
            event_status,
        })
    }

    pub async fn set_visibility(
        &self,
        event_id: EventId,
        user_id: UserId,
        visible: bool,
    ) -> Result<VisibilityOutcome, AdmissionError> {
        let mut tx = self.store.begin().await?;
        tx.lock_event(event_id).await?;

        if tx.fetch_event(event_id).await?.is_none() {
            return Err(AdmissionError::NotFound);
        }

        let mut record = tx
            .fetch_participation_for_update(event_id, user_id)
            .await?
            .filter(ParticipationRecord::is_joined)
            .ok_or(AdmissionError::NotJoined)?;

        if record.is_visible != visible {
            record.is_visible = visible;
            tx.update_participation(&record).await?;
            info!(event_id, user_id, visible, "Participant visibility changed");
        }
        tx.commit().await?;

        Ok(VisibilityOutcome {
            event_id,
            user_id,
            is_visible: record.is_visible,
            status: record.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::clock::ManualClock;
    use crate::models::{Event, NewEvent, UserRole};
    use crate::store::MemoryStore;

    struct Harness {
        store: MemoryStore,
        clock: Arc<ManualClock>,
        controller: Arc<AdmissionController<MemoryStore>>,
    }

    impl Harness {
        fn new() -> Self {
            let store = MemoryStore::new();
            let clock = Arc::new(ManualClock::new(Utc::now()));
            let controller = Arc::new(AdmissionController::new(
                Arc::new(store.clone()),
                clock.clone(),
            ));
            Self {
                store,
                clock,
                controller,
            }
        }

        async fn publish(&self, max: Option<i32>, restriction: GenderRestriction) -> EventId {
            let new_event = NewEvent {
                title: "Evening lecture".to_string(),
                description: None,
                location: "Hall 2".to_string(),
                city: "Kazan".to_string(),
                date_time: self.clock.now() + Duration::days(2),
                gender_restriction: restriction,
                max_participants: max,
            };
            self.store
                .create_event(&new_event, 1, EventStatus::Open)
                .await
                .unwrap()
                .id
        }

        fn event(&self, id: EventId) -> Event {
            self.store.event(id).unwrap()
        }
    }

    fn user(id: UserId, gender: UserGender) -> UserIdentity {
        UserIdentity {
            id,
            gender,
            role: UserRole::User,
        }
    }

    #[tokio::test]
    async fn test_join_creates_visible_record() {
        let h = Harness::new();
        let id = h.publish(Some(5), GenderRestriction::All).await;

        let outcome = h.controller.join(id, &user(7, UserGender::Male)).await.unwrap();
        assert!(outcome.joined);
        assert_eq!(outcome.event_status, EventStatus::Open);

        let record = h.store.participation(id, 7).unwrap();
        assert!(record.is_joined());
        assert!(record.is_visible);
        assert_eq!(record.joined_at, h.clock.now());
    }

    #[tokio::test]
    async fn test_join_missing_event() {
        let h = Harness::new();
        let err = h.controller.join(99, &user(7, UserGender::Male)).await.unwrap_err();
        assert!(matches!(err, AdmissionError::NotFound));
        assert_eq!(h.store.held_event_locks(), 0);
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let h = Harness::new();
        let id = h.publish(Some(1), GenderRestriction::All).await;
        let alice = user(7, UserGender::Female);

        assert!(h.controller.join(id, &alice).await.unwrap().joined);
        // The first join filled the event; repeating it still succeeds.
        assert!(h.controller.join(id, &alice).await.unwrap().joined);
        assert_eq!(h.store.participation_rows(id), 1);
        assert_eq!(h.event(id).status, EventStatus::Closed);
    }

    #[tokio::test]
    async fn test_repeated_join_reconciles_stale_status() {
        let h = Harness::new();
        let id = h.publish(Some(1), GenderRestriction::All).await;
        let alice = user(7, UserGender::Female);
        h.controller.join(id, &alice).await.unwrap();

        let mut event = h.event(id);
        event.status = EventStatus::Open;
        h.store.put_event(event);

        let outcome = h.controller.join(id, &alice).await.unwrap();
        assert!(outcome.joined);
        assert_eq!(outcome.event_status, EventStatus::Closed);
        assert_eq!(h.event(id).status, EventStatus::Closed);
        assert_eq!(h.store.held_event_locks(), 0);
    }

    #[tokio::test]
    async fn test_join_fills_event_and_closes_it() {
        let h = Harness::new();
        let id = h.publish(Some(2), GenderRestriction::All).await;

        h.controller.join(id, &user(1, UserGender::Male)).await.unwrap();
        let outcome = h.controller.join(id, &user(2, UserGender::Male)).await.unwrap();
        assert_eq!(outcome.event_status, EventStatus::Closed);
        assert_eq!(h.event(id).status, EventStatus::Closed);

        let err = h.controller.join(id, &user(3, UserGender::Male)).await.unwrap_err();
        assert!(matches!(err, AdmissionError::Full));
    }

    #[tokio::test]
    async fn test_join_closed_event_with_room_is_not_joinable() {
        let h = Harness::new();
        let id = h.publish(Some(5), GenderRestriction::All).await;
        let mut event = h.event(id);
        event.status = EventStatus::Closed;
        h.store.put_event(event);

        let err = h.controller.join(id, &user(3, UserGender::Male)).await.unwrap_err();
        assert!(matches!(err, AdmissionError::NotJoinable));
    }

    #[tokio::test]
    async fn test_join_full_when_status_is_stale() {
        let h = Harness::new();
        let id = h.publish(Some(1), GenderRestriction::All).await;
        h.store.put_participation(ParticipationRecord {
            id: 1,
            event_id: id,
            user_id: 50,
            status: ParticipationStatus::Joined,
            is_visible: true,
            joined_at: h.clock.now(),
        });
        assert_eq!(h.event(id).status, EventStatus::Open);

        let err = h.controller.join(id, &user(2, UserGender::Male)).await.unwrap_err();
        assert!(matches!(err, AdmissionError::Full));
    }

    #[tokio::test]
    async fn test_join_elapsed_event_is_not_joinable() {
        let h = Harness::new();
        let id = h.publish(None, GenderRestriction::All).await;
        h.clock.advance(Duration::days(3));

        let err = h.controller.join(id, &user(2, UserGender::Male)).await.unwrap_err();
        assert!(matches!(err, AdmissionError::NotJoinable));
    }

    #[tokio::test]
    async fn test_gender_gate() {
        let h = Harness::new();
        let id = h.publish(Some(10), GenderRestriction::Female).await;

        let err = h.controller.join(id, &user(1, UserGender::Unknown)).await.unwrap_err();
        assert!(matches!(err, AdmissionError::GenderUnset));

        let err = h.controller.join(id, &user(2, UserGender::Male)).await.unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::GenderMismatch {
                restriction: GenderRestriction::Female
            }
        ));
        assert_eq!(err.to_string(), "this event is for women only");

        assert!(h.controller.join(id, &user(3, UserGender::Female)).await.unwrap().joined);
    }

    #[test]
    fn test_gender_messages_are_distinct() {
        let female_only = check_gender(GenderRestriction::Female, UserGender::Male).unwrap_err();
        let male_only = check_gender(GenderRestriction::Male, UserGender::Female).unwrap_err();
        assert_ne!(female_only.to_string(), male_only.to_string());
        assert!(check_gender(GenderRestriction::All, UserGender::Unknown).is_ok());
    }

    #[tokio::test]
    async fn test_capacity_checked_before_gender() {
        let h = Harness::new();
        let id = h.publish(Some(1), GenderRestriction::Female).await;
        h.store.put_participation(ParticipationRecord {
            id: 1,
            event_id: id,
            user_id: 50,
            status: ParticipationStatus::Joined,
            is_visible: true,
            joined_at: h.clock.now(),
        });

        let err = h.controller.join(id, &user(2, UserGender::Male)).await.unwrap_err();
        assert!(matches!(err, AdmissionError::Full));
    }

    #[tokio::test]
    async fn test_leave_then_rejoin_resets_visibility() {
        let h = Harness::new();
        let id = h.publish(None, GenderRestriction::All).await;
        let bob = user(4, UserGender::Male);

        h.controller.join(id, &bob).await.unwrap();
        h.controller.set_visibility(id, bob.id, false).await.unwrap();
        assert!(!h.store.participation(id, bob.id).unwrap().is_visible);

        assert!(h.controller.leave(id, bob.id).await.unwrap().left);
        assert_eq!(
            h.store.participation(id, bob.id).unwrap().status,
            ParticipationStatus::Left
        );

        h.clock.advance(Duration::minutes(5));
        h.controller.join(id, &bob).await.unwrap();
        let record = h.store.participation(id, bob.id).unwrap();
        assert!(record.is_joined());
        assert!(record.is_visible);
        assert_eq!(record.joined_at, h.clock.now());
        assert_eq!(h.store.participation_rows(id), 1);
    }

    #[tokio::test]
    async fn test_rejoin_preserves_no_show_history_path() {
        let h = Harness::new();
        let id = h.publish(None, GenderRestriction::All).await;
        h.store.put_participation(ParticipationRecord {
            id: 1,
            event_id: id,
            user_id: 4,
            status: ParticipationStatus::NoShow,
            is_visible: false,
            joined_at: h.clock.now() - Duration::days(1),
        });

        // Leaving does not touch a no_show record.
        h.controller.leave(id, 4).await.unwrap();
        assert_eq!(
            h.store.participation(id, 4).unwrap().status,
            ParticipationStatus::NoShow
        );

        h.controller.join(id, &user(4, UserGender::Male)).await.unwrap();
        let record = h.store.participation(id, 4).unwrap();
        assert!(record.is_joined());
        assert!(record.is_visible);
    }

    #[tokio::test]
    async fn test_leave_without_record_succeeds() {
        let h = Harness::new();
        let id = h.publish(None, GenderRestriction::All).await;

        assert!(h.controller.leave(id, 8).await.unwrap().left);
        assert!(h.store.participation(id, 8).is_none());

        let err = h.controller.leave(404, 8).await.unwrap_err();
        assert!(matches!(err, AdmissionError::NotFound));
    }

    #[tokio::test]
    async fn test_leave_reopens_full_event() {
        let h = Harness::new();
        let id = h.publish(Some(1), GenderRestriction::All).await;
        h.controller.join(id, &user(1, UserGender::Male)).await.unwrap();
        assert_eq!(h.event(id).status, EventStatus::Closed);

        let outcome = h.controller.leave(id, 1).await.unwrap();
        assert_eq!(outcome.event_status, EventStatus::Open);
        assert_eq!(h.event(id).status, EventStatus::Open);
    }

    #[tokio::test]
    async fn test_set_visibility_requires_membership() {
        let h = Harness::new();
        let id = h.publish(None, GenderRestriction::All).await;

        let err = h.controller.set_visibility(id, 3, false).await.unwrap_err();
        assert!(matches!(err, AdmissionError::NotJoined));

        h.controller.join(id, &user(3, UserGender::Male)).await.unwrap();
        h.controller.leave(id, 3).await.unwrap();
        let err = h.controller.set_visibility(id, 3, false).await.unwrap_err();
        assert!(matches!(err, AdmissionError::NotJoined));

        let err = h.controller.set_visibility(404, 3, false).await.unwrap_err();
        assert!(matches!(err, AdmissionError::NotFound));
    }

    #[tokio::test]
    async fn test_set_visibility_unchanged_is_noop() {
        let h = Harness::new();
        let id = h.publish(None, GenderRestriction::All).await;
        h.controller.join(id, &user(3, UserGender::Male)).await.unwrap();

        let outcome = h.controller.set_visibility(id, 3, true).await.unwrap();
        assert!(outcome.is_visible);
        assert_eq!(outcome.status, ParticipationStatus::Joined);

        let outcome = h.controller.set_visibility(id, 3, false).await.unwrap();
        assert!(!outcome.is_visible);
        assert_eq!(outcome.user_id, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_never_overbook() {
        let h = Harness::new();
        let id = h.publish(Some(3), GenderRestriction::All).await;
        h.controller.join(id, &user(100, UserGender::Male)).await.unwrap();
        h.controller.join(id, &user(101, UserGender::Male)).await.unwrap();

        let attempts: Vec<_> = (0..16)
            .map(|n| {
                let controller = Arc::clone(&h.controller);
                tokio::spawn(async move {
                    controller.join(id, &user(200 + n, UserGender::Male)).await
                })
            })
            .collect();

        let mut admitted = 0;
        let mut rejected = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(outcome) => {
                    assert!(outcome.joined);
                    admitted += 1;
                }
                Err(AdmissionError::Full) => rejected += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(admitted, 1);
        assert_eq!(rejected, 15);
        assert_eq!(h.event(id).status, EventStatus::Closed);
        assert_eq!(h.store.held_event_locks(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_leaves_transition_once() {
        let h = Harness::new();
        let id = h.publish(Some(5), GenderRestriction::All).await;
        h.controller.join(id, &user(9, UserGender::Male)).await.unwrap();

        let first = {
            let controller = Arc::clone(&h.controller);
            tokio::spawn(async move { controller.leave(id, 9).await })
        };
        let second = {
            let controller = Arc::clone(&h.controller);
            tokio::spawn(async move { controller.leave(id, 9).await })
        };

        assert!(first.await.unwrap().unwrap().left);
        assert!(second.await.unwrap().unwrap().left);

        let record = h.store.participation(id, 9).unwrap();
        assert_eq!(record.status, ParticipationStatus::Left);
        assert_eq!(h.store.participation_rows(id), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_joins_create_one_record() {
        let h = Harness::new();
        let id = h.publish(Some(10), GenderRestriction::All).await;

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let controller = Arc::clone(&h.controller);
                tokio::spawn(async move { controller.join(id, &user(5, UserGender::Male)).await })
            })
            .collect();
        for attempt in attempts {
            assert!(attempt.await.unwrap().unwrap().joined);
        }

        assert_eq!(h.store.participation_rows(id), 1);
    }
}
