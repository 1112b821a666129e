//! In-process [`RegistrationStore`] for tests and single-node deployments.
//!
//! Event and row locks come from [`KeyedLocks`]. Writes are staged on the
//! transaction and applied in one step at commit, so other transactions only
//! ever observe committed state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::models::{
    Event, EventId, EventStatus, NewEvent, ParticipationRecord, ParticipationStatus, User,
    UserId,
};
use crate::store::keyed_lock::{KeyedLockGuard, KeyedLocks};
use crate::store::{RegistrationStore, StoreError, StoreTransaction};

type PairKey = (EventId, UserId);

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    events: BTreeMap<EventId, Event>,
    participations: HashMap<PairKey, ParticipationRecord>,
    last_event_id: EventId,
    last_participation_id: i64,
}

struct Shared {
    tables: Mutex<Tables>,
    event_locks: Arc<KeyedLocks<EventId>>,
    row_locks: Arc<KeyedLocks<PairKey>>,
}

#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                event_locks: Arc::new(KeyedLocks::new()),
                row_locks: Arc::new(KeyedLocks::new()),
            }),
        }
    }

    pub fn insert_user(&self, user: User) {
        self.shared.tables.lock().users.insert(user.id, user);
    }

    /// Committed state of an event.
    pub fn event(&self, event_id: EventId) -> Option<Event> {
        self.shared.tables.lock().events.get(&event_id).cloned()
    }

    /// Committed participation record for the pair.
    pub fn participation(&self, event_id: EventId, user_id: UserId) -> Option<ParticipationRecord> {
        self.shared
            .tables
            .lock()
            .participations
            .get(&(event_id, user_id))
            .cloned()
    }

    /// Number of participation records of any status for the event.
    pub fn participation_rows(&self, event_id: EventId) -> usize {
        self.shared
            .tables
            .lock()
            .participations
            .keys()
            .filter(|(e, _)| *e == event_id)
            .count()
    }

    /// Overwrites a committed record directly, bypassing admission. Stands in
    /// for collaborators such as attendance tracking that mark `no_show`.
    pub fn put_participation(&self, record: ParticipationRecord) {
        let mut tables = self.shared.tables.lock();
        tables.last_participation_id = tables.last_participation_id.max(record.id);
        tables
            .participations
            .insert((record.event_id, record.user_id), record);
    }

    /// Overwrites a committed event directly, bypassing reconciliation.
    pub fn put_event(&self, event: Event) {
        let mut tables = self.shared.tables.lock();
        tables.last_event_id = tables.last_event_id.max(event.id);
        tables.events.insert(event.id, event);
    }

    pub fn held_event_locks(&self) -> usize {
        self.shared.event_locks.active_keys()
    }
}

#[async_trait]
impl RegistrationStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, StoreError> {
        Ok(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            event_guards: HashMap::new(),
            row_guards: HashMap::new(),
            staged_participations: HashMap::new(),
            staged_statuses: HashMap::new(),
        })
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.shared.tables.lock().users.get(&user_id).cloned())
    }

    async fn create_event(
        &self,
        event: &NewEvent,
        creator_id: UserId,
        status: EventStatus,
    ) -> Result<Event, StoreError> {
        let mut tables = self.shared.tables.lock();
        tables.last_event_id += 1;
        let created = Event {
            id: tables.last_event_id,
            creator_id: Some(creator_id),
            title: event.title.clone(),
            description: event.description.clone(),
            location: event.location.clone(),
            city: event.city.clone(),
            date_time: event.date_time,
            gender_restriction: event.gender_restriction,
            max_participants: event.max_participants,
            status,
            created_at: Utc::now(),
        };
        tables.events.insert(created.id, created.clone());
        Ok(created)
    }
}

/// Predicate of one sweep pass, re-checked against live rows at commit the
/// way a `WHERE` clause is re-checked on a row another writer changed.
#[derive(Debug, Clone, Copy)]
enum SweepRule {
    Elapsed,
    Full,
    Available,
}

impl SweepRule {
    fn matches(self, event: &Event, joined: i64, now: DateTime<Utc>) -> bool {
        match self {
            SweepRule::Elapsed => event.status != EventStatus::Past && event.has_started(now),
            SweepRule::Full => {
                event.status == EventStatus::Open && !event.has_started(now) && event.is_full(joined)
            }
            SweepRule::Available => {
                event.status == EventStatus::Closed
                    && !event.has_started(now)
                    && !event.is_full(joined)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum StatusWrite {
    Set(EventStatus),
    Sweep {
        to: EventStatus,
        rule: SweepRule,
        now: DateTime<Utc>,
    },
}

impl StatusWrite {
    fn status(self) -> EventStatus {
        match self {
            StatusWrite::Set(status) | StatusWrite::Sweep { to: status, .. } => status,
        }
    }
}

fn committed_joined(tables: &Tables, event_id: EventId) -> i64 {
    tables
        .participations
        .iter()
        .filter(|(key, rec)| key.0 == event_id && rec.is_joined())
        .count() as i64
}

struct StagedParticipation {
    record: ParticipationRecord,
    inserted: bool,
}

pub struct MemoryTransaction {
    shared: Arc<Shared>,
    event_guards: HashMap<EventId, KeyedLockGuard<EventId>>,
    row_guards: HashMap<PairKey, KeyedLockGuard<PairKey>>,
    staged_participations: HashMap<PairKey, StagedParticipation>,
    staged_statuses: HashMap<EventId, StatusWrite>,
}

impl MemoryTransaction {
    fn event_view(&self, tables: &Tables, event_id: EventId) -> Option<Event> {
        let mut event = tables.events.get(&event_id)?.clone();
        if let Some(write) = self.staged_statuses.get(&event_id) {
            event.status = write.status();
        }
        Some(event)
    }

    fn participation_view(&self, tables: &Tables, key: PairKey) -> Option<ParticipationRecord> {
        match self.staged_participations.get(&key) {
            Some(staged) => Some(staged.record.clone()),
            None => tables.participations.get(&key).cloned(),
        }
    }

    fn joined_in(&self, tables: &Tables, event_id: EventId) -> i64 {
        let committed = tables
            .participations
            .iter()
            .filter(|(key, rec)| {
                key.0 == event_id
                    && !self.staged_participations.contains_key(*key)
                    && rec.is_joined()
            })
            .count();
        let staged = self
            .staged_participations
            .iter()
            .filter(|(key, staged)| key.0 == event_id && staged.record.is_joined())
            .count();
        (committed + staged) as i64
    }

    /// Stages `to` for every visible event matching `rule`; returns how many.
    fn stage_where(&mut self, to: EventStatus, rule: SweepRule, now: DateTime<Utc>) -> u64 {
        let matched: Vec<EventId> = {
            let tables = self.shared.tables.lock();
            tables
                .events
                .keys()
                .filter_map(|id| {
                    let event = self.event_view(&tables, *id)?;
                    let joined = self.joined_in(&tables, *id);
                    rule.matches(&event, joined, now).then_some(*id)
                })
                .collect()
        };
        for id in &matched {
            self.staged_statuses
                .insert(*id, StatusWrite::Sweep { to, rule, now });
        }
        matched.len() as u64
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_event(&mut self, event_id: EventId) -> Result<(), StoreError> {
        if !self.event_guards.contains_key(&event_id) {
            let guard = self.shared.event_locks.acquire(event_id).await;
            self.event_guards.insert(event_id, guard);
        }
        Ok(())
    }

    async fn fetch_event(&mut self, event_id: EventId) -> Result<Option<Event>, StoreError> {
        let tables = self.shared.tables.lock();
        Ok(self.event_view(&tables, event_id))
    }

    async fn count_joined(&mut self, event_id: EventId) -> Result<i64, StoreError> {
        let tables = self.shared.tables.lock();
        Ok(self.joined_in(&tables, event_id))
    }

    async fn fetch_participation_for_update(
        &mut self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Option<ParticipationRecord>, StoreError> {
        let key = (event_id, user_id);
        if !self.row_guards.contains_key(&key) {
            let guard = self.shared.row_locks.acquire(key).await;
            self.row_guards.insert(key, guard);
        }
        let tables = self.shared.tables.lock();
        Ok(self.participation_view(&tables, key))
    }

    async fn insert_participation(
        &mut self,
        event_id: EventId,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> Result<ParticipationRecord, StoreError> {
        let key = (event_id, user_id);
        let record = {
            let mut tables = self.shared.tables.lock();
            if self.participation_view(&tables, key).is_some() {
                return Err(StoreError::UniqueViolation);
            }
            tables.last_participation_id += 1;
            ParticipationRecord {
                id: tables.last_participation_id,
                event_id,
                user_id,
                status: ParticipationStatus::Joined,
                is_visible: true,
                joined_at,
            }
        };
        self.staged_participations.insert(
            key,
            StagedParticipation {
                record: record.clone(),
                inserted: true,
            },
        );
        Ok(record)
    }

    async fn update_participation(
        &mut self,
        record: &ParticipationRecord,
    ) -> Result<(), StoreError> {
        let key = (record.event_id, record.user_id);
        let inserted = self
            .staged_participations
            .get(&key)
            .is_some_and(|staged| staged.inserted);
        self.staged_participations.insert(
            key,
            StagedParticipation {
                record: record.clone(),
                inserted,
            },
        );
        Ok(())
    }

    async fn update_event_status(
        &mut self,
        event_id: EventId,
        status: EventStatus,
    ) -> Result<(), StoreError> {
        self.staged_statuses.insert(event_id, StatusWrite::Set(status));
        Ok(())
    }

    async fn mark_elapsed_past(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self.stage_where(EventStatus::Past, SweepRule::Elapsed, now))
    }

    async fn close_full_events(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self.stage_where(EventStatus::Closed, SweepRule::Full, now))
    }

    async fn reopen_available_events(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self.stage_where(EventStatus::Open, SweepRule::Available, now))
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let mut tables = self.shared.tables.lock();

        let duplicate = self.staged_participations.iter().any(|(key, staged)| {
            staged.inserted && tables.participations.contains_key(key)
        });
        if duplicate {
            return Err(StoreError::UniqueViolation);
        }

        for (key, staged) in self.staged_participations.drain() {
            tables.participations.insert(key, staged.record);
        }
        for (event_id, write) in self.staged_statuses.drain() {
            if let StatusWrite::Sweep { rule, now, .. } = write {
                let joined = committed_joined(&tables, event_id);
                let still_matches = tables
                    .events
                    .get(&event_id)
                    .is_some_and(|event| rule.matches(event, joined, now));
                if !still_matches {
                    continue;
                }
            }
            if let Some(event) = tables.events.get_mut(&event_id) {
                event.status = write.status();
            }
        }
        // Locks are released when `self` drops, after the writes are visible.
        Ok(())
    }
}
