use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::event::EventId;
use crate::models::user::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "participant_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ParticipationStatus {
    Joined,
    Left,
    /// Set by attendance tracking outside the admission path.
    NoShow,
}

/// One user's standing with one event. Rows are never deleted; leaving and
/// re-joining transition the status in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ParticipationRecord {
    pub id: i64,
    pub event_id: EventId,
    pub user_id: UserId,
    pub status: ParticipationStatus,
    pub is_visible: bool,
    pub joined_at: DateTime<Utc>,
}

impl ParticipationRecord {
    pub fn is_joined(&self) -> bool {
        self.status == ParticipationStatus::Joined
    }

    /// `left`/`no_show` -> `joined`, restoring visibility. Returns `false`
    /// when the record was already joined.
    pub fn rejoin(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_joined() {
            return false;
        }
        self.status = ParticipationStatus::Joined;
        self.is_visible = true;
        self.joined_at = now;
        true
    }

    /// `joined` -> `left`. Any other state is left untouched.
    pub fn leave(&mut self) -> bool {
        if !self.is_joined() {
            return false;
        }
        self.status = ParticipationStatus::Left;
        true
    }
}
