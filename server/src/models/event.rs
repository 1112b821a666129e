use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

use crate::models::user::UserId;

pub type EventId = i64;

/// Longest title an organizer may publish.
pub const MAX_TITLE_LEN: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Open,
    Closed,
    Past,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "gender_restriction", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GenderRestriction {
    Male,
    Female,
    #[default]
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: EventId,
    pub creator_id: Option<UserId>,
    pub title: String,
    pub description: Option<String>,
    pub location: String,
    pub city: String,
    pub date_time: DateTime<Utc>,
    pub gender_restriction: GenderRestriction,
    pub max_participants: Option<i32>,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// An event whose scheduled time is not in the future has started and
    /// can only ever be `past`.
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.date_time <= now
    }

    pub fn is_full(&self, joined_count: i64) -> bool {
        self.max_participants
            .is_some_and(|max| joined_count >= i64::from(max))
    }
}

/// Organizer payload for publishing a new event.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub location: String,
    pub city: String,
    #[serde(deserialize_with = "deserialize_utc")]
    pub date_time: DateTime<Utc>,
    #[serde(default)]
    pub gender_restriction: GenderRestriction,
    pub max_participants: Option<i32>,
}

impl NewEvent {
    /// Checks organizer input and normalizes free-text fields in place.
    pub fn validate(&mut self) -> Result<(), String> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            return Err("title must not be empty".to_string());
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(format!(
                "title must be at most {} characters",
                MAX_TITLE_LEN
            ));
        }

        self.location = self.location.trim().to_string();
        if self.location.is_empty() {
            return Err("location must not be empty".to_string());
        }

        self.city = collapse_whitespace(&self.city);
        if self.city.is_empty() {
            return Err("city must not be empty".to_string());
        }

        if let Some(max) = self.max_participants {
            if max < 1 {
                return Err("max_participants must be at least 1".to_string());
            }
        }

        Ok(())
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses a scheduled timestamp. Values carrying an offset are converted to
/// UTC; naive values are taken to already be UTC.
pub fn parse_utc_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid timestamp '{}'", raw))
}

fn deserialize_utc<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_utc_timestamp(&raw).map_err(serde::de::Error::custom)
}
