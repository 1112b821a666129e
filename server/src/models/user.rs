use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_gender", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserGender {
    Male,
    Female,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Organizer,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: UserId,
    pub username: Option<String>,
    pub full_name: String,
    pub city: Option<String>,
    pub gender: UserGender,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            id: self.id,
            gender: self.gender,
            role: self.role,
        }
    }
}

/// The authenticated caller, as resolved by the identity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserIdentity {
    pub id: UserId,
    pub gender: UserGender,
    pub role: UserRole,
}

impl UserIdentity {
    pub fn can_organize(&self) -> bool {
        matches!(self.role, UserRole::Organizer | UserRole::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}
