pub mod event;
pub mod participation;
pub mod user;

pub use event::{Event, EventId, EventStatus, GenderRestriction, NewEvent};
pub use participation::{ParticipationRecord, ParticipationStatus};
pub use user::{User, UserGender, UserId, UserIdentity, UserRole};
