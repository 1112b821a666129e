use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use crate::handlers::identity::CurrentUser;
use crate::models::{EventId, NewEvent};
use crate::state::AppState;
use crate::store::RegistrationStore;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Debug, Deserialize)]
pub struct VisibilityUpdate {
    pub is_visible: bool,
}

pub async fn create_event<S: RegistrationStore>(
    State(state): State<AppState<S>>,
    CurrentUser(user): CurrentUser,
    Json(mut payload): Json<NewEvent>,
) -> Result<Response, AppError> {
    if !user.can_organize() {
        return Err(AppError::Forbidden(
            "only organizers can publish events".to_string(),
        ));
    }
    payload.validate().map_err(AppError::ValidationError)?;

    let event = state.reconciler.publish(&payload, user.id).await?;

    tracing::info!(event_id = event.id, creator_id = user.id, "Event published");
    Ok(created(event, "Event created"))
}

pub async fn join_event<S: RegistrationStore>(
    State(state): State<AppState<S>>,
    CurrentUser(user): CurrentUser,
    Path(event_id): Path<EventId>,
) -> Result<Response, AppError> {
    let outcome = state.admission.join(event_id, &user).await?;
    Ok(success(outcome, "Joined event"))
}

pub async fn leave_event<S: RegistrationStore>(
    State(state): State<AppState<S>>,
    CurrentUser(user): CurrentUser,
    Path(event_id): Path<EventId>,
) -> Result<Response, AppError> {
    let outcome = state.admission.leave(event_id, user.id).await?;
    Ok(success(outcome, "Left event"))
}

pub async fn set_visibility<S: RegistrationStore>(
    State(state): State<AppState<S>>,
    CurrentUser(user): CurrentUser,
    Path(event_id): Path<EventId>,
    Json(payload): Json<VisibilityUpdate>,
) -> Result<Response, AppError> {
    let outcome = state
        .admission
        .set_visibility(event_id, user.id, payload.is_visible)
        .await?;
    Ok(success(outcome, "Visibility updated"))
}
