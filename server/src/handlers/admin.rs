use axum::extract::{Path, State};
use axum::response::Response;
use serde::Serialize;

use crate::handlers::identity::CurrentUser;
use crate::models::{EventId, EventStatus, UserIdentity};
use crate::state::AppState;
use crate::store::RegistrationStore;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Serialize)]
struct RecomputePayload {
    event_id: EventId,
    status: EventStatus,
}

#[derive(Serialize)]
struct SweepPayload {
    passes: u32,
}

fn require_admin(user: &UserIdentity) -> Result<(), AppError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("admin role required".to_string()))
    }
}

pub async fn recompute_status<S: RegistrationStore>(
    State(state): State<AppState<S>>,
    CurrentUser(user): CurrentUser,
    Path(event_id): Path<EventId>,
) -> Result<Response, AppError> {
    require_admin(&user)?;
    let status = state
        .reconciler
        .recompute(event_id)
        .await?
        .ok_or_else(|| AppError::NotFound("event not found".to_string()))?;
    Ok(success(RecomputePayload { event_id, status }, "Status recomputed"))
}

pub async fn run_sweep<S: RegistrationStore>(
    State(state): State<AppState<S>>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, AppError> {
    require_admin(&user)?;
    let passes = state.reconciler.sweep().await?;
    Ok(success(SweepPayload { passes }, "Status sweep completed"))
}
