//! Resolves the caller forwarded by the authentication gateway.
//!
//! Bearer tokens and login proofs are verified upstream; requests reach this
//! service with the verified user id in [`USER_ID_HEADER`].

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::models::{UserId, UserIdentity};
use crate::state::AppState;
use crate::store::RegistrationStore;
use crate::utils::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";

pub struct CurrentUser(pub UserIdentity);

#[async_trait]
impl<S: RegistrationStore> FromRequestParts<AppState<S>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<S>,
    ) -> Result<Self, Self::Rejection> {
        let user_id: UserId = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::AuthError("missing user identity".to_string()))?
            .to_str()
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .ok_or_else(|| AppError::AuthError("invalid user identity".to_string()))?;

        let user = state
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::AuthError("user not found".to_string()))?;

        Ok(CurrentUser(user.identity()))
    }
}
