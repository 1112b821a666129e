use axum::response::Response;
use serde::Serialize;

use crate::utils::response::success;

pub mod admin;
pub mod events;
pub mod identity;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "gathering-api",
    };

    success(payload, "Health check successful")
}
