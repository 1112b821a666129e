use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::create_cors_layer;
use crate::handlers::{admin, events, health_check};
use crate::state::AppState;
use crate::store::RegistrationStore;

pub fn create_routes<S: RegistrationStore>(state: AppState<S>, frontend_urls: &[String]) -> Router {
    let api = Router::new()
        .route("/events", post(events::create_event::<S>))
        .route("/events/:event_id/join", post(events::join_event::<S>))
        .route("/events/:event_id/leave", post(events::leave_event::<S>))
        .route("/events/:event_id/visibility", post(events::set_visibility::<S>))
        .route(
            "/admin/events/:event_id/recompute",
            post(admin::recompute_status::<S>),
        )
        .route("/admin/sweep", post(admin::run_sweep::<S>));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_cors_layer(frontend_urls))
}
