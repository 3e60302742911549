// libs/scheduling-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn time_slot_routes(state: Arc<AppConfig>) -> Router {
    // Slot reads and writes all require a valid token; admin-only
    // operations check the role inside the handler.
    let protected_routes = Router::new()
        .route("/available", get(handlers::get_available_slots))
        .route("/", post(handlers::create_time_slot))
        .route("/generate", post(handlers::generate_slots))
        .route("/generate-all", post(handlers::generate_all_slots))
        .route("/book", post(handlers::book_slot))
        .route("/release", post(handlers::release_slot))
        .route("/{slot_id}", put(handlers::update_time_slot))
        .route("/{slot_id}", delete(handlers::delete_time_slot))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}

pub fn appointment_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/", post(handlers::create_appointment))
        .route("/me", get(handlers::get_my_appointments))
        .route("/me/{appointment_id}/cancel", put(handlers::cancel_my_appointment))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/complete", put(handlers::complete_appointment))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
