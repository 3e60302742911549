use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use scheduling_cell::router::{appointment_routes, time_slot_routes};
use shared_config::AppConfig;
use signaling_cell::router::{chat_routes, signaling_routes};
use signaling_cell::services::SignalingRegistry;
use signaling_cell::SignalingState;

pub fn create_router(state: Arc<AppConfig>, registry: SignalingRegistry) -> Router {
    let signaling_state = SignalingState::new(state.clone(), registry);

    Router::new()
        .route("/", get(|| async { "Clinic booking API is running!" }))
        .nest("/time-slots", time_slot_routes(state.clone()))
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/chat", chat_routes(signaling_state.clone()))
        .nest("/signaling", signaling_routes(signaling_state))
}
