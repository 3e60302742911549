// libs/signaling-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::SignalingState;

pub fn chat_routes(state: SignalingState) -> Router {
    // Call control is REST + bearer token; the handlers re-check that the
    // caller is a participant of the appointment before touching the room.
    let protected_routes = Router::new()
        .route("/{appointment_id}/send", post(handlers::send_message))
        .route("/{appointment_id}/call", post(handlers::initiate_call))
        .route("/{appointment_id}/accept", post(handlers::accept_call))
        .route("/{appointment_id}/end-call", post(handlers::end_call))
        .route("/{appointment_id}/history", get(handlers::call_history))
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new().merge(protected_routes).with_state(state)
}

pub fn signaling_routes(state: SignalingState) -> Router {
    // No bearer middleware here: the WebSocket handshake carries the token
    // in the query string and the session driver rejects bad credentials
    // with a close frame after the upgrade.
    Router::new()
        .route("/ws", get(handlers::signaling_ws))
        .with_state(state)
}
