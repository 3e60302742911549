// libs/signaling-cell/src/handlers.rs
use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    response::IntoResponse,
    Extension, Json,
};
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    CallEventSource, CallEventType, InitiateCallRequest, SendMessageRequest, SignalingError,
    WsConnectQuery,
};
use crate::services::access::{ensure_confirmed, ensure_endable, AppointmentAccessService};
use crate::services::call_log::CallEventLogService;
use crate::services::session;
use crate::SignalingState;

fn map_signaling_error(err: SignalingError) -> AppError {
    match err {
        SignalingError::AppointmentNotFound => AppError::NotFound(err.to_string()),
        SignalingError::Unauthorized => AppError::Forbidden(err.to_string()),
        SignalingError::NotAvailable(_) => AppError::BadRequest(err.to_string()),
        SignalingError::DatabaseError(msg) => AppError::Database(msg),
    }
}

fn sender_uuid(user: &User) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.id)
        .map_err(|_| AppError::Auth("Token subject is not a valid user id".to_string()))
}

// ==============================================================================
// REST CALL-CONTROL HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn send_message(
    State(state): State<SignalingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let sender = sender_uuid(&user)?;

    let access = AppointmentAccessService::new(&state.config);
    let appointment = access
        .load_for_participant(appointment_id, &user, token)
        .await
        .map_err(map_signaling_error)?;
    ensure_confirmed(&appointment).map_err(map_signaling_error)?;

    CallEventLogService::new(&state.config)
        .record(
            appointment_id,
            sender,
            CallEventType::ChatMessage,
            CallEventSource::Rest,
            json!({ "content": request.content }),
            token,
        )
        .await;

    let payload = json!({
        "type": "chat-message",
        "appointment_id": appointment_id,
        "sender_id": sender,
        "content": request.content,
        "sent_at": Utc::now(),
    })
    .to_string();

    let delivered = state
        .registry
        .broadcast(appointment_id, &payload, Some(sender))
        .await;

    Ok(Json(json!({
        "success": true,
        "delivered": delivered,
    })))
}

#[axum::debug_handler]
pub async fn initiate_call(
    State(state): State<SignalingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<InitiateCallRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let sender = sender_uuid(&user)?;

    let access = AppointmentAccessService::new(&state.config);
    let appointment = access
        .load_for_participant(appointment_id, &user, token)
        .await
        .map_err(map_signaling_error)?;
    ensure_confirmed(&appointment).map_err(map_signaling_error)?;

    let call_type = request.call_type.unwrap_or_else(|| "video".to_string());
    info!(
        "User {} starting a {} call for appointment {}",
        sender, call_type, appointment_id
    );

    CallEventLogService::new(&state.config)
        .record(
            appointment_id,
            sender,
            CallEventType::CallInitiated,
            CallEventSource::Rest,
            json!({ "call_type": call_type }),
            token,
        )
        .await;

    let payload = json!({
        "type": "call-started",
        "appointment_id": appointment_id,
        "initiator_id": sender,
        "call_type": call_type,
    })
    .to_string();

    let delivered = state
        .registry
        .broadcast(appointment_id, &payload, Some(sender))
        .await;

    Ok(Json(json!({
        "success": true,
        "delivered": delivered,
    })))
}

#[axum::debug_handler]
pub async fn accept_call(
    State(state): State<SignalingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let sender = sender_uuid(&user)?;

    let access = AppointmentAccessService::new(&state.config);
    let appointment = access
        .load_for_participant(appointment_id, &user, token)
        .await
        .map_err(map_signaling_error)?;
    ensure_confirmed(&appointment).map_err(map_signaling_error)?;

    CallEventLogService::new(&state.config)
        .record(
            appointment_id,
            sender,
            CallEventType::CallAccepted,
            CallEventSource::Rest,
            json!({}),
            token,
        )
        .await;

    let payload = json!({
        "type": "call-accepted",
        "appointment_id": appointment_id,
        "acceptor_id": sender,
    })
    .to_string();

    let delivered = state
        .registry
        .broadcast(appointment_id, &payload, Some(sender))
        .await;

    Ok(Json(json!({
        "success": true,
        "delivered": delivered,
    })))
}

#[axum::debug_handler]
pub async fn end_call(
    State(state): State<SignalingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let sender = sender_uuid(&user)?;

    let access = AppointmentAccessService::new(&state.config);
    let appointment = access
        .load_for_participant(appointment_id, &user, token)
        .await
        .map_err(map_signaling_error)?;
    ensure_endable(&appointment).map_err(map_signaling_error)?;

    CallEventLogService::new(&state.config)
        .record(
            appointment_id,
            sender,
            CallEventType::CallEnded,
            CallEventSource::Rest,
            json!({}),
            token,
        )
        .await;

    let payload = json!({
        "type": "call-ended",
        "appointment_id": appointment_id,
        "ended_by": sender,
    })
    .to_string();

    let delivered = state
        .registry
        .broadcast(appointment_id, &payload, Some(sender))
        .await;

    Ok(Json(json!({
        "success": true,
        "delivered": delivered,
    })))
}

#[axum::debug_handler]
pub async fn call_history(
    State(state): State<SignalingState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let access = AppointmentAccessService::new(&state.config);
    access
        .load_for_participant(appointment_id, &user, token)
        .await
        .map_err(map_signaling_error)?;

    let events = CallEventLogService::new(&state.config)
        .history(appointment_id, token)
        .await
        .map_err(map_signaling_error)?;

    Ok(Json(json!({
        "success": true,
        "count": events.len(),
        "events": events,
    })))
}

// ==============================================================================
// WEBSOCKET UPGRADE
// ==============================================================================

/// The token rides in the query string (browsers cannot set headers on
/// a WebSocket handshake), so this route sits outside the bearer
/// middleware and authorization happens inside the session driver.
pub async fn signaling_ws(
    State(state): State<SignalingState>,
    Query(params): Query<WsConnectQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::drive_connection(socket, state, params))
}
