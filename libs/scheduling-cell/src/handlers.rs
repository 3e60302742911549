// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AvailableSlotsQuery, BookSlotRequest, CreateAppointmentRequest, CreateTimeSlotRequest,
    GenerateAllSlotsRequest, GenerateSlotsRequest, ReleaseSlotRequest, SchedulingError,
    UpdateTimeSlotRequest,
};
use crate::services::booking::AppointmentBookingService;
use crate::services::slots::TimeSlotService;

fn map_scheduling_error(err: SchedulingError) -> AppError {
    match err {
        SchedulingError::SlotNotFound
        | SchedulingError::AppointmentNotFound
        | SchedulingError::ServiceNotFound => AppError::NotFound(err.to_string()),

        SchedulingError::SlotAlreadyBooked
        | SchedulingError::DuplicateSlot
        | SchedulingError::SlotOverlaps
        | SchedulingError::ConflictDetected => AppError::Conflict(err.to_string()),

        SchedulingError::SlotNotBooked
        | SchedulingError::CannotDeleteBookedSlot
        | SchedulingError::CannotRescheduleBookedSlot
        | SchedulingError::ServiceInactive
        | SchedulingError::AlreadyTerminal(_)
        | SchedulingError::InvalidTransition { .. }
        | SchedulingError::InvalidTime(_)
        | SchedulingError::PaymentNotConfirmed
        | SchedulingError::PaymentNotConfigured => AppError::BadRequest(err.to_string()),

        SchedulingError::ValidationError(msg) => AppError::ValidationError(msg),
        SchedulingError::PaymentGatewayError(msg) => AppError::ExternalService(msg),
        SchedulingError::Unauthorized => AppError::Forbidden(err.to_string()),
        SchedulingError::DatabaseError(msg) => AppError::Database(msg),
    }
}

// ==============================================================================
// TIME SLOT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let slot_service = TimeSlotService::new(&state);
    let slots = slot_service
        .get_available_slots(query.date, query.service_id, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "count": slots.len(),
        "slots": slots,
    })))
}

#[axum::debug_handler]
pub async fn create_time_slot(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateTimeSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if user.role.as_deref() != Some("admin") {
        return Err(AppError::Forbidden(
            "Only administrators can manage time slots".to_string(),
        ));
    }

    let slot_service = TimeSlotService::new(&state);
    let slot = slot_service
        .create_slot(request, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "time_slot": slot,
    })))
}

#[axum::debug_handler]
pub async fn generate_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<GenerateSlotsRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if user.role.as_deref() != Some("admin") {
        return Err(AppError::Forbidden(
            "Only administrators can manage time slots".to_string(),
        ));
    }

    let slot_service = TimeSlotService::new(&state);
    let summary = slot_service
        .generate_for_service(request, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "created": summary.created,
        "skipped": summary.skipped,
    })))
}

#[axum::debug_handler]
pub async fn generate_all_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<GenerateAllSlotsRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if user.role.as_deref() != Some("admin") {
        return Err(AppError::Forbidden(
            "Only administrators can manage time slots".to_string(),
        ));
    }

    let slot_service = TimeSlotService::new(&state);
    let summary = slot_service
        .generate_for_range(request, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "created": summary.created,
        "skipped": summary.skipped,
    })))
}

#[axum::debug_handler]
pub async fn book_slot(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let booking_service = AppointmentBookingService::new(&state);
    let booked = booking_service
        .book_slot(request, &user, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "time_slot": booked.time_slot,
        "appointment": booked.appointment,
    })))
}

#[axum::debug_handler]
pub async fn release_slot(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<ReleaseSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if user.role.as_deref() != Some("admin") {
        return Err(AppError::Forbidden(
            "Only administrators can release time slots".to_string(),
        ));
    }

    let slot_service = TimeSlotService::new(&state);
    let slot = slot_service
        .release(request.time_slot_id, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "time_slot": slot,
    })))
}

#[axum::debug_handler]
pub async fn update_time_slot(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(slot_id): Path<Uuid>,
    Json(request): Json<UpdateTimeSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if user.role.as_deref() != Some("admin") {
        return Err(AppError::Forbidden(
            "Only administrators can manage time slots".to_string(),
        ));
    }

    let slot_service = TimeSlotService::new(&state);
    let slot = slot_service
        .update_slot(slot_id, request, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "time_slot": slot,
    })))
}

#[axum::debug_handler]
pub async fn delete_time_slot(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if user.role.as_deref() != Some("admin") {
        return Err(AppError::Forbidden(
            "Only administrators can manage time slots".to_string(),
        ));
    }

    let slot_service = TimeSlotService::new(&state);
    slot_service
        .delete_slot(slot_id, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Time slot deleted",
    })))
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    // The token subject owns the new appointment; the request carries
    // no user field.
    let owner = Uuid::parse_str(&user.id)
        .map_err(|_| AppError::Auth("Token subject is not a valid user id".to_string()))?;

    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service
        .create_appointment(owner, request, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
    })))
}

#[axum::debug_handler]
pub async fn get_my_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let booking_service = AppointmentBookingService::new(&state);
    let appointments = booking_service
        .get_appointments_for_user(&user.id, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "count": appointments.len(),
        "appointments": appointments,
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service
        .get_appointment(appointment_id, &user, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
    })))
}

#[axum::debug_handler]
pub async fn cancel_my_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service
        .cancel_appointment(appointment_id, &user, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
    })))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if user.role.as_deref() != Some("admin") {
        return Err(AppError::Forbidden(
            "Only administrators can complete appointments".to_string(),
        ));
    }

    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service
        .complete_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
    })))
}
