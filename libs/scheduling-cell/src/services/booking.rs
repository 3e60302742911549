// libs/scheduling-cell/src/services/booking.rs
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;

use crate::models::{
    hhmm, Appointment, AppointmentStatus, BookSlotRequest, BookSlotResponse,
    CreateAppointmentRequest, SchedulingError, SlotStatus,
};
use crate::services::conflict::{validate_clinic_hours, ConflictDetectionService};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::payment::PaymentVerificationService;
use crate::services::slots::{representation_headers, TimeSlotService};

/// Coordinates the appointment side of booking: ad-hoc creation,
/// claiming a slot, cancellation and completion. Slot state belongs to
/// `TimeSlotService`; this service owns the appointment rows and the
/// ordering between the two.
pub struct AppointmentBookingService {
    supabase: Arc<SupabaseClient>,
    slot_service: TimeSlotService,
    conflict_service: ConflictDetectionService,
    lifecycle_service: AppointmentLifecycleService,
    payment_service: Option<PaymentVerificationService>,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));

        Self {
            slot_service: TimeSlotService::with_client(Arc::clone(&supabase)),
            conflict_service: ConflictDetectionService::new(Arc::clone(&supabase)),
            lifecycle_service: AppointmentLifecycleService::new(),
            payment_service: PaymentVerificationService::new(config).ok(),
            supabase,
        }
    }

    // ==========================================================================
    // CREATION
    // ==========================================================================

    /// Ad-hoc appointment creation, outside the generated slot grid.
    /// The service must be bookable and the window must fall inside
    /// clinic hours and clear the same overlap check slot bookings
    /// rely on. New appointments always start out pending and belong
    /// to the authenticated caller.
    pub async fn create_appointment(
        &self,
        owner: Uuid,
        request: CreateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        if request.end_time <= request.start_time {
            return Err(SchedulingError::InvalidTime(
                "end time must be after start time".to_string(),
            ));
        }
        validate_clinic_hours(request.start_time, request.end_time)?;

        let service = self
            .slot_service
            .get_service(request.service_id, auth_token)
            .await?;
        if !service.is_active {
            return Err(SchedulingError::ServiceInactive);
        }

        self.conflict_service
            .check_appointment_conflicts(
                request.date,
                request.start_time,
                request.end_time,
                None,
                auth_token,
            )
            .await?;

        if let Some(intent_id) = &request.payment_intent_id {
            let payments = self
                .payment_service
                .as_ref()
                .ok_or(SchedulingError::PaymentNotConfigured)?;
            payments.require_succeeded(intent_id).await?;
        }

        let body = json!({
            "user_id": owner,
            "service_id": request.service_id,
            "appointment_date": request.date,
            "start_time": request.start_time.format(hhmm::FORMAT).to_string(),
            "end_time": request.end_time.format(hhmm::FORMAT).to_string(),
            "status": AppointmentStatus::Pending.to_string(),
            "notes": request.notes,
            "payment_intent_id": request.payment_intent_id,
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(body),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let row = result
            .into_iter()
            .next()
            .ok_or_else(|| SchedulingError::DatabaseError("insert returned no rows".to_string()))?;
        let appointment: Appointment =
            serde_json::from_value(row).map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        info!(
            "Created appointment {} for user {} on {}",
            appointment.id, appointment.user_id, appointment.appointment_date
        );
        Ok(appointment)
    }

    // ==========================================================================
    // SLOT BOOKING
    // ==========================================================================

    /// Claim an available slot for a pending appointment.
    ///
    /// The claim is one conditional PATCH keyed on the slot still
    /// being available; of N concurrent callers exactly one gets a row
    /// back and every loser sees `SlotAlreadyBooked`. On success the
    /// appointment is confirmed and takes the slot's date and times.
    pub async fn book_slot(
        &self,
        request: BookSlotRequest,
        user: &User,
        auth_token: &str,
    ) -> Result<BookSlotResponse, SchedulingError> {
        let slot = self.slot_service.get_slot(request.time_slot_id, auth_token).await?;

        if slot.status == SlotStatus::Booked {
            return Err(SchedulingError::SlotAlreadyBooked);
        }

        let appointment = self
            .fetch_appointment(request.appointment_id, auth_token)
            .await?
            .ok_or(SchedulingError::AppointmentNotFound)?;

        let is_owner = appointment.user_id.to_string() == user.id;
        let is_admin = user.role.as_deref() == Some("admin");
        if !is_owner && !is_admin {
            return Err(SchedulingError::Unauthorized);
        }

        self.lifecycle_service
            .validate_status_transition(&appointment.status, &AppointmentStatus::Confirmed)?;

        let claim_path = format!(
            "/rest/v1/time_slots?id=eq.{}&status=eq.{}",
            request.time_slot_id,
            SlotStatus::Available
        );
        let claim_body = json!({
            "status": SlotStatus::Booked.to_string(),
            "appointment_id": request.appointment_id,
            "updated_at": Utc::now(),
        });

        let claimed: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &claim_path,
                Some(auth_token),
                Some(claim_body),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let claimed_row = match claimed.into_iter().next() {
            Some(row) => row,
            None => {
                debug!(
                    "Lost booking race for slot {} (appointment {})",
                    request.time_slot_id, request.appointment_id
                );
                return Err(SchedulingError::SlotAlreadyBooked);
            }
        };
        let booked_slot: crate::models::TimeSlot = serde_json::from_value(claimed_row)
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        // Slot times are authoritative; the appointment follows them.
        let confirm_path = format!("/rest/v1/appointments?id=eq.{}", request.appointment_id);
        let confirm_body = json!({
            "appointment_date": booked_slot.slot_date,
            "start_time": booked_slot.start_time.format(hhmm::FORMAT).to_string(),
            "end_time": booked_slot.end_time.format(hhmm::FORMAT).to_string(),
            "status": AppointmentStatus::Confirmed.to_string(),
            "updated_at": Utc::now(),
        });

        let confirmed: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &confirm_path,
                Some(auth_token),
                Some(confirm_body),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let confirmed_row = confirmed
            .into_iter()
            .next()
            .ok_or(SchedulingError::AppointmentNotFound)?;
        let confirmed_appointment: Appointment = serde_json::from_value(confirmed_row)
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        info!(
            "Booked slot {} for appointment {}",
            booked_slot.id, confirmed_appointment.id
        );

        Ok(BookSlotResponse {
            time_slot: booked_slot,
            appointment: confirmed_appointment,
        })
    }

    // ==========================================================================
    // CANCELLATION / COMPLETION
    // ==========================================================================

    /// Cancel an appointment. When a slot carries the booking the
    /// whole operation goes through the slot release path, so the slot
    /// is freed in the same stroke. Terminal appointments refuse.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let appointment = self
            .fetch_appointment(appointment_id, auth_token)
            .await?
            .ok_or(SchedulingError::AppointmentNotFound)?;

        let is_owner = appointment.user_id.to_string() == user.id;
        let is_admin = user.role.as_deref() == Some("admin");
        if !is_owner && !is_admin {
            return Err(SchedulingError::Unauthorized);
        }

        if appointment.status.is_terminal() {
            return Err(SchedulingError::AlreadyTerminal(appointment.status));
        }

        let linked_slot = self
            .slot_service
            .find_slot_for_appointment(appointment_id, auth_token)
            .await?;

        if let Some(slot) = linked_slot {
            self.slot_service.release(slot.id, auth_token).await?;
            return self
                .fetch_appointment(appointment_id, auth_token)
                .await?
                .ok_or(SchedulingError::AppointmentNotFound);
        }

        self.lifecycle_service
            .validate_status_transition(&appointment.status, &AppointmentStatus::Cancelled)?;

        let cancelled = self
            .update_status(appointment_id, AppointmentStatus::Cancelled, auth_token)
            .await?;

        info!("Cancelled appointment {}", appointment_id);
        Ok(cancelled)
    }

    /// Mark a confirmed appointment completed after the visit. The
    /// slot stays booked: the time was used.
    pub async fn complete_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let appointment = self
            .fetch_appointment(appointment_id, auth_token)
            .await?
            .ok_or(SchedulingError::AppointmentNotFound)?;

        if appointment.status.is_terminal() {
            return Err(SchedulingError::AlreadyTerminal(appointment.status));
        }

        self.lifecycle_service
            .validate_status_transition(&appointment.status, &AppointmentStatus::Completed)?;

        let completed = self
            .update_status(appointment_id, AppointmentStatus::Completed, auth_token)
            .await?;

        info!("Completed appointment {}", appointment_id);
        Ok(completed)
    }

    // ==========================================================================
    // QUERIES
    // ==========================================================================

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let appointment = self
            .fetch_appointment(appointment_id, auth_token)
            .await?
            .ok_or(SchedulingError::AppointmentNotFound)?;

        let is_owner = appointment.user_id.to_string() == user.id;
        let is_admin = user.role.as_deref() == Some("admin");
        if !is_owner && !is_admin {
            return Err(SchedulingError::Unauthorized);
        }

        Ok(appointment)
    }

    pub async fn get_appointments_for_user(
        &self,
        user_id: &str,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let path = format!(
            "/rest/v1/appointments?user_id=eq.{}&order=appointment_date.desc,start_time.desc",
            user_id
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    async fn fetch_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<Appointment>, SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}&limit=1", appointment_id);

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        match rows.into_iter().next() {
            Some(row) => serde_json::from_value(row)
                .map(Some)
                .map_err(|e| SchedulingError::DatabaseError(e.to_string())),
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let body = json!({
            "status": status.to_string(),
            "updated_at": Utc::now(),
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(body),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or_else(|| {
            warn!(
                "Status update to {} matched no appointment {}",
                status, appointment_id
            );
            SchedulingError::AppointmentNotFound
        })?;

        serde_json::from_value(row).map_err(|e| SchedulingError::DatabaseError(e.to_string()))
    }
}
