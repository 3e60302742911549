// libs/scheduling-cell/src/services/slots.rs
use chrono::{NaiveDate, Utc};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    hhmm, Appointment, AppointmentStatus, CreateTimeSlotRequest, GenerateAllSlotsRequest,
    GenerateSlotsRequest, GenerationSummary, Service, SchedulingError, SlotStatus, TimeSlot,
    UpdateTimeSlotRequest,
};
use crate::services::conflict::windows_overlap;
use crate::services::generator::{default_business_hours, SlotGenerator};
use crate::services::lifecycle::AppointmentLifecycleService;

/// Storage service for the clinic slot calendar.
///
/// Status flips go through conditional PATCHes keyed on the expected
/// prior status, so two concurrent writers can never both succeed; the
/// loser gets an empty representation back and reports the conflict.
pub struct TimeSlotService {
    supabase: Arc<SupabaseClient>,
    generator: SlotGenerator,
    lifecycle: AppointmentLifecycleService,
}

impl TimeSlotService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_client(Arc::new(SupabaseClient::new(config)))
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self {
            supabase,
            generator: SlotGenerator::new(),
            lifecycle: AppointmentLifecycleService::new(),
        }
    }

    // ==========================================================================
    // QUERIES
    // ==========================================================================

    /// Available slots for a day, soonest first. With a service filter
    /// the listing keeps generic slots too, since those can host any
    /// service.
    pub async fn get_available_slots(
        &self,
        date: NaiveDate,
        service_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<TimeSlot>, SchedulingError> {
        let mut path = format!(
            "/rest/v1/time_slots?slot_date=eq.{}&status=eq.available&order=start_time.asc",
            date
        );

        if let Some(service) = service_id {
            path.push_str(&format!(
                "&or=(service_id.eq.{},service_id.is.null)",
                service
            ));
        }

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        debug!("Found {} available slots on {}", rows.len(), date);
        rows_to_slots(rows)
    }

    pub async fn get_slot(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<TimeSlot, SchedulingError> {
        let path = format!("/rest/v1/time_slots?id=eq.{}&limit=1", slot_id);

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let row = rows.into_iter().next().ok_or(SchedulingError::SlotNotFound)?;
        serde_json::from_value(row).map_err(|e| SchedulingError::DatabaseError(e.to_string()))
    }

    /// Slot currently holding a booking for the given appointment, if
    /// any. The link is one-way: slots point at appointments.
    pub async fn find_slot_for_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<TimeSlot>, SchedulingError> {
        let path = format!(
            "/rest/v1/time_slots?appointment_id=eq.{}&limit=1",
            appointment_id
        );

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

    // ==========================================================================
    // AD-HOC SLOT MANAGEMENT
    // ==========================================================================

    /// Create one slot by hand. An identical (date, start, end,
    /// service) slot wins outright; beyond that the window must not
    /// overlap any other slot that day, whatever its service, since
    /// the clinic runs a single calendar.
    pub async fn create_slot(
        &self,
        request: CreateTimeSlotRequest,
        auth_token: &str,
    ) -> Result<TimeSlot, SchedulingError> {
        if request.end_time <= request.start_time {
            return Err(SchedulingError::InvalidTime(
                "end time must be after start time".to_string(),
            ));
        }

        let existing = self.day_slots(request.slot_date, None, auth_token).await?;

        let duplicate = existing.iter().any(|slot| {
            slot.start_time == request.start_time
                && slot.end_time == request.end_time
                && slot.service_id == request.service_id
        });
        if duplicate {
            return Err(SchedulingError::DuplicateSlot);
        }

        let overlapping = existing.iter().any(|slot| {
            windows_overlap(
                request.start_time,
                request.end_time,
                slot.start_time,
                slot.end_time,
            )
        });
        if overlapping {
            return Err(SchedulingError::SlotOverlaps);
        }

        let body = json!({
            "slot_date": request.slot_date,
            "start_time": request.start_time.format(hhmm::FORMAT).to_string(),
            "end_time": request.end_time.format(hhmm::FORMAT).to_string(),
            "status": SlotStatus::Available.to_string(),
            "service_id": request.service_id,
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/time_slots",
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

        let slot: TimeSlot =
            serde_json::from_value(row).map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        info!(
            "Created time slot {} on {} {}-{}",
            slot.id,
            slot.slot_date,
            slot.start_time.format(hhmm::FORMAT),
            slot.end_time.format(hhmm::FORMAT)
        );
        Ok(slot)
    }

    // ==========================================================================
    // BULK GENERATION
    // ==========================================================================

    /// Generate a day of slots for one service. Existing slots win:
    /// candidates overlapping anything already on the calendar that
    /// day are skipped, whatever service the standing slot belongs to,
    /// which makes re-runs additive and idempotent. A window too small
    /// for the service's duration generates nothing and is not an
    /// error.
    pub async fn generate_for_service(
        &self,
        request: GenerateSlotsRequest,
        auth_token: &str,
    ) -> Result<GenerationSummary, SchedulingError> {
        let service = self.get_service(request.service_id, auth_token).await?;
        if !service.is_active {
            return Err(SchedulingError::ServiceInactive);
        }

        let (default_open, default_close) = default_business_hours();
        let window_start = request.start_time.unwrap_or(default_open);
        let window_end = request.end_time.unwrap_or(default_close);
        if window_end < window_start {
            return Err(SchedulingError::InvalidTime(
                "window end must not precede window start".to_string(),
            ));
        }

        let candidates = self.generator.generate_windows(
            window_start,
            window_end,
            service.duration_minutes as i64,
        );

        if candidates.is_empty() {
            debug!(
                "No {}-minute slot fits between {} and {} for service {}",
                service.duration_minutes,
                window_start.format(hhmm::FORMAT),
                window_end.format(hhmm::FORMAT),
                request.service_id
            );
            return Ok(GenerationSummary::default());
        }

        let existing = self.day_slots(request.date, None, auth_token).await?;

        let fresh: Vec<_> = candidates
            .iter()
            .filter(|candidate| {
                !existing.iter().any(|slot| {
                    windows_overlap(candidate.start, candidate.end, slot.start_time, slot.end_time)
                })
            })
            .collect();

        let skipped = candidates.len() - fresh.len();

        if fresh.is_empty() {
            debug!(
                "No new slots for service {} on {}: all {} candidates already covered",
                request.service_id,
                request.date,
                candidates.len()
            );
            return Ok(GenerationSummary { created: 0, skipped });
        }

        let rows: Vec<Value> = fresh
            .iter()
            .map(|window| {
                json!({
                    "slot_date": request.date,
                    "start_time": window.start.format(hhmm::FORMAT).to_string(),
                    "end_time": window.end.format(hhmm::FORMAT).to_string(),
                    "status": SlotStatus::Available.to_string(),
                    "service_id": request.service_id,
                })
            })
            .collect();

        let inserted: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/time_slots",
                Some(auth_token),
                Some(Value::Array(rows)),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        info!(
            "Generated {} slots for service {} on {} ({} skipped)",
            inserted.len(),
            request.service_id,
            request.date,
            skipped
        );

        Ok(GenerationSummary {
            created: inserted.len(),
            skipped,
        })
    }

    /// Generate slots for every active service across a date range
    /// (both ends inclusive). An explicit window applies to every day;
    /// default clinic hours otherwise. Input is validated up front so
    /// the run either starts clean or not at all; a service whose
    /// duration does not fit the window simply contributes nothing.
    pub async fn generate_for_range(
        &self,
        request: GenerateAllSlotsRequest,
        auth_token: &str,
    ) -> Result<GenerationSummary, SchedulingError> {
        if request.end_date < request.start_date {
            return Err(SchedulingError::InvalidTime(
                "end date must not precede start date".to_string(),
            ));
        }

        let (default_open, default_close) = default_business_hours();
        let window_start = request.start_time.unwrap_or(default_open);
        let window_end = request.end_time.unwrap_or(default_close);
        if window_end < window_start {
            return Err(SchedulingError::InvalidTime(
                "window end must not precede window start".to_string(),
            ));
        }

        let services: Vec<Value> = self
            .supabase
            .request(
                Method::GET,
                "/rest/v1/services?is_active=eq.true&order=name.asc",
                Some(auth_token),
                None,
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let services: Vec<Service> = services
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Service>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let mut summary = GenerationSummary::default();
        let mut day = request.start_date;

        while day <= request.end_date {
            for service in &services {
                let day_summary = self
                    .generate_for_service(
                        GenerateSlotsRequest {
                            service_id: service.id,
                            date: day,
                            start_time: request.start_time,
                            end_time: request.end_time,
                        },
                        auth_token,
                    )
                    .await?;
                summary.created += day_summary.created;
                summary.skipped += day_summary.skipped;
            }

            day = day
                .succ_opt()
                .ok_or_else(|| SchedulingError::InvalidTime("date out of range".to_string()))?;
        }

        info!(
            "Bulk generation {}..={}: created {} slots, skipped {}",
            request.start_date, request.end_date, summary.created, summary.skipped
        );
        Ok(summary)
    }

    // ==========================================================================
    // UPDATES
    // ==========================================================================

    /// Reschedule or relabel a slot. Booked slots refuse time changes;
    /// marking one available releases it (appointment cancelled, link
    /// cleared), and the booked status itself can only be reached
    /// through the booking flow. Reschedules stay conditional on the
    /// slot still being available, so a booking that lands in between
    /// cannot end up with stale mirrored times.
    pub async fn update_slot(
        &self,
        slot_id: Uuid,
        request: UpdateTimeSlotRequest,
        auth_token: &str,
    ) -> Result<TimeSlot, SchedulingError> {
        let mut slot = self.get_slot(slot_id, auth_token).await?;

        match request.status {
            Some(SlotStatus::Booked) if slot.status == SlotStatus::Available => {
                return Err(SchedulingError::ValidationError(
                    "slots become booked through the booking flow".to_string(),
                ));
            }
            Some(SlotStatus::Available) if slot.status == SlotStatus::Booked => {
                slot = self.release(slot_id, auth_token).await?;
            }
            _ => {}
        }

        let reschedules = request.slot_date.is_some()
            || request.start_time.is_some()
            || request.end_time.is_some();
        if slot.status == SlotStatus::Booked && reschedules {
            return Err(SchedulingError::CannotRescheduleBookedSlot);
        }

        let effective_start = request.start_time.unwrap_or(slot.start_time);
        let effective_end = request.end_time.unwrap_or(slot.end_time);
        if effective_end <= effective_start {
            return Err(SchedulingError::InvalidTime(
                "end time must be after start time".to_string(),
            ));
        }

        if reschedules {
            let effective_date = request.slot_date.unwrap_or(slot.slot_date);
            let neighbours = self
                .day_slots(effective_date, Some(slot_id), auth_token)
                .await?;
            let overlapping = neighbours.iter().any(|other| {
                windows_overlap(
                    effective_start,
                    effective_end,
                    other.start_time,
                    other.end_time,
                )
            });
            if overlapping {
                return Err(SchedulingError::SlotOverlaps);
            }
        }

        let mut update_data = serde_json::Map::new();
        if let Some(date) = request.slot_date {
            update_data.insert("slot_date".to_string(), json!(date));
        }
        if let Some(start) = request.start_time {
            update_data.insert(
                "start_time".to_string(),
                json!(start.format(hhmm::FORMAT).to_string()),
            );
        }
        if let Some(end) = request.end_time {
            update_data.insert(
                "end_time".to_string(),
                json!(end.format(hhmm::FORMAT).to_string()),
            );
        }
        if let Some(service) = request.service_id {
            update_data.insert("service_id".to_string(), json!(service));
        }

        if update_data.is_empty() {
            return Ok(slot);
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now()));

        let mut path = format!("/rest/v1/time_slots?id=eq.{}", slot_id);
        if reschedules {
            path.push_str(&format!("&status=eq.{}", SlotStatus::Available));
        }
        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update_data)),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let row = match result.into_iter().next() {
            Some(row) => row,
            None if reschedules => return Err(SchedulingError::CannotRescheduleBookedSlot),
            None => return Err(SchedulingError::SlotNotFound),
        };
        serde_json::from_value(row).map_err(|e| SchedulingError::DatabaseError(e.to_string()))
    }

    /// Delete an available slot. The delete itself filters on
    /// `available` and hands the removed row back, so a booking that
    /// lands in between leaves the row untouched and surfaces as a
    /// refusal rather than a silent no-op.
    pub async fn delete_slot(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let slot = self.get_slot(slot_id, auth_token).await?;

        if slot.status == SlotStatus::Booked {
            return Err(SchedulingError::CannotDeleteBookedSlot);
        }

        let path = format!(
            "/rest/v1/time_slots?id=eq.{}&status=eq.{}",
            slot_id,
            SlotStatus::Available
        );
        let removed: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                Some(auth_token),
                None,
                Some(representation_headers()),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        if removed.is_empty() {
            return Err(SchedulingError::CannotDeleteBookedSlot);
        }

        info!("Deleted time slot {}", slot_id);
        Ok(())
    }

    // ==========================================================================
    // RELEASE
    // ==========================================================================

    /// Free a booked slot and cancel the appointment it carried. This
    /// is the single inverse of booking: client cancellation funnels
    /// through here too, so slot and appointment can never drift apart.
    pub async fn release(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<TimeSlot, SchedulingError> {
        let slot = self.get_slot(slot_id, auth_token).await?;

        if slot.status != SlotStatus::Booked {
            return Err(SchedulingError::SlotNotBooked);
        }

        let linked_appointment = slot.appointment_id;

        // Conditional flip back to available; losing the race to a
        // concurrent release surfaces as SlotNotBooked.
        let path = format!(
            "/rest/v1/time_slots?id=eq.{}&status=eq.{}",
            slot_id,
            SlotStatus::Booked
        );
        let body = json!({
            "status": SlotStatus::Available.to_string(),
            "appointment_id": Value::Null,
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

        let row = result.into_iter().next().ok_or(SchedulingError::SlotNotBooked)?;
        let released: TimeSlot =
            serde_json::from_value(row).map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        if let Some(appointment_id) = linked_appointment {
            self.cancel_linked_appointment(appointment_id, auth_token)
                .await?;
        }

        info!("Released time slot {}", slot_id);
        Ok(released)
    }

    async fn cancel_linked_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}&limit=1", appointment_id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let appointment: Appointment = match rows.into_iter().next() {
            Some(row) => serde_json::from_value(row)
                .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?,
            None => {
                warn!(
                    "Released slot pointed at missing appointment {}",
                    appointment_id
                );
                return Ok(());
            }
        };

        if appointment.status.is_terminal() {
            return Ok(());
        }

        self.lifecycle
            .validate_status_transition(&appointment.status, &AppointmentStatus::Cancelled)?;

        let update_path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let body = json!({
            "status": AppointmentStatus::Cancelled.to_string(),
            "updated_at": Utc::now(),
        });
        let _: Value = self
            .supabase
            .request(Method::PATCH, &update_path, Some(auth_token), Some(body))
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        info!("Cancelled appointment {} with its slot", appointment_id);
        Ok(())
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    /// Every slot on a day, regardless of service or status. The
    /// clinic runs one calendar, so overlap checks must see all of it.
    async fn day_slots(
        &self,
        date: NaiveDate,
        exclude_slot_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<TimeSlot>, SchedulingError> {
        let mut path = format!("/rest/v1/time_slots?slot_date=eq.{}", date);
        if let Some(exclude) = exclude_slot_id {
            path.push_str(&format!("&id=neq.{}", exclude));
        }

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;
        rows_to_slots(rows)
    }

    pub(crate) async fn get_service(
        &self,
        service_id: Uuid,
        auth_token: &str,
    ) -> Result<Service, SchedulingError> {
        let path = format!("/rest/v1/services?id=eq.{}&limit=1", service_id);

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or(SchedulingError::ServiceNotFound)?;
        serde_json::from_value(row).map_err(|e| SchedulingError::DatabaseError(e.to_string()))
    }
}

pub(crate) fn representation_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

fn rows_to_slots(rows: Vec<Value>) -> Result<Vec<TimeSlot>, SchedulingError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<TimeSlot>, _>>()
        .map_err(|e| SchedulingError::DatabaseError(e.to_string()))
}
