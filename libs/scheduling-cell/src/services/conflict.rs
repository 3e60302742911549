// libs/scheduling-cell/src/services/conflict.rs
use chrono::{NaiveDate, NaiveTime};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use std::sync::Arc;
use shared_database::supabase::SupabaseClient;

use crate::models::{hhmm, Appointment, SchedulingError};
use crate::services::generator::default_business_hours;

/// Half-open overlap test shared by every scheduling path. Touching
/// boundaries (one window ends exactly where the other starts) do not
/// overlap.
pub fn windows_overlap(
    start1: NaiveTime,
    end1: NaiveTime,
    start2: NaiveTime,
    end2: NaiveTime,
) -> bool {
    start1 < end2 && start2 < end1
}

/// Generated slots respect clinic hours by construction; the ad-hoc
/// appointment path has to check them here.
pub fn validate_clinic_hours(start: NaiveTime, end: NaiveTime) -> Result<(), SchedulingError> {
    let (open, close) = default_business_hours();
    if start < open || end > close {
        return Err(SchedulingError::InvalidTime(format!(
            "appointments run between {} and {}",
            open.format(hhmm::FORMAT),
            close.format(hhmm::FORMAT)
        )));
    }
    Ok(())
}

pub struct ConflictDetectionService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictDetectionService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Rejects a requested window that overlaps any pending or
    /// confirmed appointment on that day. Cancelled and completed
    /// appointments do not block the calendar.
    pub async fn check_appointment_conflicts(
        &self,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        debug!(
            "Checking appointment conflicts on {} between {} and {}",
            date, start_time, end_time
        );

        let mut path = format!(
            "/rest/v1/appointments?appointment_date=eq.{}&status=in.(pending,confirmed)&order=start_time.asc",
            date
        );

        if let Some(exclude_id) = exclude_appointment_id {
            path.push_str(&format!("&id=neq.{}", exclude_id));
        }

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let appointments: Vec<Appointment> = rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let conflicting = appointments.iter().find(|appointment| {
            windows_overlap(
                start_time,
                end_time,
                appointment.start_time,
                appointment.end_time,
            )
        });

        if let Some(appointment) = conflicting {
            warn!(
                "Conflict detected on {}: requested {}-{} overlaps appointment {}",
                date, start_time, end_time, appointment.id
            );
            return Err(SchedulingError::ConflictDetected);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn overlapping_windows_are_detected() {
        assert!(windows_overlap(at(9, 0), at(10, 0), at(9, 30), at(10, 30)));
        assert!(windows_overlap(at(9, 30), at(10, 30), at(9, 0), at(10, 0)));
        // containment, both directions
        assert!(windows_overlap(at(9, 0), at(12, 0), at(10, 0), at(10, 30)));
        assert!(windows_overlap(at(10, 0), at(10, 30), at(9, 0), at(12, 0)));
        // identical windows
        assert!(windows_overlap(at(9, 0), at(10, 0), at(9, 0), at(10, 0)));
    }

    #[test]
    fn touching_boundaries_are_not_overlap() {
        assert!(!windows_overlap(at(9, 0), at(10, 0), at(10, 0), at(11, 0)));
        assert!(!windows_overlap(at(10, 0), at(11, 0), at(9, 0), at(10, 0)));
    }

    #[test]
    fn disjoint_windows_are_not_overlap() {
        assert!(!windows_overlap(at(9, 0), at(9, 30), at(14, 0), at(14, 30)));
    }

    #[test]
    fn clinic_hours_bound_ad_hoc_windows() {
        assert!(validate_clinic_hours(at(9, 0), at(17, 0)).is_ok());
        assert!(validate_clinic_hours(at(10, 0), at(10, 30)).is_ok());
        assert!(validate_clinic_hours(at(8, 0), at(8, 30)).is_err());
        assert!(validate_clinic_hours(at(16, 45), at(17, 15)).is_err());
    }
}
