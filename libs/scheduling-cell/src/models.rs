// libs/scheduling-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate, NaiveTime};
use std::fmt;

// ==============================================================================
// TIME SLOT MODELS
// ==============================================================================

/// A bookable window in the clinic calendar. Slots are wall-clock
/// times in the clinic's timezone; no conversion happens anywhere in
/// the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Uuid,
    pub slot_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub status: SlotStatus,
    pub service_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Booked,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotStatus::Available => write!(f, "available"),
            SlotStatus::Booked => write!(f, "booked"),
        }
    }
}

// ==============================================================================
// APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub service_id: Uuid,
    pub appointment_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::Completed)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Completed => write!(f, "completed"),
        }
    }
}

// ==============================================================================
// SERVICE CATALOG MODELS
// ==============================================================================

/// Offered service (initial consultation, follow-up, ...). Managed
/// elsewhere; this cell only reads the catalog to drive generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: i32,
    pub price_cents: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub date: NaiveDate,
    pub service_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTimeSlotRequest {
    pub slot_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub service_id: Option<Uuid>,
}

/// Partial slot update. Setting `status` to available on a booked slot
/// releases it; a slot cannot be marked booked here, that transition
/// belongs to the booking endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTimeSlotRequest {
    pub slot_date: Option<NaiveDate>,
    #[serde(default, with = "hhmm_option", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "hhmm_option", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveTime>,
    pub status: Option<SlotStatus>,
    pub service_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateSlotsRequest {
    pub service_id: Uuid,
    pub date: NaiveDate,
    #[serde(default, with = "hhmm_option", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "hhmm_option", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateAllSlotsRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default, with = "hhmm_option", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "hhmm_option", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveTime>,
}

/// Outcome of a generation run. `skipped` counts candidates dropped
/// because an existing slot already covered the window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub created: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSlotRequest {
    pub time_slot_id: Uuid,
    pub appointment_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSlotRequest {
    pub time_slot_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSlotResponse {
    pub time_slot: TimeSlot,
    pub appointment: Appointment,
}

/// Body for ad-hoc appointment creation. The owner is always the
/// authenticated caller; there is no user field to forge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub service_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub notes: Option<String>,
    pub payment_intent_id: Option<String>,
}

// ==============================================================================
// PAYMENT GATEWAY MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: PaymentIntentStatus,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    Succeeded,
    Processing,
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Canceled,
    #[serde(other)]
    Unknown,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulingError {
    #[error("Time slot not found")]
    SlotNotFound,

    #[error("This time slot is already booked")]
    SlotAlreadyBooked,

    #[error("Time slot is not booked")]
    SlotNotBooked,

    #[error("An identical time slot already exists")]
    DuplicateSlot,

    #[error("Time slot overlaps an existing slot")]
    SlotOverlaps,

    #[error("Cannot delete a booked time slot")]
    CannotDeleteBookedSlot,

    #[error("Cannot reschedule a booked time slot")]
    CannotRescheduleBookedSlot,

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Service not found")]
    ServiceNotFound,

    #[error("Service is not bookable")]
    ServiceInactive,

    #[error("Appointment is already {0}")]
    AlreadyTerminal(AppointmentStatus),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment conflicts with an existing booking")]
    ConflictDetected,

    #[error("Invalid appointment time: {0}")]
    InvalidTime(String),

    #[error("Payment has not been confirmed")]
    PaymentNotConfirmed,

    #[error("Payment verification is not configured")]
    PaymentNotConfigured,

    #[error("Payment gateway error: {0}")]
    PaymentGatewayError(String),

    #[error("Unauthorized access to appointment")]
    Unauthorized,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

// ==============================================================================
// SERDE HELPERS
// ==============================================================================

/// Wall-clock times cross the wire as `HH:MM`. Postgres `time` columns
/// come back as `HH:MM:SS`, so deserialization accepts both.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        parse(&value).map_err(serde::de::Error::custom)
    }

    pub fn parse(value: &str) -> Result<NaiveTime, chrono::ParseError> {
        NaiveTime::parse_from_str(value, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
    }
}

pub mod hhmm_option {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match time {
            Some(t) => super::hhmm::serialize(t, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        match value {
            Some(s) => super::hhmm::parse(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn time_slot_roundtrips_postgres_time_columns() {
        let row = json!({
            "id": "7a65e9e2-3c5a-4ee0-a913-98c33e2e7c4f",
            "slot_date": "2024-06-03",
            "start_time": "09:00:00",
            "end_time": "09:30:00",
            "status": "available",
            "service_id": null,
            "appointment_id": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        });

        let slot: TimeSlot = serde_json::from_value(row).unwrap();
        assert_eq!(slot.status, SlotStatus::Available);
        assert_eq!(slot.start_time.format("%H:%M").to_string(), "09:00");

        let back = serde_json::to_value(&slot).unwrap();
        assert_eq!(back["start_time"], "09:00");
        assert_eq!(back["end_time"], "09:30");
    }

    #[test]
    fn appointment_status_uses_snake_case() {
        assert_eq!(
            serde_json::to_value(AppointmentStatus::Confirmed).unwrap(),
            json!("confirmed")
        );
        assert_eq!(AppointmentStatus::Cancelled.to_string(), "cancelled");
        assert!(AppointmentStatus::Completed.is_terminal());
        assert!(!AppointmentStatus::Pending.is_terminal());
    }

    #[test]
    fn unknown_payment_status_degrades_to_unknown() {
        let intent: PaymentIntent = serde_json::from_value(json!({
            "id": "pi_123",
            "status": "some_future_status"
        }))
        .unwrap();
        assert_eq!(intent.status, PaymentIntentStatus::Unknown);
    }
}
