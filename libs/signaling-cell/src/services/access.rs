// libs/signaling-cell/src/services/access.rs
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;

use scheduling_cell::models::{Appointment, AppointmentStatus};

use crate::models::SignalingError;

/// Participant gate shared by the WebSocket endpoint and the REST
/// call-control handlers: the appointment must exist and the caller
/// must own it (admins pass).
pub struct AppointmentAccessService {
    supabase: Arc<SupabaseClient>,
}

impl AppointmentAccessService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn load_for_participant(
        &self,
        appointment_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<Appointment, SignalingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}&limit=1", appointment_id);

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SignalingError::DatabaseError(e.to_string()))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or(SignalingError::AppointmentNotFound)?;
        let appointment: Appointment =
            serde_json::from_value(row).map_err(|e| SignalingError::DatabaseError(e.to_string()))?;

        let is_owner = appointment.user_id.to_string() == user.id;
        let is_admin = user.role.as_deref() == Some("admin");
        if !is_owner && !is_admin {
            return Err(SignalingError::Unauthorized);
        }

        Ok(appointment)
    }
}

/// Chat and call setup unlock once the appointment is confirmed.
pub fn ensure_confirmed(appointment: &Appointment) -> Result<(), SignalingError> {
    if appointment.status != AppointmentStatus::Confirmed {
        return Err(SignalingError::NotAvailable(appointment.status));
    }
    Ok(())
}

/// Hanging up is also allowed right after completion, so a visit
/// marked done mid-call can still end cleanly.
pub fn ensure_endable(appointment: &Appointment) -> Result<(), SignalingError> {
    match appointment.status {
        AppointmentStatus::Confirmed | AppointmentStatus::Completed => Ok(()),
        status => Err(SignalingError::NotAvailable(status)),
    }
}
