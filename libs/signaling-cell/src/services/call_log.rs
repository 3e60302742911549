// libs/signaling-cell/src/services/call_log.rs
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{CallEventSource, CallEventType, CallLogEntry, SignalingError};

/// Append-only audit trail for calls and chat. Writes are best-effort:
/// call setup and message relay must never fail because logging did.
pub struct CallEventLogService {
    supabase: Arc<SupabaseClient>,
}

impl CallEventLogService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Record one event. A storage failure is warn-logged and swallowed.
    pub async fn record(
        &self,
        appointment_id: Uuid,
        user_id: Uuid,
        event_type: CallEventType,
        source: CallEventSource,
        details: Value,
        auth_token: &str,
    ) {
        let body = json!({
            "appointment_id": appointment_id,
            "user_id": user_id,
            "event_type": event_type,
            "source": source,
            "details": details,
        });

        let result: Result<Value, _> = self
            .supabase
            .request(Method::POST, "/rest/v1/call_logs", Some(auth_token), Some(body))
            .await;

        match result {
            Ok(_) => debug!(
                "Recorded {} event for appointment {} (source {})",
                event_type, appointment_id, source
            ),
            Err(e) => warn!(
                "Failed to record {} event for appointment {}: {}",
                event_type, appointment_id, e
            ),
        }
    }

    /// Event history for an appointment, newest first.
    pub async fn history(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<CallLogEntry>, SignalingError> {
        let path = format!(
            "/rest/v1/call_logs?appointment_id=eq.{}&order=created_at.desc",
            appointment_id
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SignalingError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<CallLogEntry>, _>>()
            .map_err(|e| SignalingError::DatabaseError(e.to_string()))
    }
}
