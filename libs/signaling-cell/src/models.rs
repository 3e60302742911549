// libs/signaling-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use scheduling_cell::models::AppointmentStatus;

// ==============================================================================
// CONNECTION MODELS
// ==============================================================================

/// Registry key for one participant's socket. Structured on purpose:
/// broadcasts compare the appointment field, never a concatenated
/// string, so one appointment id being a prefix of another can never
/// cross-deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub appointment_id: Uuid,
    pub user_id: Uuid,
}

impl ConnectionKey {
    pub fn new(appointment_id: Uuid, user_id: Uuid) -> Self {
        Self {
            appointment_id,
            user_id,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.appointment_id, self.user_id)
    }
}

/// Frames handed to a connection's writer task over its mpsc channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Relayed signaling payload, sent verbatim as a text frame.
    Payload(String),
    /// Transport-level heartbeat.
    Ping,
}

pub type ConnectionSender = mpsc::UnboundedSender<OutboundMessage>;

/// Tuning for the in-process registry. Tests shrink the delays; the
/// defaults suit real clients on flaky networks.
#[derive(Debug, Clone, Copy)]
pub struct SignalingConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 3,
            reconnect_base_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

// ==============================================================================
// CALL EVENT LOG MODELS
// ==============================================================================

/// One taxonomy for both logging paths. REST call-control and the raw
/// socket relay record the same event types; `CallEventSource` says
/// which side wrote the entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallEventType {
    CallInitiated,
    CallAccepted,
    CallEnded,
    ChatMessage,
    Signal,
}

impl fmt::Display for CallEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallEventType::CallInitiated => write!(f, "call_initiated"),
            CallEventType::CallAccepted => write!(f, "call_accepted"),
            CallEventType::CallEnded => write!(f, "call_ended"),
            CallEventType::ChatMessage => write!(f, "chat_message"),
            CallEventType::Signal => write!(f, "signal"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallEventSource {
    Rest,
    Socket,
}

impl fmt::Display for CallEventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallEventSource::Rest => write!(f, "rest"),
            CallEventSource::Socket => write!(f, "socket"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLogEntry {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub user_id: Uuid,
    pub event_type: CallEventType,
    pub source: CallEventSource,
    #[serde(default)]
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateCallRequest {
    #[serde(default)]
    pub call_type: Option<String>,
}

/// Query half of the WebSocket URL. Fields stay optional so a bad
/// connect attempt gets a proper close frame instead of an HTTP 400
/// rejected before the upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct WsConnectQuery {
    pub token: Option<String>,
    pub appointment_id: Option<String>,
    pub user_id: Option<String>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum SignalingError {
    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Unauthorized access to appointment")]
    Unauthorized,

    #[error("Call control is not available while the appointment is {0}")]
    NotAvailable(AppointmentStatus),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
