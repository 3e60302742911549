// libs/signaling-cell/src/lib.rs
//! # Signaling Cell
//!
//! This cell carries the real-time side of an appointment: a WebSocket
//! relay between the two participants of a confirmed appointment, plus
//! REST call-control endpoints that drive the call state and an auditable
//! event log.
//!
//! ## Features
//!
//! - **Per-appointment Rooms**: Connections are keyed by appointment and user,
//!   frames only ever reach the other participants of the same appointment
//! - **REST Call Control**: Initiate, accept and end calls over plain HTTP
//! - **Chat Relay**: Messages fan out over live sockets and land in the log
//! - **Call Event Log**: Every control event is recorded with its source
//! - **Reconnect Grace**: Dropped sockets linger briefly so a reconnecting
//!   client keeps its place instead of being forgotten mid-call
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------+
//! |                  Signaling Cell                     |
//! +-----------------------------------------------------+
//! |  handlers.rs    |  HTTP + WebSocket upgrade         |
//! |  router.rs      |  Route definitions                |
//! |  models.rs      |  Data structures & DTOs           |
//! |  services/      |  Business logic layer             |
//! |    registry.rs  |  Live connection registry         |
//! |    session.rs   |  WebSocket session driver         |
//! |    access.rs    |  Participant authorization        |
//! |    call_log.rs  |  Call event persistence           |
//! +-----------------------------------------------------+
//! ```
//!
//! ## API Endpoints
//!
//! ### Call Control (bearer token)
//! - `POST /chat/{appointment_id}/send` - Relay a chat message
//! - `POST /chat/{appointment_id}/call` - Start a call
//! - `POST /chat/{appointment_id}/accept` - Accept a ringing call
//! - `POST /chat/{appointment_id}/end-call` - Hang up
//! - `GET /chat/{appointment_id}/history` - Call event log, newest first
//!
//! ### WebSocket
//! - `GET /signaling/ws?token=...&appointment_id=...&user_id=...` - Join the room

use std::sync::Arc;

use shared_config::AppConfig;

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

use crate::services::SignalingRegistry;

/// Shared state for the signaling routes.
///
/// The registry must be created once at startup and handed to every
/// router that needs it; building a fresh one per route would split the
/// connection table and REST broadcasts would never find the sockets.
#[derive(Clone)]
pub struct SignalingState {
    pub config: Arc<AppConfig>,
    pub registry: SignalingRegistry,
}

impl SignalingState {
    pub fn new(config: Arc<AppConfig>, registry: SignalingRegistry) -> Self {
        Self { config, registry }
    }
}

// Re-export commonly used types
pub use models::{
    CallEventSource, CallEventType, CallLogEntry, ConnectionKey, InitiateCallRequest,
    OutboundMessage, SendMessageRequest, SignalingError,
};

pub use services::{AppointmentAccessService, CallEventLogService};

pub use router::{chat_routes, signaling_routes};
