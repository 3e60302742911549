// libs/signaling-cell/src/services/session.rs
use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_utils::jwt::validate_token;

use crate::models::{
    CallEventSource, CallEventType, ConnectionKey, OutboundMessage, WsConnectQuery,
};
use crate::services::access::{ensure_confirmed, AppointmentAccessService};
use crate::services::call_log::CallEventLogService;
use crate::SignalingState;

struct AuthorizedConnection {
    key: ConnectionKey,
    token: String,
}

/// Drive one signaling socket from upgrade to close.
///
/// Auth happens after the upgrade so a rejected client gets a proper
/// close frame (policy violation) instead of a failed handshake. An
/// authorized connection registers, then relays every parsed text
/// frame to the other participant until the peer goes away.
pub async fn drive_connection(
    mut socket: WebSocket,
    state: SignalingState,
    params: WsConnectQuery,
) {
    let authorized = match authorize(&state, &params).await {
        Ok(connection) => connection,
        Err(reason) => {
            let frame = CloseFrame {
                code: close_code::POLICY,
                reason: Utf8Bytes::from_static(reason),
            };
            if let Err(e) = socket.send(Message::Close(Some(frame))).await {
                debug!("Failed to deliver close frame: {}", e);
            }
            return;
        }
    };

    let key = authorized.key;
    let token = authorized.token;

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let generation = state.registry.register(key, tx.clone()).await;
    info!("Signaling connection {} open (generation {})", key, generation);

    let (mut sink, mut stream) = socket.split();

    // Writer half; the only task touching the sink.
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let frame = match message {
                OutboundMessage::Payload(text) => Message::Text(text.into()),
                OutboundMessage::Ping => Message::Ping(Bytes::new()),
            };
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Transport-level liveness probe.
    let heartbeat_interval = state.registry.settings().heartbeat_interval;
    let heartbeat_tx = tx.clone();
    let heartbeat_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.tick().await; // the first tick is immediate
        loop {
            ticker.tick().await;
            if heartbeat_tx.send(OutboundMessage::Ping).is_err() {
                break;
            }
        }
    });

    let call_log = CallEventLogService::new(&state.config);

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                handle_text_frame(&state, &call_log, key, text.as_str(), &token).await;
            }
            Ok(Message::Close(_)) => {
                debug!("Connection {} sent close", key);
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {
                warn!("Ignoring binary frame from {}", key);
            }
            Err(e) => {
                debug!("Connection {} errored: {}", key, e);
                break;
            }
        }
    }

    heartbeat_task.abort();
    send_task.abort();
    state.registry.connection_closed(key, generation).await;
    info!("Signaling connection {} closed (generation {})", key, generation);
}

/// A frame must be JSON to be relayed; malformed input is dropped and
/// the connection stays open. Frames carrying a `type` are mirrored
/// into the call log before the relay.
async fn handle_text_frame(
    state: &SignalingState,
    call_log: &CallEventLogService,
    key: ConnectionKey,
    text: &str,
    auth_token: &str,
) {
    let payload: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!("Dropping malformed signaling frame from {}: {}", key, e);
            return;
        }
    };

    if let Some(kind) = payload.get("type").and_then(Value::as_str) {
        let event_type = if kind == "chat-message" {
            CallEventType::ChatMessage
        } else {
            CallEventType::Signal
        };

        call_log
            .record(
                key.appointment_id,
                key.user_id,
                event_type,
                CallEventSource::Socket,
                json!({ "signal_type": kind }),
                auth_token,
            )
            .await;
    }

    let delivered = state
        .registry
        .broadcast(key.appointment_id, text, Some(key.user_id))
        .await;
    debug!("Relayed frame from {} to {} peers", key, delivered);
}

async fn authorize(
    state: &SignalingState,
    params: &WsConnectQuery,
) -> Result<AuthorizedConnection, &'static str> {
    let token = match params.token.as_deref() {
        Some(token) if !token.is_empty() => token,
        _ => return Err("Unauthorized"),
    };

    let user = match validate_token(token, &state.config.supabase_jwt_secret) {
        Ok(user) => user,
        Err(reason) => {
            warn!("Rejecting signaling connection: {}", reason);
            return Err("Unauthorized");
        }
    };

    let appointment_id = match parse_id(params.appointment_id.as_deref()) {
        Some(id) => id,
        None => return Err("Invalid connection parameters"),
    };
    let user_id = match parse_id(params.user_id.as_deref()) {
        Some(id) => id,
        None => return Err("Invalid connection parameters"),
    };

    // The URL identity must be the token's own subject.
    if user.id != user_id.to_string() {
        warn!(
            "Rejecting signaling connection: token subject does not match user {}",
            user_id
        );
        return Err("Unauthorized");
    }

    let access = AppointmentAccessService::new(&state.config);
    let appointment = match access
        .load_for_participant(appointment_id, &user, token)
        .await
    {
        Ok(appointment) => appointment,
        Err(e) => {
            warn!(
                "Rejecting signaling connection for appointment {}: {}",
                appointment_id, e
            );
            return Err("Unauthorized");
        }
    };

    if ensure_confirmed(&appointment).is_err() {
        warn!(
            "Rejecting signaling connection: appointment {} is {}",
            appointment_id, appointment.status
        );
        return Err("Unauthorized");
    }

    Ok(AuthorizedConnection {
        key: ConnectionKey::new(appointment_id, user_id),
        token: token.to_string(),
    })
}

fn parse_id(raw: Option<&str>) -> Option<Uuid> {
    raw.and_then(|value| Uuid::parse_str(value).ok())
}
