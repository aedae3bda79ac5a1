//! Typed gateway events.
//!
//! The gateway driver turns every raw [`GatewayPayload`] into a
//! [`GatewayEvent`] so the bot loop can match on data instead of opcodes.

use tracing::warn;

use crate::types::*;

/// A parsed event coming off the Discord gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Identify / resume accepted.
    Ready(ReadyEvent),

    /// A slash command or a button press.
    InteractionCreate(Interaction),

    /// Heartbeat ACK (op 11).
    HeartbeatAck,

    /// Discord wants a heartbeat right now (op 1).
    HeartbeatRequest,

    /// Discord asked us to reconnect (op 7).
    Reconnect,

    /// Session invalidated (op 9); `true` if it can be resumed.
    InvalidSession(bool),

    /// Anything without a typed variant, kept raw.
    Unknown {
        event_name: Option<String>,
        op: u8,
        data: Option<serde_json::Value>,
    },
}

impl GatewayEvent {
    /// Convert a raw payload. Never fails: unknown or malformed events
    /// become [`GatewayEvent::Unknown`].
    pub fn from_payload(payload: GatewayPayload) -> Self {
        match payload.op {
            0 => Self::dispatch(payload.t, payload.d),
            1 => GatewayEvent::HeartbeatRequest,
            7 => GatewayEvent::Reconnect,
            9 => GatewayEvent::InvalidSession(
                payload.d.as_ref().and_then(|v| v.as_bool()).unwrap_or(false),
            ),
            11 => GatewayEvent::HeartbeatAck,
            op => GatewayEvent::Unknown {
                event_name: payload.t,
                op,
                data: payload.d,
            },
        }
    }

    fn dispatch(name: Option<String>, data: Option<serde_json::Value>) -> Self {
        let parsed = match (name.as_deref(), &data) {
            (Some("READY"), Some(d)) => typed(d, "READY", GatewayEvent::Ready),
            (Some("INTERACTION_CREATE"), Some(d)) => {
                typed(d, "INTERACTION_CREATE", GatewayEvent::InteractionCreate)
            }
            _ => None,
        };

        parsed.unwrap_or(GatewayEvent::Unknown {
            event_name: name,
            op: 0,
            data,
        })
    }
}

fn typed<T, F>(data: &serde_json::Value, name: &str, wrap: F) -> Option<GatewayEvent>
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(T) -> GatewayEvent,
{
    match serde_json::from_value::<T>(data.clone()) {
        Ok(value) => Some(wrap(value)),
        Err(e) => {
            warn!(event = name, error = %e, "failed to parse dispatch payload");
            None
        }
    }
}
