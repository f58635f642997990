//! webOS ssap protocol messages.
//!
//! The television speaks a JSON envelope over a secure WebSocket:
//! requests carry `{id, type, uri, payload}` and replies echo the id. A
//! `register` exchange authorizes the client (an on-screen prompt on first
//! pairing); a `subscribe` request makes the television push updates for the
//! same id for the lifetime of the connection.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Request URIs understood by the television.
pub mod uri {
    pub const CHANGE_SOUND_OUTPUT: &str = "ssap://audio/changeSoundOutput";
    pub const GET_SOUND_OUTPUT: &str = "ssap://audio/getSoundOutput";
    pub const GET_VOLUME: &str = "ssap://audio/getVolume";
    pub const VOLUME_UP: &str = "ssap://audio/volumeUp";
    pub const VOLUME_DOWN: &str = "ssap://audio/volumeDown";
    pub const SET_VOLUME: &str = "ssap://audio/setVolume";
    pub const SET_MUTE: &str = "ssap://audio/setMute";
    pub const TURN_OFF: &str = "ssap://system/turnOff";
}

/// Wire id used for the registration exchange.
pub const REGISTER_ID: &str = "register_0";

/// An outbound ssap envelope.
#[derive(Debug, Serialize)]
pub struct SsapRequest<'a> {
    pub id: &'a str,
    #[serde(rename = "type")]
    pub kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<&'a str>,
    pub payload: Value,
}

impl<'a> SsapRequest<'a> {
    pub fn register(id: &'a str, payload: Value) -> Self {
        Self {
            id,
            kind: "register",
            uri: None,
            payload,
        }
    }

    pub fn request(id: &'a str, uri: &'a str, payload: Value) -> Self {
        Self {
            id,
            kind: "request",
            uri: Some(uri),
            payload,
        }
    }

    pub fn subscribe(id: &'a str, uri: &'a str) -> Self {
        Self {
            id,
            kind: "subscribe",
            uri: Some(uri),
            payload: json!({}),
        }
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("ssap envelope serializes")
    }
}

/// An inbound ssap envelope.
#[derive(Debug, Deserialize)]
pub struct SsapReply {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// Registration payload: the stored pairing key (if any) plus the permission
/// manifest for the operations this proxy performs.
pub fn register_payload(client_key: Option<&str>) -> Value {
    let mut payload = json!({
        "forcePairing": false,
        "pairingType": "PROMPT",
        "manifest": {
            "manifestVersion": 1,
            "permissions": [
                "CONTROL_AUDIO",
                "CONTROL_POWER",
                "READ_CURRENT_CHANNEL",
                "READ_INSTALLED_APPS",
                "READ_RUNNING_APPS",
                "CONTROL_DISPLAY",
            ],
        },
    });
    if let Some(key) = client_key {
        payload["client-key"] = Value::String(key.to_string());
    }
    payload
}

/// A volume/mute push from the television.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeUpdate {
    pub volume: u8,
    pub muted: bool,
}

/// Parses a volume payload.
///
/// Older firmware reports `{"volume": 12, "muted": false}` at the top
/// level; webOS 5+ nests it as
/// `{"volumeStatus": {"volume": 12, "muteStatus": false}}`. Both shapes are
/// accepted.
pub fn parse_volume_payload(payload: &Value) -> Option<VolumeUpdate> {
    let status = payload.get("volumeStatus").unwrap_or(payload);

    let volume = status.get("volume")?.as_u64()?;
    let muted = status
        .get("muted")
        .or_else(|| status.get("muteStatus"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Some(VolumeUpdate {
        volume: volume.min(100) as u8,
        muted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_payload_carries_stored_key() {
        let payload = register_payload(Some("abc123"));
        assert_eq!(payload["client-key"], "abc123");
        assert_eq!(payload["pairingType"], "PROMPT");

        let fresh = register_payload(None);
        assert!(fresh.get("client-key").is_none());
    }

    #[test]
    fn request_envelope_round_trips() {
        let text = SsapRequest::request("req_1", uri::VOLUME_UP, json!({})).to_text();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["id"], "req_1");
        assert_eq!(value["type"], "request");
        assert_eq!(value["uri"], uri::VOLUME_UP);
    }

    #[test]
    fn register_envelope_omits_uri() {
        let text = SsapRequest::register(REGISTER_ID, register_payload(None)).to_text();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert!(value.get("uri").is_none());
        assert_eq!(value["type"], "register");
    }

    #[test]
    fn parses_legacy_volume_shape() {
        let payload = json!({"returnValue": true, "volume": 12, "muted": true});
        let update = parse_volume_payload(&payload).unwrap();
        assert_eq!(update.volume, 12);
        assert!(update.muted);
    }

    #[test]
    fn parses_nested_volume_status_shape() {
        let payload = json!({
            "volumeStatus": {"volume": 37, "muteStatus": false, "maxVolume": 100},
            "callerId": "ssap.caller"
        });
        let update = parse_volume_payload(&payload).unwrap();
        assert_eq!(update.volume, 37);
        assert!(!update.muted);
    }

    #[test]
    fn volume_is_clamped_to_the_valid_range() {
        let payload = json!({"volume": 400});
        assert_eq!(parse_volume_payload(&payload).unwrap().volume, 100);
    }

    #[test]
    fn payload_without_volume_is_rejected() {
        assert!(parse_volume_payload(&json!({"returnValue": true})).is_none());
    }

    #[test]
    fn reply_deserializes_error_frames() {
        let reply: SsapReply = serde_json::from_str(
            r#"{"type":"error","id":"req_3","error":"401 insufficient permissions","payload":{}}"#,
        )
        .unwrap();
        assert_eq!(reply.kind, "error");
        assert_eq!(reply.id.as_deref(), Some("req_3"));
        assert_eq!(reply.error.as_deref(), Some("401 insufficient permissions"));
    }
}
