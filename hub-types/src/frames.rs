//! Relay channel frames.
//!
//! Every frame is a JSON object carrying a `type` discriminator. Inbound
//! frames are decoded leniently: a frame of a known type with missing fields
//! still decodes, and the relay reports the missing fields itself. Payloads
//! are kept as the exact JSON text the sender wrote so they can be forwarded
//! without re-encoding.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::Value;
use std::fmt;

use crate::{FrameError, UserId};

/// An opaque relayed payload.
///
/// Holds the sender's JSON text verbatim (key order, whitespace and number
/// formatting included). By convention clients put `{ciphertext, nonce,
/// sender}` here; the relay never looks inside.
#[derive(Clone)]
pub struct Payload(Box<RawValue>);

impl Payload {
    /// Wrap a JSON value given as text.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidJson`] if `json` is not a single JSON value.
    pub fn from_json(json: &str) -> Result<Self, FrameError> {
        RawValue::from_string(json.to_string())
            .map(Self)
            .map_err(|_| FrameError::InvalidJson)
    }

    /// The payload exactly as received.
    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    /// Length of the payload JSON text in bytes.
    pub fn len(&self) -> usize {
        self.0.get().len()
    }

    /// Returns `true` if the payload text is empty.
    pub fn is_empty(&self) -> bool {
        self.0.get().is_empty()
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload([REDACTED; {} bytes])", self.len())
    }
}

/// A frame sent by a client.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    /// Bind this connection to a user id.
    ///
    /// `user_id` is `None` when the field is absent, empty or not a string.
    Identify {
        /// Claimed user id
        user_id: Option<UserId>,
    },
    /// Relay a payload to another user.
    Send {
        /// Destination user id (`None` if absent, empty or not a string)
        to: Option<UserId>,
        /// Opaque payload (`None` if absent or `null`)
        payload: Option<Payload>,
    },
    /// Application-level liveness check
    Ping,
}

/// Field view of an inbound frame before the `type` is interpreted.
#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<Value>,
    #[serde(rename = "userId")]
    user_id: Option<Value>,
    to: Option<Value>,
    payload: Option<Box<RawValue>>,
}

fn user_id_field(value: Option<&Value>) -> Option<UserId> {
    value.and_then(Value::as_str).and_then(UserId::new)
}

impl ClientFrame {
    /// Decode a client frame from JSON text.
    ///
    /// # Errors
    ///
    /// - [`FrameError::InvalidJson`] if `text` is not well-formed JSON.
    /// - [`FrameError::UnknownType`] if it is JSON but not an object, or the
    ///   `type` field is missing or unrecognized.
    pub fn from_json(text: &str) -> Result<Self, FrameError> {
        let value: &RawValue = serde_json::from_str(text).map_err(|_| FrameError::InvalidJson)?;
        let value = value.get().trim_start();
        if !value.starts_with('{') {
            return Err(FrameError::UnknownType);
        }

        // Duplicate keys are the only way an object can still fail here.
        let raw: RawFrame = serde_json::from_str(value).map_err(|_| FrameError::InvalidJson)?;

        match raw.kind.as_ref().and_then(Value::as_str) {
            Some("identify") => Ok(ClientFrame::Identify {
                user_id: user_id_field(raw.user_id.as_ref()),
            }),
            Some("send") => Ok(ClientFrame::Send {
                to: user_id_field(raw.to.as_ref()),
                payload: raw.payload.map(Payload),
            }),
            Some("ping") => Ok(ClientFrame::Ping),
            _ => Err(FrameError::UnknownType),
        }
    }

    /// Name of the frame type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Identify { .. } => "identify",
            ClientFrame::Send { .. } => "send",
            ClientFrame::Ping => "ping",
        }
    }
}

/// A frame sent by the relay.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Identify accepted
    Identified {
        /// The user id this connection is now bound to
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    /// Send accepted and forwarded
    Sent {
        /// Destination of the forwarded payload
        to: UserId,
    },
    /// Destination not connected; payload dropped
    Offline {
        /// Destination that could not be reached
        to: UserId,
    },
    /// A payload relayed from another client
    Message {
        /// The payload, verbatim
        payload: Payload,
    },
    /// Response to a client `ping`
    Pong,
    /// Malformed or invalid request
    Error {
        /// Human-readable reason
        message: String,
    },
}

impl ServerFrame {
    /// Build an `error` frame.
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    /// Encode to JSON text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_decodes() {
        let frame = ClientFrame::from_json(r#"{"type":"identify","userId":"alice"}"#).unwrap();
        match frame {
            ClientFrame::Identify { user_id } => {
                assert_eq!(user_id.unwrap().as_str(), "alice");
            }
            other => panic!("expected Identify, got {:?}", other),
        }
    }

    #[test]
    fn identify_without_usable_user_id_decodes_to_none() {
        for text in [
            r#"{"type":"identify"}"#,
            r#"{"type":"identify","userId":""}"#,
            r#"{"type":"identify","userId":null}"#,
            r#"{"type":"identify","userId":42}"#,
        ] {
            let frame = ClientFrame::from_json(text).unwrap();
            assert!(
                matches!(frame, ClientFrame::Identify { user_id: None }),
                "{text}"
            );
        }
    }

    #[test]
    fn send_keeps_payload_text_verbatim() {
        let payload = r#"{ "nonce":"YmFy",  "ciphertext":"Zm9v", "sender":"alice", "n":1.50 }"#;
        let text = format!(r#"{{"type":"send","to":"bob","payload":{payload}}}"#);

        match ClientFrame::from_json(&text).unwrap() {
            ClientFrame::Send { to, payload: p } => {
                assert_eq!(to.unwrap().as_str(), "bob");
                assert_eq!(p.unwrap().as_str(), payload);
            }
            other => panic!("expected Send, got {:?}", other),
        }
    }

    #[test]
    fn send_with_null_payload_has_no_payload() {
        let frame = ClientFrame::from_json(r#"{"type":"send","to":"bob","payload":null}"#).unwrap();
        assert!(matches!(
            frame,
            ClientFrame::Send {
                to: Some(_),
                payload: None
            }
        ));
    }

    #[test]
    fn send_with_missing_fields_still_decodes() {
        let frame = ClientFrame::from_json(r#"{"type":"send"}"#).unwrap();
        assert!(matches!(
            frame,
            ClientFrame::Send {
                to: None,
                payload: None
            }
        ));
    }

    #[test]
    fn ping_decodes() {
        let frame = ClientFrame::from_json(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Ping));
        assert_eq!(frame.kind(), "ping");
    }

    #[test]
    fn malformed_text_is_invalid_json() {
        assert_eq!(
            ClientFrame::from_json("{not json").unwrap_err(),
            FrameError::InvalidJson
        );
        assert_eq!(ClientFrame::from_json("").unwrap_err(), FrameError::InvalidJson);
        assert_eq!(
            ClientFrame::from_json(r#"{"type":"ping","type":"send"}"#).unwrap_err(),
            FrameError::InvalidJson
        );
    }

    #[test]
    fn unknown_or_missing_type_is_rejected() {
        for text in [
            r#"{"type":"subscribe"}"#,
            r#"{"userId":"alice"}"#,
            r#"{"type":7}"#,
            r#"[1,2,3]"#,
            r#""identify""#,
            "null",
        ] {
            assert_eq!(
                ClientFrame::from_json(text).unwrap_err(),
                FrameError::UnknownType,
                "{text}"
            );
        }
    }

    #[test]
    fn server_frames_encode_with_type_tag() {
        let alice = UserId::new("alice").unwrap();

        let identified = ServerFrame::Identified {
            user_id: alice.clone(),
        };
        assert_eq!(
            identified.to_json().unwrap(),
            r#"{"type":"identified","userId":"alice"}"#
        );
        assert_eq!(
            ServerFrame::Sent { to: alice.clone() }.to_json().unwrap(),
            r#"{"type":"sent","to":"alice"}"#
        );
        assert_eq!(
            ServerFrame::Offline { to: alice }.to_json().unwrap(),
            r#"{"type":"offline","to":"alice"}"#
        );
        assert_eq!(ServerFrame::Pong.to_json().unwrap(), r#"{"type":"pong"}"#);
        assert_eq!(
            ServerFrame::error("invalid JSON").to_json().unwrap(),
            r#"{"type":"error","message":"invalid JSON"}"#
        );
    }

    #[test]
    fn message_frame_embeds_payload_unchanged() {
        let payload = Payload::from_json(r#"{"z":1,"a":[true, null]}"#).unwrap();
        let json = ServerFrame::Message { payload }.to_json().unwrap();
        assert_eq!(json, r#"{"type":"message","payload":{"z":1,"a":[true, null]}}"#);
    }

    #[test]
    fn payload_debug_is_redacted() {
        let payload = Payload::from_json(r#"{"ciphertext":"secret"}"#).unwrap();
        let debug = format!("{:?}", payload);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("secret"));
    }
}
