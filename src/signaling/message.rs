//! Signaling message codec.
//!
//! Every frame on the signaling channel is a JSON object with a `type`
//! field plus fields specific to that type:
//!
//! ```text
//! {"type":"offer","sdp":"v=0\r\n..."}                       (outbound)
//! {"type":"answer","sdp":"v=0\r\n..."}                      (inbound)
//! {"type":"iceCandidate","candidate":{"candidate":"..."}}  (both ways)
//! {"type":"playerCount","count":3}                          (inbound)
//! {"type":"config", ...}                                    (inbound)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SignalingError;

/// Offer or answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description as exchanged with the engine and the remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate descriptor (the browser `RTCIceCandidateInit` shape).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Parses a candidate descriptor from its JSON form.
    pub fn from_value(value: Value) -> Result<Self, SignalingError> {
        let candidate: IceCandidate =
            serde_json::from_value(value).map_err(|e| SignalingError::Decode(e.to_string()))?;
        if candidate.candidate.trim().is_empty() {
            return Err(SignalingError::Decode("empty candidate line".to_string()));
        }
        Ok(candidate)
    }
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    /// The descriptor is kept raw; the negotiator parses it.
    IceCandidate { candidate: Value },
    PlayerCount { count: i64 },
    Config { payload: Value },
    Unknown { message_type: String },
}

impl InboundMessage {
    /// Decodes one text frame.
    ///
    /// Fails when the frame is not a JSON object, when `type` is missing or
    /// not a string, or when a known type lacks its required fields.
    pub fn decode(text: &str) -> Result<Self, SignalingError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| SignalingError::Decode(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| SignalingError::Decode("frame is not a JSON object".to_string()))?;
        let message_type = match object.get("type") {
            Some(Value::String(t)) => t.as_str(),
            Some(other) => {
                return Err(SignalingError::Decode(format!(
                    "'type' must be a string, got {}",
                    other
                )))
            }
            None => return Err(SignalingError::Decode("missing 'type' field".to_string())),
        };

        let message = match message_type {
            "offer" => InboundMessage::Offer {
                sdp: required_str(object, "sdp")?,
            },
            "answer" => InboundMessage::Answer {
                sdp: required_str(object, "sdp")?,
            },
            "iceCandidate" => InboundMessage::IceCandidate {
                candidate: object
                    .get("candidate")
                    .cloned()
                    .ok_or_else(|| SignalingError::Decode("missing 'candidate' field".to_string()))?,
            },
            "playerCount" => InboundMessage::PlayerCount {
                count: object
                    .get("count")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| {
                        SignalingError::Decode("'count' must be an integer".to_string())
                    })?,
            },
            "config" => InboundMessage::Config {
                payload: value.clone(),
            },
            other => InboundMessage::Unknown {
                message_type: other.to_string(),
            },
        };
        Ok(message)
    }
}

fn required_str(object: &serde_json::Map<String, Value>, field: &str) -> Result<String, SignalingError> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SignalingError::Decode(format!("missing string field '{}'", field)))
}

/// Frames this side sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    Offer { sdp: String },
    IceCandidate { candidate: IceCandidate },
}

impl OutboundMessage {
    pub fn encode(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self).map_err(|e| SignalingError::Encode(e.to_string()))
    }
}
