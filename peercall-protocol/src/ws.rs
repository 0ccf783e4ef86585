use crate::webrtc::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};

/// Represents a message exchanged with the signaling relay.
///
/// The relay pairs exactly two participants and forwards every message to the other one, so no
/// message carries a peer or room identifier.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum SignalingMessage {
    /// A call offer sent by the caller.
    ///
    /// The receiving peer sets the description as its remote description and replies with a
    /// [`SignalingMessage::Answer`].
    #[serde(rename = "offer")]
    Offer(SessionDescription),
    /// A call answer sent by the callee in response to a [`SignalingMessage::Offer`].
    #[serde(rename = "answer")]
    Answer(SessionDescription),
    /// An ICE candidate trickled by either peer once its local description has been set.
    #[serde(rename = "ice-candidate")]
    IceCandidate(IceCandidate),
}

impl SignalingMessage {
    /// Serializes a [`SignalingMessage`] into a JSON string.
    pub fn serialize(message: &Self) -> serde_json::error::Result<String> {
        serde_json::to_string(message)
    }

    /// Deserializes a JSON string into a [`SignalingMessage`].
    pub fn deserialize(message: &str) -> serde_json::error::Result<Self> {
        serde_json::from_str(message)
    }

    /// Name of the event as seen on the wire.
    pub fn event(&self) -> &'static str {
        match self {
            SignalingMessage::Offer(_) => "offer",
            SignalingMessage::Answer(_) => "answer",
            SignalingMessage::IceCandidate(_) => "ice-candidate",
        }
    }
}
