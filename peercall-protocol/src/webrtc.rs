use serde::{Deserialize, Serialize};

/// Default STUN server used when no ICE configuration is provided.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Type of a session description, matching the `type` member of a browser `RTCSessionDescription`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// An offer or answer exchanged during negotiation.
///
/// The SDP is treated as opaque and forwarded unmodified between the signaling channel and the
/// media engine.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate, in the JSON form produced by `RTCIceCandidate.toJSON()`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

/// A single STUN or TURN server entry.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// ICE servers handed to every newly created peer connection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IceConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: vec![DEFAULT_STUN_URL.to_string()],
                username: None,
                credential: None,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn session_description_uses_browser_field_names() {
        let offer = SessionDescription::offer("v=0");
        assert_eq!(
            serde_json::to_string(&offer).unwrap(),
            "{\"type\":\"offer\",\"sdp\":\"v=0\"}"
        );
    }

    #[test]
    fn ice_candidate_from_browser_json() {
        let candidate: IceCandidate = serde_json::from_str(
            "{\"candidate\":\"candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host\",\"sdpMid\":\"0\",\"sdpMLineIndex\":0,\"usernameFragment\":\"abcd\"}",
        )
        .unwrap();

        assert_eq!(
            candidate,
            IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: Some("abcd".to_string()),
            }
        );
    }

    #[test]
    fn ice_candidate_optional_members_may_be_missing() {
        let candidate: IceCandidate =
            serde_json::from_str("{\"candidate\":\"candidate:1\"}").unwrap();
        assert_eq!(candidate, IceCandidate::new("candidate:1"));
    }

    #[test]
    fn default_ice_config_is_single_stun_server() {
        let config = IceConfig::default();
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls, vec![DEFAULT_STUN_URL.to_string()]);
        assert!(config.ice_servers[0].username.is_none());
    }
}
