use crate::engine::{PeerConnectionState, TrackKind};
use anyhow::Context;
use peercall_protocol::{IceCandidate, IceConfig, SessionDescription};
use std::time::Duration;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

pub const PEER_EVENTS_CAPACITY: usize = 64;
pub const ENCODED_FRAME_BUFFER_SIZE: usize = 512;

pub const AUDIO_CLOCK_RATE: u32 = 48_000;
pub const AUDIO_CHANNELS: u16 = 2;
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

pub const AUDIO_FRAME_DURATION: Duration = Duration::from_millis(20);
pub const VIDEO_FRAME_DURATION: Duration = Duration::from_millis(33);

pub const AUDIO_TRACK_ID: &str = "audio";
pub const VIDEO_TRACK_ID: &str = "video";

/// Conversion of peercall types into their webrtc-rs counterparts.
pub trait IntoRtc<T> {
    fn into_rtc(self) -> T;
}

impl IntoRtc<RTCConfiguration> for &IceConfig {
    fn into_rtc(self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }
}

impl IntoRtc<RTCIceCandidateInit> for IceCandidate {
    fn into_rtc(self) -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: self.candidate,
            sdp_mid: self.sdp_mid,
            sdp_mline_index: self.sdp_mline_index,
            username_fragment: self.username_fragment,
        }
    }
}

/// Conversion of webrtc-rs types back into peercall types.
pub trait FromRtc<T> {
    fn from_rtc(value: T) -> Self;
}

impl FromRtc<RTCIceCandidateInit> for IceCandidate {
    fn from_rtc(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<RTCPeerConnectionState> for PeerConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
            _ => PeerConnectionState::New,
        }
    }
}

pub(crate) fn track_kind(codec_type: RTPCodecType) -> Option<TrackKind> {
    match codec_type {
        RTPCodecType::Audio => Some(TrackKind::Audio),
        RTPCodecType::Video => Some(TrackKind::Video),
        _ => None,
    }
}

// Session descriptions travel as their JSON form, which webrtc-rs shares with browsers.
pub(crate) fn to_rtc_description(
    description: &SessionDescription,
) -> anyhow::Result<RTCSessionDescription> {
    let value = serde_json::to_value(description).context("Failed to serialize description")?;
    serde_json::from_value(value).context("Failed to deserialize SDP")
}

pub(crate) fn from_rtc_description(
    description: &RTCSessionDescription,
) -> anyhow::Result<SessionDescription> {
    let value =
        serde_json::to_value(description).context("Failed to serialize local description")?;
    serde_json::from_value(value).context("Failed to convert local description")
}
