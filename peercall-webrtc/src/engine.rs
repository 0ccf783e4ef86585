//! Capability interface of the real-time media engine.
//!
//! The call session only talks to the engine through these traits, so it can be driven by the
//! webrtc-rs backed [`crate::rtc::RtcEngine`] in production and by a fake in tests.

use crate::error::{MediaAccessError, WebrtcError};
use async_trait::async_trait;
use peercall_protocol::{IceCandidate, IceConfig, SessionDescription};
use std::fmt::{Display, Formatter};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl Display for TrackKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
        }
    }
}

/// Which capture devices to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
}

/// A track announced by the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Callbacks of a peer connection, delivered through a broadcast channel.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    ConnectionState(PeerConnectionState),
    /// A locally gathered candidate that has to be trickled to the remote peer.
    IceCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
    Error(String),
}

/// Handle to captured local media. Stopping the stream releases the capture devices.
pub trait MediaStream: Send + Sync + 'static {
    fn id(&self) -> &str;
    fn tracks(&self) -> Vec<TrackInfo>;
    fn stop(&self);
}

#[async_trait]
pub trait PeerConnection: Send + Sync + 'static {
    type Stream: MediaStream;

    /// Attaches every track of the local stream to the connection.
    async fn add_stream(&self, stream: &Self::Stream) -> Result<(), WebrtcError>;

    /// Creates an offer and sets it as local description.
    async fn create_offer(&self) -> Result<SessionDescription, WebrtcError>;

    /// Sets `offer` as remote description, then creates an answer and sets it as local
    /// description.
    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, WebrtcError>;

    /// Sets `answer` as remote description.
    async fn accept_answer(&self, answer: SessionDescription) -> Result<(), WebrtcError>;

    async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> Result<(), WebrtcError>;

    async fn close(&self) -> Result<(), WebrtcError>;
}

#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    type Stream: MediaStream;
    type Connection: PeerConnection<Stream = Self::Stream>;

    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Self::Stream, MediaAccessError>;

    async fn new_peer_connection(
        &self,
        config: &IceConfig,
    ) -> Result<(Self::Connection, broadcast::Receiver<PeerEvent>), WebrtcError>;
}
