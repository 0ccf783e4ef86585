//! In-memory media engine and capture source for driving a call session without devices or
//! network.
//!
//! Every operation is recorded so tests can assert on what a session asked the engine to do. The
//! fake follows the offer/answer rules of a real engine closely enough for out-of-order
//! signaling to fail the same way.

use crate::capture::{CaptureHandle, CaptureSource};
use crate::config::PEER_EVENTS_CAPACITY;
use crate::engine::{
    MediaConstraints, MediaEngine, MediaStream, PeerConnection, PeerConnectionState, PeerEvent,
    RemoteTrack, TrackInfo, TrackKind,
};
use crate::error::{MediaAccessError, WebrtcError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use peercall_protocol::{IceCandidate, IceConfig, SdpType, SessionDescription};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Capture devices a fake reports as present and whether the user allowed access to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureDevices {
    pub audio: bool,
    pub video: bool,
    pub permission_granted: bool,
}

impl Default for CaptureDevices {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            permission_granted: true,
        }
    }
}

impl CaptureDevices {
    pub fn check(&self, constraints: MediaConstraints) -> Result<(), MediaAccessError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaAccessError::InvalidConstraints);
        }
        if constraints.audio {
            self.check_kind(TrackKind::Audio)?;
        }
        if constraints.video {
            self.check_kind(TrackKind::Video)?;
        }
        Ok(())
    }

    pub fn check_kind(&self, kind: TrackKind) -> Result<(), MediaAccessError> {
        if !self.permission_granted {
            return Err(MediaAccessError::PermissionDenied);
        }
        let present = match kind {
            TrackKind::Audio => self.audio,
            TrackKind::Video => self.video,
        };
        if !present {
            return Err(MediaAccessError::NoDevice(kind));
        }
        Ok(())
    }
}

#[derive(Default)]
struct CaptureInner {
    devices: CaptureDevices,
    frame: Option<Bytes>,
    started: Mutex<Vec<(TrackKind, CancellationToken)>>,
    frames_sent: AtomicUsize,
}

/// Capture source for a [`crate::rtc::RtcEngine`] that opens no devices. Clones share what was
/// started.
#[derive(Clone, Default)]
pub struct FakeCapture {
    inner: Arc<CaptureInner>,
}

impl FakeCapture {
    pub fn new(devices: CaptureDevices) -> Self {
        Self {
            inner: Arc::new(CaptureInner {
                devices,
                ..Default::default()
            }),
        }
    }

    /// Every started capture pushes `frame` once.
    pub fn with_frame(self, frame: &'static [u8]) -> Self {
        Self {
            inner: Arc::new(CaptureInner {
                devices: self.inner.devices,
                frame: Some(Bytes::from_static(frame)),
                ..Default::default()
            }),
        }
    }

    pub fn started(&self) -> Vec<TrackKind> {
        self.inner
            .started
            .lock()
            .iter()
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn is_running(&self, kind: TrackKind) -> bool {
        self.inner
            .started
            .lock()
            .iter()
            .any(|(started, cancel)| *started == kind && !cancel.is_cancelled())
    }

    pub fn frames_sent(&self) -> usize {
        self.inner.frames_sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureSource for FakeCapture {
    async fn start(
        &self,
        kind: TrackKind,
        frames_tx: mpsc::Sender<Bytes>,
    ) -> Result<CaptureHandle, MediaAccessError> {
        self.inner.devices.check_kind(kind)?;

        let cancel = CancellationToken::new();
        self.inner.started.lock().push((kind, cancel.clone()));
        if let Some(frame) = &self.inner.frame
            && frames_tx.send(frame.clone()).await.is_ok()
        {
            self.inner.frames_sent.fetch_add(1, Ordering::SeqCst);
        }
        Ok(CaptureHandle::new(kind, cancel))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOp {
    AddStream(String),
    CreateOffer,
    AcceptOffer(SessionDescription),
    AcceptAnswer(SessionDescription),
    AddIceCandidate(IceCandidate),
    Close,
}

#[derive(Default)]
struct Descriptions {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
}

struct ConnectionInner {
    id: usize,
    ops: Mutex<Vec<FakeOp>>,
    descriptions: Mutex<Descriptions>,
    closed: AtomicBool,
    events_tx: broadcast::Sender<PeerEvent>,
}

/// Test-side view of a connection created by a [`FakeEngine`].
#[derive(Clone)]
pub struct FakeConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl FakeConnectionHandle {
    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn ops(&self) -> Vec<FakeOp> {
        self.inner.ops.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.inner.descriptions.lock().remote.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.inner.descriptions.lock().local.clone()
    }

    /// Delivers `event` as if the engine had raised it.
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.inner.events_tx.send(event);
    }

    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                FakeOp::AddIceCandidate(candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }
}

pub struct FakeConnection {
    inner: Arc<ConnectionInner>,
    local_candidates: usize,
    auto_connect: bool,
}

impl FakeConnection {
    fn record(&self, op: FakeOp) -> Result<(), WebrtcError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(WebrtcError::Closed);
        }
        self.inner.ops.lock().push(op);
        Ok(())
    }

    fn set_local(&self, description: SessionDescription) {
        self.inner.descriptions.lock().local = Some(description);
        for n in 0..self.local_candidates {
            let candidate = IceCandidate {
                candidate: format!(
                    "candidate:{n} 1 udp 2122260223 10.0.{}.{n} 5000{n} typ host",
                    self.inner.id
                ),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            };
            let _ = self.inner.events_tx.send(PeerEvent::IceCandidate(candidate));
        }
        self.maybe_connect();
    }

    fn maybe_connect(&self) {
        if !self.auto_connect {
            return;
        }
        let descriptions = self.inner.descriptions.lock();
        if descriptions.local.is_some() && descriptions.remote.is_some() {
            let _ = self.inner.events_tx.send(PeerEvent::ConnectionState(
                PeerConnectionState::Connected,
            ));
            let _ = self.inner.events_tx.send(PeerEvent::RemoteTrack(RemoteTrack {
                id: "video".to_string(),
                stream_id: format!("remote-stream-{}", self.inner.id),
                kind: TrackKind::Video,
            }));
        }
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    type Stream = FakeMediaStream;

    async fn add_stream(&self, stream: &FakeMediaStream) -> Result<(), WebrtcError> {
        self.record(FakeOp::AddStream(stream.id().to_string()))
    }

    async fn create_offer(&self) -> Result<SessionDescription, WebrtcError> {
        self.record(FakeOp::CreateOffer)?;
        let offer = SessionDescription::offer(format!("fake-offer-{}", self.inner.id));
        self.set_local(offer.clone());
        Ok(offer)
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, WebrtcError> {
        self.record(FakeOp::AcceptOffer(offer.clone()))?;
        if offer.kind != SdpType::Offer {
            return Err(WebrtcError::InvalidState(format!(
                "expected offer, got {:?}",
                offer.kind
            )));
        }
        if self.inner.descriptions.lock().local.is_some() {
            return Err(WebrtcError::InvalidState(
                "local description already set".to_string(),
            ));
        }

        self.inner.descriptions.lock().remote = Some(offer);
        let answer = SessionDescription::answer(format!("fake-answer-{}", self.inner.id));
        self.set_local(answer.clone());
        Ok(answer)
    }

    async fn accept_answer(&self, answer: SessionDescription) -> Result<(), WebrtcError> {
        self.record(FakeOp::AcceptAnswer(answer.clone()))?;
        if answer.kind != SdpType::Answer {
            return Err(WebrtcError::InvalidState(format!(
                "expected answer, got {:?}",
                answer.kind
            )));
        }
        {
            let mut descriptions = self.inner.descriptions.lock();
            let has_local_offer = descriptions
                .local
                .as_ref()
                .is_some_and(|local| local.kind == SdpType::Offer);
            if !has_local_offer || descriptions.remote.is_some() {
                return Err(WebrtcError::InvalidState(
                    "no pending local offer".to_string(),
                ));
            }
            descriptions.remote = Some(answer);
        }
        self.maybe_connect();
        Ok(())
    }

    async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> Result<(), WebrtcError> {
        if self.inner.descriptions.lock().remote.is_none() {
            return Err(WebrtcError::InvalidState(
                "remote description not set".to_string(),
            ));
        }
        self.record(FakeOp::AddIceCandidate(candidate))
    }

    async fn close(&self) -> Result<(), WebrtcError> {
        self.record(FakeOp::Close)?;
        self.inner.closed.store(true, Ordering::SeqCst);
        let _ = self
            .inner
            .events_tx
            .send(PeerEvent::ConnectionState(PeerConnectionState::Closed));
        Ok(())
    }
}

/// Captured stream of a [`FakeEngine`]; clones share the stopped flag.
#[derive(Clone)]
pub struct FakeMediaStream {
    id: String,
    tracks: Vec<TrackInfo>,
    stopped: Arc<AtomicBool>,
}

impl FakeMediaStream {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaStream for FakeMediaStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn tracks(&self) -> Vec<TrackInfo> {
        self.tracks.clone()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct EngineInner {
    devices: CaptureDevices,
    local_candidates: usize,
    auto_connect: bool,
    failing_connections: AtomicBool,
    connections: Mutex<Vec<FakeConnectionHandle>>,
    streams: Mutex<Vec<FakeMediaStream>>,
}

/// Cloneable fake engine; clones observe the same connections and streams.
#[derive(Clone, Default)]
pub struct FakeEngine {
    inner: Arc<EngineInner>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: CaptureDevices) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                devices,
                ..Default::default()
            }),
        }
    }

    /// Every connection reports `count` local candidates whenever its local description is set.
    pub fn with_local_candidates(self, count: usize) -> Self {
        self.rebuild(|inner| inner.local_candidates = count)
    }

    /// Connections report `Connected` and a remote video track once both descriptions are set.
    pub fn with_auto_connect(self) -> Self {
        self.rebuild(|inner| inner.auto_connect = true)
    }

    fn rebuild(self, f: impl FnOnce(&mut EngineInner)) -> Self {
        let mut inner = EngineInner {
            devices: self.inner.devices,
            local_candidates: self.inner.local_candidates,
            auto_connect: self.inner.auto_connect,
            failing_connections: AtomicBool::new(
                self.inner.failing_connections.load(Ordering::SeqCst),
            ),
            ..Default::default()
        };
        f(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// While set, creating a peer connection fails.
    pub fn set_failing_connections(&self, failing: bool) {
        self.inner
            .failing_connections
            .store(failing, Ordering::SeqCst);
    }

    pub fn connections(&self) -> Vec<FakeConnectionHandle> {
        self.inner.connections.lock().clone()
    }

    pub fn last_connection(&self) -> Option<FakeConnectionHandle> {
        self.inner.connections.lock().last().cloned()
    }

    pub fn streams(&self) -> Vec<FakeMediaStream> {
        self.inner.streams.lock().clone()
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    type Stream = FakeMediaStream;
    type Connection = FakeConnection;

    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<FakeMediaStream, MediaAccessError> {
        self.inner.devices.check(constraints)?;

        let mut streams = self.inner.streams.lock();
        let id = format!("local-stream-{}", streams.len());
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(TrackInfo {
                id: "audio".to_string(),
                kind: TrackKind::Audio,
            });
        }
        if constraints.video {
            tracks.push(TrackInfo {
                id: "video".to_string(),
                kind: TrackKind::Video,
            });
        }

        let stream = FakeMediaStream {
            id,
            tracks,
            stopped: Arc::new(AtomicBool::new(false)),
        };
        streams.push(stream.clone());
        Ok(stream)
    }

    async fn new_peer_connection(
        &self,
        _config: &IceConfig,
    ) -> Result<(FakeConnection, broadcast::Receiver<PeerEvent>), WebrtcError> {
        if self.inner.failing_connections.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Failed to create peer connection").into());
        }

        let (events_tx, events_rx) = broadcast::channel(PEER_EVENTS_CAPACITY);

        let mut connections = self.inner.connections.lock();
        let inner = Arc::new(ConnectionInner {
            id: connections.len(),
            ops: Mutex::new(Vec::new()),
            descriptions: Mutex::new(Descriptions::default()),
            closed: AtomicBool::new(false),
            events_tx,
        });
        connections.push(FakeConnectionHandle {
            inner: Arc::clone(&inner),
        });

        Ok((
            FakeConnection {
                inner,
                local_candidates: self.inner.local_candidates,
                auto_connect: self.inner.auto_connect,
            },
            events_rx,
        ))
    }
}
