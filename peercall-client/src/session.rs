mod handle;
mod state;

pub use handle::{SessionCommand, SessionHandle};
pub use state::{CallRole, CallSettings, CallState, OfferPolicy};

use crate::error::SessionError;
use crate::session::handle::SESSION_COMMANDS_CAPACITY;
use crate::surface::{SurfaceSource, TracingSurface, VideoSurface};
use peercall_protocol::{IceCandidate, SessionDescription, SignalingMessage};
use peercall_signaling::client::SignalingClient;
use peercall_signaling::error::SignalingError;
use peercall_signaling::transport::SignalingTransport;
use peercall_webrtc::{
    MediaEngine, MediaStream, PeerConnection, PeerConnectionState, PeerEvent, RemoteTrack,
};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, instrument};
use uuid::Uuid;

struct Call<C> {
    role: CallRole,
    peer: C,
    events_rx: broadcast::Receiver<PeerEvent>,
}

impl<C> Debug for Call<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call").field("role", &self.role).finish()
    }
}

pub struct CallSessionBuilder<E: MediaEngine, T: SignalingTransport> {
    engine: E,
    transport: T,
    settings: CallSettings,
    local_surface: Arc<dyn VideoSurface>,
    remote_surface: Arc<dyn VideoSurface>,
    shutdown: CancellationToken,
}

impl<E: MediaEngine, T: SignalingTransport> CallSessionBuilder<E, T> {
    pub fn new(engine: E, transport: T) -> Self {
        Self {
            engine,
            transport,
            settings: CallSettings::default(),
            local_surface: Arc::new(TracingSurface::new("local")),
            remote_surface: Arc::new(TracingSurface::new("remote")),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: CallSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_local_surface(mut self, surface: Arc<dyn VideoSurface>) -> Self {
        self.local_surface = surface;
        self
    }

    pub fn with_remote_surface(mut self, surface: Arc<dyn VideoSurface>) -> Self {
        self.remote_surface = surface;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn build(self) -> CallSession<E, T> {
        let (state_tx, _) = watch::channel(CallState::Idle);
        CallSession {
            id: Uuid::new_v4(),
            engine: self.engine,
            signaling: SignalingClient::new(self.transport, self.shutdown.clone()),
            settings: self.settings,
            local_surface: self.local_surface,
            remote_surface: self.remote_surface,
            local_stream: None,
            call: None,
            state_tx,
            shutdown: self.shutdown,
        }
    }
}

/// Controller of a single call: owns the local stream, at most one peer connection and the
/// signaling channel for the whole lifetime of the call.
pub struct CallSession<E: MediaEngine, T: SignalingTransport> {
    id: Uuid,
    engine: E,
    signaling: SignalingClient<T>,
    settings: CallSettings,
    local_surface: Arc<dyn VideoSurface>,
    remote_surface: Arc<dyn VideoSurface>,
    local_stream: Option<E::Stream>,
    call: Option<Call<E::Connection>>,
    state_tx: watch::Sender<CallState>,
    shutdown: CancellationToken,
}

impl<E: MediaEngine, T: SignalingTransport> CallSession<E, T> {
    pub fn builder(engine: E, transport: T) -> CallSessionBuilder<E, T> {
        CallSessionBuilder::new(engine, transport)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> CallState {
        *self.state_tx.borrow()
    }

    pub fn role(&self) -> Option<CallRole> {
        self.call.as_ref().map(|call| call.role)
    }

    /// Spawns the session task and returns the controls for it.
    pub fn start(self) -> (SessionHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(SESSION_COMMANDS_CAPACITY);
        let handle = SessionHandle::new(commands_tx, self.state_tx.subscribe());
        let span = tracing::info_span!("call_session", session_id = %self.id);
        let task = tokio::spawn(self.run(commands_rx).instrument(span));
        (handle, task)
    }

    /// Processes user commands, inbound signaling messages and engine events one at a time until
    /// the call ends.
    pub async fn run(mut self, mut commands_rx: mpsc::Receiver<SessionCommand>) {
        tracing::info!("Call session started");

        while self.state() != CallState::Ended {
            let signaling_open = self.signaling.is_connected();

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::debug!("Shutdown signal received, ending call");
                    self.end_call().await;
                }
                command = commands_rx.recv() => match command {
                    Some(SessionCommand::StartCall { reply }) => {
                        let result = self.start_call().await;
                        if let Err(err) = &result {
                            tracing::warn!(%err, "Failed to start call");
                        }
                        let _ = reply.send(result);
                    }
                    Some(SessionCommand::EndCall { reply }) => {
                        self.end_call().await;
                        let _ = reply.send(());
                    }
                    None => {
                        tracing::debug!("All session handles dropped, ending call");
                        self.end_call().await;
                    }
                },
                Some(event) = next_peer_event(&mut self.call) => {
                    self.handle_peer_event(event).await;
                }
                msg = self.signaling.recv(), if signaling_open => match msg {
                    Ok(msg) => {
                        if let Err(err) = self.handle_message(msg).await {
                            tracing::warn!(%err, "Failed to handle signaling message");
                        }
                    }
                    Err(SignalingError::Shutdown(_)) => {}
                    Err(SignalingError::Disconnected) => {
                        tracing::warn!("Signaling channel closed, no further messages will be received");
                    }
                    Err(err) => {
                        tracing::warn!(%err, "Failed to receive signaling message");
                    }
                },
            }
        }

        tracing::info!("Call session finished");
    }

    /// Dispatches an inbound signaling message to its handler.
    pub async fn handle_message(&mut self, msg: SignalingMessage) -> Result<(), SessionError> {
        match msg {
            SignalingMessage::Offer(offer) => self.handle_offer(offer).await,
            SignalingMessage::Answer(answer) => self.handle_answer(answer).await,
            SignalingMessage::IceCandidate(candidate) => {
                self.handle_ice_candidate(candidate).await
            }
        }
    }

    #[instrument(level = "info", skip(self), fields(session_id = %self.id), err)]
    pub async fn start_call(&mut self) -> Result<(), SessionError> {
        let state = self.state();
        if state != CallState::Idle {
            return Err(SessionError::InvalidState {
                operation: "start call",
                state,
            });
        }

        self.prepare_call(CallRole::Caller).await?;
        self.set_state(CallState::Negotiating);

        let Some(call) = self.call.as_ref() else {
            return Err(SessionError::NoPeerConnection);
        };
        let offer = match call.peer.create_offer().await {
            Ok(offer) => offer,
            Err(err) => {
                self.abort_call().await;
                return Err(err.into());
            }
        };

        tracing::debug!("Sending offer");
        if let Err(err) = self.signaling.send(SignalingMessage::Offer(offer)).await {
            self.abort_call().await;
            return Err(err.into());
        }
        Ok(())
    }

    #[instrument(level = "info", skip_all, fields(session_id = %self.id), err)]
    pub async fn handle_offer(&mut self, offer: SessionDescription) -> Result<(), SessionError> {
        let state = self.state();
        match state {
            CallState::Ended => {
                return Err(SessionError::InvalidState {
                    operation: "accept offer",
                    state,
                });
            }
            CallState::Idle => {}
            CallState::Negotiating | CallState::Active => match self.settings.offer_policy {
                OfferPolicy::Reject => {
                    tracing::warn!(%state, "Rejecting offer, call already in progress");
                    return Err(SessionError::OfferRejected);
                }
                OfferPolicy::Replace => {
                    tracing::info!(%state, "Replacing existing peer connection with new offer");
                    self.close_peer_connection().await;
                    self.remote_surface.clear();
                }
            },
        }

        // Failures leave no call behind, a replaced one included.
        if let Err(err) = self.prepare_call(CallRole::Callee).await {
            self.abort_call().await;
            return Err(err);
        }
        self.set_state(CallState::Negotiating);

        let Some(call) = self.call.as_ref() else {
            return Err(SessionError::NoPeerConnection);
        };
        let answer = match call.peer.accept_offer(offer).await {
            Ok(answer) => answer,
            Err(err) => {
                self.abort_call().await;
                return Err(err.into());
            }
        };

        tracing::debug!("Sending answer");
        if let Err(err) = self.signaling.send(SignalingMessage::Answer(answer)).await {
            self.abort_call().await;
            return Err(err.into());
        }
        Ok(())
    }

    #[instrument(level = "info", skip_all, fields(session_id = %self.id), err)]
    pub async fn handle_answer(&mut self, answer: SessionDescription) -> Result<(), SessionError> {
        let state = self.state();
        if state == CallState::Ended {
            return Err(SessionError::InvalidState {
                operation: "accept answer",
                state,
            });
        }

        let call = self.call.as_ref().ok_or(SessionError::NoPeerConnection)?;
        if call.role != CallRole::Caller {
            return Err(SessionError::InvalidState {
                operation: "accept answer",
                state,
            });
        }

        call.peer.accept_answer(answer).await?;
        tracing::debug!("Applied remote answer");
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(session_id = %self.id), err)]
    pub async fn handle_ice_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), SessionError> {
        let state = self.state();
        if state == CallState::Ended {
            return Err(SessionError::InvalidState {
                operation: "add ICE candidate",
                state,
            });
        }

        let call = self.call.as_ref().ok_or(SessionError::NoPeerConnection)?;
        call.peer.add_remote_ice_candidate(candidate).await?;
        Ok(())
    }

    /// Closes the peer connection, releases local media and disconnects from the signaling
    /// server. Ending an already ended call does nothing.
    #[instrument(level = "info", skip(self), fields(session_id = %self.id))]
    pub async fn end_call(&mut self) {
        if self.state() == CallState::Ended {
            tracing::debug!("Call already ended");
            return;
        }

        self.close_peer_connection().await;
        if let Some(stream) = self.local_stream.take() {
            tracing::debug!(stream_id = %stream.id(), "Releasing local media");
            stream.stop();
        }
        self.local_surface.clear();
        self.remote_surface.clear();

        self.signaling.disconnect().await;
        self.set_state(CallState::Ended);
    }

    #[instrument(level = "debug", skip(self), fields(session_id = %self.id))]
    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::IceCandidate(candidate) => {
                if self.state() == CallState::Ended {
                    return;
                }
                if let Err(err) = self
                    .signaling
                    .send(SignalingMessage::IceCandidate(candidate))
                    .await
                {
                    tracing::warn!(%err, "Failed to send local ICE candidate");
                }
            }
            PeerEvent::RemoteTrack(track) => self.on_remote_track(track),
            PeerEvent::ConnectionState(state) => match state {
                PeerConnectionState::Failed => {
                    tracing::warn!("Connection to peer failed");
                }
                PeerConnectionState::Disconnected => {
                    tracing::info!("Disconnected from peer");
                }
                state => {
                    tracing::debug!(?state, "Peer connection state changed");
                }
            },
            PeerEvent::Error(err) => {
                tracing::warn!(%err, "Received error peer event");
            }
        }
    }

    fn on_remote_track(&mut self, track: RemoteTrack) {
        let state = self.state();
        if !matches!(state, CallState::Negotiating | CallState::Active) {
            tracing::debug!(%state, ?track, "Ignoring remote track");
            return;
        }

        self.remote_surface.attach(SurfaceSource::Remote(track));
        if state == CallState::Negotiating {
            self.set_state(CallState::Active);
        }
    }

    async fn prepare_call(&mut self, role: CallRole) -> Result<(), SessionError> {
        self.acquire_local_media().await?;
        self.open_peer_connection(role).await
    }

    async fn acquire_local_media(&mut self) -> Result<(), SessionError> {
        if self.local_stream.is_some() {
            return Ok(());
        }

        tracing::debug!(constraints = ?self.settings.constraints, "Acquiring local media");
        let stream = self
            .engine
            .get_user_media(self.settings.constraints)
            .await?;
        self.local_surface.attach(SurfaceSource::Local {
            stream_id: stream.id().to_string(),
            tracks: stream.tracks(),
        });
        self.local_stream = Some(stream);
        Ok(())
    }

    async fn open_peer_connection(&mut self, role: CallRole) -> Result<(), SessionError> {
        let (peer, events_rx) = self
            .engine
            .new_peer_connection(&self.settings.ice)
            .await?;

        if let Some(stream) = self.local_stream.as_ref()
            && let Err(err) = peer.add_stream(stream).await
        {
            if let Err(err) = peer.close().await {
                tracing::warn!(%err, "Failed to close peer connection");
            }
            return Err(err.into());
        }

        tracing::debug!(?role, "Opened peer connection");
        self.call = Some(Call {
            role,
            peer,
            events_rx,
        });
        Ok(())
    }

    async fn close_peer_connection(&mut self) {
        if let Some(call) = self.call.take() {
            tracing::debug!(?call, "Closing peer connection");
            if let Err(err) = call.peer.close().await {
                tracing::warn!(%err, "Failed to close peer connection");
            }
        }
    }

    /// Drops a call attempt that failed during negotiation. Local media is kept for the next
    /// attempt.
    async fn abort_call(&mut self) {
        self.close_peer_connection().await;
        self.remote_surface.clear();
        self.set_state(CallState::Idle);
    }

    fn set_state(&self, state: CallState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::info!(from = %previous, to = %state, "Call state changed");
        }
    }
}

async fn next_peer_event<C>(call: &mut Option<Call<C>>) -> Option<PeerEvent> {
    let Some(call) = call.as_mut() else {
        return std::future::pending().await;
    };

    loop {
        match call.events_rx.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Peer events lagged");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::RecordingSurface;
    use peercall_protocol::SdpType;
    use peercall_signaling::transport::mock::{MockHandle, MockTransport};
    use peercall_webrtc::fake::{FakeEngine, FakeOp};
    use peercall_webrtc::fake::CaptureDevices;
    use peercall_webrtc::{MediaAccessError, TrackKind};
    use pretty_assertions::{assert_eq, assert_matches};
    use test_log::test;

    struct TestRig {
        session: CallSession<FakeEngine, MockTransport>,
        engine: FakeEngine,
        signaling: MockHandle,
        local_surface: Arc<RecordingSurface>,
        remote_surface: Arc<RecordingSurface>,
    }

    impl TestRig {
        fn new() -> Self {
            Self::with(FakeEngine::new(), CallSettings::default())
        }

        fn with(engine: FakeEngine, settings: CallSettings) -> Self {
            let (transport, signaling) = MockTransport::new();
            let local_surface = Arc::new(RecordingSurface::new());
            let remote_surface = Arc::new(RecordingSurface::new());
            let session = CallSession::builder(engine.clone(), transport)
                .with_settings(settings)
                .with_local_surface(local_surface.clone())
                .with_remote_surface(remote_surface.clone())
                .build();
            Self {
                session,
                engine,
                signaling,
                local_surface,
                remote_surface,
            }
        }

        fn sent(&mut self) -> Vec<SignalingMessage> {
            let mut sent = Vec::new();
            while let Ok(msg) = self.signaling.outgoing_rx.try_recv() {
                sent.push(msg);
            }
            sent
        }
    }

    fn remote_offer() -> SessionDescription {
        SessionDescription::offer("remote-offer")
    }

    fn remote_track() -> RemoteTrack {
        RemoteTrack {
            id: "video".to_string(),
            stream_id: "remote".to_string(),
            kind: TrackKind::Video,
        }
    }

    #[test(tokio::test)]
    async fn start_call_sends_single_offer() {
        let mut rig = TestRig::new();

        rig.session.start_call().await.unwrap();

        let connection = rig.engine.last_connection().unwrap();
        let sent = rig.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0],
            SignalingMessage::Offer(connection.local_description().unwrap())
        );
        assert_eq!(rig.session.state(), CallState::Negotiating);
        assert_eq!(rig.session.role(), Some(CallRole::Caller));
    }

    #[test(tokio::test)]
    async fn start_call_attaches_local_stream() {
        let mut rig = TestRig::new();

        rig.session.start_call().await.unwrap();

        let stream = rig.engine.streams().pop().unwrap();
        let connection = rig.engine.last_connection().unwrap();
        assert_eq!(
            connection.ops(),
            vec![FakeOp::AddStream(stream.id().to_string()), FakeOp::CreateOffer]
        );
        assert_eq!(
            rig.local_surface.sources(),
            vec![SurfaceSource::Local {
                stream_id: stream.id().to_string(),
                tracks: stream.tracks(),
            }]
        );
        assert!(rig.remote_surface.is_empty());
    }

    #[test(tokio::test)]
    async fn start_call_media_denied() {
        let mut rig = TestRig::with(
            FakeEngine::with_devices(CaptureDevices {
                permission_granted: false,
                ..Default::default()
            }),
            CallSettings::default(),
        );

        let result = rig.session.start_call().await;
        assert_matches!(
            result,
            Err(SessionError::MediaAccess(MediaAccessError::PermissionDenied))
        );
        assert_eq!(rig.session.state(), CallState::Idle);
        assert!(rig.engine.connections().is_empty());
        assert!(rig.sent().is_empty());
        assert!(rig.local_surface.is_empty());
    }

    #[test(tokio::test)]
    async fn start_call_without_camera() {
        let mut rig = TestRig::with(
            FakeEngine::with_devices(CaptureDevices {
                video: false,
                ..Default::default()
            }),
            CallSettings::default(),
        );

        let result = rig.session.start_call().await;
        assert_matches!(
            result,
            Err(SessionError::MediaAccess(MediaAccessError::NoDevice(
                TrackKind::Video
            )))
        );
        assert_eq!(rig.session.state(), CallState::Idle);
    }

    #[test(tokio::test)]
    async fn start_call_twice_is_rejected() {
        let mut rig = TestRig::new();

        rig.session.start_call().await.unwrap();
        let result = rig.session.start_call().await;
        assert_matches!(
            result,
            Err(SessionError::InvalidState {
                state: CallState::Negotiating,
                ..
            })
        );
        assert_eq!(rig.engine.connections().len(), 1);
        assert_eq!(rig.sent().len(), 1);
    }

    #[test(tokio::test)]
    async fn offer_is_answered_once() {
        let mut rig = TestRig::new();

        rig.session
            .handle_message(SignalingMessage::Offer(remote_offer()))
            .await
            .unwrap();

        let connection = rig.engine.last_connection().unwrap();
        assert_eq!(connection.remote_description(), Some(remote_offer()));

        let sent = rig.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            SignalingMessage::Answer(answer) => {
                assert_eq!(answer.kind, SdpType::Answer);
                assert_eq!(Some(answer), connection.local_description().as_ref());
            }
            other => panic!("Expected Answer message, got {other:?}"),
        }
        assert_eq!(rig.session.state(), CallState::Negotiating);
        assert_eq!(rig.session.role(), Some(CallRole::Callee));
    }

    #[test(tokio::test)]
    async fn offer_acquires_local_media_for_callee() {
        let mut rig = TestRig::new();

        rig.session.handle_offer(remote_offer()).await.unwrap();

        let streams = rig.engine.streams();
        assert_eq!(streams.len(), 1);
        assert_eq!(
            rig.engine.last_connection().unwrap().ops()[0],
            FakeOp::AddStream(streams[0].id().to_string())
        );
        assert_eq!(rig.local_surface.sources().len(), 1);
    }

    #[test(tokio::test)]
    async fn answer_without_peer_connection_fails() {
        let mut rig = TestRig::new();

        let result = rig
            .session
            .handle_message(SignalingMessage::Answer(SessionDescription::answer("a")))
            .await;
        assert_matches!(result, Err(SessionError::NoPeerConnection));
        assert_eq!(rig.session.state(), CallState::Idle);
        assert!(rig.sent().is_empty());
    }

    #[test(tokio::test)]
    async fn answer_is_applied_to_caller_connection() {
        let mut rig = TestRig::new();
        rig.session.start_call().await.unwrap();

        let answer = SessionDescription::answer("remote-answer");
        rig.session
            .handle_message(SignalingMessage::Answer(answer.clone()))
            .await
            .unwrap();

        let connection = rig.engine.last_connection().unwrap();
        assert_eq!(connection.remote_description(), Some(answer));
        assert_eq!(rig.engine.connections().len(), 1);
    }

    #[test(tokio::test)]
    async fn answer_on_callee_is_rejected() {
        let mut rig = TestRig::new();
        rig.session.handle_offer(remote_offer()).await.unwrap();

        let result = rig
            .session
            .handle_answer(SessionDescription::answer("a"))
            .await;
        assert_matches!(result, Err(SessionError::InvalidState { .. }));
    }

    #[test(tokio::test)]
    async fn candidate_without_peer_connection_fails() {
        let mut rig = TestRig::new();

        let result = rig
            .session
            .handle_message(SignalingMessage::IceCandidate(IceCandidate::new("c1")))
            .await;
        assert_matches!(result, Err(SessionError::NoPeerConnection));
    }

    #[test(tokio::test)]
    async fn candidate_before_remote_description_is_not_buffered() {
        let mut rig = TestRig::new();
        rig.session.start_call().await.unwrap();

        let result = rig
            .session
            .handle_ice_candidate(IceCandidate::new("early"))
            .await;
        assert_matches!(result, Err(SessionError::Webrtc(_)));

        rig.session
            .handle_answer(SessionDescription::answer("a"))
            .await
            .unwrap();
        assert!(
            rig.engine
                .last_connection()
                .unwrap()
                .added_candidates()
                .is_empty()
        );
    }

    #[test(tokio::test)]
    async fn candidates_are_added_in_arrival_order() {
        let mut rig = TestRig::new();
        rig.session.handle_offer(remote_offer()).await.unwrap();

        let candidates: Vec<IceCandidate> = ["c3", "c1", "c2", "c1"]
            .into_iter()
            .map(IceCandidate::new)
            .collect();
        for candidate in &candidates {
            rig.session
                .handle_message(SignalingMessage::IceCandidate(candidate.clone()))
                .await
                .unwrap();
        }

        assert_eq!(
            rig.engine.last_connection().unwrap().added_candidates(),
            candidates
        );
    }

    #[test(tokio::test)]
    async fn end_call_closes_everything() {
        let mut rig = TestRig::new();
        rig.session.start_call().await.unwrap();
        let _ = rig.sent();

        rig.session.end_call().await;

        let connection = rig.engine.last_connection().unwrap();
        assert!(connection.is_closed());
        assert!(rig.engine.streams().iter().all(|stream| stream.is_stopped()));
        assert!(rig.local_surface.is_empty());
        assert_eq!(rig.session.state(), CallState::Ended);
        assert!(rig.signaling.outgoing_rx.recv().await.is_none());
    }

    #[test(tokio::test)]
    async fn nothing_is_sent_after_end_call() {
        let mut rig = TestRig::new();
        rig.session.start_call().await.unwrap();
        let connection = rig.engine.last_connection().unwrap();
        let _ = rig.sent();

        rig.session.end_call().await;

        rig.session
            .handle_peer_event(PeerEvent::IceCandidate(IceCandidate::new("late")))
            .await;
        assert_matches!(
            rig.session.start_call().await,
            Err(SessionError::InvalidState {
                state: CallState::Ended,
                ..
            })
        );
        assert_matches!(
            rig.session.handle_offer(remote_offer()).await,
            Err(SessionError::InvalidState { .. })
        );
        assert_matches!(
            rig.session
                .handle_answer(SessionDescription::answer("a"))
                .await,
            Err(SessionError::InvalidState { .. })
        );
        assert_matches!(
            rig.session
                .handle_ice_candidate(IceCandidate::new("c"))
                .await,
            Err(SessionError::InvalidState { .. })
        );
        assert_eq!(connection.ops().last(), Some(&FakeOp::Close));
        assert!(rig.sent().is_empty());
    }

    #[test(tokio::test)]
    async fn end_call_from_idle() {
        let mut rig = TestRig::new();

        rig.session.end_call().await;
        rig.session.end_call().await;

        assert_eq!(rig.session.state(), CallState::Ended);
        assert!(rig.engine.connections().is_empty());
    }

    #[test(tokio::test)]
    async fn local_candidates_are_trickled() {
        let mut rig = TestRig::new();
        rig.session.start_call().await.unwrap();
        let _ = rig.sent();

        let candidate = IceCandidate::new("candidate:1");
        rig.session
            .handle_peer_event(PeerEvent::IceCandidate(candidate.clone()))
            .await;

        assert_eq!(rig.sent(), vec![SignalingMessage::IceCandidate(candidate)]);
    }

    #[test(tokio::test)]
    async fn remote_track_activates_call() {
        let mut rig = TestRig::new();
        rig.session.start_call().await.unwrap();

        rig.session
            .handle_peer_event(PeerEvent::RemoteTrack(remote_track()))
            .await;

        assert_eq!(rig.session.state(), CallState::Active);
        assert_eq!(
            rig.remote_surface.sources(),
            vec![SurfaceSource::Remote(remote_track())]
        );
    }

    #[test(tokio::test)]
    async fn remote_track_while_idle_is_ignored() {
        let mut rig = TestRig::new();

        rig.session
            .handle_peer_event(PeerEvent::RemoteTrack(remote_track()))
            .await;

        assert_eq!(rig.session.state(), CallState::Idle);
        assert!(rig.remote_surface.is_empty());
    }

    #[test(tokio::test)]
    async fn connection_state_changes_do_not_change_call_state() {
        let mut rig = TestRig::new();
        rig.session.start_call().await.unwrap();

        for state in [
            PeerConnectionState::Connecting,
            PeerConnectionState::Connected,
            PeerConnectionState::Failed,
        ] {
            rig.session
                .handle_peer_event(PeerEvent::ConnectionState(state))
                .await;
        }

        assert_eq!(rig.session.state(), CallState::Negotiating);
        assert!(!rig.engine.last_connection().unwrap().is_closed());
    }

    #[test(tokio::test)]
    async fn offer_replaces_active_connection() {
        let mut rig = TestRig::new();
        rig.session.start_call().await.unwrap();
        rig.session
            .handle_peer_event(PeerEvent::RemoteTrack(remote_track()))
            .await;
        let _ = rig.sent();

        rig.session.handle_offer(remote_offer()).await.unwrap();

        let connections = rig.engine.connections();
        assert_eq!(connections.len(), 2);
        assert!(connections[0].is_closed());
        assert!(!connections[1].is_closed());
        assert_eq!(connections[1].remote_description(), Some(remote_offer()));
        assert_eq!(rig.engine.streams().len(), 1);
        assert!(rig.remote_surface.is_empty());
        assert_eq!(rig.session.state(), CallState::Negotiating);
        assert_eq!(rig.session.role(), Some(CallRole::Callee));
        assert_matches!(rig.sent().as_slice(), [SignalingMessage::Answer(_)]);
    }

    #[test(tokio::test)]
    async fn failed_replacement_returns_to_idle() {
        let mut rig = TestRig::new();
        rig.session.start_call().await.unwrap();
        rig.session
            .handle_peer_event(PeerEvent::RemoteTrack(remote_track()))
            .await;
        assert_eq!(rig.session.state(), CallState::Active);
        let _ = rig.sent();

        rig.engine.set_failing_connections(true);
        let result = rig.session.handle_offer(remote_offer()).await;
        assert_matches!(result, Err(SessionError::Webrtc(_)));

        assert_eq!(rig.session.state(), CallState::Idle);
        assert_eq!(rig.session.role(), None);
        assert_eq!(rig.engine.connections().len(), 1);
        assert!(rig.engine.connections()[0].is_closed());
        assert!(rig.remote_surface.is_empty());
        assert!(rig.sent().is_empty());

        rig.engine.set_failing_connections(false);
        rig.session.start_call().await.unwrap();
        assert_eq!(rig.session.state(), CallState::Negotiating);
        assert_matches!(rig.sent().as_slice(), [SignalingMessage::Offer(_)]);
    }

    #[test(tokio::test)]
    async fn offer_rejected_while_negotiating() {
        let mut rig = TestRig::with(
            FakeEngine::new(),
            CallSettings {
                offer_policy: OfferPolicy::Reject,
                ..Default::default()
            },
        );
        rig.session.start_call().await.unwrap();
        let _ = rig.sent();

        let result = rig.session.handle_offer(remote_offer()).await;
        assert_matches!(result, Err(SessionError::OfferRejected));

        let connections = rig.engine.connections();
        assert_eq!(connections.len(), 1);
        assert!(!connections[0].is_closed());
        assert_eq!(rig.session.role(), Some(CallRole::Caller));
        assert!(rig.sent().is_empty());
    }

    #[test(tokio::test)]
    async fn failed_negotiation_returns_to_idle() {
        let mut rig = TestRig::new();

        let result = rig
            .session
            .handle_offer(SessionDescription::answer("not-an-offer"))
            .await;
        assert_matches!(result, Err(SessionError::Webrtc(_)));

        assert_eq!(rig.session.state(), CallState::Idle);
        assert!(rig.engine.last_connection().unwrap().is_closed());
        assert!(rig.sent().is_empty());

        rig.session.start_call().await.unwrap();
        assert_eq!(rig.engine.streams().len(), 1);
    }

    #[test(tokio::test)]
    async fn run_processes_commands_and_messages() {
        let (transport, mut signaling) = MockTransport::new();
        let engine = FakeEngine::new().with_local_candidates(1);
        let session = CallSession::builder(engine.clone(), transport).build();
        let (handle, task) = session.start();

        handle.start_call().await.unwrap();
        assert_eq!(handle.state(), CallState::Negotiating);
        assert_matches!(
            signaling.outgoing_rx.recv().await,
            Some(SignalingMessage::Offer(_))
        );
        assert_matches!(
            signaling.outgoing_rx.recv().await,
            Some(SignalingMessage::IceCandidate(_))
        );

        signaling
            .incoming_tx
            .send(SignalingMessage::Answer(SessionDescription::answer("a")))
            .await
            .unwrap();
        engine
            .last_connection()
            .unwrap()
            .emit(PeerEvent::RemoteTrack(remote_track()));
        handle.wait_for_state(CallState::Active).await.unwrap();

        handle.end_call().await.unwrap();
        assert_eq!(handle.state(), CallState::Ended);
        task.await.unwrap();

        assert!(engine.last_connection().unwrap().is_closed());
        assert_matches!(
            handle.start_call().await,
            Err(SessionError::SessionStopped)
        );
    }

    #[test(tokio::test)]
    async fn run_reports_media_error_to_caller() {
        let (transport, _signaling) = MockTransport::new();
        let engine = FakeEngine::with_devices(CaptureDevices {
            audio: false,
            ..Default::default()
        });
        let session = CallSession::builder(engine, transport).build();
        let (handle, task) = session.start();

        assert_matches!(
            handle.start_call().await,
            Err(SessionError::MediaAccess(MediaAccessError::NoDevice(
                TrackKind::Audio
            )))
        );
        assert_eq!(handle.state(), CallState::Idle);

        drop(handle);
        task.await.unwrap();
    }

    #[test(tokio::test)]
    async fn run_ends_call_on_shutdown() {
        let (transport, _signaling) = MockTransport::new();
        let engine = FakeEngine::new();
        let shutdown = CancellationToken::new();
        let session = CallSession::builder(engine.clone(), transport)
            .with_shutdown(shutdown.clone())
            .build();
        let (handle, task) = session.start();

        handle.start_call().await.unwrap();
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(handle.state(), CallState::Ended);
        assert!(engine.last_connection().unwrap().is_closed());
    }

    #[test(tokio::test)]
    async fn run_survives_signaling_disconnect() {
        let (transport, signaling) = MockTransport::new();
        let session = CallSession::builder(FakeEngine::new(), transport).build();
        let (handle, task) = session.start();

        drop(signaling);
        assert_matches!(
            handle.start_call().await,
            Err(SessionError::Signaling(_))
        );
        assert_eq!(handle.state(), CallState::Idle);

        handle.end_call().await.unwrap();
        task.await.unwrap();
    }
}
