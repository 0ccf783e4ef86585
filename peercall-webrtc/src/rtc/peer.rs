use crate::config::{
    FromRtc, IntoRtc, PEER_EVENTS_CAPACITY, from_rtc_description, to_rtc_description,
};
use crate::engine::{PeerConnection, PeerConnectionState, PeerEvent};
use crate::error::WebrtcError;
use crate::rtc::receiver::{Receiver, RemoteFrame};
use crate::rtc::stream::RtcMediaStream;
use anyhow::Context;
use async_trait::async_trait;
use peercall_protocol::{IceCandidate, IceConfig, SdpType, SessionDescription};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::instrument;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::track::track_local::TrackLocal;

pub struct RtcPeer {
    peer_connection: RTCPeerConnection,
    receiver: Receiver,
}

impl RtcPeer {
    #[instrument(level = "debug", skip(remote_output), err)]
    pub async fn new(
        config: &IceConfig,
        remote_output: Option<mpsc::Sender<RemoteFrame>>,
    ) -> Result<(Self, broadcast::Receiver<PeerEvent>), WebrtcError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .context("Failed to register default codecs")?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .context("Failed to register default interceptors")?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = api
            .new_peer_connection(config.into_rtc())
            .await
            .context("Failed to create peer connection")?;

        let (events_tx, events_rx) = broadcast::channel(PEER_EVENTS_CAPACITY);

        {
            let events_tx = events_tx.clone();
            peer_connection.on_peer_connection_state_change(Box::new(
                move |state: RTCPeerConnectionState| {
                    tracing::trace!(?state, "Peer connection state changed");
                    let state = PeerConnectionState::from(state);
                    if let Err(err) = events_tx.send(PeerEvent::ConnectionState(state)) {
                        tracing::warn!(?err, "Failed to send peer connection state event");
                    }
                    Box::pin(async {})
                },
            ));
        }

        {
            let events_tx = events_tx.clone();
            peer_connection.on_ice_candidate(Box::new(
                move |candidate: Option<RTCIceCandidate>| {
                    tracing::trace!(?candidate, "ICE candidate gathered");
                    // `None` marks the end of gathering and is not trickled.
                    if let Some(candidate) = candidate {
                        match candidate.to_json() {
                            Ok(init) => {
                                let candidate = IceCandidate::from_rtc(init);
                                if let Err(err) = events_tx.send(PeerEvent::IceCandidate(candidate))
                                {
                                    tracing::warn!(?err, "Failed to send ICE candidate event");
                                }
                            }
                            Err(err) => {
                                tracing::warn!(?err, "Failed to serialize ICE candidate");
                                if let Err(err) = events_tx.send(PeerEvent::Error(err.to_string()))
                                {
                                    tracing::warn!(?err, "Failed to send peer error event");
                                }
                            }
                        }
                    }
                    Box::pin(async {})
                },
            ));
        }

        let receiver = Receiver::new(&peer_connection, events_tx, remote_output);

        Ok((
            Self {
                peer_connection,
                receiver,
            },
            events_rx,
        ))
    }

    async fn local_description(&self) -> Result<SessionDescription, WebrtcError> {
        let local_description = self
            .peer_connection
            .local_description()
            .await
            .context("Failed to get local description")?;

        Ok(from_rtc_description(&local_description)?)
    }
}

#[async_trait]
impl PeerConnection for RtcPeer {
    type Stream = RtcMediaStream;

    #[instrument(level = "debug", skip_all, err)]
    async fn add_stream(&self, stream: &RtcMediaStream) -> Result<(), WebrtcError> {
        for track in stream.local_tracks() {
            tracing::trace!(track_id = %track.id(), "Adding local track");
            self.peer_connection
                .add_track(Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .context("Failed to add track to peer connection")?;
        }
        Ok(())
    }

    #[instrument(level = "trace", skip(self), err)]
    async fn create_offer(&self) -> Result<SessionDescription, WebrtcError> {
        tracing::trace!("Creating SDP offer");

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .context("Failed to create offer")?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .context("Failed to set offer as local description")?;

        let offer = self.local_description().await?;
        tracing::trace!("Created SDP offer");
        Ok(offer)
    }

    #[instrument(level = "trace", skip(self, offer), err)]
    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, WebrtcError> {
        tracing::trace!("Creating SDP answer");
        if offer.kind != SdpType::Offer {
            return Err(WebrtcError::InvalidState(format!(
                "expected offer, got {:?}",
                offer.kind
            )));
        }

        self.peer_connection
            .set_remote_description(to_rtc_description(&offer)?)
            .await
            .context("Failed to set offer as remote description")?;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .context("Failed to create answer")?;
        self.peer_connection
            .set_local_description(answer)
            .await
            .context("Failed to set answer as local description")?;

        let answer = self.local_description().await?;
        tracing::trace!("Created SDP answer");
        Ok(answer)
    }

    #[instrument(level = "trace", skip(self, answer), err)]
    async fn accept_answer(&self, answer: SessionDescription) -> Result<(), WebrtcError> {
        tracing::trace!("Accepting SDP answer");
        if answer.kind != SdpType::Answer {
            return Err(WebrtcError::InvalidState(format!(
                "expected answer, got {:?}",
                answer.kind
            )));
        }

        self.peer_connection
            .set_remote_description(to_rtc_description(&answer)?)
            .await
            .context("Failed to set answer as remote description")?;

        tracing::trace!("Accepted SDP answer");
        Ok(())
    }

    #[instrument(level = "trace", skip(self, candidate), err)]
    async fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> Result<(), WebrtcError> {
        tracing::trace!("Adding remote ICE candidate");

        self.peer_connection
            .add_ice_candidate(candidate.into_rtc())
            .await
            .context("Failed to add remote ICE candidate")?;

        tracing::trace!("Added remote ICE candidate");
        Ok(())
    }

    #[instrument(level = "debug", skip(self), err)]
    async fn close(&self) -> Result<(), WebrtcError> {
        tracing::debug!("Closing peer");
        self.receiver.shutdown();

        self.peer_connection
            .close()
            .await
            .context("Failed to close peer connection")?;

        tracing::trace!("Successfully closed peer connection");
        Ok(())
    }
}
