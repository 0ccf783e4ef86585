use crate::config::track_kind;
use crate::engine::{PeerEvent, RemoteTrack, TrackKind};
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::instrument;
use webrtc::peer_connection::RTCPeerConnection;

/// RTP payload received on a remote track.
#[derive(Debug, Clone)]
pub struct RemoteFrame {
    pub track_id: String,
    pub kind: TrackKind,
    pub payload: Bytes,
}

/// Announces remote tracks and drains their RTP packets until shut down.
pub(crate) struct Receiver {
    shutdown_tx: watch::Sender<()>,
}

impl Receiver {
    #[instrument(level = "trace", skip_all)]
    pub fn new(
        peer_connection: &RTCPeerConnection,
        events_tx: broadcast::Sender<PeerEvent>,
        output_tx: Option<mpsc::Sender<RemoteFrame>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        peer_connection.on_track(Box::new(move |track, _, _| {
            let events_tx = events_tx.clone();
            let output_tx = output_tx.clone();
            let mut shutdown_rx = shutdown_rx.clone();

            Box::pin(async move {
                let Some(kind) = track_kind(track.kind()) else {
                    tracing::warn!(track_id = %track.id(), "Ignoring remote track of unknown kind");
                    return;
                };
                let remote = RemoteTrack {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                };
                tracing::debug!(?remote, "Remote track arrived");
                if let Err(err) = events_tx.send(PeerEvent::RemoteTrack(remote.clone())) {
                    tracing::warn!(?err, "Failed to send remote track event");
                }

                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {
                            tracing::trace!("Shutdown signalled, stopping receiver");
                            break;
                        }
                        rtp = track.read_rtp() => {
                            match rtp {
                                Ok((packet, _)) => {
                                    let Some(output_tx) = output_tx.as_ref() else {
                                        continue;
                                    };
                                    let frame = RemoteFrame {
                                        track_id: remote.id.clone(),
                                        kind,
                                        payload: packet.payload,
                                    };
                                    if output_tx.send(frame).await.is_err() {
                                        tracing::warn!("Failed to send received RTP packet to output");
                                        break;
                                    }
                                }
                                Err(err) => {
                                    tracing::debug!(?err, "Failed to read RTP packet");
                                    break;
                                }
                            }
                        }
                    }
                }
            })
        }));

        Self { shutdown_tx }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
