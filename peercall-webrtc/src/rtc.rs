//! Media engine backed by webrtc-rs.
mod peer;
mod receiver;
mod sender;
mod stream;

pub use peer::RtcPeer;
pub use receiver::RemoteFrame;
pub use stream::RtcMediaStream;

use crate::capture::CaptureSource;
use crate::engine::{MediaConstraints, MediaEngine, MediaStream, PeerEvent};
use crate::error::{MediaAccessError, WebrtcError};
use async_trait::async_trait;
use peercall_protocol::IceConfig;
use tokio::sync::{broadcast, mpsc};
use tracing::instrument;

pub struct RtcEngine<C> {
    capture: C,
    remote_output: Option<mpsc::Sender<RemoteFrame>>,
}

impl<C: CaptureSource> RtcEngine<C> {
    pub fn new(capture: C) -> Self {
        Self {
            capture,
            remote_output: None,
        }
    }

    /// Forwards the RTP payloads of every remote track to `output_tx`.
    pub fn with_remote_output(mut self, output_tx: mpsc::Sender<RemoteFrame>) -> Self {
        self.remote_output = Some(output_tx);
        self
    }
}

#[async_trait]
impl<C: CaptureSource> MediaEngine for RtcEngine<C> {
    type Stream = RtcMediaStream;
    type Connection = RtcPeer;

    #[instrument(level = "debug", skip(self), err)]
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<RtcMediaStream, MediaAccessError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaAccessError::InvalidConstraints);
        }

        let stream = RtcMediaStream::open(constraints);
        for track in stream.tracks() {
            let Some(frames_tx) = stream.input(track.kind) else {
                continue;
            };
            match self.capture.start(track.kind, frames_tx).await {
                Ok(capture) => stream.attach_capture(capture),
                Err(err) => {
                    tracing::warn!(kind = %track.kind, %err, "Failed to start capture");
                    stream.stop();
                    return Err(err);
                }
            }
        }
        Ok(stream)
    }

    async fn new_peer_connection(
        &self,
        config: &IceConfig,
    ) -> Result<(RtcPeer, broadcast::Receiver<PeerEvent>), WebrtcError> {
        RtcPeer::new(config, self.remote_output.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TrackKind;
    use crate::fake::{CaptureDevices, FakeCapture};
    use pretty_assertions::assert_eq;
    use test_log::test;

    #[test(tokio::test)]
    async fn capture_is_started_per_track() {
        let capture = FakeCapture::new(CaptureDevices::default());
        let engine = RtcEngine::new(capture.clone());

        let stream = engine
            .get_user_media(MediaConstraints::default())
            .await
            .unwrap();
        assert_eq!(capture.started(), vec![TrackKind::Audio, TrackKind::Video]);
        assert!(capture.is_running(TrackKind::Audio));
        assert!(capture.is_running(TrackKind::Video));

        stream.stop();
        assert!(!capture.is_running(TrackKind::Audio));
        assert!(!capture.is_running(TrackKind::Video));
    }

    #[test(tokio::test)]
    async fn missing_camera_releases_microphone() {
        let capture = FakeCapture::new(CaptureDevices {
            video: false,
            ..Default::default()
        });
        let engine = RtcEngine::new(capture.clone());

        let result = engine.get_user_media(MediaConstraints::default()).await;
        assert!(matches!(
            result,
            Err(MediaAccessError::NoDevice(TrackKind::Video))
        ));
        assert_eq!(capture.started(), vec![TrackKind::Audio]);
        assert!(!capture.is_running(TrackKind::Audio));
    }

    #[test(tokio::test)]
    async fn denied_permission_opens_nothing() {
        let capture = FakeCapture::new(CaptureDevices {
            permission_granted: false,
            ..Default::default()
        });
        let engine = RtcEngine::new(capture.clone());

        let result = engine.get_user_media(MediaConstraints::default()).await;
        assert!(matches!(result, Err(MediaAccessError::PermissionDenied)));
        assert!(capture.started().is_empty());
    }

    #[test(tokio::test)]
    async fn empty_constraints_are_rejected() {
        let capture = FakeCapture::new(CaptureDevices::default());
        let engine = RtcEngine::new(capture.clone());

        let result = engine
            .get_user_media(MediaConstraints {
                audio: false,
                video: false,
            })
            .await;
        assert!(matches!(result, Err(MediaAccessError::InvalidConstraints)));
        assert!(capture.started().is_empty());
    }

    #[test(tokio::test)]
    async fn captured_frames_reach_the_stream() {
        let capture = FakeCapture::new(CaptureDevices::default()).with_frame(b"opus");
        let engine = RtcEngine::new(capture.clone());

        let stream = engine
            .get_user_media(MediaConstraints {
                audio: true,
                video: false,
            })
            .await
            .unwrap();
        assert_eq!(capture.frames_sent(), 1);

        stream.stop();
    }
}
