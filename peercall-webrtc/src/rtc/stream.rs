use crate::config::{
    AUDIO_CHANNELS, AUDIO_CLOCK_RATE, AUDIO_FRAME_DURATION, AUDIO_TRACK_ID,
    ENCODED_FRAME_BUFFER_SIZE, VIDEO_CLOCK_RATE, VIDEO_FRAME_DURATION, VIDEO_TRACK_ID,
};
use crate::capture::CaptureHandle;
use crate::engine::{MediaConstraints, MediaStream, TrackInfo, TrackKind};
use crate::rtc::sender::Sender;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

struct LocalTrack {
    kind: TrackKind,
    track: Arc<TrackLocalStaticSample>,
    input_tx: mpsc::Sender<Bytes>,
}

/// Local capture stream.
///
/// Encoded frames pushed into [`RtcMediaStream::input`] by the attached captures are written onto
/// the matching track of every connection the stream was added to.
pub struct RtcMediaStream {
    id: String,
    tracks: Vec<LocalTrack>,
    senders: Mutex<Vec<Sender>>,
    captures: Mutex<Vec<CaptureHandle>>,
}

impl RtcMediaStream {
    pub(crate) fn open(constraints: MediaConstraints) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let mut tracks = Vec::new();
        let mut senders = Vec::new();

        let mut open_track = |kind: TrackKind| {
            let (codec, track_id, frame_duration) = match kind {
                TrackKind::Audio => (
                    RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_OPUS.to_owned(),
                        clock_rate: AUDIO_CLOCK_RATE,
                        channels: AUDIO_CHANNELS,
                        ..Default::default()
                    },
                    AUDIO_TRACK_ID,
                    AUDIO_FRAME_DURATION,
                ),
                TrackKind::Video => (
                    RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_VP8.to_owned(),
                        clock_rate: VIDEO_CLOCK_RATE,
                        ..Default::default()
                    },
                    VIDEO_TRACK_ID,
                    VIDEO_FRAME_DURATION,
                ),
            };

            let track = Arc::new(TrackLocalStaticSample::new(
                codec,
                track_id.to_owned(),
                id.clone(),
            ));
            let (input_tx, input_rx) = mpsc::channel(ENCODED_FRAME_BUFFER_SIZE);
            senders.push(Sender::new(Arc::clone(&track), frame_duration, input_rx));
            tracks.push(LocalTrack {
                kind,
                track,
                input_tx,
            });
        };

        if constraints.audio {
            open_track(TrackKind::Audio);
        }
        if constraints.video {
            open_track(TrackKind::Video);
        }

        tracing::debug!(stream_id = %id, num_tracks = tracks.len(), "Opened local media stream");
        Self {
            id,
            tracks,
            senders: Mutex::new(senders),
            captures: Mutex::new(Vec::new()),
        }
    }

    /// Ties `capture` to the lifetime of the stream.
    pub(crate) fn attach_capture(&self, capture: CaptureHandle) {
        tracing::trace!(stream_id = %self.id, kind = %capture.kind(), "Attached capture");
        self.captures.lock().push(capture);
    }

    /// Sink for encoded frames of the given kind, if the stream carries such a track.
    pub fn input(&self, kind: TrackKind) -> Option<mpsc::Sender<Bytes>> {
        self.tracks
            .iter()
            .find(|track| track.kind == kind)
            .map(|track| track.input_tx.clone())
    }

    pub(crate) fn local_tracks(&self) -> impl Iterator<Item = &Arc<TrackLocalStaticSample>> {
        self.tracks.iter().map(|track| &track.track)
    }
}

impl MediaStream for RtcMediaStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn tracks(&self) -> Vec<TrackInfo> {
        self.tracks
            .iter()
            .map(|track| TrackInfo {
                id: track.track.id().to_string(),
                kind: track.kind,
            })
            .collect()
    }

    fn stop(&self) {
        let captures = std::mem::take(&mut *self.captures.lock());
        let senders = std::mem::take(&mut *self.senders.lock());
        tracing::debug!(stream_id = %self.id, "Stopping local media stream");
        for capture in captures {
            capture.stop();
        }
        for sender in senders {
            sender.shutdown();
        }
    }
}
