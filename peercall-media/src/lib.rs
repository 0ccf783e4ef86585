//! Local capture devices for the call client: the microphone through cpal, encoded to Opus, and
//! (with the `video` feature) the camera through GStreamer, encoded to VP8.

mod audio;
mod device;
pub mod dsp;
mod error;
#[cfg(feature = "video")]
mod video;

use async_trait::async_trait;
use bytes::Bytes;
use peercall_webrtc::{CaptureHandle, CaptureSource, MediaAccessError, TrackKind};
use tokio::sync::mpsc;

pub const TARGET_SAMPLE_RATE: u32 = 48_000;
pub const FRAME_DURATION_MS: u64 = 20;
pub(crate) const FRAME_SIZE: usize =
    TARGET_SAMPLE_RATE as usize * FRAME_DURATION_MS as usize / 1000;

/// [`CaptureSource`] backed by the host's capture devices.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapture {
    audio_device: Option<String>,
    camera: Option<String>,
}

impl DeviceCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefers the input device whose name matches, falling back to the default one.
    pub fn with_audio_device(mut self, name: Option<String>) -> Self {
        self.audio_device = name;
        self
    }

    pub fn with_camera(mut self, name: Option<String>) -> Self {
        self.camera = name;
        self
    }

    pub const fn supports_video() -> bool {
        cfg!(feature = "video")
    }
}

#[async_trait]
impl CaptureSource for DeviceCapture {
    async fn start(
        &self,
        kind: TrackKind,
        frames_tx: mpsc::Sender<Bytes>,
    ) -> Result<CaptureHandle, MediaAccessError> {
        match kind {
            TrackKind::Audio => audio::start(self.audio_device.clone(), frames_tx).await,
            #[cfg(feature = "video")]
            TrackKind::Video => video::start(self.camera.clone(), frames_tx).await,
            #[cfg(not(feature = "video"))]
            TrackKind::Video => {
                tracing::warn!(
                    camera = ?self.camera,
                    "Built without video support, no camera available"
                );
                Err(MediaAccessError::NoDevice(TrackKind::Video))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_log::test;

    #[test]
    fn frame_size_is_20ms_at_48khz() {
        assert_eq!(FRAME_SIZE, 960);
    }

    #[cfg(not(feature = "video"))]
    #[test(tokio::test)]
    async fn video_without_support_is_no_device() {
        let (frames_tx, _frames_rx) = mpsc::channel(1);
        let result = DeviceCapture::new()
            .with_camera(Some("FaceTime HD".to_string()))
            .start(TrackKind::Video, frames_tx)
            .await;

        assert!(!DeviceCapture::supports_video());
        assert_eq!(
            result.map(|handle| handle.kind()),
            Err(MediaAccessError::NoDevice(TrackKind::Video))
        );
    }
}
