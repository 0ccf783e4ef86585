use crate::engine::TrackKind;
use crate::error::MediaAccessError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capture device backend of the [`crate::rtc::RtcEngine`].
///
/// A source opens the device for one track kind and pushes encoded frames (Opus for audio, VP8
/// for video) into `frames_tx` until the returned [`CaptureHandle`] is stopped or dropped.
#[async_trait]
pub trait CaptureSource: Send + Sync + 'static {
    async fn start(
        &self,
        kind: TrackKind,
        frames_tx: mpsc::Sender<Bytes>,
    ) -> Result<CaptureHandle, MediaAccessError>;
}

/// Keeps a capture running. Capture loops watch [`CaptureHandle::token`] and release the device
/// once it is cancelled.
#[derive(Debug)]
pub struct CaptureHandle {
    kind: TrackKind,
    cancel: CancellationToken,
}

impl CaptureHandle {
    pub fn new(kind: TrackKind, cancel: CancellationToken) -> Self {
        Self { kind, cancel }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(kind = %self.kind, "Stopping capture");
            self.cancel.cancel();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_cancels_capture() {
        let cancel = CancellationToken::new();
        let handle = CaptureHandle::new(TrackKind::Audio, cancel.clone());
        assert!(!cancel.is_cancelled());

        drop(handle);
        assert!(cancel.is_cancelled());
    }
}
