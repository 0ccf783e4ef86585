//! Render targets for the local preview and the remote peer.

use parking_lot::Mutex;
use peercall_webrtc::{RemoteTrack, TrackInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceSource {
    Local {
        stream_id: String,
        tracks: Vec<TrackInfo>,
    },
    Remote(RemoteTrack),
}

pub trait VideoSurface: Send + Sync + 'static {
    fn attach(&self, source: SurfaceSource);
    fn clear(&self);
}

/// Surface for headless use, reporting what would be shown through `tracing`.
#[derive(Debug, Clone)]
pub struct TracingSurface {
    name: &'static str,
}

impl TracingSurface {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl VideoSurface for TracingSurface {
    fn attach(&self, source: SurfaceSource) {
        match source {
            SurfaceSource::Local { stream_id, tracks } => {
                tracing::info!(surface = self.name, %stream_id, num_tracks = tracks.len(), "Showing local stream");
            }
            SurfaceSource::Remote(track) => {
                tracing::info!(surface = self.name, stream_id = %track.stream_id, track_id = %track.id, kind = %track.kind, "Showing remote track");
            }
        }
    }

    fn clear(&self) {
        tracing::info!(surface = self.name, "Surface cleared");
    }
}

/// Surface that keeps what is currently attached, for UIs that poll.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    sources: Mutex<Vec<SurfaceSource>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sources(&self) -> Vec<SurfaceSource> {
        self.sources.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.lock().is_empty()
    }
}

impl VideoSurface for RecordingSurface {
    fn attach(&self, source: SurfaceSource) {
        self.sources.lock().push(source);
    }

    fn clear(&self) {
        self.sources.lock().clear();
    }
}
