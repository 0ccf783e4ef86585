pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
pub mod rtc;

pub use capture::{CaptureHandle, CaptureSource};
pub use engine::{
    MediaConstraints, MediaEngine, MediaStream, PeerConnection, PeerConnectionState, PeerEvent,
    RemoteTrack, TrackInfo, TrackKind,
};
pub use error::{MediaAccessError, WebrtcError};
pub use peercall_protocol as protocol;
