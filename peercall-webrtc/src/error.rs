use crate::engine::TrackKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebrtcError {
    #[error("peer connection closed")]
    Closed,
    #[error("invalid signaling state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Other(#[from] Box<anyhow::Error>),
}

impl From<anyhow::Error> for WebrtcError {
    fn from(err: anyhow::Error) -> Self {
        WebrtcError::Other(Box::new(err))
    }
}

/// Failure to acquire local capture devices.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaAccessError {
    #[error("permission to access capture devices was denied")]
    PermissionDenied,
    #[error("no {0} capture device present")]
    NoDevice(TrackKind),
    #[error("{0} capture device could not be opened: {1}")]
    Unavailable(TrackKind, String),
    #[error("at least one of audio or video must be requested")]
    InvalidConstraints,
}
