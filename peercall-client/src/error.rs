use crate::session::CallState;
use peercall_signaling::error::SignalingError;
use peercall_webrtc::{MediaAccessError, WebrtcError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {operation} while call is {state}")]
    InvalidState {
        operation: &'static str,
        state: CallState,
    },
    #[error("no peer connection")]
    NoPeerConnection,
    #[error("offer rejected, a call is already in progress")]
    OfferRejected,
    #[error("media access failed: {0}")]
    MediaAccess(#[from] MediaAccessError),
    #[error("webrtc error: {0}")]
    Webrtc(#[from] WebrtcError),
    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),
    #[error("session stopped")]
    SessionStopped,
}
