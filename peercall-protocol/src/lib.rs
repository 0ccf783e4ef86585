pub mod webrtc;
pub mod ws;

pub use webrtc::{IceCandidate, IceConfig, IceServer, SdpType, SessionDescription};
pub use ws::SignalingMessage;
