use peercall_protocol::IceConfig;
use peercall_webrtc::MediaConstraints;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Lifecycle of a call session. There is no way out of [`CallState::Ended`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// Descriptions are being exchanged, no remote media has arrived yet.
    Negotiating,
    /// At least one remote track arrived.
    Active,
    Ended,
}

impl Display for CallState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::Negotiating => "negotiating",
            CallState::Active => "active",
            CallState::Ended => "ended",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

/// What to do with an inbound offer while a peer connection already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferPolicy {
    /// Close the existing connection and answer the new offer on a fresh one.
    #[default]
    Replace,
    /// Keep the existing connection and refuse the offer.
    Reject,
}

#[derive(Debug, Clone, Default)]
pub struct CallSettings {
    pub ice: IceConfig,
    pub constraints: MediaConstraints,
    pub offer_policy: OfferPolicy,
}
