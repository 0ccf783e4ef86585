#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod tokio;

use crate::error::SignalingError;
use async_trait::async_trait;
use peercall_protocol::SignalingMessage;

#[async_trait]
pub trait SignalingTransport: Send + Sync + 'static {
    async fn send(&mut self, msg: SignalingMessage) -> Result<(), SignalingError>;
    /// Waits for the next message from the relay. Must be cancel-safe, as it is raced against
    /// other session inputs.
    async fn recv(&mut self) -> Result<SignalingMessage, SignalingError>;
    async fn close(&mut self) -> Result<(), SignalingError>;
}
