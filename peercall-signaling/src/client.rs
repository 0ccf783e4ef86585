use crate::error::SignalingError;
use crate::transport::SignalingTransport;
use peercall_protocol::SignalingMessage;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Signaling channel of a single call session.
///
/// Once [`SignalingClient::disconnect`] has been called, every further send or receive fails with
/// [`SignalingError::Disconnected`].
pub struct SignalingClient<T: SignalingTransport> {
    transport: T,
    shutdown: CancellationToken,
    connected: bool,
}

impl<T: SignalingTransport> SignalingClient<T> {
    #[instrument(level = "debug", skip_all)]
    pub fn new(transport: T, shutdown: CancellationToken) -> Self {
        Self {
            transport,
            shutdown,
            connected: true,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    #[instrument(level = "debug", skip(self, msg), fields(event = msg.event()), err)]
    pub async fn send(&mut self, msg: SignalingMessage) -> Result<(), SignalingError> {
        if !self.connected {
            tracing::debug!("Signaling channel disconnected, dropping message");
            return Err(SignalingError::Disconnected);
        }

        tracing::debug!("Sending message to server");
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                tracing::debug!("Shutdown signal received, aborting send");
                Err(SignalingError::Shutdown("Shutdown signal received".to_string()))
            }
            result = self.transport.send(msg) => result,
        }
    }

    #[instrument(level = "debug", skip(self), err)]
    pub async fn recv(&mut self) -> Result<SignalingMessage, SignalingError> {
        if !self.connected {
            return Err(SignalingError::Disconnected);
        }

        tracing::debug!("Waiting for message from server");
        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                tracing::debug!("Shutdown signal received, aborting recv");
                return Err(SignalingError::Shutdown("Shutdown signal received".to_string()));
            }
            msg = self.transport.recv() => msg,
        };

        if let Err(SignalingError::Disconnected | SignalingError::Transport(_)) = &result {
            tracing::info!("Signaling connection lost");
            self.connected = false;
        }
        result
    }

    /// Closes the underlying transport. Calling this more than once is a no-op.
    #[instrument(level = "info", skip(self))]
    pub async fn disconnect(&mut self) {
        if !self.connected {
            tracing::debug!("Already disconnected");
            return;
        }
        self.connected = false;

        if let Err(err) = self.transport.close().await {
            tracing::warn!(?err, "Failed to close signaling transport");
        }
        tracing::info!("Disconnected from signaling server");
    }
}
