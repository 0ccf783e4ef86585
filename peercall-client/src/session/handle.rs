use crate::error::SessionError;
use crate::session::CallState;
use tokio::sync::{mpsc, oneshot, watch};

pub(crate) const SESSION_COMMANDS_CAPACITY: usize = 8;

/// User actions, processed by the session task in order of arrival.
#[derive(Debug)]
pub enum SessionCommand {
    StartCall {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    EndCall {
        reply: oneshot::Sender<()>,
    },
}

/// Controls of a running call session: the start and end buttons, plus the current state.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands_tx: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<CallState>,
}

impl SessionHandle {
    pub(crate) fn new(
        commands_tx: mpsc::Sender<SessionCommand>,
        state_rx: watch::Receiver<CallState>,
    ) -> Self {
        Self {
            commands_tx,
            state_rx,
        }
    }

    pub fn state(&self) -> CallState {
        *self.state_rx.borrow()
    }

    pub async fn start_call(&self) -> Result<(), SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands_tx
            .send(SessionCommand::StartCall { reply })
            .await
            .map_err(|_| SessionError::SessionStopped)?;
        reply_rx.await.map_err(|_| SessionError::SessionStopped)?
    }

    pub async fn end_call(&self) -> Result<(), SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands_tx
            .send(SessionCommand::EndCall { reply })
            .await
            .map_err(|_| SessionError::SessionStopped)?;
        reply_rx.await.map_err(|_| SessionError::SessionStopped)
    }

    /// Resolves once the session reaches `state`.
    ///
    /// Fails with [`SessionError::SessionStopped`] if the session task exits first.
    pub async fn wait_for_state(&self, state: CallState) -> Result<(), SessionError> {
        let mut state_rx = self.state_rx.clone();
        state_rx
            .wait_for(|current| *current == state)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::SessionStopped)
    }
}
