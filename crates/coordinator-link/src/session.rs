use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

/// Lifecycle of the single coordinator connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingAuth,
    Ready,
    /// Terminal; needs operator intervention.
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectRequested,
    TransportEstablished,
    TransportFailed,
    CredentialsAccepted,
    CredentialsRejected,
    TransportDropped,
    FatalProtocolError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no session transition from {from:?} on {event:?}")]
pub struct TransitionError {
    pub from: SessionState,
    pub event: SessionEvent,
}

impl SessionState {
    pub fn on(self, event: SessionEvent) -> Result<SessionState, TransitionError> {
        use SessionEvent::*;
        use SessionState::*;

        let next = match (self, event) {
            (_, FatalProtocolError) => Faulted,
            (Disconnected, ConnectRequested) => Connecting,
            (Connecting, TransportEstablished) => AwaitingAuth,
            (Connecting, TransportFailed) => Disconnected,
            (AwaitingAuth, CredentialsAccepted) => Ready,
            (AwaitingAuth, CredentialsRejected) => Faulted,
            (Connecting | AwaitingAuth | Ready, TransportDropped) => Disconnected,
            (from, event) => return Err(TransitionError { from, event }),
        };
        Ok(next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingAuth => "awaiting_auth",
            SessionState::Ready => "ready",
            SessionState::Faulted => "faulted",
        }
    }
}

/// Sole writer of the session state. Owned by the link's event loop.
pub(crate) struct SessionMachine {
    state: watch::Sender<SessionState>,
}

impl SessionMachine {
    pub(crate) fn new() -> (Self, SessionHandle) {
        let (state, receiver) = watch::channel(SessionState::Disconnected);
        (Self { state }, SessionHandle { receiver })
    }

    pub(crate) fn apply(&self, event: SessionEvent) -> Result<SessionState, TransitionError> {
        let from = *self.state.borrow();
        let to = from.on(event)?;
        self.state.send_replace(to);
        info!(
            from = from.as_str(),
            to = to.as_str(),
            event = ?event,
            "coordinator session transition"
        );
        counter!(
            "inspect_coordinator_session_transitions_total",
            1,
            "to" => to.as_str()
        );
        Ok(to)
    }
}

/// Read-only view of the session state, cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    receiver: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn current(&self) -> SessionState {
        *self.receiver.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.current() == SessionState::Ready
    }

    /// Waits until `predicate` holds. Returns `None` once the link is gone.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SessionState) -> bool,
    ) -> Option<SessionState> {
        let mut receiver = self.receiver.clone();
        receiver
            .wait_for(|state| predicate(state))
            .await
            .ok()
            .map(|state| *state)
    }
}
