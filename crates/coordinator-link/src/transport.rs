use std::fmt;

use async_trait::async_trait;
use inspect_core::{CoordinatorItemInfo, Fingerprint};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

const EVENT_CHANNEL_DEPTH: usize = 256;

pub type EventSender = mpsc::Sender<CoordinatorEvent>;
pub type EventReceiver = mpsc::Receiver<CoordinatorEvent>;

/// Channel a transport publishes its lifecycle callbacks and inbound messages on.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_CHANNEL_DEPTH)
}

/// Everything the coordinator connection reports back to the link.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    Connected,
    ConnectFailed { reason: String },
    LoggedOn,
    LogOnRejected { reason: String },
    Disconnected { reason: String },
    ItemInfo(CoordinatorItemInfo),
    /// An inbound message that could not be understood.
    Malformed { detail: String },
    FatalProtocolError { reason: String },
}

/// The one request shape the coordinator accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectRequest {
    pub fingerprint: Fingerprint,
    pub reference: String,
}

impl InspectRequest {
    pub fn new(fingerprint: Fingerprint, reference: impl Into<String>) -> Self {
        Self {
            fingerprint,
            reference: reference.into(),
        }
    }
}

/// Coordinator account credentials, sourced from configuration.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("coordinator transport is not connected")]
    NotConnected,
    #[error("coordinator transport io error: {0}")]
    Io(String),
    #[error("failed to encode coordinator frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("coordinator event channel closed")]
    Closed,
}

/// Outbound side of the coordinator connection.
///
/// Implementations report the outcome of `connect` and `log_on`, and every
/// pushed response, through the [`EventSender`] they were built with.
/// Reports may wait for channel capacity; the link calls these methods off
/// the task that drains the channel. Writes are serialized by the implementation.
#[async_trait]
pub trait CoordinatorTransport: Send + Sync + 'static {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn log_on(&self, credentials: &Credentials) -> Result<(), TransportError>;
    async fn send_inspect(&self, request: &InspectRequest) -> Result<(), TransportError>;
}
