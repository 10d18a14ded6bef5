//! Coordinator link: the persistent, authenticated path to the item coordinator.
//!
//! Responsibilities:
//! - modelling the connection lifecycle ([`SessionState`]) behind a read-only [`SessionHandle`]
//! - correlating pushed item responses with waiting callers ([`Correlator`])
//! - draining the transport's inbound events on one background task ([`CoordinatorLink`])
//!
//! The transport itself is a collaborator behind [`CoordinatorTransport`]; the
//! crate ships an in-memory [`LocalCoordinator`] and a JSON-over-WebSocket
//! [`WsBridgeTransport`].

pub mod correlator;
pub mod link;
pub mod local;
pub mod session;
pub mod transport;
pub mod ws;

pub use correlator::{Correlator, CorrelatorError};
pub use link::{CoordinatorLink, LinkConfig, LinkError};
pub use local::LocalCoordinator;
pub use session::{SessionEvent, SessionHandle, SessionState, TransitionError};
pub use transport::{
    event_channel, CoordinatorEvent, CoordinatorTransport, Credentials, EventReceiver,
    EventSender, InspectRequest, TransportError,
};
pub use ws::WsBridgeTransport;
