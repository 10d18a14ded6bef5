use std::{future::Future, sync::Arc, time::Duration};

use inspect_core::normalize_coordinator;
use metrics::counter;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, warn};

use crate::{
    correlator::{Correlator, DEFAULT_REQUEST_TIMEOUT},
    session::{SessionEvent, SessionHandle, SessionMachine},
    transport::{
        CoordinatorEvent, CoordinatorTransport, Credentials, EventReceiver, TransportError,
    },
};

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub request_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("coordinator event loop has stopped")]
    Stopped,
}

enum LinkCommand {
    Connect,
    ConnectFailed(TransportError),
    LogOnFailed(TransportError),
}

/// A running coordinator connection: session state, correlator and the
/// background task that drains inbound events.
pub struct CoordinatorLink {
    correlator: Arc<Correlator>,
    session: SessionHandle,
    commands: mpsc::Sender<LinkCommand>,
    task: JoinHandle<()>,
}

impl CoordinatorLink {
    pub fn spawn(
        transport: Arc<dyn CoordinatorTransport>,
        events: EventReceiver,
        credentials: Credentials,
        config: LinkConfig,
    ) -> Self {
        let (machine, session) = SessionMachine::new();
        let correlator = Arc::new(Correlator::new(
            session.clone(),
            Arc::clone(&transport),
            config.request_timeout,
        ));
        let (commands, command_rx) = mpsc::channel(8);

        let event_loop = EventLoop {
            machine,
            transport,
            credentials,
            correlator: Arc::clone(&correlator),
            commands: commands.downgrade(),
        };
        let task = tokio::spawn(event_loop.run(events, command_rx));

        Self {
            correlator,
            session,
            commands,
            task,
        }
    }

    /// Asks the event loop to (re)connect. Only honoured from `Disconnected`.
    pub async fn connect(&self) -> Result<(), LinkError> {
        self.commands
            .send(LinkCommand::Connect)
            .await
            .map_err(|_| LinkError::Stopped)
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }
}

impl Drop for CoordinatorLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct EventLoop {
    machine: SessionMachine,
    transport: Arc<dyn CoordinatorTransport>,
    credentials: Credentials,
    correlator: Arc<Correlator>,
    commands: mpsc::WeakSender<LinkCommand>,
}

impl EventLoop {
    async fn run(self, mut events: EventReceiver, mut commands: mpsc::Receiver<LinkCommand>) {
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("coordinator event stream closed");
                        self.transition(SessionEvent::TransportDropped);
                        break;
                    }
                },
                command = commands.recv() => match command {
                    Some(LinkCommand::Connect) => self.handle_connect(),
                    Some(LinkCommand::ConnectFailed(err)) => {
                        warn!(error = %err, "coordinator connect failed");
                        self.transition(SessionEvent::TransportFailed);
                    }
                    Some(LinkCommand::LogOnFailed(err)) => {
                        warn!(error = %err, "failed to send coordinator log-on");
                        self.transition(SessionEvent::TransportDropped);
                    }
                    None => break,
                },
            }
        }
        info!("coordinator event loop finished");
    }

    fn handle_connect(&self) {
        if !self.transition(SessionEvent::ConnectRequested) {
            return;
        }
        let transport = Arc::clone(&self.transport);
        self.call_transport(
            async move { transport.connect().await },
            LinkCommand::ConnectFailed,
        );
    }

    /// Runs a transport call on its own task. Transports report back through
    /// the event channel this loop drains, so the loop must never await them.
    fn call_transport<F>(&self, call: F, on_error: fn(TransportError) -> LinkCommand)
    where
        F: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            if let Err(err) = call.await {
                if let Some(commands) = commands.upgrade() {
                    let _ = commands.send(on_error(err)).await;
                }
            }
        });
    }

    fn handle_event(&self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Connected => {
                if !self.transition(SessionEvent::TransportEstablished) {
                    return;
                }
                info!(username = self.credentials.username(), "logging on to coordinator");
                let transport = Arc::clone(&self.transport);
                let credentials = self.credentials.clone();
                self.call_transport(
                    async move { transport.log_on(&credentials).await },
                    LinkCommand::LogOnFailed,
                );
            }
            CoordinatorEvent::ConnectFailed { reason } => {
                warn!(%reason, "coordinator connection failed");
                self.transition(SessionEvent::TransportFailed);
            }
            CoordinatorEvent::LoggedOn => {
                self.transition(SessionEvent::CredentialsAccepted);
            }
            CoordinatorEvent::LogOnRejected { reason } => {
                error!(%reason, "coordinator rejected credentials");
                self.transition(SessionEvent::CredentialsRejected);
            }
            CoordinatorEvent::Disconnected { reason } => {
                warn!(%reason, "coordinator connection dropped");
                self.transition(SessionEvent::TransportDropped);
            }
            CoordinatorEvent::ItemInfo(raw) => {
                let fingerprint = raw.fingerprint();
                let details = normalize_coordinator(raw);
                self.correlator.complete(&fingerprint, details);
            }
            CoordinatorEvent::Malformed { detail } => {
                counter!("inspect_coordinator_protocol_faults_total", 1);
                warn!(%detail, "dropping malformed coordinator message");
            }
            CoordinatorEvent::FatalProtocolError { reason } => {
                error!(%reason, "fatal coordinator protocol error");
                self.transition(SessionEvent::FatalProtocolError);
            }
        }
    }

    /// Applies `event`; returns whether the state changed.
    fn transition(&self, event: SessionEvent) -> bool {
        match self.machine.apply(event) {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "ignoring coordinator event");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        correlator::CorrelatorError,
        local::LocalCoordinator,
        session::SessionState,
        transport::{event_channel, InspectRequest},
    };
    use inspect_core::{
        extract, fingerprint::embed, CoordinatorItemInfo, CoordinatorSticker, ItemDetails, Sticker,
    };

    fn credentials() -> Credentials {
        Credentials::new("inspector", "secret")
    }

    fn spawn_with(
        build: impl FnOnce(crate::EventSender) -> LocalCoordinator,
    ) -> (CoordinatorLink, Arc<LocalCoordinator>) {
        let (events, receiver) = event_channel();
        let transport = Arc::new(build(events));
        let link = CoordinatorLink::spawn(
            transport.clone(),
            receiver,
            credentials(),
            LinkConfig::default(),
        );
        (link, transport)
    }

    async fn settle(link: &CoordinatorLink, target: SessionState) {
        let reached = link.session().wait_for(|state| *state == target).await;
        assert_eq!(reached, Some(target));
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn connect_logs_on_and_becomes_ready() {
        let (link, transport) = spawn_with(LocalCoordinator::new);
        assert_eq!(link.session().current(), SessionState::Disconnected);

        link.connect().await.unwrap();
        settle(&link, SessionState::Ready).await;
        assert_eq!(transport.log_ons(), vec!["inspector".to_string()]);
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn refused_connect_returns_to_disconnected() {
        let (link, transport) =
            spawn_with(|events| LocalCoordinator::new(events).refusing_connect());
        link.connect().await.unwrap();
        while transport.connect_attempts() == 0 {
            tokio::task::yield_now().await;
        }
        settle(&link, SessionState::Disconnected).await;
        assert!(transport.log_ons().is_empty());
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn rejected_credentials_fault_and_block_dispatch() {
        let (link, _transport) =
            spawn_with(|events| LocalCoordinator::new(events).rejecting_log_on("bad password"));
        link.connect().await.unwrap();
        settle(&link, SessionState::Faulted).await;

        let reference = embed("5");
        let err = link
            .correlator()
            .dispatch(InspectRequest::new(extract(&reference).unwrap(), reference))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CorrelatorError::SessionNotReady(SessionState::Faulted)
        ));
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn inbound_item_info_completes_dispatch() {
        let (link, _transport) = spawn_with(|events| {
            LocalCoordinator::new(events).with_responder(|request| {
                Some(CoordinatorItemInfo {
                    itemid: request.fingerprint.as_str().parse().ok()?,
                    paintwear: Some(0.234),
                    paintseed: Some(7),
                    paintindex: Some(179),
                    stickers: Some(vec![CoordinatorSticker {
                        sticker_id: Some(201),
                        name: None,
                        wear: Some(0.1),
                    }]),
                })
            })
        });
        link.connect().await.unwrap();
        settle(&link, SessionState::Ready).await;

        let reference = "https://example.test/inspect/M12345A/";
        let details = link
            .correlator()
            .dispatch(InspectRequest::new(extract(reference).unwrap(), reference))
            .await
            .unwrap();
        assert_eq!(
            details,
            ItemDetails::new(0.234, 7, 179, vec![Sticker::new("201", 0.1)])
        );
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn zero_padded_token_matches_numeric_response() {
        let (link, _transport) = spawn_with(|events| {
            LocalCoordinator::new(events).with_responder(|request| {
                Some(CoordinatorItemInfo {
                    itemid: request.fingerprint.as_str().parse().ok()?,
                    paintwear: Some(0.5),
                    ..CoordinatorItemInfo::default()
                })
            })
        });
        link.connect().await.unwrap();
        settle(&link, SessionState::Ready).await;

        let reference = "steam://rungame/730/0/+csgo_econ_action_preview%20M00042A1D2";
        let details = link
            .correlator()
            .dispatch(InspectRequest::new(extract(reference).unwrap(), reference))
            .await
            .unwrap();
        assert_eq!(details.float_value(), 0.5);
        assert_eq!(link.correlator().unmatched_responses(), 0);
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn malformed_messages_do_not_stop_the_loop() {
        let (link, transport) = spawn_with(LocalCoordinator::new);
        transport
            .push(CoordinatorEvent::Malformed {
                detail: "garbage".into(),
            })
            .await
            .unwrap();
        link.connect().await.unwrap();
        settle(&link, SessionState::Ready).await;
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn burst_larger_than_the_channel_during_connect_still_logs_on() {
        let burst = (0..600).map(|n| CoordinatorEvent::Malformed {
            detail: format!("frame {n}"),
        });
        let (link, transport) =
            spawn_with(|events| LocalCoordinator::new(events).emitting_on_connect(burst));
        link.connect().await.unwrap();
        settle(&link, SessionState::Ready).await;
        assert_eq!(transport.log_ons(), vec!["inspector".to_string()]);
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn drop_then_reconnect() {
        let (link, transport) = spawn_with(LocalCoordinator::new);
        link.connect().await.unwrap();
        settle(&link, SessionState::Ready).await;

        transport
            .push(CoordinatorEvent::Disconnected {
                reason: "socket reset".into(),
            })
            .await
            .unwrap();
        settle(&link, SessionState::Disconnected).await;

        link.connect().await.unwrap();
        settle(&link, SessionState::Ready).await;
        assert_eq!(transport.log_ons().len(), 2);
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn fatal_protocol_error_is_terminal() {
        let (link, transport) = spawn_with(LocalCoordinator::new);
        link.connect().await.unwrap();
        settle(&link, SessionState::Ready).await;

        transport
            .push(CoordinatorEvent::FatalProtocolError {
                reason: "unsupported protocol version".into(),
            })
            .await
            .unwrap();
        settle(&link, SessionState::Faulted).await;

        link.connect().await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(link.session().current(), SessionState::Faulted);
    }
}
