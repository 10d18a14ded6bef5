use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use inspect_core::CoordinatorItemInfo;
use parking_lot::Mutex;

use crate::transport::{
    CoordinatorEvent, CoordinatorTransport, Credentials, EventSender, InspectRequest,
    TransportError,
};

type Responder = Box<dyn Fn(&InspectRequest) -> Option<CoordinatorItemInfo> + Send + Sync>;

/// In-memory coordinator for tests and offline runs.
///
/// Connects and accepts log-ons immediately unless told otherwise, records
/// every inspect request, and answers through an optional responder.
pub struct LocalCoordinator {
    events: EventSender,
    refuse_connect: bool,
    reject_log_on: Option<String>,
    fail_sends: AtomicBool,
    connect_attempts: AtomicUsize,
    on_connect: Vec<CoordinatorEvent>,
    responder: Option<Responder>,
    sent: Mutex<Vec<InspectRequest>>,
    log_ons: Mutex<Vec<String>>,
}

impl LocalCoordinator {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            refuse_connect: false,
            reject_log_on: None,
            fail_sends: AtomicBool::new(false),
            connect_attempts: AtomicUsize::new(0),
            on_connect: Vec::new(),
            responder: None,
            sent: Mutex::new(Vec::new()),
            log_ons: Mutex::new(Vec::new()),
        }
    }

    pub fn refusing_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    pub fn rejecting_log_on(mut self, reason: impl Into<String>) -> Self {
        self.reject_log_on = Some(reason.into());
        self
    }

    /// Pushes `events` ahead of `Connected` on every successful connect, like
    /// frames a bridge sends before the handshake completes.
    pub fn emitting_on_connect(
        mut self,
        events: impl IntoIterator<Item = CoordinatorEvent>,
    ) -> Self {
        self.on_connect = events.into_iter().collect();
        self
    }

    /// Answers each request with whatever `responder` returns; `None` stays silent.
    pub fn with_responder(
        mut self,
        responder: impl Fn(&InspectRequest) -> Option<CoordinatorItemInfo> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    pub fn sent_requests(&self) -> Vec<InspectRequest> {
        self.sent.lock().clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Usernames seen by `log_on`, in order.
    pub fn log_ons(&self) -> Vec<String> {
        self.log_ons.lock().clone()
    }

    /// Injects an inbound event as if the coordinator had pushed it.
    pub async fn push(&self, event: CoordinatorEvent) -> Result<(), TransportError> {
        self.events
            .send(event)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl CoordinatorTransport for LocalCoordinator {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        if self.refuse_connect {
            return self
                .push(CoordinatorEvent::ConnectFailed {
                    reason: "connection refused".into(),
                })
                .await;
        }
        for event in &self.on_connect {
            self.push(event.clone()).await?;
        }
        self.push(CoordinatorEvent::Connected).await
    }

    async fn log_on(&self, credentials: &Credentials) -> Result<(), TransportError> {
        self.log_ons.lock().push(credentials.username().to_string());
        match &self.reject_log_on {
            Some(reason) => {
                self.push(CoordinatorEvent::LogOnRejected {
                    reason: reason.clone(),
                })
                .await
            }
            None => self.push(CoordinatorEvent::LoggedOn).await,
        }
    }

    async fn send_inspect(&self, request: &InspectRequest) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(TransportError::Io("send failed".into()));
        }
        self.sent.lock().push(request.clone());
        let reply = self
            .responder
            .as_ref()
            .and_then(|responder| responder(request));
        if let Some(info) = reply {
            self.push(CoordinatorEvent::ItemInfo(info)).await?;
        }
        Ok(())
    }
}
