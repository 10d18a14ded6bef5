use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use dashmap::{mapref::entry::Entry, DashMap};
use inspect_core::{Fingerprint, ItemDetails};
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::{sync::oneshot, time::timeout};
use tracing::{debug, warn};

use crate::{
    session::{SessionHandle, SessionState},
    transport::{CoordinatorTransport, InspectRequest, TransportError},
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CorrelatorError {
    #[error("a request for item {0} is already in flight")]
    DuplicateInFlight(Fingerprint),
    #[error("coordinator session is not ready (state: {})", .0.as_str())]
    SessionNotReady(SessionState),
    #[error("coordinator did not answer for item {fingerprint} within {after:?}")]
    RequestTimeout {
        fingerprint: Fingerprint,
        after: Duration,
    },
    #[error("failed to send request to coordinator: {0}")]
    Transport(#[from] TransportError),
}

impl CorrelatorError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            CorrelatorError::DuplicateInFlight(_) => "duplicate_in_flight",
            CorrelatorError::SessionNotReady(_) => "session_not_ready",
            CorrelatorError::RequestTimeout { .. } => "request_timeout",
            CorrelatorError::Transport(_) => "transport",
        }
    }
}

/// Matches pushed coordinator responses to the callers waiting for them.
///
/// At most one request per fingerprint is in flight; a second concurrent
/// dispatch for the same fingerprint is rejected with `DuplicateInFlight`.
pub struct Correlator {
    pending: DashMap<Fingerprint, PendingRequest>,
    session: SessionHandle,
    transport: Arc<dyn CoordinatorTransport>,
    request_timeout: Duration,
    next_ticket: AtomicU64,
    unmatched: AtomicU64,
}

struct PendingRequest {
    ticket: u64,
    waiter: oneshot::Sender<ItemDetails>,
    created_at: Instant,
}

impl Correlator {
    pub fn new(
        session: SessionHandle,
        transport: Arc<dyn CoordinatorTransport>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            pending: DashMap::new(),
            session,
            transport,
            request_timeout,
            next_ticket: AtomicU64::new(1),
            unmatched: AtomicU64::new(0),
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Sends `request` and waits for the matching `complete` or the deadline.
    pub async fn dispatch(&self, request: InspectRequest) -> Result<ItemDetails, CorrelatorError> {
        let fingerprint = request.fingerprint.clone();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (waiter, receiver) = oneshot::channel();

        match self.pending.entry(fingerprint.clone()) {
            Entry::Occupied(_) => {
                counter!("inspect_coordinator_duplicate_dispatch_total", 1);
                return Err(CorrelatorError::DuplicateInFlight(fingerprint));
            }
            Entry::Vacant(entry) => {
                let state = self.session.current();
                if state != SessionState::Ready {
                    return Err(CorrelatorError::SessionNotReady(state));
                }
                entry.insert(PendingRequest {
                    ticket,
                    waiter,
                    created_at: Instant::now(),
                });
            }
        }
        // Evicts this dispatch's entry on every exit path, including a
        // dropped caller future.
        let _guard = PendingGuard {
            correlator: self,
            fingerprint: &fingerprint,
            ticket,
        };
        gauge!("inspect_coordinator_pending_requests", self.pending.len() as f64);

        self.transport.send_inspect(&request).await?;
        debug!(fingerprint = %fingerprint, ticket, "inspect request dispatched");

        // The waiter's sender stays in `pending` until `complete` sends on it,
        // so the only way to get no answer is the deadline.
        if let Ok(Ok(details)) = timeout(self.request_timeout, receiver).await {
            return Ok(details);
        }
        warn!(
            fingerprint = %fingerprint,
            timeout_ms = self.request_timeout.as_millis() as u64,
            "coordinator request timed out"
        );
        counter!("inspect_coordinator_timeouts_total", 1);
        Err(CorrelatorError::RequestTimeout {
            fingerprint: fingerprint.clone(),
            after: self.request_timeout,
        })
    }

    /// Delivers a pushed response. Returns `false` when nobody was waiting.
    pub fn complete(&self, fingerprint: &Fingerprint, details: ItemDetails) -> bool {
        let Some((_, pending)) = self.pending.remove(fingerprint) else {
            self.record_unmatched(fingerprint, "no_pending_request");
            return false;
        };

        histogram!(
            "inspect_coordinator_response_ms",
            pending.created_at.elapsed().as_secs_f64() * 1000.0
        );
        if pending.waiter.send(details).is_err() {
            self.record_unmatched(fingerprint, "waiter_gone");
            return false;
        }
        true
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Responses discarded because no request was waiting for them.
    pub fn unmatched_responses(&self) -> u64 {
        self.unmatched.load(Ordering::Relaxed)
    }

    fn record_unmatched(&self, fingerprint: &Fingerprint, reason: &'static str) {
        self.unmatched.fetch_add(1, Ordering::Relaxed);
        counter!(
            "inspect_coordinator_unmatched_responses_total",
            1,
            "reason" => reason
        );
        debug!(fingerprint = %fingerprint, reason, "discarding coordinator response");
    }

    fn evict(&self, fingerprint: &Fingerprint, ticket: u64) {
        self.pending
            .remove_if(fingerprint, |_, pending| pending.ticket == ticket);
    }
}

struct PendingGuard<'a> {
    correlator: &'a Correlator,
    fingerprint: &'a Fingerprint,
    ticket: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.evict(self.fingerprint, self.ticket);
    }
}
