use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use backoff_http::{LookupError, RestLookupClient};
use coordinator_link::{Correlator, CorrelatorError, InspectRequest};
use inspect_core::{
    extract, normalize_rest, ExtractionError, ItemDetails, RestItemInfo, ResultCache,
};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    InvalidReference(#[from] ExtractionError),
    #[error("coordinator lookup failed: {0}")]
    Coordinator(#[from] CorrelatorError),
    #[error("rest lookup failed: {0}")]
    Lookup(#[from] LookupError),
}

/// The persistent coordinator connection as seen by the resolver.
#[async_trait]
pub trait CoordinatorPath: Send + Sync {
    fn is_ready(&self) -> bool;

    async fn inspect(&self, request: InspectRequest) -> Result<ItemDetails, CorrelatorError>;
}

#[async_trait]
impl CoordinatorPath for Correlator {
    fn is_ready(&self) -> bool {
        self.session().is_ready()
    }

    async fn inspect(&self, request: InspectRequest) -> Result<ItemDetails, CorrelatorError> {
        self.dispatch(request).await
    }
}

/// Stateless lookup used whenever the coordinator is unavailable.
#[async_trait]
pub trait LookupPath: Send + Sync {
    async fn lookup(
        &self,
        reference: &str,
        deadline: Option<Duration>,
    ) -> Result<RestItemInfo, LookupError>;
}

#[async_trait]
impl LookupPath for RestLookupClient {
    async fn lookup(
        &self,
        reference: &str,
        deadline: Option<Duration>,
    ) -> Result<RestItemInfo, LookupError> {
        match deadline {
            Some(deadline) => self.lookup_within(reference, deadline).await,
            None => RestLookupClient::lookup(self, reference).await,
        }
    }
}

/// Single entry point: reference in, normalized details out.
///
/// Checks the cache first, then prefers the coordinator while its session is
/// `Ready` and falls back to the REST lookup otherwise. A failure on the chosen
/// path is returned as is; the other path is not tried.
pub struct Resolver {
    cache: ResultCache,
    cache_ttl: Duration,
    coordinator: Option<Arc<dyn CoordinatorPath>>,
    lookup: Arc<dyn LookupPath>,
    lookup_deadline: Option<Duration>,
}

impl Resolver {
    pub fn new(lookup: Arc<dyn LookupPath>) -> Self {
        Self {
            cache: ResultCache::new(),
            cache_ttl: DEFAULT_CACHE_TTL,
            coordinator: None,
            lookup,
            lookup_deadline: None,
        }
    }

    pub fn with_coordinator(mut self, coordinator: Arc<dyn CoordinatorPath>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_lookup_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.lookup_deadline = deadline;
        self
    }

    pub fn cached_items(&self) -> usize {
        self.cache.len()
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, reference: &str) -> Result<ItemDetails, ResolveError> {
        let fingerprint = extract(reference).map_err(|err| {
            counter!("inspect_resolve_total", 1, "outcome" => "invalid_reference");
            err
        })?;

        if let Some(details) = self.cache.get(&fingerprint) {
            debug!(%fingerprint, "served from cache");
            counter!("inspect_resolve_total", 1, "outcome" => "cache_hit");
            return Ok(details);
        }

        let details = match &self.coordinator {
            Some(coordinator) if coordinator.is_ready() => {
                let request = InspectRequest::new(fingerprint.clone(), reference);
                coordinator.inspect(request).await.map_err(|err| {
                    warn!(%fingerprint, error = %err, "coordinator path failed");
                    counter!("inspect_resolve_total", 1, "outcome" => "coordinator_error");
                    err
                })?
            }
            _ => {
                let info = self
                    .lookup
                    .lookup(reference, self.lookup_deadline)
                    .await
                    .map_err(|err| {
                        warn!(%fingerprint, error = %err, "rest path failed");
                        counter!("inspect_resolve_total", 1, "outcome" => "lookup_error");
                        err
                    })?;
                normalize_rest(info)
            }
        };

        counter!("inspect_resolve_total", 1, "outcome" => "resolved");
        self.cache.put(fingerprint, details.clone(), self.cache_ttl);
        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator_link::{
        event_channel, CoordinatorLink, Credentials, LinkConfig, LocalCoordinator, SessionState,
    };
    use inspect_core::{
        fingerprint::embed, CoordinatorItemInfo, CoordinatorSticker, RestSticker, Sticker,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeLookup {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeLookup {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LookupPath for FakeLookup {
        async fn lookup(
            &self,
            _reference: &str,
            _deadline: Option<Duration>,
        ) -> Result<RestItemInfo, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LookupError::Upstream("lookup unavailable".into()));
            }
            Ok(RestItemInfo {
                floatvalue: Some(0.5),
                paintseed: Some(1),
                paintindex: Some(2),
                stickers: Some(vec![RestSticker {
                    sticker_id: Some(9),
                    name: Some("Holo".into()),
                    wear: Some(0.25),
                }]),
            })
        }
    }

    fn coordinator_answering() -> (CoordinatorLink, Arc<LocalCoordinator>) {
        let (events, receiver) = event_channel();
        let transport = Arc::new(LocalCoordinator::new(events).with_responder(|request| {
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
        }));
        let link = CoordinatorLink::spawn(
            transport.clone(),
            receiver,
            Credentials::new("inspector", "secret"),
            LinkConfig::default(),
        );
        (link, transport)
    }

    async fn ready(link: &CoordinatorLink) {
        link.connect().await.unwrap();
        let state = link.session().wait_for(|state| *state == SessionState::Ready).await;
        assert_eq!(state, Some(SessionState::Ready));
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn resolves_through_ready_coordinator_then_caches() {
        let (link, transport) = coordinator_answering();
        ready(&link).await;
        let lookup = Arc::new(FakeLookup::default());
        let resolver = Resolver::new(lookup.clone()).with_coordinator(link.correlator().clone());

        let reference = embed("12345");
        let expected = ItemDetails::new(0.234, 7, 179, vec![Sticker::new("201", 0.1)]);
        assert_eq!(resolver.resolve(&reference).await.unwrap(), expected);
        assert_eq!(resolver.resolve(&reference).await.unwrap(), expected);

        assert_eq!(transport.sent_requests().len(), 1);
        assert_eq!(lookup.calls(), 0);
        assert_eq!(resolver.cached_items(), 1);
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn falls_back_to_rest_when_coordinator_not_ready() {
        let (link, transport) = coordinator_answering();
        let lookup = Arc::new(FakeLookup::default());
        let resolver = Resolver::new(lookup.clone()).with_coordinator(link.correlator().clone());

        let details = resolver.resolve("…preview%20M77A1D2").await.unwrap();

        assert_eq!(details, ItemDetails::new(0.5, 1, 2, vec![Sticker::new("Holo", 0.25)]));
        assert_eq!(lookup.calls(), 1);
        assert!(transport.sent_requests().is_empty());
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn rest_only_resolver_caches_within_ttl() {
        let lookup = Arc::new(FakeLookup::default());
        let resolver = Resolver::new(lookup.clone()).with_cache_ttl(Duration::from_secs(60));

        resolver.resolve("M1A").await.unwrap();
        resolver.resolve("other prefix M1A2").await.unwrap();

        assert_eq!(lookup.calls(), 1);
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn invalid_reference_touches_nothing() {
        let (link, transport) = coordinator_answering();
        ready(&link).await;
        let lookup = Arc::new(FakeLookup::default());
        let resolver = Resolver::new(lookup.clone()).with_coordinator(link.correlator().clone());

        for reference in ["", "no token here", "steam://x/Mabc"] {
            let err = resolver.resolve(reference).await.unwrap_err();
            assert!(matches!(err, ResolveError::InvalidReference(_)));
        }
        assert_eq!(lookup.calls(), 0);
        assert!(transport.sent_requests().is_empty());
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn path_failures_are_not_cached() {
        let lookup = Arc::new(FakeLookup {
            fail: true,
            ..FakeLookup::default()
        });
        let resolver = Resolver::new(lookup.clone());

        assert!(matches!(
            resolver.resolve("M5A").await,
            Err(ResolveError::Lookup(LookupError::Upstream(_)))
        ));
        assert!(resolver.resolve("M5A").await.is_err());
        assert_eq!(lookup.calls(), 2);
        assert_eq!(resolver.cached_items(), 0);
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn coordinator_timeout_does_not_fall_back() {
        let (events, receiver) = event_channel();
        let silent = Arc::new(LocalCoordinator::new(events));
        let link = CoordinatorLink::spawn(
            silent.clone(),
            receiver,
            Credentials::new("inspector", "secret"),
            LinkConfig {
                request_timeout: Duration::from_secs(2),
            },
        );
        ready(&link).await;
        let lookup = Arc::new(FakeLookup::default());
        let resolver = Resolver::new(lookup.clone()).with_coordinator(link.correlator().clone());

        let err = resolver.resolve("M9A").await.unwrap_err();

        assert!(matches!(
            err,
            ResolveError::Coordinator(CorrelatorError::RequestTimeout { .. })
        ));
        assert_eq!(lookup.calls(), 0);
        assert_eq!(silent.sent_requests().len(), 1);
    }
}
