use std::time::Duration;

use inspect_core::RestItemInfo;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::client::{BackoffClient, FetchError};

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("invalid lookup base url: {0}")]
    BaseUrl(#[from] url::ParseError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to decode lookup response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("lookup service reported: {0}")]
    Upstream(String),
    #[error("lookup response carried no item info")]
    MissingItemInfo,
}

#[derive(Debug, Deserialize)]
struct LookupBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    iteminfo: Option<RestItemInfo>,
}

/// Client for the public item lookup API (`GET {base}/?url=<reference>`).
#[derive(Debug, Clone)]
pub struct RestLookupClient {
    http: BackoffClient,
    base_url: Url,
}

impl RestLookupClient {
    pub fn new(http: BackoffClient, base_url: &str) -> Result<Self, LookupError> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn lookup_url(&self, reference: &str) -> Url {
        let mut url = self.base_url.clone();
        url.set_path("/");
        url.query_pairs_mut().clear().append_pair("url", reference);
        url
    }

    #[instrument(skip(self), fields(base = %self.base_url))]
    pub async fn lookup(&self, reference: &str) -> Result<RestItemInfo, LookupError> {
        let body = self.http.fetch(self.lookup_url(reference).as_str()).await?;
        parse_body(&body)
    }

    pub async fn lookup_within(
        &self,
        reference: &str,
        deadline: Duration,
    ) -> Result<RestItemInfo, LookupError> {
        let body = self
            .http
            .fetch_within(self.lookup_url(reference).as_str(), deadline)
            .await?;
        parse_body(&body)
    }
}

fn parse_body(body: &str) -> Result<RestItemInfo, LookupError> {
    let parsed: LookupBody = serde_json::from_str(body)?;
    if let Some(message) = parsed.error {
        debug!(%message, "lookup service returned an error body");
        return Err(LookupError::Upstream(message));
    }
    parsed.iteminfo.ok_or(LookupError::MissingItemInfo)
}
