use std::{net::SocketAddr, time::Duration};

use anyhow::{bail, Context};
use backoff_http::BackoffConfig;
use coordinator_link::Credentials;

use crate::cli::Cli;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub url: String,
    pub credentials: Credentials,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    pub cache_ttl: Duration,
    pub backoff: BackoffConfig,
    pub rest_base_url: String,
    pub coordinator: Option<CoordinatorConfig>,
    pub resolve_deadline: Option<Duration>,
}

impl TryFrom<Cli> for GatewayConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        if cli.cache_ttl_secs == 0 {
            bail!("cache ttl must be at least one second");
        }
        if cli.coordinator_timeout_secs == 0 {
            bail!("coordinator timeout must be at least one second");
        }
        if cli.resolve_deadline_secs == Some(0) {
            bail!("resolve deadline must be at least one second when set");
        }

        let coordinator = match (
            cli.coordinator_url,
            cli.coordinator_username,
            cli.coordinator_password,
        ) {
            (Some(url), Some(username), Some(password)) => {
                if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                    bail!("coordinator url must use ws:// or wss://, got {url}");
                }
                Some(CoordinatorConfig {
                    url,
                    credentials: Credentials::new(username, password),
                    request_timeout: Duration::from_secs(cli.coordinator_timeout_secs),
                })
            }
            (None, None, None) => None,
            _ => bail!(
                "coordinator url, username and password must be configured together"
            ),
        };

        Ok(GatewayConfig {
            listen_addr,
            cache_ttl: Duration::from_secs(cli.cache_ttl_secs),
            backoff: BackoffConfig {
                retries: cli.http_retries,
                base_delay: Duration::from_millis(cli.http_base_delay_ms),
                ..BackoffConfig::default()
            },
            rest_base_url: cli.rest_base_url,
            coordinator,
            resolve_deadline: cli.resolve_deadline_secs.map(Duration::from_secs),
        })
    }
}
