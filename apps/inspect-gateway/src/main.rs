mod cli;
mod config;
mod resolver;
mod routes;
mod state;
mod telemetry;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use backoff_http::{BackoffClient, RestLookupClient};
use clap::Parser;
use coordinator_link::{
    event_channel, CoordinatorLink, LinkConfig, SessionState, WsBridgeTransport,
};
use inspect_core::ItemDetails;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::{signal, task::JoinHandle, time::interval};
use tracing::{info, warn};

use cli::{Cli, Command};
use config::{CoordinatorConfig, GatewayConfig};
use resolver::Resolver;
use routes::build_router;
use state::AppState;

const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = telemetry::Telemetry::init()?;

    let mut cli = Cli::parse();
    let command = cli.command.take();
    let config = GatewayConfig::try_from(cli)?;

    match command {
        Some(Command::Lookup { link }) => lookup_once(&config, &link).await,
        None => serve(config, telemetry.metrics_handle()).await,
    }
}

fn rest_resolver(config: &GatewayConfig) -> Result<Resolver> {
    let http = BackoffClient::new(config.backoff.clone()).context("failed to build http client")?;
    let lookup = RestLookupClient::new(http, &config.rest_base_url)
        .with_context(|| format!("invalid rest base url: {}", config.rest_base_url))?;
    Ok(Resolver::new(Arc::new(lookup))
        .with_cache_ttl(config.cache_ttl)
        .with_lookup_deadline(config.resolve_deadline))
}

async fn lookup_once(config: &GatewayConfig, link: &str) -> Result<()> {
    let details = rest_resolver(config)?
        .resolve(link)
        .await
        .with_context(|| format!("failed to resolve {link}"))?;
    print_details(&details);
    Ok(())
}

fn print_details(details: &ItemDetails) {
    println!("Float Value: {}", details.float_value());
    println!("Paint Seed: {}", details.paint_seed());
    println!("Paint Index: {}", details.paint_index());
    if details.stickers().is_empty() {
        println!("Stickers: none");
        return;
    }
    println!("Stickers:");
    for sticker in details.stickers() {
        println!("  - {} (wear {})", sticker.name(), sticker.wear());
    }
}

async fn serve(config: GatewayConfig, metrics: PrometheusHandle) -> Result<()> {
    info!(
        listen_addr = %config.listen_addr,
        rest_base_url = %config.rest_base_url,
        coordinator_enabled = config.coordinator.is_some(),
        cache_ttl_secs = config.cache_ttl.as_secs(),
        "starting inspect-gateway"
    );

    let mut resolver = rest_resolver(&config)?;
    let link = config.coordinator.as_ref().map(spawn_coordinator);
    if let Some(link) = &link {
        resolver = resolver.with_coordinator(link.correlator().clone());
    }
    let mut state = AppState::new(resolver).with_metrics(metrics);
    if let Some(link) = &link {
        state = state.with_coordinator(link.session().clone());
    }
    let supervisor = link.map(keep_connected);
    if supervisor.is_none() {
        info!("coordinator not configured; serving from the rest lookup only");
    }

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("inspect-gateway listening on {}", config.listen_addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    if let Some(supervisor) = supervisor {
        supervisor.abort();
    }
    info!("shutdown complete");
    Ok(())
}

fn spawn_coordinator(config: &CoordinatorConfig) -> Arc<CoordinatorLink> {
    let (events, receiver) = event_channel();
    let transport = Arc::new(WsBridgeTransport::new(config.url.clone(), events));
    Arc::new(CoordinatorLink::spawn(
        transport,
        receiver,
        config.credentials.clone(),
        LinkConfig {
            request_timeout: config.request_timeout,
        },
    ))
}

/// Connects now and again whenever the session falls back to `Disconnected`.
/// A faulted session is left alone; lookups keep using the REST path.
fn keep_connected(link: Arc<CoordinatorLink>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(RECONNECT_INTERVAL);
        loop {
            ticker.tick().await;
            match link.session().current() {
                SessionState::Disconnected => {
                    info!("connecting to coordinator");
                    if link.connect().await.is_err() {
                        warn!("coordinator event loop stopped; giving up on reconnects");
                        break;
                    }
                }
                SessionState::Faulted => {
                    warn!("coordinator session faulted; no further reconnects");
                    break;
                }
                _ => {}
            }
        }
    })
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
