use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "inspect-gateway",
    author,
    version,
    about = "Resolves item inspection links to float, seed, paint index and stickers"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Address the HTTP API binds to.
    #[arg(
        long,
        env = "INSPECT_GATEWAY_LISTEN_ADDR",
        default_value = "127.0.0.1:8080"
    )]
    pub listen_addr: String,

    /// How long resolved items stay cached.
    #[arg(long, env = "INSPECT_GATEWAY_CACHE_TTL_SECS", default_value_t = 600)]
    pub cache_ttl_secs: u64,

    /// How long a coordinator request may wait for its response.
    #[arg(
        long,
        env = "INSPECT_GATEWAY_COORDINATOR_TIMEOUT_SECS",
        default_value_t = 10
    )]
    pub coordinator_timeout_secs: u64,

    /// Retries allowed after the first REST attempt.
    #[arg(long, env = "INSPECT_GATEWAY_HTTP_RETRIES", default_value_t = 3)]
    pub http_retries: u32,

    /// First REST backoff delay; doubled after every retry.
    #[arg(
        long,
        env = "INSPECT_GATEWAY_HTTP_BASE_DELAY_MS",
        default_value_t = 10_000
    )]
    pub http_base_delay_ms: u64,

    /// Base URL of the REST lookup API.
    #[arg(
        long,
        env = "INSPECT_GATEWAY_REST_BASE_URL",
        default_value = "https://api.csgofloat.com"
    )]
    pub rest_base_url: String,

    /// WebSocket URL of the coordinator bridge. Needs credentials as well.
    #[arg(long, env = "INSPECT_GATEWAY_COORDINATOR_URL")]
    pub coordinator_url: Option<String>,

    #[arg(long, env = "INSPECT_GATEWAY_COORDINATOR_USERNAME")]
    pub coordinator_username: Option<String>,

    #[arg(long, env = "INSPECT_GATEWAY_COORDINATOR_PASSWORD", hide_env_values = true)]
    pub coordinator_password: Option<String>,

    /// Upper bound on a whole REST lookup, backoff included.
    #[arg(long, env = "INSPECT_GATEWAY_RESOLVE_DEADLINE_SECS")]
    pub resolve_deadline_secs: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve a single inspection link over the REST API and print it.
    Lookup {
        /// Inspection link containing an `M<digits>` token.
        link: String,
    },
}
