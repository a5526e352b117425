//! Forward proxy binary.
//!
//! ```text
//!     Client ──absolute URL──▶ ┌──────────┐ ──▶ relay middleware ──▶ Origin
//!                              │ listener │
//!     Client ──CONNECT───────▶ └──────────┘ ──▶ tunnel splicer ◀──▶ Target
//! ```

use std::path::PathBuf;

use clap::Parser;

use forward_proxy::config::{load_config, validate_config, ConfigError, LogFormat, ProxyConfig};
use forward_proxy::lifecycle::{spawn_signal_handler, Shutdown};
use forward_proxy::net::Listener;
use forward_proxy::observability::{logging, metrics};
use forward_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "forward-proxy")]
#[command(about = "Forward HTTP proxy with CONNECT tunnelling", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file.
    #[arg(short, long)]
    bind: Option<String>,

    /// Use request bodies attached by upstream middleware.
    #[arg(long)]
    trust_request_body: bool,

    /// Buffer and decompress origin responses.
    #[arg(long)]
    parse_response_body: bool,

    /// Log as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if self.trust_request_body {
            config.relay.trust_request_body = true;
        }
        if self.parse_response_body {
            config.relay.parse_response_body = true;
        }
        if self.json_logs {
            config.observability.log_format = LogFormat::Json;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "forward-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        trust_request_body = config.relay.trust_request_body,
        parse_response_body = config.relay.parse_response_body,
        "Configuration loaded"
    );
    if config.tunnel.default_port == 80 {
        tracing::debug!("CONNECT targets without a port use port 80");
    }

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let server = HttpServer::new(config);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
