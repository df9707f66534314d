//! overlay-server
//!
//! ```text
//!     Client Request
//!     ──────────▶ trace/timeout ─▶ access log ─▶ compression ─▶ pipeline
//!                                                                 │
//!                  auth ─▶ etag ─▶ head ─▶ json ─▶ transform ─────┘
//!                                                     │
//!                  local │ status │ middleware │ git │ cache ─▶ upstream
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use overlay_server::config::{read_config, OverlayConfig};
use overlay_server::lifecycle::{spawn_log_reopener, spawn_shutdown_listener, Shutdown};
use overlay_server::observability::init_tracing;
use overlay_server::transform::JsonIndent;
use overlay_server::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "overlay-server", version, about = "Layered HTTP overlay server")]
struct Cli {
    /// Layer directives, e.g. `htdocs`, `/api/ = http://localhost:8080/`, `s/foo/bar/g`
    layers: Vec<String>,

    /// TOML configuration file; command line values take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Basic authentication `user:password` (repeatable)
    #[arg(long)]
    basic: Vec<String>,

    /// Cache directory for upstream responses
    #[arg(long)]
    cache: Option<String>,

    /// Force `Accept-Encoding`: gzip, br, deflate, zstd or identity
    #[arg(long)]
    compress: Option<String>,

    /// Pretty print JSON with this indent (width or string)
    #[arg(long)]
    json: Option<JsonIndent>,

    /// Directory listings for local layers
    #[arg(long)]
    index: bool,

    /// Access log format: tiny, short, dev, common or combined
    #[arg(long)]
    log: Option<String>,

    /// Append logs to this file (reopened on SIGHUP)
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address (`host:port`)
    #[arg(long)]
    listen: Option<String>,
}

impl Cli {
    /// Merge command line values over `config`.
    fn apply(self, config: &mut OverlayConfig) {
        if !self.layers.is_empty() {
            config.layers = self.layers;
        }
        if !self.basic.is_empty() {
            config.basic = self.basic.into();
        }
        if self.cache.is_some() {
            config.cache = self.cache;
        }
        if self.compress.is_some() {
            config.compress = self.compress;
        }
        if self.json.is_some() {
            config.json = self.json;
        }
        if self.index {
            config.index = true;
        }
        if self.log.is_some() {
            config.log = self.log;
        }
        if self.logfile.is_some() {
            config.logfile = self.logfile;
        }
        if let Some(listen) = self.listen {
            config.listener.bind_address = listen;
        }
        if let Some(port) = self.port {
            config.listener.bind_address = with_port(&config.listener.bind_address, port);
        }
    }
}

fn with_port(address: &str, port: u16) -> String {
    let host = address.rsplit_once(':').map_or(address, |(host, _)| host);
    format!("{host}:{port}")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("overlay_server=info,tower_http=info");

    let mut cli = Cli::parse();
    let mut config = match cli.config.take() {
        Some(path) => read_config(&path)?,
        None => OverlayConfig::default(),
    };
    cli.apply(&mut config);

    tracing::info!(
        bind_address = %config.listener.bind_address,
        layers = config.layers.len(),
        "Configuration loaded"
    );

    let overlay = overlay_server::build(config.clone())?;

    let shutdown = Shutdown::new();
    spawn_shutdown_listener(shutdown.clone());
    let reopener = spawn_log_reopener(overlay.logger(), &shutdown)?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    HttpServer::new(overlay, &config.listener)
        .run(listener, shutdown.wait())
        .await?;

    shutdown.trigger();
    let _ = reopener.await;
    tracing::info!("Shutdown complete");
    Ok(())
}
