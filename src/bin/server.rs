//! widecol Server Binary
//!
//! Connects the cluster session and serves the HTTP front-end.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use widecol::config::{ConfigBuilder, TraceTarget};
use widecol::http::Server;
use widecol::{Config, Session};

/// widecol Server
#[derive(Parser, Debug)]
#[command(name = "widecol-server")]
#[command(about = "HTTP front-end over a CQL wide-column cluster")]
#[command(version)]
struct Args {
    /// Listen address (host:port); overrides WIDECOL_LISTEN_ADDR
    #[arg(short, long)]
    listen: Option<String>,

    /// Comma-separated contact points; overrides WIDECOL_CONTACT_POINTS
    #[arg(short, long, value_delimiter = ',')]
    contact_points: Option<Vec<String>>,

    /// Native protocol port; overrides WIDECOL_PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// HTTP worker threads; overrides WIDECOL_HTTP_WORKERS
    #[arg(short, long)]
    workers: Option<usize>,

    /// Trace sink: off, stdout or a file path; overrides WIDECOL_TRACE
    #[arg(short, long)]
    trace: Option<String>,
}

fn main() {
    // Logs go to stderr; stdout belongs to the trace sink
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,widecol=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    tracing::info!("widecol server v{}", widecol::VERSION);

    let config = match build_config(args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    tracing::info!(
        "Contact points: {:?} (port {})",
        config.cluster.contact_points,
        config.cluster.port
    );
    tracing::info!("Listen address: {}", config.http.listen_addr);

    let session = match Session::connect(config.cluster.clone()) {
        Ok(session) => Arc::new(session),
        Err(e) => {
            tracing::error!("Connection error: {}", e);
            std::process::exit(1);
        }
    };

    let mut server = Server::new(&config, session);
    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}

/// Environment first, then command-line overrides
fn build_config(args: Args) -> widecol::Result<Config> {
    let mut builder = ConfigBuilder::from_config(Config::from_env()?);

    if let Some(listen) = args.listen {
        builder = builder.listen_addr(listen);
    }
    if let Some(points) = args.contact_points {
        builder = builder.contact_points(points);
    }
    if let Some(port) = args.port {
        builder = builder.port(port);
    }
    if let Some(workers) = args.workers {
        builder = builder.worker_threads(workers);
    }
    if let Some(trace) = args.trace {
        builder = builder.trace(trace.parse::<TraceTarget>()?);
    }

    let config = builder.build();
    config.validate()?;
    Ok(config)
}
