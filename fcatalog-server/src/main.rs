//! Entry point: parse the CLI, initialize logging, open the catalog
//! registry, bind the listener, and run the accept loop to completion.
//!
//! Logging and CLI setup are grounded on `tvix-store`'s binary entry point,
//! trimmed of its OTLP and progress-bar layers (out of scope here).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use fcatalog_engine::CatalogRegistry;
use fcatalog_proto::DEFAULT_MAX_FRAME_BYTES;
use fcatalog_server::{errors::ServerError, listener, session::SessionConfig};
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Binary function similarity catalog server")]
struct Cli {
    /// Address to listen on.
    #[arg(long = "listen-address", short = 'l', default_value = "127.0.0.1:8666")]
    listen_address: SocketAddr,

    /// Root directory under which catalog files are created and opened.
    #[clap(value_name = "CATALOG_DIR")]
    catalog_dir: PathBuf,

    /// Number of signature components used when *creating* a catalog that
    /// doesn't yet exist. Ignored, and compared for loud mismatch, when
    /// opening an existing one.
    #[arg(long, default_value_t = 16)]
    num_hashes: usize,

    /// Maximum accepted frame body size, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: u32,

    /// Log level; overridable by `RUST_LOG`.
    #[arg(long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().with_filter(
                EnvFilter::builder()
                    .with_default_directive(cli.log_level.into())
                    .from_env()
                    .expect("invalid RUST_LOG"),
            ),
        )
        .init();

    if let Err(e) = run(cli).await {
        error!(error = %e, "fatal error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(cli: Cli) -> Result<(), ServerError> {
    std::fs::create_dir_all(&cli.catalog_dir).map_err(ServerError::CatalogDir)?;

    let registry = CatalogRegistry::new(cli.catalog_dir.clone(), cli.num_hashes);
    let config = SessionConfig {
        max_frame_bytes: cli.max_frame_bytes,
    };

    let listener = TcpListener::bind(cli.listen_address)
        .await
        .map_err(ServerError::Bind)?;
    info!(address = %cli.listen_address, catalog_dir = %cli.catalog_dir.display(), "listening");

    // Grounded on tvix-store's binary: register a ctrl_c handler alongside
    // the main loop so an operator can stop accepting new connections
    // without waiting on the accept loop to fail first. Sessions already in
    // flight keep running to completion (§5).
    tokio::select! {
        result = listener::serve(listener, registry, config) => result.map_err(ServerError::Accept),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            Ok(())
        }
    }
}
