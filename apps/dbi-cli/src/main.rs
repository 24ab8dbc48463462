mod progress;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use dbi_core::{
    CancelToken, CatalogBuilder, DbiSession, ExtensionFilter, SessionConfig, SessionError,
    SessionOutcome,
};
use tracing::{error, info, warn};

use progress::ProgressObserver;

const EXIT_FAILED: u8 = 1;
const EXIT_NO_FILES: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(author, version, about = "DBI USB backend - serve local files to a Switch running DBI", long_about = None)]
struct Args {
    /// Files or directories to offer
    paths: Vec<PathBuf>,

    /// Enable verbose logging and fail loudly on unexpected errors
    #[arg(short, long)]
    debug: bool,

    /// Comma-separated list of extensions to include (e.g. nsp,xci)
    #[arg(long)]
    filter: Option<String>,

    /// Session attempts before giving up
    #[arg(long)]
    retry_count: Option<u32>,

    /// USB transfer timeout in milliseconds (0 = wait forever)
    #[arg(long)]
    timeout: Option<u64>,

    /// Load settings from a TOML file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.debug {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {}", e);
    }

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("Error: {:#}", e);
            ExitCode::from(EXIT_FAILED)
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let config = load_config(&args)?;

    let filter = config.filter.as_deref().map(ExtensionFilter::parse);
    let mut builder = CatalogBuilder::new(filter);
    for path in &args.paths {
        builder.add_path(path);
    }
    let catalog = builder.build();
    if catalog.is_empty() {
        error!("No valid files found to transfer");
        return Ok(ExitCode::from(EXIT_NO_FILES));
    }
    info!(files = catalog.len(), "Ready to serve files");

    let observer = Arc::new(ProgressObserver::new(catalog.len()));
    let mut session = DbiSession::with_observer(config, catalog, observer.clone());
    spawn_signal_bridge(session.cancel_token())?;

    let code = match session.run() {
        Ok(SessionOutcome::Completed) => {
            info!("Transfer complete");
            ExitCode::SUCCESS
        }
        Ok(SessionOutcome::Cancelled) => {
            warn!("Transfer interrupted");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Ok(SessionOutcome::Aborted { reason }) => {
            error!(reason = %reason, "Transfer failed");
            ExitCode::from(EXIT_FAILED)
        }
        Err(e @ SessionError::EmptyCatalog) => {
            error!("{}", e);
            ExitCode::from(EXIT_NO_FILES)
        }
        Err(e) => {
            error!("{:#}", anyhow::Error::from(e));
            ExitCode::from(EXIT_FAILED)
        }
    };
    observer.finish();
    Ok(code)
}

/// Config file values first, then command line flags on top.
fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SessionConfig::default(),
    };
    config.debug |= args.debug;
    if let Some(retry_count) = args.retry_count {
        config.retry_count = retry_count;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_ms = timeout;
    }
    if let Some(filter) = &args.filter {
        config.filter = Some(filter.clone());
    }
    Ok(config)
}

/// Turn Ctrl-C / SIGTERM into a session cancel. A second signal exits
/// immediately, since a USB call without timeout never returns on its own.
fn spawn_signal_bridge(cancel: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;

    thread::Builder::new()
        .name("signal-bridge".into())
        .spawn(move || {
            runtime.block_on(async move {
                if let Err(e) = shutdown_signal().await {
                    error!(error = %e, "Signal handler failed");
                    return;
                }
                warn!("Interrupt received, stopping after the current transfer step");
                cancel.cancel();

                if shutdown_signal().await.is_ok() {
                    std::process::exit(i32::from(EXIT_INTERRUPTED));
                }
            })
        })
        .context("spawning signal thread")?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
