// Share-code node: HTTP upload/download endpoint backed by one-shot transfer listeners.

mod api;
mod bridge;
mod config;
mod error;
mod http;
mod listener;
mod logging;
mod storage;
mod supervisor;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sharecode_core::Registry;

const VERSION: &str = env!("CARGO_PKG_VERSION");
/// How long waiting listeners get to close after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("sharecode-node {}", VERSION);
                return Ok(());
            }
            "--config" => {
                let p = args.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(p));
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    let cfg = config::load(config_path.as_deref())?;
    logging::init_logging(&cfg.log_level)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg))
}

async fn run(cfg: config::Config) -> anyhow::Result<()> {
    let uploads = storage::UploadDir::create(&cfg.upload_dir).await?;
    let registry = Arc::new(Registry::with_range(cfg.code_min..=cfg.code_max)?);
    let state = Arc::new(api::AppState {
        supervisor: supervisor::Supervisor::new(
            registry,
            cfg.max_listeners,
            cfg.offer_ttl(),
            cfg.bind_host.clone(),
        ),
        uploads,
        bridge_host: cfg.bridge_host.clone(),
        max_upload_bytes: cfg.max_upload_bytes,
    });

    let listener = tokio::net::TcpListener::bind((cfg.bind_host.as_str(), cfg.http_port))
        .await
        .with_context(|| format!("binding HTTP endpoint on {}:{}", cfg.bind_host, cfg.http_port))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        upload_dir = %state.uploads.path().display(),
        codes = ?(cfg.code_min..=cfg.code_max),
        "API server started"
    );

    tokio::select! {
        r = http::run_http(listener, state.clone(), cfg.max_workers) => r?,
        r = shutdown_signal() => r?,
    }

    tracing::info!(
        outstanding_offers = state.supervisor.registry().len(),
        active_listeners = state.supervisor.active(),
        "shutting down"
    );
    state.supervisor.shutdown();
    if !state.supervisor.drain(SHUTDOWN_GRACE).await {
        tracing::warn!(
            active_listeners = state.supervisor.active(),
            "transfers still running at exit"
        );
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
