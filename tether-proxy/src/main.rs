// tether-proxy: session relay daemon. Listens for game clients and relays each
// one to the configured upstream server through a tether-core session.

mod config;
mod peer;
mod proxy;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tether_core::{Collaborator, PacketLogger, TracingDiagnostics};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Grace period for kicked sessions to flush their kick frames on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

fn main() -> anyhow::Result<()> {
    let mut explicit_config = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("tether-proxy {}", VERSION);
                return Ok(());
            }
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                explicit_config = Some(PathBuf::from(path));
            }
            other => bail!("unknown argument: {}", other),
        }
    }

    let cfg = config::load(explicit_config.as_deref())?;
    init_logging(&cfg.log_filter);

    let mut collaborators: Vec<Arc<dyn Collaborator>> = Vec::new();
    if cfg.log_packets {
        collaborators.push(Arc::new(PacketLogger));
    }
    let relay = Arc::new(proxy::Relay::new(
        cfg.upstream_host.clone(),
        cfg.upstream_port,
        Arc::new(TracingDiagnostics),
        collaborators,
    ));
    let registry = relay.registry.clone();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", cfg.listen_addr))?;
        tracing::info!(
            listen = %cfg.listen_addr,
            upstream = %format!("{}:{}", cfg.upstream_host, cfg.upstream_port),
            "tether-proxy {} listening",
            VERSION
        );
        tokio::select! {
            res = proxy::run_proxy(listener, relay) => res.context("accept loop failed")?,
            res = shutdown_signal() => res?,
        }
        let kicked = registry.kick_all("Proxy shutting down");
        tracing::info!(sessions = kicked, "shutting down");
        if kicked > 0 {
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
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
