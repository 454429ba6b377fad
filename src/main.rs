use eyre::WrapErr;
use mempool_mirror::config::Config;
use mempool_mirror::providers::node::{JsonRpcNodeProvider, NodeProvider};
use mempool_mirror::supervisor::Supervisor;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().wrap_err("failed to read configuration")?;

    let provider =
        Arc::new(JsonRpcNodeProvider::new(&config.rpc_url).wrap_err("failed to build RPC client")?);
    // fail fast when the node is unreachable
    let head = provider
        .block_number()
        .await
        .wrap_err_with(|| format!("cannot reach upstream node at {}", config.rpc_url))?;
    tracing::info!(target: "mempool_mirror", head, rpc = %config.rpc_url, "connected to upstream node");

    let started = Instant::now();
    Supervisor::new(config, provider, None)
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!(target: "mempool_mirror", elapsed = ?started.elapsed(), "gracefully shut down");
    Ok(())
}
