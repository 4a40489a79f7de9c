// umbra binary
// Parse configuration, start the node, wait for ctrl-c

use tracing::info;
use tracing_subscriber::EnvFilter;
use umbra_node::{NodeConfig, UmbraNode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::parse_args();

    let default_level = if config.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let node = UmbraNode::start(config).await?;

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, shutting down");
    node.shutdown();
    node.join().await;

    Ok(())
}
