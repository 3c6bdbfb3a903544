use agentboard_api::Server;
use agentboard_core::{ConfigManager, LoggingConfig};
use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "agentboard-api", version, about = "Agentboard dashboard API server")]
struct Args {
    /// Directory holding default/<env>/local config files
    #[arg(long, env = "AGENTBOARD_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Environment name, e.g. development or production
    #[arg(long)]
    env: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ConfigManager::load(args.config_dir, args.env)?
        .override_server(args.host, args.port)?;
    let settings = config.settings();
    init_tracing(&settings.logging);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                settings.server.host, settings.server.port
            )
        })?;

    let server = Server::new(addr, Arc::new(config)).await?;
    server.run().await?;
    Ok(())
}
