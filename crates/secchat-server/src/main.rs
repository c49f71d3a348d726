use clap::Parser;
use tracing_subscriber::EnvFilter;

use secchat_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present; real environment and flags still win
    let _ = dotenvy::dotenv();

    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    secchat_server::run(config).await
}
