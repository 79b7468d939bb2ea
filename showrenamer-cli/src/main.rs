use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod cli;
mod confirm;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; the key may come from the real environment.
    let env_loaded = dotenvy::dotenv().is_ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,showrenamer_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if env_loaded {
        tracing::debug!("loaded .env file");
    }

    let cli = Cli::parse();
    app::run(cli).await
}
