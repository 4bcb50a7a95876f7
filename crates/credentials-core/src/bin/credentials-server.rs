//! Credentials REST server
//!
//! ```text
//! CREDENTIALS__JWT__SIGNING_KEY=... credentials-server --config credentials.toml
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use credentials_core::{api, init, logging, CredentialsConfig};

#[derive(Debug, Parser)]
#[command(name = "credentials-server", version, about = "Access and renewal token service")]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured listen address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = CredentialsConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.api_bind_address = bind;
    }

    logging::setup_logging(&config.logging)?;
    logging::log_welcome("credentials-server", env!("CARGO_PKG_VERSION"));

    let session = init(&config).await.context("failed to initialize credential service")?;
    let app = api::create_router(session);

    let listener = TcpListener::bind(config.api_bind_address.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.api_bind_address))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
