//! Gateway entrypoint: environment configuration, tracing, server startup.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use scout_llm::{AnthropicConfig, AnthropicVisionProvider};
use scout_server::ServerConfig;

/// Default provider model.
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

#[derive(Debug, Parser)]
#[command(name = "scout", about = "Vision enrichment gateway")]
struct Args {
    /// Listen port (overrides the PORT environment variable).
    #[arg(long)]
    port: Option<u16>,
}

/// Environment-supplied configuration, consumed once at startup.
#[derive(Debug)]
struct Config {
    api_key: String,
    frontend_origin: String,
    port: u16,
    model: String,
}

impl Config {
    fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let api_key = get("ANTHROPIC_API_KEY")
            .filter(|v| !v.is_empty())
            .context("ANTHROPIC_API_KEY environment variable is required")?;
        let frontend_origin =
            get("FRONTEND_ORIGIN").unwrap_or_else(|| "http://localhost:5173".into());
        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("invalid PORT value: {raw}"))?,
            None => 8000,
        };
        let model = get("SCOUT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into());
        Ok(Self {
            api_key,
            frontend_origin,
            port,
            model,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let provider = AnthropicVisionProvider::new(AnthropicConfig::new(
        config.api_key.clone(),
        config.model.clone(),
    ))
    .context("failed to build provider client")?;

    let server_config = ServerConfig {
        port: config.port,
        allowed_origin: config.frontend_origin.clone(),
        ..Default::default()
    };
    let handle = scout_server::start(server_config, Arc::new(provider))
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, model = %config.model, "scout gateway ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    Ok(())
}
