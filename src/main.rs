use anyhow::Context;
use ratekeeper::{config::LimiterConfig, init_server, init_tracing};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/ratekeeper.yaml".to_string());

    let config = LimiterConfig::from_file(&config_path).with_context(|| {
        format!(
            "failed to load configuration from {} (usage: ratekeeper [config_file])",
            config_path
        )
    })?;

    init_server(config).await.context("ratekeeper server error")?;

    Ok(())
}
