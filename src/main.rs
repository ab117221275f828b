mod cli;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use nodeflow::{
    config::{ConfigManager, EngineConfig, EnvConfigManager},
    logger::{LogConfig, init_tracing},
};
use tracing::error;

use cli::{Cli, CliContext};

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = start(cli).await {
        error!("{:#}", err);
        eprintln!("❌ {:#}", err);
        std::process::exit(1);
    }
}

async fn start(cli: Cli) -> anyhow::Result<()> {
    let config_manager = ConfigManager(EnvConfigManager::new(Some(PathBuf::from(".env"))));
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::from_manager(&config_manager)
            .await
            .context("reading NODEFLOW_* settings")?,
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    init_tracing(&LogConfig::from_engine(&config))?;

    let context = CliContext::new(config, config_manager);
    cli::execute(&context, cli.command).await
}
