use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};

pub mod config;
pub mod run;
pub mod schema;
pub mod validate;

use config::ConfigArgs;
use run::RunArgs;
use schema::SchemaArgs;
use validate::ValidateArgs;

use nodeflow::{
    FlowRunner, NodeRegistry,
    config::{ConfigManager, EngineConfig},
};

#[derive(Parser, Debug)]
#[command(
    name = "nodeflow",
    about = "Run and validate node graph flows",
    version = "0.2.0"
)]
pub struct Cli {
    /// Engine config file (.yaml, .yml or .json). `NODEFLOW_*` variables
    /// are used when it is not given.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Overrides the configured log level
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a flow file once and print the result
    Run(RunArgs),

    /// Check a flow file without executing it
    Validate(ValidateArgs),

    /// Emit JSON-Schema
    Schema(SchemaArgs),

    /// Show the effective configuration
    Config(ConfigArgs),
}

#[derive(Clone, Debug)]
pub struct CliContext {
    pub config: Arc<EngineConfig>,
    pub config_manager: ConfigManager,
    pub registry: Arc<NodeRegistry>,
}

impl CliContext {
    pub fn new(config: EngineConfig, config_manager: ConfigManager) -> Self {
        Self {
            config: Arc::new(config),
            config_manager,
            registry: Arc::new(NodeRegistry::with_builtins()),
        }
    }

    pub fn runner(&self) -> FlowRunner {
        FlowRunner::new(self.registry.clone(), self.config.clone())
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run::execute(args, context).await,
        Commands::Validate(args) => validate::execute(args, context).await,
        Commands::Schema(args) => schema::execute(args, context).await,
        Commands::Config(args) => config::execute(args, context).await,
    }
}
