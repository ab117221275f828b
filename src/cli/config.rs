use clap::{Args, Subcommand};

use super::CliContext;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the engine config in effect, as YAML
    Show,
    /// List the `NODEFLOW_*` settings found in the environment
    Env,
}

pub async fn execute(args: ConfigArgs, context: &CliContext) -> anyhow::Result<()> {
    match args.command {
        ConfigCommands::Show => {
            print!("{}", serde_yaml_bw::to_string(context.config.as_ref())?);
        }
        ConfigCommands::Env => {
            for (key, value) in context.config_manager.0.as_vec().await {
                println!("{}={}", key, value);
            }
        }
    }
    Ok(())
}
