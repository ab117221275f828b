use std::path::PathBuf;

use clap::Args;

use super::CliContext;
use nodeflow::flow_commands::validate_flow_file;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Flow files to check
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

pub async fn execute(args: ValidateArgs, context: &CliContext) -> anyhow::Result<()> {
    let runner = context.runner();
    let mut failed = 0;
    for file in &args.files {
        match validate_flow_file(file, &runner) {
            Ok(status) => println!(
                "✅ {} ({} nodes, start node: {})",
                file.display(),
                status.node_count,
                status.has_start_node
            ),
            Err(err) => {
                failed += 1;
                eprintln!("❌ {:#}", err);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} of {} flows failed validation", failed, args.files.len());
    }
    Ok(())
}
