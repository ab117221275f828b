use std::path::PathBuf;

use clap::Args;

use super::CliContext;
use nodeflow::schema::write_schema;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Output directory
    #[arg(long, default_value = "schemas")]
    pub out_dir: PathBuf,
}

pub async fn execute(args: SchemaArgs, _context: &CliContext) -> anyhow::Result<()> {
    let written = write_schema(&args.out_dir)?;
    for path in &written {
        tracing::debug!("wrote {}", path.display());
    }
    println!("Schemas written to {}", args.out_dir.display());
    Ok(())
}
