use anyhow::{Context, Result, bail};
use std::{fs, path::Path};
use tracing::info;

use crate::{
    flow::{FlowDefinition, FlowStatus},
    runner::FlowRunner,
};

/// Read a `.json`, `.yaml` or `.yml` flow definition.
pub fn load_flow_file(flow_file: &Path) -> Result<FlowDefinition> {
    if !flow_file.exists() {
        bail!("File does not exist: {}", flow_file.display());
    }

    let content = fs::read_to_string(flow_file)
        .with_context(|| format!("Failed to read file: {}", flow_file.display()))?;

    match flow_file.extension().and_then(|s| s.to_str()) {
        Some("json") => FlowDefinition::from_json_str(&content)
            .with_context(|| format!("Invalid JSON in file: {}", flow_file.display())),
        Some("yaml" | "yml") => FlowDefinition::from_yaml_str(&content)
            .with_context(|| format!("Invalid YAML in file: {}", flow_file.display())),
        _ => bail!("Unsupported file extension for: {}", flow_file.display()),
    }
}

/// Load a flow file and run the validation phase on it.
pub fn validate_flow_file(flow_file: &Path, runner: &FlowRunner) -> Result<FlowStatus> {
    let definition = load_flow_file(flow_file)?;
    let status = runner
        .validate(&definition)
        .with_context(|| format!("Validation failed for {}", flow_file.display()))?;
    info!(
        nodes = status.node_count,
        "valid flow: {}",
        flow_file.display()
    );
    Ok(status)
}
