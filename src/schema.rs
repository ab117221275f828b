use std::{fs, path::{Path, PathBuf}};

use anyhow::{Context, Error};
use schemars::schema_for;

use crate::{
    config::EngineConfig,
    flow::{ExecutionResult, FlowDefinition},
    notifier::ProgressEvent,
};

/// Write JSON schemas for the flow file format, the run result, progress
/// events and the engine config into `out_dir`.
pub fn write_schema(out_dir: &Path) -> Result<Vec<PathBuf>, Error> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("could not create {}", out_dir.display()))?;

    let schemas = [
        ("flow.schema.json", schema_for!(FlowDefinition)),
        ("execution-result.schema.json", schema_for!(ExecutionResult)),
        ("progress-event.schema.json", schema_for!(ProgressEvent)),
        ("engine-config.schema.json", schema_for!(EngineConfig)),
    ];

    let mut written = Vec::with_capacity(schemas.len());
    for (file, schema) in schemas {
        let path = out_dir.join(file);
        fs::write(&path, serde_json::to_string_pretty(&schema)?)
            .with_context(|| format!("could not write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}
