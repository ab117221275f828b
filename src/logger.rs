use std::{path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::{config::EngineConfig, flow::ExecutionResult};

/// Target of the one-line JSON report emitted per run.
pub const RUN_TARGET: &str = "run";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub log_level: String,
    /// Where the rolling text log and JSON run reports go. No files without it.
    pub log_dir: Option<PathBuf>,
    pub log_file: String,
    pub event_file: String,
    /// Also log to stderr.
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            log_file: "nodeflow.log".to_string(),
            event_file: "runs.json".to_string(),
            console: true,
        }
    }
}

impl LogConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            log_level: config.log_level.clone(),
            log_dir: config.log_dir.clone(),
            ..Self::default()
        }
    }
}

/// Install the global subscriber: a daily rolling text log, a JSON file for
/// `target = "run"` reports and an optional stderr layer. Returns `false` if
/// a subscriber was already installed.
pub fn init_tracing(config: &LogConfig) -> Result<bool> {
    let filter = EnvFilter::try_new(format!("{},{}=info", config.log_level, RUN_TARGET))
        .with_context(|| format!("invalid log level `{}`", config.log_level))?;

    let (txt_layer, json_layer) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("could not create log dir {}", dir.display()))?;
            let txt_appender = RollingFileAppender::new(Rotation::DAILY, dir, &config.log_file);
            let txt_layer = fmt::layer().with_writer(txt_appender).with_ansi(false);

            let json_appender = RollingFileAppender::new(Rotation::DAILY, dir, &config.event_file);
            let json_layer = fmt::layer()
                .json()
                .with_writer(json_appender)
                .with_target(true)
                .with_filter(EnvFilter::new(format!("{}=info", RUN_TARGET)));
            (Some(txt_layer), Some(json_layer))
        }
        None => (None, None),
    };

    let console = config
        .console
        .then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

    Ok(Registry::default()
        .with(filter)
        .with(txt_layer)
        .with(json_layer)
        .with(console)
        .try_init()
        .is_ok())
}

/// Run-level counters and histograms, recorded through the global meter.
pub struct RunTelemetry {
    pub runs_started: Counter<u64>,
    pub runs_succeeded: Counter<u64>,
    pub runs_failed: Counter<u64>,
    pub node_activations: Counter<u64>,
    pub tokens: Counter<f64>,
    pub run_latency_ms: Histogram<f64>,
}

impl Default for RunTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTelemetry {
    pub fn new() -> Self {
        let meter = global::meter("nodeflow");
        Self {
            runs_started: meter
                .u64_counter("runs_started")
                .with_description("Total flow runs started")
                .build(),
            runs_succeeded: meter.u64_counter("runs_succeeded").build(),
            runs_failed: meter.u64_counter("runs_failed").build(),
            node_activations: meter
                .u64_counter("node_activations")
                .with_description("Node executions across all runs")
                .build(),
            tokens: meter.f64_counter("tokens").build(),
            run_latency_ms: meter
                .f64_histogram("run_latency_ms")
                .with_description("Latency per flow run in ms")
                .with_unit("ms")
                .build(),
        }
    }

    /// Wrap a run with metrics and logs. Emits one JSON line
    /// (`target = "run"`) with the outcome.
    pub async fn instrument_run<F, Fut, E>(&self, name: &str, handler: F) -> Result<ExecutionResult, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<ExecutionResult, E>>,
        E: std::fmt::Display,
    {
        let attributes = [KeyValue::new("flow", name.to_string())];
        self.runs_started.add(1, &attributes);
        let start = Instant::now();

        let result = handler().await;

        let elapsed = start.elapsed().as_secs_f64() * 1_000.0;
        self.run_latency_ms.record(elapsed, &attributes);

        match &result {
            Ok(run) => {
                self.runs_succeeded.add(1, &attributes);
                self.node_activations.add(run.results.len() as u64, &attributes);
                self.tokens.add(run.token_count, &attributes);
                info!("run `{}` succeeded in {:.1} ms", name, elapsed);
                tracing::event!(
                    target: RUN_TARGET,
                    tracing::Level::INFO,
                    flow = name,
                    flow_id = %run.flow_id,
                    chat_id = run.chat_id.as_deref().unwrap_or_default(),
                    nodes = run.results.len(),
                    tokens = run.token_count,
                    latency_ms = elapsed,
                    status = "ok",
                );
            }
            Err(err) => {
                self.runs_failed.add(1, &attributes);
                error!(error = %err, "run `{}` failed in {:.1} ms", name, elapsed);
                tracing::event!(
                    target: RUN_TARGET,
                    tracing::Level::INFO,
                    flow = name,
                    latency_ms = elapsed,
                    status = "error",
                    error = %err,
                );
            }
        }

        result
    }
}
