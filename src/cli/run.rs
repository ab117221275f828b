use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::CliContext;
use nodeflow::{
    flow_commands::load_flow_file,
    logger::RunTelemetry,
    notifier::{BroadcastNotifier, Notifier},
};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Flow file to execute
    pub file: PathBuf,

    /// Request input. A JSON object is used as the whole request body,
    /// anything else becomes the question `a`.
    #[arg(long, short)]
    pub input: Option<String>,

    #[arg(long)]
    pub chat_id: Option<String>,

    /// Defaults to the flow file's stem
    #[arg(long)]
    pub chatflow_id: Option<String>,

    /// Log progress events as they happen
    #[arg(long, default_value_t = false)]
    pub progress: bool,
}

/// Build the request body from `--input` and `--chat-id`.
pub fn request_body(input: Option<&str>, chat_id: Option<&str>) -> Value {
    let mut request = match input {
        None => json!({}),
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(body)) => Value::Object(body),
            Ok(other) => json!({ "a": other }),
            Err(_) => json!({ "a": raw }),
        },
    };
    if let (Some(chat_id), Value::Object(body)) = (chat_id, &mut request) {
        body.insert("chatId".to_string(), json!(chat_id));
    }
    request
}

pub async fn execute(args: RunArgs, context: &CliContext) -> anyhow::Result<()> {
    let definition = load_flow_file(&args.file)?;
    let chatflow_id = args.chatflow_id.clone().unwrap_or_else(|| {
        args.file
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "flow".to_string())
    });
    let request = request_body(args.input.as_deref(), args.chat_id.as_deref());

    let cancel = CancellationToken::new();
    let mut runner = context.runner().with_cancellation(cancel.clone());
    if args.progress {
        let notifier = BroadcastNotifier::default();
        let mut events = notifier.subscribe();
        tokio::spawn(async move {
            while let Ok(message) = events.recv().await {
                debug!(chatflow = %message.chatflow_id, event = ?message.event, "progress");
                if let Ok(line) = serde_json::to_string(&message.event) {
                    eprintln!("{}", line);
                }
            }
        });
        runner = runner.with_notifier(Notifier::new(notifier));
    }

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling run");
            interrupt.cancel();
        }
    });

    let telemetry = RunTelemetry::new();
    let result = telemetry
        .instrument_run(&chatflow_id, || runner.run(&chatflow_id, &definition, request))
        .await
        .with_context(|| format!("running {}", args.file.display()))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_becomes_the_request_body() {
        assert_eq!(request_body(None, None), json!({}));
        assert_eq!(request_body(Some("hello"), None), json!({"a": "hello"}));
        assert_eq!(request_body(Some("3"), Some("c1")), json!({"a": 3, "chatId": "c1"}));
        assert_eq!(
            request_body(Some(r#"{"a": "q", "sys": {"k": 1}}"#), None),
            json!({"a": "q", "sys": {"k": 1}})
        );
    }
}
