use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::EngineConfig,
    error::RunError,
    flow::{ExecutionResult, FlowBuilder, FlowDefinition, FlowStatus},
    node::NodeOptions,
    notifier::{NoopNotifier, Notifier},
    registry::NodeRegistry,
};

/// Request-level identifiers and overrides pulled from a request body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestScope {
    pub chat_id: String,
    pub session_id: String,
    pub override_config: Map<String, Value>,
}

impl RequestScope {
    /// `chatId` falls back to a fresh UUID, `sessionId` to the chat id.
    pub fn from_request(request: &Value) -> Self {
        let text = |key: &str| {
            request
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let chat_id = text("chatId").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let session_id = text("sessionId").unwrap_or_else(|| chat_id.clone());
        let override_config = request
            .get("overrideConfig")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Self {
            chat_id,
            session_id,
            override_config,
        }
    }
}

/// Entry point for callers holding a persisted flow and a request body.
/// One runner is built at start-up and shared by every run.
#[derive(Debug, Clone)]
pub struct FlowRunner {
    registry: Arc<NodeRegistry>,
    config: Arc<EngineConfig>,
    notifier: Notifier,
    cancel: CancellationToken,
}

impl FlowRunner {
    pub fn new(registry: Arc<NodeRegistry>, config: Arc<EngineConfig>) -> Self {
        Self {
            registry,
            config,
            notifier: Notifier::new(NoopNotifier),
            cancel: CancellationToken::new(),
        }
    }

    /// Progress events are dropped unless a notifier is set.
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Runs are cancelled through child tokens of `cancel`.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The validation phase alone: build every node and check the graph.
    pub fn validate(&self, definition: &FlowDefinition) -> Result<FlowStatus, RunError> {
        let executor = FlowBuilder::new(self.registry.clone())
            .with_config(self.config.clone())
            .build(definition, None)?;
        executor.graph().validate()?;
        Ok(executor.status())
    }

    #[tracing::instrument(name = "flow_run", skip(self, definition, request))]
    pub async fn run(
        &self,
        chatflow_id: &str,
        definition: &FlowDefinition,
        request: Value,
    ) -> Result<ExecutionResult, RunError> {
        let scope = RequestScope::from_request(&request);
        let options = NodeOptions {
            chatflow_id: Some(chatflow_id.to_string()),
            chat_id: Some(scope.chat_id.clone()),
            session_id: Some(scope.session_id.clone()),
            config: scope.override_config,
            notifier: Some(self.notifier.clone()),
        };

        let executor = FlowBuilder::new(self.registry.clone())
            .with_config(self.config.clone())
            .with_options(options)
            .build(definition, Some(&request))?
            .with_cancellation(self.cancel.child_token());
        info!(chat_id = %scope.chat_id, nodes = executor.graph().len(), "starting flow");

        let result = executor.execute(Some(request)).await?;
        Ok(result.with_chat_id(scope.chat_id))
    }
}
