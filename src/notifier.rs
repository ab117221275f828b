//! Progress side channel. The caller builds a notifier once and hands it to
//! a run through [`NodeOptions`](crate::node::NodeOptions); the engine never
//! reaches for a process-wide instance.
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    FlowStarted {
        flow_id: String,
        chat_id: Option<String>,
    },
    NodeStarted {
        flow_id: String,
        node_id: String,
        node_name: String,
        activation: usize,
    },
    NodeFinished {
        flow_id: String,
        node_id: String,
        node_name: String,
        activation: usize,
        token_count: f64,
    },
    LoopIteration {
        node_id: String,
        iteration: usize,
        success: bool,
    },
    FlowFinished {
        flow_id: String,
        execution_time: f64,
        token_count: f64,
    },
    FlowFailed {
        flow_id: String,
        error: String,
    },
}

pub trait NotifierType: Send + Sync {
    /// Deliver `event` for the chatflow `channel`. Must not block.
    fn notify(&self, channel: &str, event: ProgressEvent);
    fn clone_box(&self) -> Box<dyn NotifierType>;
    fn debug_box(&self) -> String;
}

pub struct Notifier(pub Box<dyn NotifierType>);

impl Notifier {
    pub fn new(notifier: impl NotifierType + 'static) -> Self {
        Notifier(Box::new(notifier))
    }
}

impl Clone for Notifier {
    fn clone(&self) -> Self {
        Notifier(self.0.clone_box())
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// A delivered event together with the chatflow it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMessage {
    pub chatflow_id: String,
    pub event: ProgressEvent,
}

/// Fans events out to every live subscriber. Slow subscribers lag and lose
/// the oldest events instead of stalling the run.
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<ProgressMessage>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressMessage> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotifierType for BroadcastNotifier {
    fn notify(&self, channel: &str, event: ProgressEvent) {
        let message = ProgressMessage {
            chatflow_id: channel.to_string(),
            event,
        };
        if self.sender.send(message).is_err() {
            trace!(channel, "no progress subscribers");
        }
    }

    fn clone_box(&self) -> Box<dyn NotifierType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!(
            "BroadcastNotifier({} subscribers)",
            self.sender.receiver_count()
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl NotifierType for NoopNotifier {
    fn notify(&self, _channel: &str, _event: ProgressEvent) {}

    fn clone_box(&self) -> Box<dyn NotifierType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        "NoopNotifier".to_string()
    }
}
