use std::{
    fs,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use nodeflow::{
    FlowDefinition, FlowError, FlowRunner, Node, NodeContext, NodeData, NodeError, NodeRegistry,
    NodeType, Phase, RunError,
    config::EngineConfig,
    flow::LoopBranchPolicy,
    flow_commands::load_flow_file,
    notifier::{BroadcastNotifier, Notifier, ProgressEvent},
};

/// Replays `outputs` in order, then repeats the last one.
#[derive(Debug, Clone)]
struct Scripted {
    outputs: Arc<Vec<Value>>,
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(outputs: Vec<Value>) -> Self {
        Self {
            outputs: Arc::new(outputs),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeType for Scripted {
    fn type_name(&self) -> String {
        "scripted".to_string()
    }

    async fn execute(&self, _data: &NodeData, _ctx: &NodeContext) -> Result<Value, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outputs[call.min(self.outputs.len() - 1)].clone())
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}

/// Keeps a copy of every input map it is executed with and echoes it back.
#[derive(Debug, Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<Map<String, Value>>>>,
}

impl Recorder {
    fn seen(&self) -> Vec<Map<String, Value>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeType for Recorder {
    fn type_name(&self) -> String {
        "recorder".to_string()
    }

    async fn execute(&self, data: &NodeData, _ctx: &NodeContext) -> Result<Value, NodeError> {
        self.seen.lock().unwrap().push(data.inputs.clone());
        Ok(Value::Object(data.inputs.clone()))
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone)]
struct Sleeper(Duration);

#[async_trait]
impl NodeType for Sleeper {
    fn type_name(&self) -> String {
        "sleeper".to_string()
    }

    async fn execute(&self, _data: &NodeData, _ctx: &NodeContext) -> Result<Value, NodeError> {
        tokio::time::sleep(self.0).await;
        Ok(json!("woke"))
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}

fn registry_with(nodes: Vec<(&str, Node)>) -> Arc<NodeRegistry> {
    let registry = NodeRegistry::with_builtins();
    for (name, node) in nodes {
        registry.register(name, move || node.clone());
    }
    Arc::new(registry)
}

fn runner(registry: Arc<NodeRegistry>) -> FlowRunner {
    FlowRunner::new(registry, Arc::new(EngineConfig::default()))
}

fn node(id: &str, name: &str, node_type: &str, inputs: Value) -> Value {
    json!({
        "id": id,
        "data": {"name": name, "type": node_type, "category": "Test", "inputs": inputs}
    })
}

fn edge(source: &str, target: &str) -> Value {
    json!({"source": source, "target": target})
}

fn branch(source: &str, handle: &str, target: &str) -> Value {
    json!({"source": source, "sourceHandle": format!("{}-output-{}", source, handle), "target": target})
}

fn flow(nodes: Vec<Value>, edges: Vec<Value>) -> FlowDefinition {
    serde_json::from_value(json!({"nodes": nodes, "edges": edges})).unwrap()
}

fn start() -> Value {
    node("s", "startFunction", "StartFunction", json!({}))
}

#[tokio::test]
async fn terminal_node_receives_the_question() {
    let recorder = Recorder::default();
    let registry = registry_with(vec![("answer", Node::new(recorder.clone()))]);
    let definition = flow(
        vec![start(), node("t", "answer", "Answer", json!({}))],
        vec![edge("s", "t")],
    );

    let result = runner(registry)
        .run("cf", &definition, json!({"a": "hello"}))
        .await
        .unwrap();

    assert_eq!(result.status, "SUCCESS");
    assert_eq!(result.results.len(), 2);
    assert_eq!(recorder.seen()[0]["inputValue"], json!("hello"));
    assert_eq!(result.final_result["inputValue"], json!("hello"));
    assert!(result.chat_id.is_some());
}

#[tokio::test]
async fn loop_input_and_control_repeat_until_success() {
    let control = Scripted::new(vec![
        json!({"failure": true, "tokenCount": 2}),
        json!({"failure": true, "tokenCount": 3}),
        json!({"success": true, "tokenCount": 4}),
    ]);
    let registry = registry_with(vec![
        ("control", Node::new(control.clone())),
        ("finish", Node::new(Scripted::new(vec![json!({"done": true, "tokenCount": 5})]))),
    ]);
    let definition = flow(
        vec![
            start(),
            node("li", "loopInput", "LoopInput", json!({})),
            node("lf", "control", "LoopFunction", json!({})),
            node("end", "finish", "Finish", json!({})),
        ],
        vec![
            edge("s", "li"),
            edge("li", "lf"),
            branch("lf", "failure", "li"),
            branch("lf", "success", "end"),
        ],
    );

    let result = runner(registry)
        .run("cf", &definition, json!({"a": "go"}))
        .await
        .unwrap();

    assert_eq!(result.activations_of("loopInput"), 3);
    assert_eq!(result.activations_of("control"), 3);
    assert_eq!(result.activations_of("finish"), 1);
    assert_eq!(control.calls(), 3);
    assert_eq!(result.token_count, 14.0);
    assert_eq!(result.final_result, json!({"done": true, "tokenCount": 5}));

    let activations: Vec<usize> = result
        .results
        .iter()
        .filter(|r| r.node_name == "loopInput")
        .map(|r| r.activation)
        .collect();
    assert_eq!(activations, vec![1, 2, 3]);
}

#[tokio::test]
async fn loop_exit_clears_membership() {
    let registry = registry_with(vec![
        (
            "control",
            Node::new(Scripted::new(vec![json!({"failure": true}), json!({"success": true})])),
        ),
        ("after", Node::new(Scripted::new(vec![json!("after")]))),
    ]);
    // `after` leads back into the control node, which must not fire again.
    let definition = flow(
        vec![
            start(),
            node("li", "loopInput", "LoopInput", json!({})),
            node("lf", "control", "LoopFunction", json!({})),
            node("x", "after", "After", json!({})),
        ],
        vec![
            edge("s", "li"),
            edge("li", "lf"),
            branch("lf", "failure", "li"),
            branch("lf", "success", "x"),
            edge("x", "lf"),
        ],
    );

    let result = runner(registry).run("cf", &definition, json!({})).await.unwrap();

    assert_eq!(result.activations_of("control"), 2);
    assert_eq!(result.activations_of("after"), 1);
    assert_eq!(result.final_result, json!("after"));
}

#[tokio::test]
async fn builtin_loop_nodes_count_iterations() {
    let definition = flow(
        vec![
            start(),
            node("li", "loopInput", "LoopInput", json!({})),
            node("lf", "loopFunction", "LoopFunction", json!({"successCondition": "iteration >= 3"})),
            node("d", "debug", "Debug", json!({})),
        ],
        vec![
            edge("s", "li"),
            edge("li", "lf"),
            branch("lf", "failure", "li"),
            branch("lf", "success", "d"),
        ],
    );

    let result = runner(Arc::new(NodeRegistry::with_builtins()))
        .run("cf", &definition, json!({"a": "x"}))
        .await
        .unwrap();

    assert_eq!(result.activations_of("loopFunction"), 3);
    let exit = result
        .results
        .iter()
        .rev()
        .find(|r| r.node_name == "loopFunction")
        .unwrap();
    assert_eq!(exit.result["iterationCount"], json!(3));
    assert_eq!(result.final_result, json!("x"));
}

#[tokio::test]
async fn dangling_edge_is_a_configuration_error() {
    let recorder = Recorder::default();
    let registry = registry_with(vec![("answer", Node::new(recorder.clone()))]);
    let definition = flow(
        vec![start(), node("t", "answer", "Answer", json!({}))],
        vec![edge("s", "t"), edge("t", "ghost")],
    );

    let err = runner(registry).run("cf", &definition, json!({})).await.unwrap_err();

    assert_eq!(err.phase(), Phase::Validation);
    assert!(err.to_string().contains("ghost"));
    assert!(matches!(err.flow_error(), FlowError::DanglingEdge { missing, .. } if missing == "ghost"));
    assert!(recorder.seen().is_empty());
}

#[tokio::test]
async fn sys_values_reach_the_start_node() {
    let definition = flow(vec![start()], vec![]);
    let result = runner(Arc::new(NodeRegistry::with_builtins()))
        .run("cf", &definition, json!({"a": "hi", "sys": {"userId": "u1"}}))
        .await
        .unwrap();

    assert_eq!(result.results[0].node_name, "startFunction");
    assert_eq!(result.results[0].result["sysUserId"], json!("u1"));
    assert_eq!(result.results[0].result["result"], json!("hi"));
}

#[tokio::test]
async fn start_node_is_found_regardless_of_order() {
    let recorder = Recorder::default();
    let registry = registry_with(vec![("answer", Node::new(recorder.clone()))]);
    let definition = flow(
        vec![node("t", "answer", "Answer", json!({})), start()],
        vec![edge("s", "t")],
    );

    let result = runner(registry).run("cf", &definition, json!({"a": "q"})).await.unwrap();

    let order: Vec<&str> = result.results.iter().map(|r| r.node_name.as_str()).collect();
    assert_eq!(order, vec!["startFunction", "answer"]);
}

#[tokio::test]
async fn previous_results_merge_into_inputs() {
    let cases = [
        (json!({"result": "X"}), "inputValue", json!("X")),
        (json!({"k": 1, "m": "v"}), "m", json!("v")),
        (json!(7), "inputValue", json!(7)),
    ];
    for (produced, key, expected) in cases {
        let recorder = Recorder::default();
        let registry = registry_with(vec![
            ("producer", Node::new(Scripted::new(vec![produced.clone()]))),
            ("answer", Node::new(recorder.clone())),
        ]);
        let definition = flow(
            vec![
                start(),
                node("p", "producer", "Producer", json!({})),
                node("t", "answer", "Answer", json!({"fixed": "kept"})),
            ],
            vec![edge("s", "p"), edge("p", "t")],
        );

        runner(registry).run("cf", &definition, json!({})).await.unwrap();

        let seen = recorder.seen();
        assert_eq!(seen[0][key], expected, "merging {}", produced);
        assert_eq!(seen[0]["fixed"], json!("kept"));
    }
}

#[tokio::test]
async fn bad_nodes_fail_before_anything_runs() {
    let recorder = Recorder::default();
    let registry = registry_with(vec![("answer", Node::new(recorder.clone()))]);

    let unnamed = flow(
        vec![start(), node("t", "", "Answer", json!({})), node("r", "answer", "Answer", json!({}))],
        vec![edge("s", "r")],
    );
    let err = runner(registry.clone()).run("cf", &unnamed, json!({})).await.unwrap_err();
    assert!(matches!(err, RunError::InvalidNode { .. }));
    assert!(err.to_string().starts_with("error validating/adding node"));

    let untyped = flow(
        vec![start(), node("t", "answer", "", json!({}))],
        vec![edge("s", "t")],
    );
    let err = runner(registry.clone()).run("cf", &untyped, json!({})).await.unwrap_err();
    assert_eq!(err.phase(), Phase::Validation);

    let unknown = flow(
        vec![start(), node("t", "noSuchNode", "Custom", json!({}))],
        vec![edge("s", "t")],
    );
    let err = runner(registry).run("cf", &unknown, json!({})).await.unwrap_err();
    assert!(matches!(err.flow_error(), FlowError::UnknownNodeType(name) if name == "noSuchNode"));

    assert!(recorder.seen().is_empty());
}

#[tokio::test]
async fn cycles_outside_loops_run_once_each() {
    let registry = registry_with(vec![
        ("a", Node::new(Scripted::new(vec![json!("a")]))),
        ("b", Node::new(Scripted::new(vec![json!("b")]))),
    ]);
    let definition = flow(
        vec![
            start(),
            node("a", "a", "Step", json!({})),
            node("b", "b", "Step", json!({})),
        ],
        vec![edge("s", "a"), edge("a", "b"), edge("b", "a")],
    );

    let result = runner(registry).run("cf", &definition, json!({})).await.unwrap();
    assert_eq!(result.results.len(), 3);
    assert_eq!(result.final_result, json!("b"));
}

#[tokio::test]
async fn endless_loops_hit_the_activation_budget() {
    let registry = registry_with(vec![(
        "control",
        Node::new(Scripted::new(vec![json!({"failure": true})])),
    )]);
    let definition = flow(
        vec![
            start(),
            node("li", "loopInput", "LoopInput", json!({})),
            node("lf", "control", "LoopFunction", json!({})),
        ],
        vec![edge("s", "li"), edge("li", "lf"), branch("lf", "failure", "li")],
    );
    let config = EngineConfig {
        max_activations: 50,
        ..EngineConfig::default()
    };

    let err = FlowRunner::new(registry, Arc::new(config))
        .run("cf", &definition, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Execution(FlowError::BudgetExceeded(50))));
}

#[tokio::test]
async fn unresolved_loop_branch_fails_under_strict_policy() {
    let registry = registry_with(vec![("control", Node::new(Scripted::new(vec![json!({})])))]);
    let definition = flow(
        vec![
            start(),
            node("li", "loopInput", "LoopInput", json!({})),
            node("lf", "control", "LoopFunction", json!({})),
        ],
        vec![edge("s", "li"), edge("li", "lf"), branch("lf", "failure", "li")],
    );
    let config = EngineConfig {
        loop_branch_policy: LoopBranchPolicy::Fail,
        ..EngineConfig::default()
    };

    let err = FlowRunner::new(registry, Arc::new(config))
        .run("cf", &definition, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err.flow_error(), FlowError::UnresolvedLoopBranch(name) if name == "control"));
}

#[tokio::test]
async fn cancelled_runs_stop_with_an_execution_error() {
    let recorder = Recorder::default();
    let registry = registry_with(vec![("answer", Node::new(recorder.clone()))]);
    let definition = flow(
        vec![start(), node("t", "answer", "Answer", json!({}))],
        vec![edge("s", "t")],
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = runner(registry)
        .with_cancellation(cancel)
        .run("cf", &definition, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Execution(FlowError::Cancelled)));
    assert!(recorder.seen().is_empty());
}

#[tokio::test]
async fn slow_runs_and_nodes_time_out() {
    let registry = registry_with(vec![("slow", Node::new(Sleeper(Duration::from_secs(5))))]);
    let definition = flow(
        vec![start(), node("z", "slow", "Slow", json!({}))],
        vec![edge("s", "z")],
    );

    let config = EngineConfig {
        run_timeout_secs: Some(1),
        ..EngineConfig::default()
    };
    let err = FlowRunner::new(registry.clone(), Arc::new(config))
        .run("cf", &definition, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Execution(FlowError::Timeout(_))));

    let config = EngineConfig {
        node_timeout_secs: Some(1),
        ..EngineConfig::default()
    };
    let err = FlowRunner::new(registry, Arc::new(config))
        .run("cf", &definition, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err.flow_error(), FlowError::NodeTimeout { node, .. } if node == "slow"));
}

#[tokio::test]
async fn progress_events_follow_the_run() {
    let notifier = BroadcastNotifier::default();
    let mut events = notifier.subscribe();
    let registry = registry_with(vec![(
        "answer",
        Node::new(Scripted::new(vec![json!({"result": "ok", "tokenCount": 3})])),
    )]);
    let definition = flow(
        vec![start(), node("t", "answer", "Answer", json!({}))],
        vec![edge("s", "t")],
    );

    runner(registry)
        .with_notifier(Notifier::new(notifier))
        .run("chatflow-1", &definition, json!({"chatId": "c1"}))
        .await
        .unwrap();

    let mut received = Vec::new();
    while let Ok(message) = events.try_recv() {
        assert_eq!(message.chatflow_id, "chatflow-1");
        received.push(message.event);
    }
    assert!(matches!(
        received.first(),
        Some(ProgressEvent::FlowStarted { chat_id: Some(chat), .. }) if chat == "c1"
    ));
    let started = received
        .iter()
        .filter(|e| matches!(e, ProgressEvent::NodeStarted { .. }))
        .count();
    assert_eq!(started, 2);
    assert!(received.iter().any(|e| matches!(
        e,
        ProgressEvent::NodeFinished { node_name, token_count, .. }
            if node_name == "answer" && *token_count == 3.0
    )));
    assert!(matches!(
        received.last(),
        Some(ProgressEvent::FlowFinished { token_count, .. }) if *token_count == 3.0
    ));
}

#[tokio::test]
async fn composite_loop_node_repeats_its_inner_flow() {
    let definition = flow(
        vec![
            start(),
            json!({
                "id": "loop",
                "data": {
                    "name": "loop",
                    "type": "loop",
                    "category": "Test",
                    "inputs": {"successCondition": "input.result.len() >= 3"},
                    "flowData": {
                        "innerNodes": [
                            node("is", "startFunction", "StartFunction", json!({})),
                            node("it", "template", "Template", json!({"template": "{{inputValue}}x"})),
                        ],
                        "innerEdges": [edge("is", "it")]
                    }
                }
            }),
        ],
        vec![edge("s", "loop")],
    );

    let result = runner(Arc::new(NodeRegistry::with_builtins()))
        .run("cf", &definition, json!({"a": "x"}))
        .await
        .unwrap();

    let success = &result.final_result["success"];
    assert_eq!(success["result"], json!("xxx"));
    assert_eq!(success["iterationCount"], json!(2));
}

#[tokio::test]
async fn yaml_flow_files_run_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("greeting.yaml");
    fs::write(
        &path,
        r#"
nodes:
  - id: s
    data: { name: startFunction, type: StartFunction, category: Utilities }
  - id: t
    data:
      name: template
      type: Template
      category: Utilities
      inputs:
        template: "Hello {{inputValue}}!"
edges:
  - { source: s, target: t }
"#,
    )
    .unwrap();

    let definition = load_flow_file(&path).unwrap();
    let result = runner(Arc::new(NodeRegistry::with_builtins()))
        .run("greeting", &definition, json!({"a": "world", "chatId": "c9"}))
        .await
        .unwrap();

    assert_eq!(result.final_result, json!({"result": "Hello world!"}));
    assert_eq!(result.chat_id.as_deref(), Some("c9"));
}
