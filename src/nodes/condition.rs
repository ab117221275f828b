//! Rhai evaluation of loop success conditions.
use rhai::{Dynamic, Engine, Scope};
use serde_json::{Map, Value};

use crate::{flow::initializer::truthy, node::NodeError};

const MAX_OPERATIONS: u64 = 100_000;

fn to_dynamic(name: &str, value: &Value) -> Result<Dynamic, NodeError> {
    rhai::serde::to_dynamic(value)
        .map_err(|e| NodeError::Script(format!("could not expose `{}` to script: {}", name, e)))
}

/// Evaluate `script` with `input`, `inputs` and `iteration` in scope and
/// apply JSON truthiness to whatever it returns.
///
/// ```rhai
/// input.len() > 3 || iteration >= 5
/// ```
pub fn evaluate_condition(
    script: &str,
    input: &Value,
    inputs: &Map<String, Value>,
    iteration: usize,
) -> Result<bool, NodeError> {
    let mut engine = Engine::new();
    engine.set_max_operations(MAX_OPERATIONS);

    let mut scope = Scope::new();
    scope.push_dynamic("input", to_dynamic("input", input)?);
    scope.push_dynamic("inputs", to_dynamic("inputs", &Value::Object(inputs.clone()))?);
    scope.push("iteration", iteration as i64);

    let result = engine
        .eval_with_scope::<Dynamic>(&mut scope, script)
        .map_err(|e| NodeError::Script(format!("error in condition execution: {}", e)))?;
    let value: Value = rhai::serde::from_dynamic(&result)
        .map_err(|e| NodeError::Script(format!("condition returned an unsupported value: {}", e)))?;
    Ok(truthy(&value))
}
