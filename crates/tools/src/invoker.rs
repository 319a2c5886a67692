//! Tool invocation.
//!
//! Validation happens before execution: a call with a missing required
//! field is answered with a failed result and the handler never runs.
//! Handoff-role names are not tools at all — they are surfaced to the
//! orchestrator, which resumes the conversation on a different model.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use ah_domain::event::TodoItem;
use ah_domain::message::ToolCall;

use crate::registry::{ToolContext, ToolRegistry};

/// Tool-call names that denote a multi-model handoff instead of a tool.
pub const HANDOFF_ROLES: [&str; 4] = ["reasoning", "tool_execution", "synthesis", "fallback"];

/// Names that drive the todo side channel.
const TODO_TOOL_NAMES: [&str; 2] = ["todowrite", "todo_write"];

/// Outcome of one executed (or rejected) tool call.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub result: Value,
    pub success: bool,
    pub error: Option<String>,
    pub execution_ms: u64,
    /// Present when the call carried a `todos` array (side channel).
    pub todos: Option<Vec<TodoItem>>,
}

impl ToolOutcome {
    fn failure(error: impl Into<String>, execution_ms: u64) -> Self {
        let error = error.into();
        Self {
            result: Value::Null,
            success: false,
            error: Some(error),
            execution_ms,
            todos: None,
        }
    }
}

/// What a tool call resolved to.
#[derive(Debug, Clone)]
pub enum Invocation {
    Handled(ToolOutcome),
    /// The call names a handoff role; the orchestrator owns the rest.
    Handoff { role: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolInvoker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Resolve one tool call.
    pub async fn invoke(&self, call: &ToolCall, ctx: &ToolContext) -> Invocation {
        // ── Handoff detection ──────────────────────────────────────
        if HANDOFF_ROLES.contains(&call.tool_name.as_str()) {
            return Invocation::Handoff {
                role: call.tool_name.clone(),
            };
        }

        let Some((definition, _flags, handler)) = self.registry.get(&call.tool_name) else {
            return Invocation::Handled(ToolOutcome::failure(
                format!("tool not found: {}", call.tool_name),
                0,
            ));
        };

        // ── Validation: never execute on schema mismatch ───────────
        if let Err(problem) = validate_args(&definition.parameters, &call.arguments) {
            tracing::debug!(
                tool = %call.tool_name,
                call_id = %call.call_id,
                problem = %problem,
                "tool arguments rejected"
            );
            return Invocation::Handled(ToolOutcome::failure(
                format!("invalid arguments: {problem}"),
                0,
            ));
        }

        // ── Todo side channel ──────────────────────────────────────
        let todos = extract_todos(&call.tool_name, &call.arguments);

        // ── Execute under deadline + cancellation ──────────────────
        let started = Instant::now();
        let execution = handler.execute(ctx, call.arguments.clone());
        let outcome = tokio::select! {
            result = tokio::time::timeout(self.timeout, execution) => match result {
                Ok(Ok(value)) => ToolOutcome {
                    result: value,
                    success: true,
                    error: None,
                    execution_ms: started.elapsed().as_millis() as u64,
                    todos,
                },
                Ok(Err(e)) => {
                    let mut outcome = ToolOutcome::failure(
                        e.to_string(),
                        started.elapsed().as_millis() as u64,
                    );
                    outcome.todos = todos;
                    outcome
                }
                Err(_) => {
                    tracing::warn!(tool = %call.tool_name, call_id = %call.call_id, "tool timed out");
                    let mut outcome = ToolOutcome::failure(
                        "timeout",
                        started.elapsed().as_millis() as u64,
                    );
                    outcome.todos = todos;
                    outcome
                }
            },
            _ = ctx.cancel.cancelled() => ToolOutcome::failure(
                "cancelled",
                started.elapsed().as_millis() as u64,
            ),
        };

        Invocation::Handled(outcome)
    }
}

// ── Argument validation ────────────────────────────────────────────

/// Minimal JSON-schema check: required fields must be present, and a
/// property with a declared primitive type must match it. Anything the
/// schema does not constrain passes through untouched — the core never
/// inspects tool-specific fields.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    if schema.get("type").and_then(|v| v.as_str()) != Some("object") {
        return Ok(());
    }

    let object = match args {
        Value::Object(map) => map,
        Value::Null => {
            return match schema.get("required").and_then(|r| r.as_array()) {
                Some(req) if !req.is_empty() => Err("arguments object is missing".into()),
                _ => Ok(()),
            };
        }
        other => return Err(format!("arguments must be an object, got {other}")),
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if !object.contains_key(field) {
                return Err(format!("missing required field '{field}'"));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (name, prop_schema) in props {
            let Some(value) = object.get(name) else {
                continue;
            };
            let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let matches = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                return Err(format!("field '{name}' is not of type {expected}"));
            }
        }
    }

    Ok(())
}

/// Pull the `todos` array out of a todo-tool call's arguments.
fn extract_todos(tool_name: &str, args: &Value) -> Option<Vec<TodoItem>> {
    if !TODO_TOOL_NAMES.contains(&tool_name) {
        return None;
    }
    let todos = args.get("todos")?.as_array()?;
    let parsed: Vec<TodoItem> = todos
        .iter()
        .filter_map(|t| serde_json::from_value(t.clone()).ok())
        .collect();
    Some(parsed)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ToolFlags, ToolHandler, ToolRegistry};
    use ah_activity::CancelToken;
    use ah_domain::error::{Error, Result};
    use serde_json::json;

    struct Echo;

    #[async_trait::async_trait]
    impl ToolHandler for Echo {
        async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<Value> {
            Ok(json!({"echo": args}))
        }
    }

    struct Slow(Duration);

    #[async_trait::async_trait]
    impl ToolHandler for Slow {
        async fn execute(&self, _ctx: &ToolContext, _args: Value) -> Result<Value> {
            tokio::time::sleep(self.0).await;
            Ok(json!({"done": true}))
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl ToolHandler for Failing {
        async fn execute(&self, _ctx: &ToolContext, _args: Value) -> Result<Value> {
            Err(Error::Other("disk on fire".into()))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let reg = ToolRegistry::new();
        reg.register(
            "search",
            "web search",
            json!({
                "type": "object",
                "properties": {"q": {"type": "string"}},
                "required": ["q"],
            }),
            ToolFlags::default(),
            Arc::new(Echo),
        );
        reg.register(
            "todo_write",
            "update todos",
            json!({"type": "object"}),
            ToolFlags::default(),
            Arc::new(Echo),
        );
        Arc::new(reg)
    }

    fn ctx() -> ToolContext {
        ToolContext::new("s1", CancelToken::new())
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            call_id: "c1".into(),
            tool_name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn successful_invocation_measures_time() {
        let invoker = ToolInvoker::new(registry(), Duration::from_secs(5));
        let invocation = invoker
            .invoke(&call("search", json!({"q": "rust"})), &ctx())
            .await;
        match invocation {
            Invocation::Handled(outcome) => {
                assert!(outcome.success);
                assert_eq!(outcome.result["echo"]["q"], "rust");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_required_field_is_rejected_without_execution() {
        let invoker = ToolInvoker::new(registry(), Duration::from_secs(5));
        let invocation = invoker.invoke(&call("search", json!({})), &ctx()).await;
        match invocation {
            Invocation::Handled(outcome) => {
                assert!(!outcome.success);
                assert!(outcome.error.unwrap().contains("missing required field 'q'"));
                assert_eq!(outcome.execution_ms, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_type_is_rejected() {
        let invoker = ToolInvoker::new(registry(), Duration::from_secs(5));
        let invocation = invoker.invoke(&call("search", json!({"q": 42})), &ctx()).await;
        match invocation {
            Invocation::Handled(outcome) => {
                assert!(!outcome.success);
                assert!(outcome.error.unwrap().contains("not of type string"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_fails_cleanly() {
        let invoker = ToolInvoker::new(registry(), Duration::from_secs(5));
        let invocation = invoker.invoke(&call("nope", json!({})), &ctx()).await;
        match invocation {
            Invocation::Handled(outcome) => {
                assert!(!outcome.success);
                assert!(outcome.error.unwrap().contains("tool not found"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn handoff_roles_are_not_executed() {
        let invoker = ToolInvoker::new(registry(), Duration::from_secs(5));
        for role in HANDOFF_ROLES {
            let invocation = invoker.invoke(&call(role, json!({})), &ctx()).await;
            match invocation {
                Invocation::Handoff { role: r } => assert_eq!(r, role),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn timeout_produces_failed_outcome() {
        let reg = ToolRegistry::new();
        reg.register(
            "slow",
            "",
            json!({"type": "object"}),
            ToolFlags::default(),
            Arc::new(Slow(Duration::from_secs(10))),
        );
        let invoker = ToolInvoker::new(Arc::new(reg), Duration::from_millis(20));
        let invocation = invoker.invoke(&call("slow", json!({})), &ctx()).await;
        match invocation {
            Invocation::Handled(outcome) => {
                assert!(!outcome.success);
                assert_eq!(outcome.error.as_deref(), Some("timeout"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn handler_error_becomes_failed_result() {
        let reg = ToolRegistry::new();
        reg.register(
            "broken",
            "",
            json!({"type": "object"}),
            ToolFlags::default(),
            Arc::new(Failing),
        );
        let invoker = ToolInvoker::new(Arc::new(reg), Duration::from_secs(5));
        let invocation = invoker.invoke(&call("broken", json!({})), &ctx()).await;
        match invocation {
            Invocation::Handled(outcome) => {
                assert!(!outcome.success);
                assert!(outcome.error.unwrap().contains("disk on fire"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_execution() {
        let reg = ToolRegistry::new();
        reg.register(
            "slow",
            "",
            json!({"type": "object"}),
            ToolFlags::default(),
            Arc::new(Slow(Duration::from_secs(10))),
        );
        let invoker = ToolInvoker::new(Arc::new(reg), Duration::from_secs(30));

        let cancel = CancelToken::new();
        let ctx = ToolContext::new("s1", cancel.clone());
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let invocation = invoker.invoke(&call("slow", json!({})), &ctx).await;
        match invocation {
            Invocation::Handled(outcome) => {
                assert!(!outcome.success);
                assert_eq!(outcome.error.as_deref(), Some("cancelled"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn todo_tool_carries_side_channel() {
        let invoker = ToolInvoker::new(registry(), Duration::from_secs(5));
        let invocation = invoker
            .invoke(
                &call(
                    "todo_write",
                    json!({"todos": [
                        {"content": "write tests", "status": "pending"},
                        {"content": "ship", "status": "in_progress", "priority": "high"},
                    ]}),
                ),
                &ctx(),
            )
            .await;
        match invocation {
            Invocation::Handled(outcome) => {
                assert!(outcome.success);
                let todos = outcome.todos.unwrap();
                assert_eq!(todos.len(), 2);
                assert_eq!(todos[0].content, "write tests");
                assert_eq!(todos[1].priority.as_deref(), Some("high"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn validation_ignores_unconstrained_schemas() {
        assert!(validate_args(&json!({}), &json!({"anything": 1})).is_ok());
        assert!(validate_args(&json!({"type":"object"}), &json!(null)).is_ok());
        assert!(validate_args(
            &json!({"type":"object","required":["x"]}),
            &json!(null)
        )
        .is_err());
    }
}
