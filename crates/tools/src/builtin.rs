//! Built-in tools registered by the gateway bootstrap.

use std::sync::Arc;

use serde_json::{json, Value};

use ah_domain::error::Result;

use crate::registry::{ToolContext, ToolFlags, ToolHandler, ToolRegistry};

/// The todo-list tool. Execution is trivial — the interesting part is
/// the `todo_update` side channel the invoker extracts from its
/// arguments.
pub struct TodoWriteTool;

#[async_trait::async_trait]
impl ToolHandler for TodoWriteTool {
    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<Value> {
        let count = args
            .get("todos")
            .and_then(|t| t.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        Ok(json!({"updated": count}))
    }
}

/// Register the built-in tool set.
pub fn register_builtins(registry: &ToolRegistry) {
    registry.register(
        "todo_write",
        "Replace the session todo list",
        json!({
            "type": "object",
            "properties": {
                "todos": {"type": "array"},
            },
            "required": ["todos"],
        }),
        ToolFlags::default(),
        Arc::new(TodoWriteTool),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use ah_activity::CancelToken;

    #[tokio::test]
    async fn todo_write_reports_count() {
        let ctx = ToolContext::new("s1", CancelToken::new());
        let out = TodoWriteTool
            .execute(&ctx, json!({"todos": [{"content": "a"}, {"content": "b"}]}))
            .await
            .unwrap();
        assert_eq!(out["updated"], 2);
    }

    #[test]
    fn builtins_register() {
        let reg = ToolRegistry::new();
        register_builtins(&reg);
        assert!(reg.get("todo_write").is_some());
    }
}
