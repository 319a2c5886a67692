use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ah_activity::CancelToken;
use ah_domain::error::Result;
use ah_domain::message::ToolDefinition;

/// Descriptor flags attached at registration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ToolFlags {
    /// The handler edits files (surfaced to clients for confirmation UX).
    pub file_edit: bool,
    /// The handler may legitimately run close to the full deadline.
    pub long_running: bool,
    /// The handler reports incremental output; the orchestrator relays
    /// it as `tool_progress` events.
    pub streams_output: bool,
}

/// Per-invocation context handed to a handler.
///
/// Resources a handler opens must be released before it returns; the
/// cancel token is the request's and must be honored by long-running
/// work.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub cancel: CancelToken,
    /// Present when the tool was registered with `streams_output`:
    /// incremental output sent here is relayed to the client.
    pub progress: Option<tokio::sync::mpsc::Sender<String>>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, cancel: CancelToken) -> Self {
        Self {
            session_id: session_id.into(),
            cancel,
            progress: None,
        }
    }

    /// Report incremental output, if anyone is listening.
    pub async fn report_progress(&self, output: impl Into<String>) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(output.into()).await;
        }
    }
}

/// A tool implementation.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, ctx: &ToolContext, args: serde_json::Value)
        -> Result<serde_json::Value>;
}

struct RegisteredTool {
    definition: ToolDefinition,
    flags: ToolFlags,
    handler: Arc<dyn ToolHandler>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        flags: ToolFlags,
        handler: Arc<dyn ToolHandler>,
    ) {
        let name = name.into();
        tracing::debug!(tool = %name, "tool registered");
        self.tools.write().insert(
            name.clone(),
            RegisteredTool {
                definition: ToolDefinition {
                    name,
                    description: description.into(),
                    parameters: input_schema,
                },
                flags,
                handler,
            },
        );
    }

    /// Definitions to expose to the model, optionally restricted to an
    /// enabled set. Sorted by name for a stable request shape.
    pub fn definitions(&self, enabled: Option<&[String]>) -> Vec<ToolDefinition> {
        let tools = self.tools.read();
        let mut defs: Vec<ToolDefinition> = tools
            .values()
            .filter(|t| {
                enabled
                    .map(|names| names.contains(&t.definition.name))
                    .unwrap_or(true)
            })
            .map(|t| t.definition.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Option<(ToolDefinition, ToolFlags, Arc<dyn ToolHandler>)> {
        let tools = self.tools.read();
        tools
            .get(name)
            .map(|t| (t.definition.clone(), t.flags, t.handler.clone()))
    }

    pub fn flags(&self, name: &str) -> Option<ToolFlags> {
        self.tools.read().get(name).map(|t| t.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Nop;

    #[async_trait::async_trait]
    impl ToolHandler for Nop {
        async fn execute(
            &self,
            _ctx: &ToolContext,
            _args: serde_json::Value,
        ) -> Result<serde_json::Value> {
            Ok(json!({"ok": true}))
        }
    }

    #[test]
    fn definitions_are_sorted_and_filterable() {
        let reg = ToolRegistry::new();
        reg.register("zeta", "", json!({}), ToolFlags::default(), Arc::new(Nop));
        reg.register("alpha", "", json!({}), ToolFlags::default(), Arc::new(Nop));

        let all = reg.definitions(None);
        assert_eq!(
            all.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            ["alpha", "zeta"]
        );

        let only = reg.definitions(Some(&["zeta".to_string()]));
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].name, "zeta");
    }

    #[test]
    fn get_returns_registration() {
        let reg = ToolRegistry::new();
        reg.register(
            "edit",
            "edits files",
            json!({"type":"object"}),
            ToolFlags {
                file_edit: true,
                ..Default::default()
            },
            Arc::new(Nop),
        );
        let (def, flags, _) = reg.get("edit").unwrap();
        assert_eq!(def.description, "edits files");
        assert!(flags.file_edit);
        assert!(reg.get("missing").is_none());
    }
}
