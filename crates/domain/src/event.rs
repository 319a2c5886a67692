use serde::{Deserialize, Serialize};

use crate::capability::{ModelCapabilities, ProviderFamily};

/// Canonical, provider-independent events emitted by the core.
///
/// This is the wire schema of the whole system: the normalizer produces
/// these, the fanout broadcasts them, and the SSE writer frames them as
/// `event: <type>\ndata: <json>\n\n`. Field names are camelCase because
/// the payload is client-facing.
///
/// Per session the sequence is totally ordered, begins with exactly one
/// `activity_start`, and ends with exactly one `activity_complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    #[serde(rename_all = "camelCase")]
    ActivityStart {
        session_id: String,
        message_id: String,
        model: String,
        provider: ProviderFamily,
        capabilities: ModelCapabilities,
        ts: u64,
    },

    #[serde(rename_all = "camelCase")]
    ThinkingStart {
        session_id: String,
        thinking_id: String,
        mode: ThinkingMode,
        ts: u64,
    },

    #[serde(rename_all = "camelCase")]
    ThinkingDelta {
        session_id: String,
        thinking_id: String,
        delta: String,
        accumulated: String,
        sequence_number: u64,
        ts: u64,
    },

    #[serde(rename_all = "camelCase")]
    ThinkingComplete {
        session_id: String,
        thinking_id: String,
        content: String,
        token_count: u64,
        duration_ms: u64,
        was_hidden: bool,
        ts: u64,
    },

    #[serde(rename_all = "camelCase")]
    ContentDelta {
        session_id: String,
        delta: String,
        accumulated: String,
        sequence_number: u64,
        ts: u64,
    },

    #[serde(rename_all = "camelCase")]
    ToolStart {
        session_id: String,
        tool_call_id: String,
        tool_name: String,
        tool_index: u32,
        ts: u64,
    },

    #[serde(rename_all = "camelCase")]
    ToolDelta {
        session_id: String,
        tool_call_id: String,
        delta: String,
        accumulated: String,
        sequence_number: u64,
        is_valid_json: bool,
        ts: u64,
    },

    /// Incremental handler output for tools registered with the
    /// `streams_output` flag.
    #[serde(rename_all = "camelCase")]
    ToolProgress {
        session_id: String,
        tool_call_id: String,
        output: String,
        ts: u64,
    },

    #[serde(rename_all = "camelCase")]
    ToolComplete {
        session_id: String,
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
        arguments_raw: String,
        duration_ms: u64,
        ts: u64,
    },

    #[serde(rename_all = "camelCase")]
    ToolResult {
        session_id: String,
        tool_call_id: String,
        result: serde_json::Value,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        execution_ms: u64,
        ts: u64,
    },

    #[serde(rename_all = "camelCase")]
    TodoUpdate {
        session_id: String,
        todos: Vec<TodoItem>,
        ts: u64,
    },

    #[serde(rename_all = "camelCase")]
    MetricsUpdate {
        session_id: String,
        tokens: TokenTally,
        timing: Timing,
        ts: u64,
    },

    #[serde(rename_all = "camelCase")]
    ActivityComplete {
        session_id: String,
        tokens: TokenTally,
        timing: Timing,
        had_thinking: bool,
        tool_call_count: u32,
        stop_reason: StopReason,
        ts: u64,
    },

    /// Mid-stream failure frame. Precedes the terminal
    /// `activity_complete{stopReason: error}`.
    #[serde(rename_all = "camelCase")]
    Error {
        session_id: String,
        code: String,
        message: String,
        ts: u64,
    },
}

impl ActivityEvent {
    /// The SSE `event:` field / variant tag.
    pub fn event_name(&self) -> &'static str {
        match self {
            ActivityEvent::ActivityStart { .. } => "activity_start",
            ActivityEvent::ThinkingStart { .. } => "thinking_start",
            ActivityEvent::ThinkingDelta { .. } => "thinking_delta",
            ActivityEvent::ThinkingComplete { .. } => "thinking_complete",
            ActivityEvent::ContentDelta { .. } => "content_delta",
            ActivityEvent::ToolStart { .. } => "tool_start",
            ActivityEvent::ToolDelta { .. } => "tool_delta",
            ActivityEvent::ToolProgress { .. } => "tool_progress",
            ActivityEvent::ToolComplete { .. } => "tool_complete",
            ActivityEvent::ToolResult { .. } => "tool_result",
            ActivityEvent::TodoUpdate { .. } => "todo_update",
            ActivityEvent::MetricsUpdate { .. } => "metrics_update",
            ActivityEvent::ActivityComplete { .. } => "activity_complete",
            ActivityEvent::Error { .. } => "error",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            ActivityEvent::ActivityStart { session_id, .. }
            | ActivityEvent::ThinkingStart { session_id, .. }
            | ActivityEvent::ThinkingDelta { session_id, .. }
            | ActivityEvent::ThinkingComplete { session_id, .. }
            | ActivityEvent::ContentDelta { session_id, .. }
            | ActivityEvent::ToolStart { session_id, .. }
            | ActivityEvent::ToolDelta { session_id, .. }
            | ActivityEvent::ToolProgress { session_id, .. }
            | ActivityEvent::ToolComplete { session_id, .. }
            | ActivityEvent::ToolResult { session_id, .. }
            | ActivityEvent::TodoUpdate { session_id, .. }
            | ActivityEvent::MetricsUpdate { session_id, .. }
            | ActivityEvent::ActivityComplete { session_id, .. }
            | ActivityEvent::Error { session_id, .. } => session_id,
        }
    }

    pub fn ts(&self) -> u64 {
        match self {
            ActivityEvent::ActivityStart { ts, .. }
            | ActivityEvent::ThinkingStart { ts, .. }
            | ActivityEvent::ThinkingDelta { ts, .. }
            | ActivityEvent::ThinkingComplete { ts, .. }
            | ActivityEvent::ContentDelta { ts, .. }
            | ActivityEvent::ToolStart { ts, .. }
            | ActivityEvent::ToolDelta { ts, .. }
            | ActivityEvent::ToolProgress { ts, .. }
            | ActivityEvent::ToolComplete { ts, .. }
            | ActivityEvent::ToolResult { ts, .. }
            | ActivityEvent::TodoUpdate { ts, .. }
            | ActivityEvent::MetricsUpdate { ts, .. }
            | ActivityEvent::ActivityComplete { ts, .. }
            | ActivityEvent::Error { ts, .. } => *ts,
        }
    }

    /// Terminal events end every subscriber stream for the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActivityEvent::ActivityComplete { .. })
    }

    /// Delta events may be coalesced by lossy fanout subscribers.
    /// Boundary events (`*_start`, `*_complete`, `tool_result`, ...) may not.
    pub fn is_coalescible(&self) -> bool {
        matches!(
            self,
            ActivityEvent::ThinkingDelta { .. }
                | ActivityEvent::ContentDelta { .. }
                | ActivityEvent::ToolDelta { .. }
                | ActivityEvent::ToolProgress { .. }
        )
    }

    /// Key identifying the delta stream a coalescible event belongs to.
    /// Two events coalesce only when their keys match.
    pub fn coalesce_key(&self) -> Option<(&'static str, &str)> {
        match self {
            ActivityEvent::ThinkingDelta { thinking_id, .. } => Some(("thinking", thinking_id)),
            ActivityEvent::ContentDelta { .. } => Some(("content", "")),
            ActivityEvent::ToolDelta { tool_call_id, .. } => Some(("tool", tool_call_id)),
            ActivityEvent::ToolProgress { tool_call_id, .. } => Some(("progress", tool_call_id)),
            _ => None,
        }
    }
}

/// How thinking content was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingMode {
    Extended,
    ChainOfThought,
    Summary,
    Hidden,
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Error,
}

/// Token counters carried by `metrics_update` and `activity_complete`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTally {
    #[serde(rename = "in")]
    pub input: u64,
    #[serde(rename = "out")]
    pub output: u64,
    pub reasoning: u64,
    pub total: u64,
}

impl TokenTally {
    pub fn add(&mut self, other: &TokenTally) {
        self.input += other.input;
        self.output += other.output;
        self.reasoning += other.reasoning;
        self.total += other.total;
    }
}

/// Timing measurements for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    /// Time-to-first-token in milliseconds. Absent until the first
    /// content or thinking delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttft: Option<u64>,
    pub elapsed: u64,
    /// Output tokens per second over the elapsed window.
    pub tps: f64,
}

/// One entry of the `todo_update` side channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tag_and_fields_are_client_facing() {
        let evt = ActivityEvent::ContentDelta {
            session_id: "s1".into(),
            delta: "Hi".into(),
            accumulated: "Hi".into(),
            sequence_number: 1,
            ts: 42,
        };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "content_delta");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["sequenceNumber"], 1);
    }

    #[test]
    fn tokens_serialize_as_in_out() {
        let t = TokenTally {
            input: 10,
            output: 5,
            reasoning: 0,
            total: 15,
        };
        let json = serde_json::to_value(t).unwrap();
        assert_eq!(json["in"], 10);
        assert_eq!(json["out"], 5);
    }

    #[test]
    fn error_is_not_terminal_but_complete_is() {
        let err = ActivityEvent::Error {
            session_id: "s1".into(),
            code: "PROVIDER_STREAM_ERROR".into(),
            message: "boom".into(),
            ts: 1,
        };
        assert!(!err.is_terminal());

        let done = ActivityEvent::ActivityComplete {
            session_id: "s1".into(),
            tokens: TokenTally::default(),
            timing: Timing::default(),
            had_thinking: false,
            tool_call_count: 0,
            stop_reason: StopReason::EndTurn,
            ts: 2,
        };
        assert!(done.is_terminal());
        assert_eq!(done.event_name(), "activity_complete");
    }

    #[test]
    fn coalesce_keys_distinguish_streams() {
        let a = ActivityEvent::ToolDelta {
            session_id: "s".into(),
            tool_call_id: "t1".into(),
            delta: "{".into(),
            accumulated: "{".into(),
            sequence_number: 1,
            is_valid_json: false,
            ts: 1,
        };
        let b = ActivityEvent::ToolDelta {
            session_id: "s".into(),
            tool_call_id: "t2".into(),
            delta: "{".into(),
            accumulated: "{".into(),
            sequence_number: 1,
            is_valid_json: false,
            ts: 1,
        };
        assert!(a.is_coalescible());
        assert_ne!(a.coalesce_key(), b.coalesce_key());
    }

    #[test]
    fn roundtrip_through_json() {
        let evt = ActivityEvent::ThinkingComplete {
            session_id: "s1".into(),
            thinking_id: "th1".into(),
            content: "because".into(),
            token_count: 3,
            duration_ms: 120,
            was_hidden: false,
            ts: 9,
        };
        let json = serde_json::to_string(&evt).unwrap();
        let back: ActivityEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_name(), "thinking_complete");
        assert_eq!(back.session_id(), "s1");
    }
}
