//! The per-request activity session.
//!
//! Owns every piece of streaming state for one in-flight request: the
//! currently open block (thinking, text, or a tool's argument body),
//! accumulated buffers, sequence counters, and token/TTFT metrics. The
//! session is the single writer of canonical event sequencing: all
//! `ActivityEvent`s for a request are constructed here so the ordering
//! and accumulation invariants live in one place.
//!
//! Invariants enforced:
//! - at most one of thinking / text is open at any moment; opening one
//!   closes the other (thinking close is a synthetic `thinking_complete`);
//! - `content_delta.sequence_number` increments by exactly 1 per delta;
//! - timestamps are non-decreasing within the session;
//! - `activity_complete` is terminal — event constructors refuse to run
//!   after it.

use std::collections::HashMap;
use std::time::Instant;

use ah_domain::capability::{ModelCapabilities, ProviderFamily};
use ah_domain::error::{Error, Result};
use ah_domain::event::{
    ActivityEvent, StopReason, ThinkingMode, Timing, TodoItem, TokenTally,
};
use ah_domain::message::ToolCall;

/// Kind of an indexed content block (providers that emit block indices).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Thinking,
    Text,
    ToolUse,
}

/// One alternating fragment of a model turn, in emission order.
/// Persistence consumes these to reconstruct interleaved output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnFragment {
    Thinking(String),
    Text(String),
}

/// An in-flight tool call whose JSON arguments are still streaming.
#[derive(Debug)]
pub struct ActiveTool {
    pub name: String,
    pub accumulated_json: String,
    pub sequence: u64,
    pub started: Instant,
    pub tool_index: u32,
}

/// Cheap `ceil(len / 4)` token estimate for thinking content when the
/// provider reports no count.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ActivitySession
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ActivitySession {
    pub session_id: String,
    pub message_id: String,
    pub model: String,
    pub family: ProviderFamily,
    started: Instant,
    last_ts: u64,
    completed: bool,

    // ── Thinking state ─────────────────────────────────────────────
    current_thinking_id: Option<String>,
    accumulated_thinking: String,
    thinking_sequence: u64,
    thinking_started: Option<Instant>,
    /// Opaque provider continuity token (Anthropic signature_delta).
    pub thinking_signature: Option<String>,
    /// Two-state `<think>` tag parser flag for tag-based providers.
    pub inside_think_tag: bool,
    /// Carry-over for a tag split across stream chunks.
    pub think_tag_carry: String,
    had_thinking: bool,
    reasoning_trace: String,

    // ── Content state ──────────────────────────────────────────────
    accumulated_content: String,
    content_sequence: u64,
    text_open: bool,
    text_fragment_mark: usize,
    fragments: Vec<TurnFragment>,

    // ── Tool state ─────────────────────────────────────────────────
    active_tools: HashMap<String, ActiveTool>,
    /// Call ids in `tool_start` order; continuation messages are
    /// re-serialized into this order.
    tool_order: Vec<String>,
    next_tool_index: u32,
    tool_call_count: u32,

    // ── Indexed-block providers (Anthropic, Bedrock) ───────────────
    pub block_types: HashMap<u64, BlockKind>,
    pub block_tool_ids: HashMap<u64, String>,
    pub last_block_index: Option<u64>,

    // ── OpenAI response.* item mapping ─────────────────────────────
    pub item_call_ids: HashMap<String, String>,

    // ── Gemini open function-call tracking ─────────────────────────
    pub gemini_open_call: Option<String>,

    /// Stop reason reported by the provider, when the wire carries one.
    pub provider_stop: Option<StopReason>,

    // ── Metrics ────────────────────────────────────────────────────
    tokens: TokenTally,
    ttft_ms: Option<u64>,
}

impl ActivitySession {
    pub fn new(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        model: impl Into<String>,
        family: ProviderFamily,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
            model: model.into(),
            family,
            started: Instant::now(),
            last_ts: 0,
            completed: false,
            current_thinking_id: None,
            accumulated_thinking: String::new(),
            thinking_sequence: 0,
            thinking_started: None,
            thinking_signature: None,
            inside_think_tag: false,
            think_tag_carry: String::new(),
            had_thinking: false,
            reasoning_trace: String::new(),
            accumulated_content: String::new(),
            content_sequence: 0,
            text_open: false,
            text_fragment_mark: 0,
            fragments: Vec::new(),
            active_tools: HashMap::new(),
            tool_order: Vec::new(),
            next_tool_index: 0,
            tool_call_count: 0,
            block_types: HashMap::new(),
            block_tool_ids: HashMap::new(),
            last_block_index: None,
            item_call_ids: HashMap::new(),
            gemini_open_call: None,
            provider_stop: None,
            tokens: TokenTally::default(),
            ttft_ms: None,
        }
    }

    /// Reset per-stream normalizer scratch. Called whenever a provider
    /// stream (re)opens: block indices and item mappings are scoped to
    /// one stream, while tool order, buffers, and metrics span the
    /// whole session.
    pub fn begin_provider_stream(&mut self) {
        self.block_types.clear();
        self.block_tool_ids.clear();
        self.last_block_index = None;
        self.item_call_ids.clear();
        self.gemini_open_call = None;
        self.inside_think_tag = false;
        self.think_tag_carry.clear();
        self.provider_stop = None;
    }

    /// Non-decreasing epoch-millisecond timestamp for the next event.
    pub fn now_ts(&mut self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.last_ts = now.max(self.last_ts);
        self.last_ts
    }

    fn ensure_open(&self) -> Result<()> {
        if self.completed {
            return Err(Error::Other(format!(
                "session {} already completed",
                self.session_id
            )));
        }
        Ok(())
    }

    /// Record time-to-first-token at the first content or thinking delta.
    fn note_first_token(&mut self) {
        if self.ttft_ms.is_none() {
            self.ttft_ms = Some(self.started.elapsed().as_millis() as u64);
        }
    }

    fn timing(&self) -> Timing {
        let elapsed = self.started.elapsed().as_millis() as u64;
        let secs = (elapsed as f64 / 1000.0).max(1e-3);
        Timing {
            ttft: self.ttft_ms,
            elapsed,
            tps: self.tokens.output as f64 / secs,
        }
    }

    // ── Lifecycle events ───────────────────────────────────────────

    pub fn start_event(&mut self, capabilities: &ModelCapabilities) -> ActivityEvent {
        let ts = self.now_ts();
        ActivityEvent::ActivityStart {
            session_id: self.session_id.clone(),
            message_id: self.message_id.clone(),
            model: self.model.clone(),
            provider: self.family,
            capabilities: capabilities.clone(),
            ts,
        }
    }

    /// Close any open block and emit the terminal `activity_complete`.
    pub fn finalize(&mut self, stop_reason: StopReason) -> Vec<ActivityEvent> {
        let mut events = Vec::new();
        if let Some(evt) = self.close_thinking(None) {
            events.push(evt);
        }
        self.close_text();
        let ts = self.now_ts();
        self.completed = true;
        events.push(ActivityEvent::ActivityComplete {
            session_id: self.session_id.clone(),
            tokens: self.tokens,
            timing: self.timing(),
            had_thinking: self.had_thinking,
            tool_call_count: self.tool_call_count,
            stop_reason,
            ts,
        });
        events
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    // ── Thinking ───────────────────────────────────────────────────

    /// Open a thinking block. Closes an open text block first (the text
    /// close is in-memory only: persistence gets the fragment, the wire
    /// already saw the deltas).
    pub fn open_thinking(&mut self, mode: ThinkingMode) -> Result<ActivityEvent> {
        self.ensure_open()?;
        if self.current_thinking_id.is_some() {
            return Err(Error::Other("thinking block already open".into()));
        }
        self.close_text();

        let thinking_id = format!("think_{}", uuid::Uuid::new_v4());
        self.current_thinking_id = Some(thinking_id.clone());
        self.accumulated_thinking.clear();
        self.thinking_sequence = 0;
        self.thinking_started = Some(Instant::now());
        self.had_thinking = true;

        let ts = self.now_ts();
        Ok(ActivityEvent::ThinkingStart {
            session_id: self.session_id.clone(),
            thinking_id,
            mode,
            ts,
        })
    }

    pub fn thinking_open(&self) -> bool {
        self.current_thinking_id.is_some()
    }

    /// Append a reasoning delta to the open thinking block.
    pub fn append_thinking(&mut self, delta: &str) -> Result<ActivityEvent> {
        self.ensure_open()?;
        let thinking_id = self
            .current_thinking_id
            .clone()
            .ok_or_else(|| Error::Other("thinking delta without open block".into()))?;
        self.note_first_token();
        self.accumulated_thinking.push_str(delta);
        self.thinking_sequence += 1;
        let ts = self.now_ts();
        Ok(ActivityEvent::ThinkingDelta {
            session_id: self.session_id.clone(),
            thinking_id,
            delta: delta.to_string(),
            accumulated: self.accumulated_thinking.clone(),
            sequence_number: self.thinking_sequence,
            ts,
        })
    }

    /// Close the open thinking block, if any. `token_count` overrides the
    /// `ceil(len/4)` estimate when the provider reported a real count.
    pub fn close_thinking(&mut self, token_count: Option<u64>) -> Option<ActivityEvent> {
        let thinking_id = self.current_thinking_id.take()?;
        let content = std::mem::take(&mut self.accumulated_thinking);
        let duration_ms = self
            .thinking_started
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let tokens = token_count.unwrap_or_else(|| estimate_tokens(&content));

        if !content.is_empty() {
            if !self.reasoning_trace.is_empty() {
                self.reasoning_trace.push('\n');
            }
            self.reasoning_trace.push_str(&content);
            self.fragments.push(TurnFragment::Thinking(content.clone()));
        }

        let ts = self.now_ts();
        Some(ActivityEvent::ThinkingComplete {
            session_id: self.session_id.clone(),
            thinking_id,
            content,
            token_count: tokens,
            duration_ms,
            was_hidden: false,
            ts,
        })
    }

    /// Synthesize a hidden-reasoning record: the provider reported
    /// reasoning tokens but never streamed thinking content.
    pub fn hidden_thinking(&mut self, token_count: u64) -> ActivityEvent {
        self.had_thinking = true;
        self.tokens.reasoning += token_count;
        self.tokens.total = self.tokens.input + self.tokens.output + self.tokens.reasoning;
        let ts = self.now_ts();
        ActivityEvent::ThinkingComplete {
            session_id: self.session_id.clone(),
            thinking_id: format!("think_{}", uuid::Uuid::new_v4()),
            content: String::new(),
            token_count,
            duration_ms: 0,
            was_hidden: true,
            ts,
        }
    }

    // ── Content ────────────────────────────────────────────────────

    /// Append an assistant text delta. An open thinking block is closed
    /// first with a synthetic `thinking_complete` carrying its buffer.
    pub fn append_content(&mut self, delta: &str) -> Result<Vec<ActivityEvent>> {
        self.ensure_open()?;
        let mut events = Vec::new();
        if let Some(evt) = self.close_thinking(None) {
            events.push(evt);
        }
        self.note_first_token();
        self.text_open = true;
        self.accumulated_content.push_str(delta);
        self.content_sequence += 1;
        let ts = self.now_ts();
        events.push(ActivityEvent::ContentDelta {
            session_id: self.session_id.clone(),
            delta: delta.to_string(),
            accumulated: self.accumulated_content.clone(),
            sequence_number: self.content_sequence,
            ts,
        });
        Ok(events)
    }

    /// Finalize the open text block in memory (no canonical event).
    /// The fragment holds only the text accumulated since the last close.
    fn close_text(&mut self) {
        if self.text_open {
            self.text_open = false;
            let since = &self.accumulated_content[self.text_fragment_mark..];
            if !since.is_empty() {
                self.fragments.push(TurnFragment::Text(since.to_string()));
            }
            self.text_fragment_mark = self.accumulated_content.len();
        }
    }

    pub fn accumulated_content(&self) -> &str {
        &self.accumulated_content
    }

    // ── Tools ──────────────────────────────────────────────────────

    /// Open a tool-argument block. Closes an open thinking block first.
    pub fn open_tool(
        &mut self,
        call_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Vec<ActivityEvent>> {
        self.ensure_open()?;
        let call_id = call_id.into();
        let name = name.into();
        let mut events = Vec::new();
        if let Some(evt) = self.close_thinking(None) {
            events.push(evt);
        }
        self.close_text();

        let tool_index = self.next_tool_index;
        self.next_tool_index += 1;
        self.tool_call_count += 1;
        self.active_tools.insert(
            call_id.clone(),
            ActiveTool {
                name: name.clone(),
                accumulated_json: String::new(),
                sequence: 0,
                started: Instant::now(),
                tool_index,
            },
        );
        self.tool_order.push(call_id.clone());

        let ts = self.now_ts();
        events.push(ActivityEvent::ToolStart {
            session_id: self.session_id.clone(),
            tool_call_id: call_id,
            tool_name: name,
            tool_index,
            ts,
        });
        Ok(events)
    }

    /// Append a streamed JSON fragment to a tool's argument buffer.
    /// `is_valid_json` is re-evaluated on the accumulated buffer.
    pub fn append_tool_json(&mut self, call_id: &str, fragment: &str) -> Result<ActivityEvent> {
        self.ensure_open()?;
        let session_id = self.session_id.clone();
        let tool = self
            .active_tools
            .get_mut(call_id)
            .ok_or_else(|| Error::Other(format!("tool delta for unknown call {call_id}")))?;
        tool.accumulated_json.push_str(fragment);
        tool.sequence += 1;
        let accumulated = tool.accumulated_json.clone();
        let sequence_number = tool.sequence;
        let is_valid_json =
            serde_json::from_str::<serde_json::Value>(&accumulated).is_ok();
        let ts = self.now_ts();
        Ok(ActivityEvent::ToolDelta {
            session_id,
            tool_call_id: call_id.to_string(),
            delta: fragment.to_string(),
            accumulated,
            sequence_number,
            is_valid_json,
            ts,
        })
    }

    /// Complete a tool's argument assembly. On parse failure the call
    /// completes with empty arguments (the failure is the model's, not
    /// ours) and the raw text is preserved.
    pub fn complete_tool(&mut self, call_id: &str) -> Result<(ActivityEvent, ToolCall)> {
        self.ensure_open()?;
        let tool = self
            .active_tools
            .remove(call_id)
            .ok_or_else(|| Error::Other(format!("tool complete for unknown call {call_id}")))?;

        let arguments = if tool.accumulated_json.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_str(&tool.accumulated_json) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(
                        call_id = call_id,
                        tool = %tool.name,
                        error = %e,
                        "tool arguments are not valid JSON; completing with empty object"
                    );
                    serde_json::Value::Object(Default::default())
                }
            }
        };

        let ts = self.now_ts();
        let event = ActivityEvent::ToolComplete {
            session_id: self.session_id.clone(),
            tool_call_id: call_id.to_string(),
            tool_name: tool.name.clone(),
            arguments: arguments.clone(),
            arguments_raw: tool.accumulated_json.clone(),
            duration_ms: tool.started.elapsed().as_millis() as u64,
            ts,
        };
        let call = ToolCall {
            call_id: call_id.to_string(),
            tool_name: tool.name,
            arguments,
        };
        Ok((event, call))
    }

    /// Set a streamed tool's complete arguments in one step (providers
    /// that deliver whole argument objects, e.g. Gemini `args`).
    pub fn set_tool_arguments(&mut self, call_id: &str, args: &serde_json::Value) -> Result<()> {
        let tool = self
            .active_tools
            .get_mut(call_id)
            .ok_or_else(|| Error::Other(format!("arguments for unknown call {call_id}")))?;
        tool.accumulated_json = args.to_string();
        Ok(())
    }

    pub fn tool_result_event(
        &mut self,
        call_id: &str,
        result: serde_json::Value,
        success: bool,
        error: Option<String>,
        execution_ms: u64,
    ) -> ActivityEvent {
        let ts = self.now_ts();
        ActivityEvent::ToolResult {
            session_id: self.session_id.clone(),
            tool_call_id: call_id.to_string(),
            result,
            success,
            error,
            execution_ms,
            ts,
        }
    }

    pub fn tool_progress_event(&mut self, call_id: &str, output: String) -> ActivityEvent {
        let ts = self.now_ts();
        ActivityEvent::ToolProgress {
            session_id: self.session_id.clone(),
            tool_call_id: call_id.to_string(),
            output,
            ts,
        }
    }

    pub fn todo_update_event(&mut self, todos: Vec<TodoItem>) -> ActivityEvent {
        let ts = self.now_ts();
        ActivityEvent::TodoUpdate {
            session_id: self.session_id.clone(),
            todos,
            ts,
        }
    }

    pub fn error_event(&mut self, code: &str, message: impl Into<String>) -> ActivityEvent {
        let ts = self.now_ts();
        ActivityEvent::Error {
            session_id: self.session_id.clone(),
            code: code.to_string(),
            message: message.into(),
            ts,
        }
    }

    /// `tool_start` order, used to re-serialize continuation messages.
    pub fn tool_order(&self) -> &[String] {
        &self.tool_order
    }

    pub fn has_open_tools(&self) -> bool {
        !self.active_tools.is_empty()
    }

    /// Call ids still assembling arguments, in `tool_start` order.
    pub fn open_tool_ids(&self) -> Vec<String> {
        self.tool_order
            .iter()
            .filter(|id| self.active_tools.contains_key(*id))
            .cloned()
            .collect()
    }

    // ── Metrics ────────────────────────────────────────────────────

    /// Fold provider-reported usage into the tally and emit a
    /// `metrics_update`.
    pub fn record_usage(&mut self, usage: TokenTally) -> ActivityEvent {
        self.tokens.input += usage.input;
        self.tokens.output += usage.output;
        self.tokens.reasoning += usage.reasoning;
        self.tokens.total = self.tokens.input + self.tokens.output + self.tokens.reasoning;
        let ts = self.now_ts();
        ActivityEvent::MetricsUpdate {
            session_id: self.session_id.clone(),
            tokens: self.tokens,
            timing: self.timing(),
            ts,
        }
    }

    pub fn tokens(&self) -> TokenTally {
        self.tokens
    }

    pub fn had_thinking(&self) -> bool {
        self.had_thinking
    }

    /// The concatenated visible thinking content for persistence.
    /// `None` when the only reasoning this turn was hidden.
    pub fn reasoning_trace(&self) -> Option<&str> {
        if self.reasoning_trace.is_empty() {
            None
        } else {
            Some(self.reasoning_trace.as_str())
        }
    }

    /// Alternating thinking/text fragments in emission order.
    pub fn fragments(&self) -> &[TurnFragment] {
        &self.fragments
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
