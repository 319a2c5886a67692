//! The turn loop.
//!
//! States (the orchestrator's, not the provider's):
//!
//! ```text
//! S0 PREPARE       resolve prompt, assemble request, open provider stream
//! S1 STREAMING     feed raw events to the normalizer, emit to fanout
//! S2 TOOLS_PENDING run all of the turn's tool calls in parallel
//! S3 CONTINUATION  append role=tool messages, reopen the provider stream
//! S4 FINALIZE      emit activity_complete, persist, tear down
//! ```
//!
//! Tool results are emitted in completion order but re-serialized into
//! `tool_start` order for the continuation messages. Thinking and text
//! interleaving is preserved block by block — nothing is coalesced.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use ah_activity::{ActivitySession, CancelToken, EventFanout};
use ah_domain::capability::ModelCapabilities;
use ah_domain::error::{Error, Result};
use ah_domain::event::{ActivityEvent, StopReason};
use ah_domain::message::{
    ChatMessage, ContentPart, Message, MessageContent, Role, ToolCall, ToolResultRecord,
};
use ah_providers::{normalizer, sse, ProviderRequest};
use ah_tools::{Invocation, ToolContext, ToolInvoker, ToolOutcome};

use crate::handoff::HandoffState;
use crate::services::Services;

/// Hard ceiling on provider round-trips within one request.
const MAX_TURNS: usize = 25;

/// An inbound chat request.
#[derive(Debug, Clone)]
pub struct ActivityRequest {
    pub session_id: String,
    /// Client-supplied message id.
    pub message_id: String,
    pub user_id: String,
    pub message: String,
    pub model: String,
    /// Transport-level provider instance; defaults to the family name.
    pub provider_id: Option<String>,
    pub enabled_tools: Option<Vec<String>>,
    pub groups: Option<Vec<String>>,
}

/// Mutable state threaded through the turn loop. Handoffs swap the
/// model (and with it the capability record and wire family).
struct TurnState {
    model: String,
    provider_id: String,
    caps: ModelCapabilities,
    enabled_tools: Option<Vec<String>>,
    messages: Vec<Message>,
    handoff: HandoffState,
    /// Tool-call signature -> consecutive failure count.
    failures: HashMap<String, u32>,
    /// One graceful continuation per request on a mid-stream error.
    stream_retry_used: bool,
    cost_usd: f64,
}

pub struct ConversationOrchestrator {
    services: Arc<Services>,
}

impl ConversationOrchestrator {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Spawn the request as its own task. The caller must have attached
    /// its fanout subscriptions before calling.
    pub fn spawn(
        self: Arc<Self>,
        request: ActivityRequest,
        fanout: Arc<EventFanout>,
        cancel: CancelToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(request, fanout, cancel).await;
        })
    }

    /// Drive one request to completion. All failures are reported on the
    /// event stream; this function itself never errors.
    pub async fn run(
        &self,
        request: ActivityRequest,
        fanout: Arc<EventFanout>,
        cancel: CancelToken,
    ) {
        let caps = self.services.capabilities.lookup(&request.model);
        let mut session = ActivitySession::new(
            &request.session_id,
            &request.message_id,
            &request.model,
            caps.family,
        );

        let start = session.start_event(&caps);
        self.emit(&fanout, &cancel, start).await;

        let deadline = Duration::from_millis(self.services.options.request_timeout_ms);
        let outcome = tokio::time::timeout(
            deadline,
            self.run_inner(&request, caps, &mut session, &fanout, &cancel),
        )
        .await
        .unwrap_or(Err(Error::Timeout("request deadline".into())));

        match outcome {
            Ok(stop_reason) => {
                self.finalize(&request, &mut session, &fanout, &cancel, stop_reason, false)
                    .await;
            }
            Err(e) => {
                let cancelled = matches!(e, Error::Cancelled);
                if !cancelled {
                    tracing::warn!(
                        session_id = %request.session_id,
                        error = %e,
                        "turn failed"
                    );
                    let evt = session.error_event(e.code(), e.to_string());
                    self.emit(&fanout, &cancel, evt).await;
                }
                self.finalize(
                    &request,
                    &mut session,
                    &fanout,
                    &cancel,
                    StopReason::Error,
                    cancelled,
                )
                .await;
            }
        }

        // The terminal activity_complete is out; end every subscription.
        fanout.close();
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // S0 PREPARE + the loop
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn run_inner(
        &self,
        request: &ActivityRequest,
        caps: ModelCapabilities,
        session: &mut ActivitySession,
        fanout: &EventFanout,
        cancel: &CancelToken,
    ) -> Result<StopReason> {
        let services = &self.services;

        // Resolve the system prompt (admin gate -> semantic -> ...).
        let prompt = services
            .router
            .resolve(
                &request.user_id,
                Some(&request.message),
                request.groups.as_deref(),
            )
            .await?;
        tracing::debug!(
            session_id = %request.session_id,
            source = ?prompt.source,
            "prompt resolved"
        );

        // Conversation so far, then the new user message.
        let mut messages = vec![Message::system(&prompt.content)];
        for prior in services.store.load(&request.session_id).await? {
            match prior.role {
                Role::User => messages.push(Message::user(&prior.content)),
                Role::Assistant => messages.push(Message::assistant(&prior.content)),
                _ => {}
            }
        }
        messages.push(Message::user(&request.message));

        services
            .store
            .append(&ChatMessage::new(
                &request.session_id,
                Role::User,
                &request.message,
            ))
            .await?;

        let mut state = TurnState {
            provider_id: request
                .provider_id
                .clone()
                .unwrap_or_else(|| caps.family.as_str().to_string()),
            model: request.model.clone(),
            caps,
            enabled_tools: request.enabled_tools.clone(),
            messages,
            handoff: HandoffState::new(services.options.max_handoff_depth),
            failures: HashMap::new(),
            stream_retry_used: false,
            cost_usd: 0.0,
        };

        let invoker = ToolInvoker::new(
            services.tools.clone(),
            Duration::from_millis(services.options.tool_timeout_ms),
        );

        for turn_idx in 0..MAX_TURNS {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            tracing::debug!(session_id = %request.session_id, turn_idx, "turn iteration");

            // ── S1 STREAMING ───────────────────────────────────────
            let content_mark = session.accumulated_content().len();
            let tools_mark = session.tool_order().len();
            let tokens_before = session.tokens();

            let calls = match self
                .stream_turn(&state, session, fanout, cancel)
                .await
            {
                Ok(calls) => calls,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e @ Error::Provider { .. }) if !state.stream_retry_used => {
                    // One graceful continuation: carry the partial text
                    // and the opaque thinking signature forward.
                    tracing::warn!(
                        session_id = %request.session_id,
                        error = %e,
                        "provider stream error, attempting graceful continuation"
                    );
                    state.stream_retry_used = true;
                    push_partial_assistant(&mut state.messages, session, content_mark);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let tokens_after = session.tokens();
            state.cost_usd += state.caps.cost_usd(
                tokens_after.input.saturating_sub(tokens_before.input),
                tokens_after.output.saturating_sub(tokens_before.output),
            );

            // Provider finished with no tool calls: the request is done.
            if calls.is_empty() {
                tracing::debug!(
                    session_id = %request.session_id,
                    cost_usd = state.cost_usd,
                    "request complete"
                );
                return Ok(session.provider_stop.take().unwrap_or(StopReason::EndTurn));
            }

            // ── S2 TOOLS_PENDING ───────────────────────────────────
            let (outcomes, handoffs) = self
                .dispatch_tools(&invoker, session, fanout, cancel, &calls)
                .await?;

            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            // Second consecutive failure of the same call signature is
            // fatal to the turn.
            for call in &calls {
                let outcome = &outcomes[&call.call_id];
                let signature = format!("{}:{}", call.tool_name, call.arguments);
                if outcome.success {
                    state.failures.remove(&signature);
                } else {
                    let count = state.failures.entry(signature.clone()).or_insert(0);
                    *count += 1;
                    if *count >= 2 {
                        return Err(Error::Other(format!(
                            "tool {} failed twice with the same arguments",
                            call.tool_name
                        )));
                    }
                }
            }

            // ── S3 CONTINUATION ────────────────────────────────────
            self.append_continuation(
                request,
                &mut state,
                session,
                content_mark,
                tools_mark,
                &calls,
                &outcomes,
            )
            .await?;

            // A mapped handoff switches the model for the next turn and
            // opens a fresh activity segment.
            if let Some(role) = handoffs.first() {
                state.handoff.enter(role)?;
                let target = self
                    .services
                    .options
                    .handoff_models
                    .get(role)
                    .cloned()
                    .expect("dispatch only records mapped handoff roles");
                tracing::info!(
                    session_id = %request.session_id,
                    role = %role,
                    model = %target,
                    "handing off to role model"
                );
                self.switch_segment(request, &mut state, session, fanout, cancel, target)
                    .await;
            }
        }

        Err(Error::Other(format!(
            "turn loop limit reached ({MAX_TURNS} iterations)"
        )))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // S1 STREAMING
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Open the provider stream and pump it through the normalizer until
    /// it closes. Returns the turn's completed tool calls.
    async fn stream_turn(
        &self,
        state: &TurnState,
        session: &mut ActivitySession,
        fanout: &EventFanout,
        cancel: &CancelToken,
    ) -> Result<Vec<ToolCall>> {
        let thinking_budget = if state.caps.thinking.wants_budget() {
            let budget = self
                .services
                .options
                .thinking_budget(state.caps.family, state.caps.thinking.default_budget_tokens);
            Some(budget.min(state.caps.thinking.max_budget_tokens))
        } else {
            None
        };

        // A model without tool support gets no definitions at all.
        let tools = if state.caps.supports_tools {
            self.services
                .tools
                .definitions(state.enabled_tools.as_deref())
        } else {
            Vec::new()
        };

        let provider_req = ProviderRequest {
            provider_id: state.provider_id.clone(),
            model: state.model.clone(),
            messages: state.messages.clone(),
            tools,
            max_output_tokens: Some(state.caps.max_output_tokens),
            thinking_budget,
        };

        let stream = self.services.transport.open_stream(&provider_req).await?;
        let family = stream.family;
        session.begin_provider_stream();
        let mut payloads = sse::data_payload_stream(stream);

        let mut calls: Vec<ToolCall> = Vec::new();

        loop {
            let next = tokio::select! {
                next = payloads.next() => next,
                _ = cancel.cancelled() => {
                    // Grace period for the provider to wind down before
                    // the stream is force-dropped.
                    let grace = Duration::from_millis(self.services.options.abort_grace_ms);
                    let _ = tokio::time::timeout(grace, async {
                        while payloads.next().await.is_some() {}
                    })
                    .await;
                    return Err(Error::Cancelled);
                }
            };

            let data = match next {
                Some(Ok(data)) => data,
                Some(Err(e)) => return Err(e),
                None => break,
            };

            let raw: serde_json::Value = match serde_json::from_str(&data) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unparseable provider payload");
                    continue;
                }
            };

            for event in normalizer::handle(family, &raw, session)? {
                if let ActivityEvent::ToolComplete {
                    tool_call_id,
                    tool_name,
                    arguments,
                    ..
                } = &event
                {
                    calls.push(ToolCall {
                        call_id: tool_call_id.clone(),
                        tool_name: tool_name.clone(),
                        arguments: arguments.clone(),
                    });
                }
                self.emit_ref(fanout, cancel, &event).await;
            }
        }

        // Providers that never send an explicit completion for a tool
        // (stream cut short) still owe the pairing invariant.
        for call_id in session.open_tool_ids() {
            let (event, call) = session.complete_tool(&call_id)?;
            self.emit_ref(fanout, cancel, &event).await;
            calls.push(call);
        }

        Ok(calls)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // S2 TOOLS_PENDING
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Execute all of the turn's tool calls concurrently. `tool_result`
    /// events are emitted in completion order; a slow tool never blocks
    /// a fast tool's result from reaching the client.
    async fn dispatch_tools(
        &self,
        invoker: &ToolInvoker,
        session: &mut ActivitySession,
        fanout: &EventFanout,
        cancel: &CancelToken,
        calls: &[ToolCall],
    ) -> Result<(HashMap<String, ToolOutcome>, Vec<String>)> {
        let (progress_tx, mut progress_rx) = mpsc::channel::<(String, String)>(64);

        let mut pending = FuturesUnordered::new();
        for call in calls {
            let call = call.clone();
            let flags = self.services.tools.flags(&call.tool_name).unwrap_or_default();
            let mut ctx = ToolContext::new(&session.session_id, cancel.clone());

            if flags.streams_output {
                // Tag this call's incremental output with its id.
                let (tx, mut rx) = mpsc::channel::<String>(16);
                ctx.progress = Some(tx);
                let shared = progress_tx.clone();
                let call_id = call.call_id.clone();
                tokio::spawn(async move {
                    while let Some(line) = rx.recv().await {
                        if shared.send((call_id.clone(), line)).await.is_err() {
                            break;
                        }
                    }
                });
            }

            pending.push(async move {
                let invocation = invoker.invoke(&call, &ctx).await;
                (call, invocation)
            });
        }
        drop(progress_tx);

        let mut outcomes: HashMap<String, ToolOutcome> = HashMap::new();
        let mut handoffs: Vec<String> = Vec::new();
        let mut progress_open = true;

        loop {
            tokio::select! {
                finished = pending.next(), if !pending.is_empty() => {
                    let Some((call, invocation)) = finished else { continue };
                    let outcome = match invocation {
                        Invocation::Handled(outcome) => outcome,
                        Invocation::Handoff { role } => {
                            if self.services.options.handoff_models.contains_key(&role) {
                                handoffs.push(role.clone());
                                ToolOutcome {
                                    result: serde_json::json!({ "handoff": role }),
                                    success: true,
                                    error: None,
                                    execution_ms: 0,
                                    todos: None,
                                }
                            } else {
                                ToolOutcome {
                                    result: serde_json::Value::Null,
                                    success: false,
                                    error: Some(format!("no model mapped for role {role}")),
                                    execution_ms: 0,
                                    todos: None,
                                }
                            }
                        }
                    };

                    if let Some(todos) = outcome.todos.clone() {
                        let evt = session.todo_update_event(todos);
                        self.emit_ref(fanout, cancel, &evt).await;
                    }
                    let evt = session.tool_result_event(
                        &call.call_id,
                        outcome.result.clone(),
                        outcome.success,
                        outcome.error.clone(),
                        outcome.execution_ms,
                    );
                    self.emit_ref(fanout, cancel, &evt).await;
                    outcomes.insert(call.call_id.clone(), outcome);
                }
                progress = progress_rx.recv(), if progress_open => {
                    match progress {
                        Some((call_id, line)) => {
                            let evt = session.tool_progress_event(&call_id, line);
                            self.emit_ref(fanout, cancel, &evt).await;
                        }
                        None => progress_open = false,
                    }
                }
                else => break,
            }
            if pending.is_empty() && outcomes.len() == calls.len() {
                // Drain any progress lines that raced the last result.
                while let Ok((call_id, line)) = progress_rx.try_recv() {
                    let evt = session.tool_progress_event(&call_id, line);
                    self.emit_ref(fanout, cancel, &evt).await;
                }
                break;
            }
        }

        Ok((outcomes, handoffs))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // S3 CONTINUATION
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Append the assistant tool-use message and one role=tool message
    /// per call, in `tool_start` order regardless of completion order.
    #[allow(clippy::too_many_arguments)]
    async fn append_continuation(
        &self,
        request: &ActivityRequest,
        state: &mut TurnState,
        session: &ActivitySession,
        content_mark: usize,
        tools_mark: usize,
        calls: &[ToolCall],
        outcomes: &HashMap<String, ToolOutcome>,
    ) -> Result<()> {
        let turn_text = &session.accumulated_content()[content_mark..];
        let by_id: HashMap<&str, &ToolCall> =
            calls.iter().map(|c| (c.call_id.as_str(), c)).collect();

        let mut parts: Vec<ContentPart> = Vec::new();
        if !turn_text.is_empty() {
            parts.push(ContentPart::Text {
                text: turn_text.to_string(),
            });
        }

        let ordered: Vec<&str> = session.tool_order()[tools_mark..]
            .iter()
            .map(String::as_str)
            .collect();
        for call_id in &ordered {
            if let Some(call) = by_id.get(call_id) {
                parts.push(ContentPart::ToolUse {
                    id: call.call_id.clone(),
                    name: call.tool_name.clone(),
                    input: call.arguments.clone(),
                });
            }
        }
        state.messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
        });

        let mut tool_records = Vec::new();
        for call_id in &ordered {
            let Some(outcome) = outcomes.get(*call_id) else {
                continue;
            };
            let content = match &outcome.error {
                Some(error) => error.clone(),
                None => outcome.result.to_string(),
            };
            let message = if outcome.success {
                Message::tool_result(*call_id, &content)
            } else {
                Message::tool_error(*call_id, &content)
            };
            state.messages.push(message);
            tool_records.push(ToolResultRecord {
                call_id: (*call_id).to_string(),
                content: outcome.result.clone(),
                success: outcome.success,
                error: outcome.error.clone(),
                execution_ms: outcome.execution_ms,
            });
        }

        // Persist the tool round-trip as one assistant record.
        let mut record = ChatMessage::new(&request.session_id, Role::Assistant, turn_text);
        record.model = Some(state.model.clone());
        record.tool_calls = Some(calls.to_vec());
        record.tool_results = Some(tool_records);
        self.services.store.append(&record).await?;

        Ok(())
    }

    /// Close the current activity segment and open a new one on the
    /// handoff target model.
    async fn switch_segment(
        &self,
        request: &ActivityRequest,
        state: &mut TurnState,
        session: &mut ActivitySession,
        fanout: &EventFanout,
        cancel: &CancelToken,
        target_model: String,
    ) {
        for event in session.finalize(StopReason::ToolUse) {
            self.emit_ref(fanout, cancel, &event).await;
        }

        let caps = self.services.capabilities.lookup(&target_model);
        let mut fresh = ActivitySession::new(
            &request.session_id,
            &request.message_id,
            &target_model,
            caps.family,
        );
        let start = fresh.start_event(&caps);
        self.emit_ref(fanout, cancel, &start).await;

        state.provider_id = caps.family.as_str().to_string();
        state.model = target_model;
        state.caps = caps;
        *session = fresh;
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // S4 FINALIZE
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn finalize(
        &self,
        request: &ActivityRequest,
        session: &mut ActivitySession,
        fanout: &EventFanout,
        cancel: &CancelToken,
        stop_reason: StopReason,
        interrupted: bool,
    ) {
        let events = session.finalize(stop_reason);
        for event in events {
            self.emit_ref(fanout, cancel, &event).await;
        }

        let mut content = session.accumulated_content().to_string();
        if interrupted {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str("[Interrupted]");
        }

        let mut record = ChatMessage::new(&request.session_id, Role::Assistant, content);
        record.model = Some(session.model.clone());
        record.token_usage = Some(session.tokens());
        record.reasoning_trace = session.reasoning_trace().map(str::to_string);
        if let Err(e) = self.services.store.append(&record).await {
            tracing::warn!(
                session_id = %request.session_id,
                error = %e,
                "failed to persist final assistant message"
            );
        }
    }

    // ── Emission ───────────────────────────────────────────────────

    /// Publish one event. A closed lossless (SSE) subscriber is the
    /// client-disconnect signal: it cancels the request but publishing
    /// continues so persistence still sees the final state.
    async fn emit(&self, fanout: &EventFanout, cancel: &CancelToken, event: ActivityEvent) {
        self.emit_ref(fanout, cancel, &event).await;
    }

    async fn emit_ref(&self, fanout: &EventFanout, cancel: &CancelToken, event: &ActivityEvent) {
        if !fanout.publish(event).await && !cancel.is_cancelled() {
            tracing::info!(
                session_id = event.session_id(),
                "SSE subscriber gone, cancelling request"
            );
            cancel.cancel();
        }
    }
}

/// Carry a partial assistant turn (text + thinking signature) into the
/// continuation request after a mid-stream provider error.
fn push_partial_assistant(
    messages: &mut Vec<Message>,
    session: &mut ActivitySession,
    content_mark: usize,
) {
    let partial = session.accumulated_content()[content_mark..].to_string();
    let signature = session.thinking_signature.take();
    let mut parts = Vec::new();
    if let Some(signature) = signature {
        parts.push(ContentPart::Thinking {
            text: String::new(),
            signature: Some(signature),
        });
    }
    if !partial.is_empty() {
        parts.push(ContentPart::Text { text: partial });
    }
    if !parts.is_empty() {
        messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
        });
    }
}
