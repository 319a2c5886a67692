//! Anthropic Messages stream normalization.
//!
//! The wire is `content_block_start` / `content_block_delta` /
//! `content_block_stop` plus `message_delta` for usage and stop reason.
//! Every block carries an index; indices must grow strictly — a
//! regression is a provider error, never silently reordered.

use ah_activity::{ActivitySession, BlockKind};
use ah_domain::error::{Error, Result};
use ah_domain::event::{ActivityEvent, StopReason, ThinkingMode};
use serde_json::Value;

use super::{count, tally};

pub(super) fn handle(raw: &Value, session: &mut ActivitySession) -> Result<Vec<ActivityEvent>> {
    let event_type = raw.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        "message_start" => {
            // Input tokens arrive up front; output arrives in message_delta.
            let usage = raw.get("message").and_then(|m| m.get("usage"));
            if let Some(u) = usage {
                let input = count(u, "input_tokens");
                if input > 0 {
                    return Ok(vec![session.record_usage(tally(input, 0, 0))]);
                }
            }
            Ok(Vec::new())
        }

        "content_block_start" => {
            let idx = block_index(raw)?;
            if let Some(last) = session.last_block_index {
                if idx <= last {
                    return Err(Error::Provider {
                        provider: "anthropic".into(),
                        message: format!("non-monotonic block index {idx} after {last}"),
                    });
                }
            }
            session.last_block_index = Some(idx);

            let block = raw.get("content_block").unwrap_or(&Value::Null);
            let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
            match block_type {
                "thinking" => {
                    session.block_types.insert(idx, BlockKind::Thinking);
                    Ok(vec![session.open_thinking(ThinkingMode::Extended)?])
                }
                "tool_use" => {
                    let call_id = block
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    let name = block
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    session.block_types.insert(idx, BlockKind::ToolUse);
                    session.block_tool_ids.insert(idx, call_id.clone());
                    session.open_tool(call_id, name)
                }
                _ => {
                    // "text" (and anything unrecognized): deltas drive it.
                    session.block_types.insert(idx, BlockKind::Text);
                    Ok(Vec::new())
                }
            }
        }

        "content_block_delta" => {
            let idx = block_index(raw)?;
            let delta = raw.get("delta").unwrap_or(&Value::Null);
            let delta_type = delta.get("type").and_then(|v| v.as_str()).unwrap_or("");
            match delta_type {
                "thinking_delta" => {
                    let text = delta.get("thinking").and_then(|v| v.as_str()).unwrap_or("");
                    let mut events = Vec::new();
                    if !session.thinking_open() {
                        events.push(session.open_thinking(ThinkingMode::Extended)?);
                    }
                    events.push(session.append_thinking(text)?);
                    Ok(events)
                }
                "text_delta" => {
                    let text = delta.get("text").and_then(|v| v.as_str()).unwrap_or("");
                    if text.is_empty() {
                        return Ok(Vec::new());
                    }
                    session.append_content(text)
                }
                "input_json_delta" => {
                    let partial = delta
                        .get("partial_json")
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    let call_id = session
                        .block_tool_ids
                        .get(&idx)
                        .cloned()
                        .ok_or_else(|| Error::Provider {
                            provider: "anthropic".into(),
                            message: format!("input_json_delta for unknown block {idx}"),
                        })?;
                    if partial.is_empty() {
                        return Ok(Vec::new());
                    }
                    Ok(vec![session.append_tool_json(&call_id, partial)?])
                }
                "signature_delta" => {
                    // Opaque continuity token; captured, never surfaced.
                    if let Some(sig) = delta.get("signature").and_then(|v| v.as_str()) {
                        session.thinking_signature = Some(sig.to_string());
                    }
                    Ok(Vec::new())
                }
                _ => Ok(Vec::new()),
            }
        }

        "content_block_stop" => {
            let idx = block_index(raw)?;
            match session.block_types.get(&idx).copied() {
                Some(BlockKind::Thinking) => {
                    Ok(session.close_thinking(None).into_iter().collect())
                }
                Some(BlockKind::ToolUse) => {
                    let call_id = session
                        .block_tool_ids
                        .get(&idx)
                        .cloned()
                        .ok_or_else(|| Error::Provider {
                            provider: "anthropic".into(),
                            message: format!("content_block_stop for unknown tool block {idx}"),
                        })?;
                    let (event, _call) = session.complete_tool(&call_id)?;
                    Ok(vec![event])
                }
                // Text blocks finalize in memory on the next transition.
                _ => Ok(Vec::new()),
            }
        }

        "message_delta" => {
            let mut events = Vec::new();
            if let Some(u) = raw.get("usage") {
                let output = count(u, "output_tokens");
                let input = count(u, "input_tokens");
                if output > 0 || input > 0 {
                    events.push(session.record_usage(tally(input, output, 0)));
                }
            }
            if let Some(stop) = raw
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|v| v.as_str())
            {
                session.provider_stop = Some(match stop {
                    "tool_use" => StopReason::ToolUse,
                    "max_tokens" => StopReason::MaxTokens,
                    _ => StopReason::EndTurn,
                });
            }
            Ok(events)
        }

        "error" => {
            let message = raw
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            Err(Error::Provider {
                provider: "anthropic".into(),
                message: message.to_string(),
            })
        }

        // ping, message_stop, unknown: nothing to surface.
        _ => Ok(Vec::new()),
    }
}

fn block_index(raw: &Value) -> Result<u64> {
    raw.get("index")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| Error::Provider {
            provider: "anthropic".into(),
            message: "content block event without index".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ah_domain::capability::ProviderFamily;
    use serde_json::json;

    fn session() -> ActivitySession {
        ActivitySession::new("s1", "m1", "claude-sonnet-4", ProviderFamily::Anthropic)
    }

    fn feed(session: &mut ActivitySession, raw: Value) -> Vec<ActivityEvent> {
        handle(&raw, session).unwrap()
    }

    /// Interleaved thinking and text, with usage: the end-to-end
    /// Anthropic shape.
    #[test]
    fn interleaved_thinking_then_text() {
        let mut s = session();
        let mut events = Vec::new();

        events.extend(feed(
            &mut s,
            json!({"type":"content_block_start","index":0,"content_block":{"type":"thinking"}}),
        ));
        events.extend(feed(
            &mut s,
            json!({"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"Let me"}}),
        ));
        events.extend(feed(
            &mut s,
            json!({"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":" think"}}),
        ));
        events.extend(feed(&mut s, json!({"type":"content_block_stop","index":0})));
        events.extend(feed(
            &mut s,
            json!({"type":"content_block_start","index":1,"content_block":{"type":"text"}}),
        ));
        events.extend(feed(
            &mut s,
            json!({"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"Hi"}}),
        ));
        events.extend(feed(&mut s, json!({"type":"content_block_stop","index":1})));
        events.extend(feed(
            &mut s,
            json!({"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"input_tokens":10,"output_tokens":5}}),
        ));

        let names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(
            names,
            [
                "thinking_start",
                "thinking_delta",
                "thinking_delta",
                "thinking_complete",
                "content_delta",
                "metrics_update",
            ]
        );

        match &events[3] {
            ActivityEvent::ThinkingComplete { content, .. } => {
                assert_eq!(content, "Let me think")
            }
            other => panic!("unexpected {other:?}"),
        }
        match &events[4] {
            ActivityEvent::ContentDelta {
                delta,
                sequence_number,
                ..
            } => {
                assert_eq!(delta, "Hi");
                assert_eq!(*sequence_number, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &events[5] {
            ActivityEvent::MetricsUpdate { tokens, .. } => {
                assert_eq!(tokens.input, 10);
                assert_eq!(tokens.output, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.provider_stop, Some(StopReason::EndTurn));
        assert!(s.had_thinking());
    }

    #[test]
    fn tool_block_streams_arguments() {
        let mut s = session();
        feed(
            &mut s,
            json!({"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"search"}}),
        );
        let fragments = ["{\"q\"", ":\"ru", "st\"}"];
        let mut validity = Vec::new();
        for f in fragments {
            let events = feed(
                &mut s,
                json!({"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":f}}),
            );
            match &events[0] {
                ActivityEvent::ToolDelta { is_valid_json, .. } => validity.push(*is_valid_json),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(validity, [false, false, true]);

        let events = feed(&mut s, json!({"type":"content_block_stop","index":0}));
        match &events[0] {
            ActivityEvent::ToolComplete {
                arguments,
                arguments_raw,
                tool_name,
                ..
            } => {
                assert_eq!(arguments["q"], "rust");
                assert_eq!(arguments_raw, "{\"q\":\"rust\"}");
                assert_eq!(tool_name, "search");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn signature_delta_is_captured_silently() {
        let mut s = session();
        feed(
            &mut s,
            json!({"type":"content_block_start","index":0,"content_block":{"type":"thinking"}}),
        );
        let events = feed(
            &mut s,
            json!({"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"sig-abc"}}),
        );
        assert!(events.is_empty());
        assert_eq!(s.thinking_signature.as_deref(), Some("sig-abc"));
    }

    #[test]
    fn non_monotonic_block_index_is_an_error() {
        let mut s = session();
        feed(
            &mut s,
            json!({"type":"content_block_start","index":1,"content_block":{"type":"text"}}),
        );
        let err = handle(
            &json!({"type":"content_block_start","index":0,"content_block":{"type":"text"}}),
            &mut s,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
    }

    #[test]
    fn message_start_records_input_tokens() {
        let mut s = session();
        let events = feed(
            &mut s,
            json!({"type":"message_start","message":{"usage":{"input_tokens":42}}}),
        );
        match &events[0] {
            ActivityEvent::MetricsUpdate { tokens, .. } => assert_eq!(tokens.input, 42),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn provider_error_event_fails_the_turn() {
        let mut s = session();
        let err = handle(
            &json!({"type":"error","error":{"message":"overloaded"}}),
            &mut s,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "provider anthropic: overloaded");
    }

    #[test]
    fn ping_is_ignored() {
        let mut s = session();
        assert!(feed(&mut s, json!({"type":"ping"})).is_empty());
    }
}
