//! Per-family request body construction.
//!
//! The core shapes exactly four things into the provider request: the
//! model id, the conversation messages, the tool definitions, and the
//! thinking-budget field derived from capabilities. Auth headers and
//! endpoint paths belong to the transport.

use ah_domain::capability::ProviderFamily;
use ah_domain::message::{ContentPart, Message, MessageContent, Role, ToolDefinition};
use serde_json::{json, Value};

use crate::transport::ProviderRequest;

/// Build the JSON body for a streaming request to `family`.
pub fn build_body(family: ProviderFamily, req: &ProviderRequest) -> Value {
    match family {
        ProviderFamily::Anthropic => anthropic_body(req, false),
        ProviderFamily::Bedrock => anthropic_body(req, true),
        ProviderFamily::OpenAi => openai_body(req),
        ProviderFamily::Gemini => gemini_body(req),
        ProviderFamily::DeepSeek => deepseek_body(req),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Anthropic / Bedrock
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn anthropic_body(req: &ProviderRequest, bedrock: bool) -> Value {
    // System messages go in the separate top-level `system` field.
    let mut system_parts: Vec<String> = Vec::new();
    let mut api_messages: Vec<Value> = Vec::new();

    for msg in &req.messages {
        match msg.role {
            Role::System => system_parts.push(msg.content.extract_all_text()),
            Role::User => api_messages.push(json!({
                "role": "user",
                "content": msg.content.extract_all_text(),
            })),
            Role::Assistant => api_messages.push(assistant_to_anthropic(msg)),
            Role::Tool => api_messages.push(tool_result_to_anthropic(msg)),
        }
    }

    let mut body = json!({
        "model": req.model,
        "messages": api_messages,
        "max_tokens": req.max_output_tokens.unwrap_or(4096),
    });

    if bedrock {
        body["anthropic_version"] = Value::String("bedrock-2023-05-31".into());
    } else {
        body["stream"] = Value::Bool(true);
    }

    if !system_parts.is_empty() {
        body["system"] = Value::String(system_parts.join("\n\n"));
    }

    if !req.tools.is_empty() {
        body["tools"] = Value::Array(
            req.tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect(),
        );
    }

    if let Some(budget) = req.thinking_budget {
        body["thinking"] = json!({
            "type": "enabled",
            "budget_tokens": budget,
        });
    }

    body
}

fn assistant_to_anthropic(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(t) => json!({
            "role": "assistant",
            "content": [{"type": "text", "text": t}],
        }),
        MessageContent::Parts(parts) => {
            let content: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(json!({
                        "type": "text",
                        "text": text,
                    })),
                    ContentPart::Thinking { text, signature } => Some(json!({
                        "type": "thinking",
                        "thinking": text,
                        "signature": signature.clone().unwrap_or_default(),
                    })),
                    ContentPart::ToolUse { id, name, input } => Some(json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": input,
                    })),
                    ContentPart::ToolResult { .. } => None,
                })
                .collect();
            json!({
                "role": "assistant",
                "content": content,
            })
        }
    }
}

fn tool_result_to_anthropic(msg: &Message) -> Value {
    // Anthropic expects tool results as user messages with tool_result
    // content blocks.
    let content: Vec<Value> = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => Some(json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                    "is_error": is_error,
                })),
                _ => None,
            })
            .collect(),
        MessageContent::Text(t) => vec![json!({
            "type": "tool_result",
            "tool_use_id": "",
            "content": t,
        })],
    };
    json!({
        "role": "user",
        "content": content,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OpenAI (Responses API)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn openai_body(req: &ProviderRequest) -> Value {
    let mut instructions: Vec<String> = Vec::new();
    let mut input: Vec<Value> = Vec::new();

    for msg in &req.messages {
        match msg.role {
            Role::System => instructions.push(msg.content.extract_all_text()),
            Role::User => input.push(json!({
                "role": "user",
                "content": msg.content.extract_all_text(),
            })),
            Role::Assistant => {
                let text = msg.content.extract_all_text();
                if !text.is_empty() {
                    input.push(json!({
                        "role": "assistant",
                        "content": text,
                    }));
                }
                if let MessageContent::Parts(parts) = &msg.content {
                    for part in parts {
                        if let ContentPart::ToolUse { id, name, input: args } = part {
                            input.push(json!({
                                "type": "function_call",
                                "call_id": id,
                                "name": name,
                                "arguments": args.to_string(),
                            }));
                        }
                    }
                }
            }
            Role::Tool => {
                if let MessageContent::Parts(parts) = &msg.content {
                    for part in parts {
                        if let ContentPart::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } = part
                        {
                            input.push(json!({
                                "type": "function_call_output",
                                "call_id": tool_use_id,
                                "output": content,
                            }));
                        }
                    }
                }
            }
        }
    }

    let mut body = json!({
        "model": req.model,
        "input": input,
        "stream": true,
    });

    if !instructions.is_empty() {
        body["instructions"] = Value::String(instructions.join("\n\n"));
    }

    if let Some(max) = req.max_output_tokens {
        body["max_output_tokens"] = json!(max);
    }

    if !req.tools.is_empty() {
        body["tools"] = Value::Array(
            req.tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect(),
        );
    }

    // The o-family takes an effort knob, not a token budget; scale the
    // budget into the three effort tiers.
    if let Some(budget) = req.thinking_budget {
        let effort = if budget >= 32_768 {
            "high"
        } else if budget >= 4_096 {
            "medium"
        } else {
            "low"
        };
        body["reasoning"] = json!({ "effort": effort });
    }

    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gemini
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn gemini_body(req: &ProviderRequest) -> Value {
    let mut system_parts: Vec<String> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for msg in &req.messages {
        match msg.role {
            Role::System => system_parts.push(msg.content.extract_all_text()),
            Role::User => contents.push(json!({
                "role": "user",
                "parts": [{"text": msg.content.extract_all_text()}],
            })),
            Role::Assistant => {
                let mut parts: Vec<Value> = Vec::new();
                let text = msg.content.extract_all_text();
                if !text.is_empty() {
                    parts.push(json!({"text": text}));
                }
                if let MessageContent::Parts(message_parts) = &msg.content {
                    for part in message_parts {
                        if let ContentPart::ToolUse { name, input, .. } = part {
                            parts.push(json!({
                                "functionCall": {"name": name, "args": input},
                            }));
                        }
                    }
                }
                contents.push(json!({"role": "model", "parts": parts}));
            }
            Role::Tool => {
                if let MessageContent::Parts(parts) = &msg.content {
                    for part in parts {
                        if let ContentPart::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } = part
                        {
                            let response: Value = serde_json::from_str(content)
                                .unwrap_or_else(|_| json!({"result": content}));
                            contents.push(json!({
                                "role": "user",
                                "parts": [{"functionResponse": {
                                    "name": tool_use_id,
                                    "response": response,
                                }}],
                            }));
                        }
                    }
                }
            }
        }
    }

    let mut generation_config = json!({});
    if let Some(max) = req.max_output_tokens {
        generation_config["maxOutputTokens"] = json!(max);
    }
    if let Some(budget) = req.thinking_budget {
        generation_config["thinkingConfig"] = json!({
            "thinkingBudget": budget,
            "includeThoughts": true,
        });
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": generation_config,
    });

    if !system_parts.is_empty() {
        body["systemInstruction"] = json!({
            "parts": [{"text": system_parts.join("\n\n")}],
        });
    }

    if !req.tools.is_empty() {
        body["tools"] = json!([{
            "functionDeclarations": req.tools.iter().map(|t| json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            })).collect::<Vec<_>>(),
        }]);
    }

    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DeepSeek / Ollama (chat-completions wire)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn deepseek_body(req: &ProviderRequest) -> Value {
    let mut messages: Vec<Value> = Vec::new();

    for msg in &req.messages {
        match msg.role {
            Role::System => messages.push(json!({
                "role": "system",
                "content": msg.content.extract_all_text(),
            })),
            Role::User => messages.push(json!({
                "role": "user",
                "content": msg.content.extract_all_text(),
            })),
            Role::Assistant => {
                let mut m = json!({
                    "role": "assistant",
                    "content": msg.content.extract_all_text(),
                });
                if let MessageContent::Parts(parts) = &msg.content {
                    let calls: Vec<Value> = parts
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::ToolUse { id, name, input } => Some(json!({
                                "id": id,
                                "type": "function",
                                "function": {
                                    "name": name,
                                    "arguments": input.to_string(),
                                },
                            })),
                            _ => None,
                        })
                        .collect();
                    if !calls.is_empty() {
                        m["tool_calls"] = Value::Array(calls);
                    }
                }
                messages.push(m);
            }
            Role::Tool => {
                if let MessageContent::Parts(parts) = &msg.content {
                    for part in parts {
                        if let ContentPart::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } = part
                        {
                            messages.push(json!({
                                "role": "tool",
                                "tool_call_id": tool_use_id,
                                "content": content,
                            }));
                        }
                    }
                }
            }
        }
    }

    let mut body = json!({
        "model": req.model,
        "messages": messages,
        "stream": true,
        "stream_options": {"include_usage": true},
    });

    if let Some(max) = req.max_output_tokens {
        body["max_tokens"] = json!(max);
    }

    if !req.tools.is_empty() {
        body["tools"] = Value::Array(
            req.tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect(),
        );
    }

    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
