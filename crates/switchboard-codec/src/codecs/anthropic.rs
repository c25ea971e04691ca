//! Anthropic Messages ↔ OpenAI Chat conversion.
//!
//! Four directed conversions live here. The `Codec` impl picks a pair based
//! on which side of the profile speaks Anthropic; the other two are used by
//! the transport's body builder when the upstream itself is
//! Anthropic-family (the canonical body must leave the process in Messages
//! form).

use serde_json::{json, Map, Value};
use tracing::debug;

use switchboard_core::context::ConversionContext;
use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::family::Protocol;

use crate::coerce::{coerce_and_normalize, coerce_arguments, ToolSchemaMap};
use crate::profile::ConversionProfile;

use super::{stop_reason_from_finish, stringify_content, strip_internal_keys, Codec, ConvertedRequest};

pub struct AnthropicOpenAiCodec;

impl Codec for AnthropicOpenAiCodec {
    fn name(&self) -> &'static str {
        "anthropic-openai"
    }

    fn convert_request(
        &self,
        payload: Value,
        profile: &ConversionProfile,
        ctx: &ConversionContext,
    ) -> Result<ConvertedRequest> {
        match profile.incoming_protocol {
            Protocol::AnthropicMessages => request_to_openai(payload, ctx),
            // OpenAI client talking to an Anthropic upstream: the inbound
            // payload already is the canonical form; transport converts it
            // to Messages form at dispatch.
            _ => {
                let tool_schemas = ToolSchemaMap::from_openai_tools(payload.get("tools"));
                let mut payload = payload;
                strip_internal_keys(&mut payload);
                Ok(ConvertedRequest {
                    payload,
                    tool_schemas,
                })
            }
        }
    }

    fn convert_response(
        &self,
        payload: Value,
        profile: &ConversionProfile,
        _ctx: &ConversionContext,
        tools: &ToolSchemaMap,
    ) -> Result<Value> {
        match profile.incoming_protocol {
            Protocol::AnthropicMessages => Ok(response_to_anthropic(&payload, tools)),
            _ => Ok(response_to_openai(&payload, tools)),
        }
    }
}

/// Anthropic Messages request → canonical OpenAI Chat request.
pub fn request_to_openai(payload: Value, ctx: &ConversionContext) -> Result<ConvertedRequest> {
    let obj = payload
        .as_object()
        .ok_or_else(|| SwitchboardError::BadRequest("request body must be an object".into()))?;

    let tool_schemas = ToolSchemaMap::from_anthropic_tools(obj.get("tools"));
    let mut messages: Vec<Value> = Vec::new();

    if let Some(system) = obj.get("system") {
        let text = flatten_system(system);
        if !text.is_empty() {
            messages.push(json!({"role": "system", "content": text}));
        }
    }

    // Long agent histories repeat the same text block; track the previous
    // text per role and drop exact repeats.
    let mut last_text_for_role: std::collections::HashMap<String, String> =
        std::collections::HashMap::new();

    for msg in obj
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let role = msg
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("user")
            .to_string();

        match msg.get("content") {
            Some(Value::String(text)) => {
                push_text_message(&mut messages, &mut last_text_for_role, &role, text.clone());
            }
            Some(Value::Array(blocks)) => {
                convert_block_message(
                    &mut messages,
                    &mut last_text_for_role,
                    &role,
                    blocks,
                    &tool_schemas,
                    ctx,
                );
            }
            _ => {}
        }
    }

    let mut out = Map::new();
    out.insert("messages".into(), Value::Array(messages));
    for key in ["model", "max_tokens", "temperature", "top_p", "stream"] {
        if let Some(v) = obj.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    if let Some(stops) = obj.get("stop_sequences") {
        out.insert("stop".into(), stops.clone());
    }
    if let Some(tools) = obj.get("tools").and_then(Value::as_array) {
        let converted: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.get("name").cloned().unwrap_or(Value::Null),
                        "description": t.get("description").cloned().unwrap_or(Value::Null),
                        "parameters": t.get("input_schema").cloned().unwrap_or(json!({})),
                    }
                })
            })
            .collect();
        out.insert("tools".into(), Value::Array(converted));
    }
    if let Some(choice) = obj.get("tool_choice") {
        out.insert("tool_choice".into(), convert_tool_choice_to_openai(choice));
    }

    Ok(ConvertedRequest {
        payload: Value::Object(out),
        tool_schemas,
    })
}

fn flatten_system(system: &Value) -> String {
    match system {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| {
                b.as_str()
                    .or_else(|| b.get("text").and_then(Value::as_str))
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Walk one Anthropic message's content blocks and emit OpenAI messages.
fn convert_block_message(
    messages: &mut Vec<Value>,
    last_text_for_role: &mut std::collections::HashMap<String, String>,
    role: &str,
    blocks: &[Value],
    tool_schemas: &ToolSchemaMap,
    ctx: &ConversionContext,
) {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") | Some("input_text") | Some("output_text") => {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text_parts.push(t.to_string());
                }
            }
            Some("message") => {
                // nested message block: flatten its inner text content
                if let Some(inner) = block.get("content") {
                    let t = stringify_content(Some(inner));
                    if !t.is_empty() {
                        text_parts.push(t);
                    }
                }
            }
            Some("tool_use") => {
                let name = block.get("name").and_then(Value::as_str).unwrap_or("");
                let Some(input) =
                    coerce_and_normalize(block.get("input"), name, tool_schemas)
                else {
                    debug!(request = %ctx.request_id, tool = name,
                        "dropping tool_use missing required fields");
                    continue;
                };
                if input.is_empty() {
                    debug!(request = %ctx.request_id, tool = name,
                        "dropping tool_use with empty input");
                    continue;
                }
                tool_calls.push(json!({
                    "id": block.get("id").cloned().unwrap_or(Value::Null),
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": Value::Object(input).to_string(),
                    }
                }));
            }
            Some("tool_result") => {
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": block.get("tool_use_id").cloned().unwrap_or(Value::Null),
                    "content": stringify_content(block.get("content")),
                }));
            }
            _ => {}
        }
    }

    let text = text_parts.join("\n");
    if !tool_calls.is_empty() {
        let content = if text.is_empty() {
            Value::String(String::new())
        } else {
            Value::String(text)
        };
        messages.push(json!({
            "role": role,
            "content": content,
            "tool_calls": tool_calls,
        }));
    } else if !text.is_empty() {
        push_text_message(messages, last_text_for_role, role, text);
    }
}

fn push_text_message(
    messages: &mut Vec<Value>,
    last_text_for_role: &mut std::collections::HashMap<String, String>,
    role: &str,
    text: String,
) {
    if last_text_for_role.get(role) == Some(&text) {
        return;
    }
    last_text_for_role.insert(role.to_string(), text.clone());
    messages.push(json!({"role": role, "content": text}));
}

fn convert_tool_choice_to_openai(choice: &Value) -> Value {
    match choice {
        Value::String(s) if s == "auto" || s == "none" => choice.clone(),
        Value::Object(obj) => match obj.get("type").and_then(Value::as_str) {
            Some("tool") => json!({
                "type": "function",
                "function": {"name": obj.get("name").cloned().unwrap_or(Value::Null)}
            }),
            Some("auto") => json!("auto"),
            Some("none") => json!("none"),
            _ => json!("auto"),
        },
        _ => json!("auto"),
    }
}

/// OpenAI Chat response → Anthropic Messages response.
pub fn response_to_anthropic(payload: &Value, tools: &ToolSchemaMap) -> Value {
    let choice = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first());
    let message = choice.and_then(|c| c.get("message"));

    let mut blocks: Vec<Value> = Vec::new();

    match message.and_then(|m| m.get("content")) {
        Some(Value::String(text)) if !text.is_empty() => {
            blocks.push(json!({"type": "text", "text": text}));
        }
        Some(Value::Array(parts)) => {
            for part in parts {
                let text = part
                    .as_str()
                    .or_else(|| part.get("text").and_then(Value::as_str));
                if let Some(t) = text {
                    if !t.is_empty() {
                        blocks.push(json!({"type": "text", "text": t}));
                    }
                }
            }
        }
        _ => {}
    }

    // some providers surface chain-of-thought under reasoning_content
    if let Some(reasoning) = message
        .and_then(|m| m.get("reasoning_content"))
        .and_then(Value::as_str)
    {
        if !reasoning.is_empty() {
            blocks.push(json!({"type": "text", "text": reasoning}));
        }
    }

    let mut saw_tool_use = false;
    for call in collect_tool_calls(message) {
        let name = call
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let raw_args = call.get("function").and_then(|f| f.get("arguments"));
        let Some(input) = normalized_tool_input(raw_args, name, tools) else {
            continue;
        };
        saw_tool_use = true;
        blocks.push(json!({
            "type": "tool_use",
            "id": call.get("id").cloned().unwrap_or_else(|| {
                Value::String(format!("call_{}", uuid::Uuid::new_v4().simple()))
            }),
            "name": name,
            "input": Value::Object(input),
        }));
    }

    // Anthropic requires at least one content block.
    if blocks.is_empty() {
        blocks.push(json!({"type": "text", "text": ""}));
    }

    let finish_reason = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(Value::as_str);
    let stop_reason = if saw_tool_use {
        "tool_use"
    } else {
        stop_reason_from_finish(finish_reason)
    };

    let usage = payload.get("usage");
    let prompt = usage
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let completion = usage
        .and_then(|u| u.get("completion_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    json!({
        "id": payload.get("id").cloned().unwrap_or_else(|| {
            Value::String(format!("msg_{}", uuid::Uuid::new_v4().simple()))
        }),
        "type": "message",
        "role": "assistant",
        "model": payload.get("model").cloned().unwrap_or(Value::Null),
        "content": blocks,
        "stop_reason": stop_reason,
        "stop_sequence": Value::Null,
        "usage": {
            "input_tokens": prompt,
            "output_tokens": completion,
            "total_tokens": prompt + completion,
        }
    })
}

/// `tool_calls` plus the legacy single `function_call`, as one list.
fn collect_tool_calls(message: Option<&Value>) -> Vec<Value> {
    let mut calls: Vec<Value> = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if let Some(fc) = message.and_then(|m| m.get("function_call")) {
        if fc.is_object() {
            calls.push(json!({"id": Value::Null, "function": fc.clone()}));
        }
    }
    calls
}

/// Coerce + normalize one tool call's arguments. `None` means drop the
/// call: schema requirements unmet, or the input came out empty.
fn normalized_tool_input(
    raw: Option<&Value>,
    name: &str,
    tools: &ToolSchemaMap,
) -> Option<Map<String, Value>> {
    let input = if tools.get(name).is_some() {
        coerce_and_normalize(raw, name, tools)?
    } else {
        coerce_arguments(raw)
    };
    if input.is_empty() {
        None
    } else {
        Some(input)
    }
}

/// Canonical OpenAI Chat request → Anthropic Messages request. Used by the
/// transport body builder when the upstream family is Anthropic.
pub fn request_to_anthropic(payload: &Value) -> Value {
    let obj = match payload.as_object() {
        Some(o) => o,
        None => return payload.clone(),
    };

    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<Value> = Vec::new();
    let mut pending_tool_results: Vec<Value> = Vec::new();

    for msg in obj
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let role = msg.get("role").and_then(Value::as_str).unwrap_or("user");
        match role {
            "system" => {
                let t = stringify_content(msg.get("content"));
                if !t.is_empty() {
                    system_parts.push(t);
                }
            }
            "tool" => {
                pending_tool_results.push(json!({
                    "type": "tool_result",
                    "tool_use_id": msg.get("tool_call_id").cloned().unwrap_or(Value::Null),
                    "content": stringify_content(msg.get("content")),
                }));
            }
            _ => {
                flush_tool_results(&mut messages, &mut pending_tool_results);
                let mut content_blocks: Vec<Value> = Vec::new();
                let text = stringify_content(msg.get("content"));
                if !text.is_empty() {
                    content_blocks.push(json!({"type": "text", "text": text}));
                }
                if role == "assistant" {
                    for call in msg
                        .get("tool_calls")
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                    {
                        let input = coerce_arguments(
                            call.get("function").and_then(|f| f.get("arguments")),
                        );
                        if input.is_empty() {
                            continue;
                        }
                        content_blocks.push(json!({
                            "type": "tool_use",
                            "id": call.get("id").cloned().unwrap_or(Value::Null),
                            "name": call
                                .get("function")
                                .and_then(|f| f.get("name"))
                                .cloned()
                                .unwrap_or(Value::Null),
                            "input": Value::Object(input),
                        }));
                    }
                }
                if !content_blocks.is_empty() {
                    messages.push(json!({"role": role, "content": content_blocks}));
                }
            }
        }
    }
    flush_tool_results(&mut messages, &mut pending_tool_results);

    let mut out = Map::new();
    out.insert("messages".into(), Value::Array(messages));
    if !system_parts.is_empty() {
        out.insert("system".into(), Value::String(system_parts.join("\n")));
    }
    if let Some(model) = obj.get("model") {
        out.insert("model".into(), model.clone());
    }
    out.insert(
        "max_tokens".into(),
        obj.get("max_tokens").cloned().unwrap_or(json!(4096)),
    );
    for key in ["temperature", "top_p", "stream"] {
        if let Some(v) = obj.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    if let Some(stop) = obj.get("stop") {
        out.insert("stop_sequences".into(), stop.clone());
    }
    if let Some(tools) = obj.get("tools").and_then(Value::as_array) {
        let converted: Vec<Value> = tools
            .iter()
            .filter_map(|t| t.get("function"))
            .map(|f| {
                json!({
                    "name": f.get("name").cloned().unwrap_or(Value::Null),
                    "description": f.get("description").cloned().unwrap_or(Value::Null),
                    "input_schema": f.get("parameters").cloned().unwrap_or(json!({})),
                })
            })
            .collect();
        if !converted.is_empty() {
            out.insert("tools".into(), Value::Array(converted));
        }
    }
    if let Some(choice) = obj.get("tool_choice") {
        if let Some(converted) = convert_tool_choice_to_anthropic(choice) {
            out.insert("tool_choice".into(), converted);
        }
    }

    Value::Object(out)
}

/// Tool-result messages collapse into a single user message, the shape the
/// Messages API expects.
fn flush_tool_results(messages: &mut Vec<Value>, pending: &mut Vec<Value>) {
    if pending.is_empty() {
        return;
    }
    let blocks = std::mem::take(pending);
    messages.push(json!({"role": "user", "content": blocks}));
}

fn convert_tool_choice_to_anthropic(choice: &Value) -> Option<Value> {
    match choice {
        Value::String(s) if s == "auto" => Some(json!({"type": "auto"})),
        Value::String(s) if s == "none" => None,
        Value::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("function") => {
            let name = obj.get("function")?.get("name")?.clone();
            Some(json!({"type": "tool", "name": name}))
        }
        _ => Some(json!({"type": "auto"})),
    }
}

/// Anthropic Messages response → OpenAI Chat response. Used when an OpenAI
/// client is served by an Anthropic-family upstream.
pub fn response_to_openai(payload: &Value, tools: &ToolSchemaMap) -> Value {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    for block in payload
        .get("content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text_parts.push(t.to_string());
                }
            }
            Some("tool_use") => {
                let name = block.get("name").and_then(Value::as_str).unwrap_or("");
                let Some(input) = normalized_tool_input(block.get("input"), name, tools) else {
                    continue;
                };
                tool_calls.push(json!({
                    "id": block.get("id").cloned().unwrap_or(Value::Null),
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": Value::Object(input).to_string(),
                    }
                }));
            }
            _ => {}
        }
    }

    let finish_reason = if !tool_calls.is_empty() {
        "tool_calls"
    } else {
        match payload.get("stop_reason").and_then(Value::as_str) {
            Some("max_tokens") => "length",
            Some("tool_use") => "tool_calls",
            _ => "stop",
        }
    };

    let mut message = Map::new();
    message.insert("role".into(), json!("assistant"));
    message.insert(
        "content".into(),
        if text_parts.is_empty() {
            Value::Null
        } else {
            Value::String(text_parts.join(""))
        },
    );
    if !tool_calls.is_empty() {
        message.insert("tool_calls".into(), Value::Array(tool_calls));
    }

    let usage = payload.get("usage");
    let input_tokens = usage
        .and_then(|u| u.get("input_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let output_tokens = usage
        .and_then(|u| u.get("output_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    json!({
        "id": payload.get("id").cloned().unwrap_or_else(|| {
            Value::String(format!("chatcmpl-{}", uuid::Uuid::new_v4()))
        }),
        "object": "chat.completion",
        "model": payload.get("model").cloned().unwrap_or(Value::Null),
        "choices": [{
            "index": 0,
            "message": Value::Object(message),
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": input_tokens,
            "completion_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ConversionContext {
        ConversionContext::new("req-test", "/v1/messages")
    }

    #[test]
    fn system_string_becomes_leading_system_message() {
        let req = json!({
            "model": "m",
            "system": "be terse",
            "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}]
        });
        let out = request_to_openai(req, &ctx()).unwrap().payload;
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "be terse");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "hi");
    }

    #[test]
    fn system_block_list_flattens_with_newlines() {
        let req = json!({
            "system": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}],
            "messages": []
        });
        let out = request_to_openai(req, &ctx()).unwrap().payload;
        assert_eq!(out["messages"][0]["content"], "a\nb");
    }

    #[test]
    fn tool_use_block_becomes_tool_call_with_string_arguments() {
        let req = json!({
            "messages": [{
                "role": "assistant",
                "content": [
                    {"type": "tool_use", "id": "c1", "name": "Read", "input": {"file_path": "a.txt"}}
                ]
            }]
        });
        let out = request_to_openai(req, &ctx()).unwrap().payload;
        let msg = &out["messages"][0];
        assert_eq!(msg["role"], "assistant");
        assert_eq!(msg["content"], "");
        let call = &msg["tool_calls"][0];
        assert_eq!(call["id"], "c1");
        assert_eq!(call["function"]["name"], "Read");
        let args: Value =
            serde_json::from_str(call["function"]["arguments"].as_str().unwrap()).unwrap();
        assert_eq!(args["file_path"], "a.txt");
    }

    #[test]
    fn empty_input_tool_use_is_dropped() {
        let req = json!({
            "messages": [{
                "role": "assistant",
                "content": [
                    {"type": "tool_use", "id": "c1", "name": "NoArgs", "input": {}},
                    {"type": "text", "text": "calling"}
                ]
            }]
        });
        let out = request_to_openai(req, &ctx()).unwrap().payload;
        let msg = &out["messages"][0];
        assert!(msg.get("tool_calls").is_none());
        assert_eq!(msg["content"], "calling");
    }

    #[test]
    fn tool_result_becomes_tool_role_message() {
        let req = json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "tool_result", "tool_use_id": "c1", "content": "42"}
                ]
            }]
        });
        let out = request_to_openai(req, &ctx()).unwrap().payload;
        let msg = &out["messages"][0];
        assert_eq!(msg["role"], "tool");
        assert_eq!(msg["tool_call_id"], "c1");
        assert_eq!(msg["content"], "42");
    }

    #[test]
    fn repeated_text_for_same_role_is_deduplicated() {
        let req = json!({
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "same"}]},
                {"role": "assistant", "content": [{"type": "text", "text": "ok"}]},
                {"role": "user", "content": [{"type": "text", "text": "same"}]}
            ]
        });
        let out = request_to_openai(req, &ctx()).unwrap().payload;
        let user_count = out["messages"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|m| m["role"] == "user")
            .count();
        assert_eq!(user_count, 1);
    }

    #[test]
    fn tools_and_tool_choice_map_to_openai_shapes() {
        let req = json!({
            "messages": [],
            "tools": [{"name": "Read", "description": "read a file", "input_schema": {"type": "object"}}],
            "tool_choice": {"type": "tool", "name": "Read"}
        });
        let out = request_to_openai(req, &ctx()).unwrap().payload;
        assert_eq!(out["tools"][0]["type"], "function");
        assert_eq!(out["tools"][0]["function"]["name"], "Read");
        assert_eq!(out["tools"][0]["function"]["parameters"]["type"], "object");
        assert_eq!(out["tool_choice"]["type"], "function");
        assert_eq!(out["tool_choice"]["function"]["name"], "Read");

        let req = json!({"messages": [], "tool_choice": {"type": "mystery"}});
        let out = request_to_openai(req, &ctx()).unwrap().payload;
        assert_eq!(out["tool_choice"], "auto");
    }

    #[test]
    fn text_only_response_maps_to_end_turn() {
        let resp = json!({
            "choices": [{"message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}]
        });
        let out = response_to_anthropic(&resp, &ToolSchemaMap::default());
        assert_eq!(out["role"], "assistant");
        assert_eq!(out["content"][0]["type"], "text");
        assert_eq!(out["content"][0]["text"], "ok");
        assert_eq!(out["stop_reason"], "end_turn");
    }

    #[test]
    fn tool_call_response_normalizes_arguments_and_forces_tool_use() {
        let tools = ToolSchemaMap::from_anthropic_tools(Some(&json!([
            {"name": "Read", "input_schema": {
                "properties": {"file_path": {"type": "string"}},
                "required": ["file_path"]
            }}
        ])));
        let resp = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "c1",
                        "function": {"name": "Read", "arguments": "{\"filepath\":\"a.txt\"}"}
                    }]
                },
                "finish_reason": "stop"
            }]
        });
        let out = response_to_anthropic(&resp, &tools);
        let block = &out["content"][0];
        assert_eq!(block["type"], "tool_use");
        assert_eq!(block["id"], "c1");
        assert_eq!(block["input"]["file_path"], "a.txt");
        assert_eq!(out["stop_reason"], "tool_use");
    }

    #[test]
    fn schema_required_miss_drops_tool_use_entirely() {
        let tools = ToolSchemaMap::from_anthropic_tools(Some(&json!([
            {"name": "Read", "input_schema": {
                "properties": {"file_path": {}}, "required": ["file_path"]
            }}
        ])));
        let resp = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "c1",
                        "function": {"name": "Read", "arguments": "{\"unrelated\":1}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let out = response_to_anthropic(&resp, &tools);
        // dropped call leaves no blocks; the empty text placeholder appears
        assert_eq!(out["content"][0]["type"], "text");
        assert_eq!(out["content"][0]["text"], "");
    }

    #[test]
    fn legacy_function_call_is_treated_as_tool_call() {
        let resp = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "function_call": {"name": "Read", "arguments": "{\"path\":\"x\"}"}
                },
                "finish_reason": "function_call"
            }]
        });
        let out = response_to_anthropic(&resp, &ToolSchemaMap::default());
        assert_eq!(out["content"][0]["type"], "tool_use");
        assert_eq!(out["content"][0]["name"], "Read");
        assert_eq!(out["stop_reason"], "tool_use");
    }

    #[test]
    fn usage_maps_between_vocabularies() {
        let resp = json!({
            "choices": [{"message": {"content": "x"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let out = response_to_anthropic(&resp, &ToolSchemaMap::default());
        assert_eq!(out["usage"]["input_tokens"], 10);
        assert_eq!(out["usage"]["output_tokens"], 5);
        assert_eq!(out["usage"]["total_tokens"], 15);
    }

    #[test]
    fn reasoning_content_is_appended_as_text() {
        let resp = json!({
            "choices": [{
                "message": {"content": "answer", "reasoning_content": "because"},
                "finish_reason": "stop"
            }]
        });
        let out = response_to_anthropic(&resp, &ToolSchemaMap::default());
        let texts: Vec<&str> = out["content"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["answer", "because"]);
    }

    #[test]
    fn openai_tool_round_trip_to_anthropic_upstream() {
        // assistant tool_calls + tool message become tool_use +
        // tool_result blocks with matching ids
        let canonical = json!({
            "model": "m",
            "messages": [
                {"role": "assistant", "content": null, "tool_calls": [{
                    "id": "c1", "type": "function",
                    "function": {"name": "calc", "arguments": "{\"x\":1}"}
                }]},
                {"role": "tool", "tool_call_id": "c1", "content": "42"}
            ]
        });
        let out = request_to_anthropic(&canonical);
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "assistant");
        assert_eq!(messages[0]["content"][0]["type"], "tool_use");
        assert_eq!(messages[0]["content"][0]["id"], "c1");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"][0]["type"], "tool_result");
        assert_eq!(messages[1]["content"][0]["tool_use_id"], "c1");
        assert_eq!(messages[1]["content"][0]["content"], "42");
        // Anthropic requires max_tokens
        assert_eq!(out["max_tokens"], 4096);
    }

    #[test]
    fn anthropic_response_converts_to_openai_choice() {
        let resp = json!({
            "id": "msg_1",
            "model": "m",
            "content": [
                {"type": "text", "text": "hello"},
                {"type": "tool_use", "id": "t1", "name": "calc", "input": {"x": 1}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 3, "output_tokens": 7}
        });
        let out = response_to_openai(&resp, &ToolSchemaMap::default());
        let msg = &out["choices"][0]["message"];
        assert_eq!(msg["content"], "hello");
        assert_eq!(msg["tool_calls"][0]["id"], "t1");
        let args: Value =
            serde_json::from_str(msg["tool_calls"][0]["function"]["arguments"].as_str().unwrap())
                .unwrap();
        assert_eq!(args["x"], 1);
        assert_eq!(out["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(out["usage"]["prompt_tokens"], 3);
        assert_eq!(out["usage"]["total_tokens"], 10);
    }
}
