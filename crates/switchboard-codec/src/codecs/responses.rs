//! OpenAI Responses ↔ OpenAI Chat conversion.
//!
//! The Responses API carries the conversation as a flat `input` array of
//! typed items and returns an `output` array. Requests flatten into the
//! canonical Chat message list; responses rebuild `output` with `message`
//! and `function_call` items.

use serde_json::{json, Map, Value};

use switchboard_core::context::ConversionContext;
use switchboard_core::error::{Result, SwitchboardError};

use crate::coerce::{coerce_arguments, coerce_and_normalize, ToolSchemaMap};
use crate::profile::ConversionProfile;

use super::{stringify_content, strip_internal_keys, Codec, ConvertedRequest};

pub struct ResponsesOpenAiCodec;

impl Codec for ResponsesOpenAiCodec {
    fn name(&self) -> &'static str {
        "responses-openai"
    }

    fn convert_request(
        &self,
        payload: Value,
        _profile: &ConversionProfile,
        _ctx: &ConversionContext,
    ) -> Result<ConvertedRequest> {
        request_to_openai(payload)
    }

    fn convert_response(
        &self,
        payload: Value,
        _profile: &ConversionProfile,
        _ctx: &ConversionContext,
        tools: &ToolSchemaMap,
    ) -> Result<Value> {
        Ok(response_to_responses(&payload, tools))
    }
}

fn request_to_openai(payload: Value) -> Result<ConvertedRequest> {
    let obj = payload
        .as_object()
        .ok_or_else(|| SwitchboardError::BadRequest("request body must be an object".into()))?;

    // Responses tools are flat {type:"function", name, parameters}; the
    // schema-map builder accepts both flat and nested entries.
    let tool_schemas = ToolSchemaMap::from_openai_tools(obj.get("tools"));

    let mut messages: Vec<Value> = Vec::new();
    if let Some(instructions) = obj.get("instructions").and_then(Value::as_str) {
        if !instructions.is_empty() {
            messages.push(json!({"role": "system", "content": instructions}));
        }
    }

    match obj.get("input") {
        Some(Value::String(text)) => {
            messages.push(json!({"role": "user", "content": text}));
        }
        Some(Value::Array(items)) => {
            for item in items {
                convert_input_item(&mut messages, item);
            }
        }
        _ => {}
    }

    let mut out = Map::new();
    out.insert("messages".into(), Value::Array(messages));
    for key in ["model", "temperature", "top_p", "stream"] {
        if let Some(v) = obj.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    if let Some(max) = obj.get("max_output_tokens") {
        out.insert("max_tokens".into(), max.clone());
    }
    if let Some(tools) = obj.get("tools").and_then(Value::as_array) {
        let converted: Vec<Value> = tools
            .iter()
            .map(|t| {
                if t.get("function").is_some() {
                    t.clone()
                } else {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.get("name").cloned().unwrap_or(Value::Null),
                            "description": t.get("description").cloned().unwrap_or(Value::Null),
                            "parameters": t.get("parameters").cloned().unwrap_or(json!({})),
                        }
                    })
                }
            })
            .collect();
        out.insert("tools".into(), Value::Array(converted));
    }
    if let Some(choice) = obj.get("tool_choice") {
        out.insert("tool_choice".into(), choice.clone());
    }

    let mut payload = Value::Object(out);
    strip_internal_keys(&mut payload);
    Ok(ConvertedRequest {
        payload,
        tool_schemas,
    })
}

fn convert_input_item(messages: &mut Vec<Value>, item: &Value) {
    let item_type = item.get("type").and_then(Value::as_str);
    match item_type {
        Some("function_call") => {
            let args = coerce_arguments(item.get("arguments"));
            if args.is_empty() {
                return;
            }
            messages.push(json!({
                "role": "assistant",
                "content": "",
                "tool_calls": [{
                    "id": item
                        .get("call_id")
                        .or_else(|| item.get("id"))
                        .cloned()
                        .unwrap_or(Value::Null),
                    "type": "function",
                    "function": {
                        "name": item.get("name").cloned().unwrap_or(Value::Null),
                        "arguments": Value::Object(args).to_string(),
                    }
                }]
            }));
        }
        Some("function_call_output") => {
            messages.push(json!({
                "role": "tool",
                "tool_call_id": item.get("call_id").cloned().unwrap_or(Value::Null),
                "content": stringify_content(item.get("output")),
            }));
        }
        // message items, typed or bare {role, content}
        Some("message") | None => {
            let role = item.get("role").and_then(Value::as_str).unwrap_or("user");
            let text = stringify_content(item.get("content"));
            if !text.is_empty() {
                messages.push(json!({"role": role, "content": text}));
            }
        }
        // reasoning and other item kinds carry nothing the upstream needs
        _ => {}
    }
}

/// OpenAI Chat response → Responses `output` array.
fn response_to_responses(payload: &Value, tools: &ToolSchemaMap) -> Value {
    let choice = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first());
    let message = choice.and_then(|c| c.get("message"));

    let mut output: Vec<Value> = Vec::new();

    for call in message
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let name = call
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let raw = call.get("function").and_then(|f| f.get("arguments"));
        let args = if tools.get(name).is_some() {
            match coerce_and_normalize(raw, name, tools) {
                Some(a) => a,
                None => continue,
            }
        } else {
            coerce_arguments(raw)
        };
        if args.is_empty() {
            continue;
        }
        let call_id = call
            .get("id")
            .cloned()
            .unwrap_or_else(|| Value::String(format!("call_{}", uuid::Uuid::new_v4().simple())));
        output.push(json!({
            "type": "function_call",
            "id": format!("fc_{}", uuid::Uuid::new_v4().simple()),
            "call_id": call_id,
            "name": name,
            "arguments": Value::Object(args).to_string(),
            "status": "completed",
        }));
    }

    let text = stringify_content(message.and_then(|m| m.get("content")));
    if !text.is_empty() {
        output.push(json!({
            "type": "message",
            "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
            "role": "assistant",
            "status": "completed",
            "content": [{"type": "output_text", "text": text, "annotations": []}],
        }));
    }

    let usage = payload.get("usage");
    let input_tokens = usage
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let output_tokens = usage
        .and_then(|u| u.get("completion_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    json!({
        "id": payload
            .get("id")
            .cloned()
            .unwrap_or_else(|| Value::String(format!("resp_{}", uuid::Uuid::new_v4().simple()))),
        "object": "response",
        "status": "completed",
        "model": payload.get("model").cloned().unwrap_or(Value::Null),
        "output": output,
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        }
    })
}
