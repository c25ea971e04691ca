//! Synthetic Anthropic SSE event synthesis.
//!
//! When an Anthropic client asked for a stream but the upstream speaks a
//! different protocol, the upstream response is fully buffered and replayed
//! to the client as a synthetic Messages event sequence. The stream is never
//! re-parsed incrementally.

use serde_json::{json, Value};

use crate::coerce::{coerce_and_normalize, coerce_arguments, ToolSchemaMap};

/// One server-sent event, named and with a JSON data payload.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: String,
    pub data: Value,
}

impl SseEvent {
    fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }

    /// Render as a wire frame: `event: <name>\ndata: <json>\n\n`.
    pub fn to_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

/// Turn a buffered OpenAI chat completion into the Anthropic event
/// sequence: `message_start`, one block triple per tool call, one text
/// block triple when text is present, `message_delta`, `message_stop`.
///
/// `stop_reason` is `tool_use` whenever any tool_use block was emitted,
/// regardless of the upstream finish reason.
pub fn to_anthropic_events_from_openai(response: &Value, tools: &ToolSchemaMap) -> Vec<SseEvent> {
    let choice = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first());
    let message = choice.and_then(|c| c.get("message"));
    let usage = response.get("usage");

    let message_id = response
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4().simple()));
    let model = response.get("model").cloned().unwrap_or(Value::Null);
    let input_tokens = usage
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let output_tokens = usage
        .and_then(|u| u.get("completion_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let mut events = vec![SseEvent::new(
        "message_start",
        json!({
            "type": "message_start",
            "message": {
                "id": message_id,
                "type": "message",
                "role": "assistant",
                "model": model,
                "content": [],
                "usage": {"input_tokens": input_tokens, "output_tokens": 0},
            }
        }),
    )];

    let mut index = 0usize;
    let mut saw_tool_use = false;

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
        let input = if tools.get(name).is_some() {
            match coerce_and_normalize(raw, name, tools) {
                Some(a) => a,
                None => continue,
            }
        } else {
            coerce_arguments(raw)
        };
        if input.is_empty() {
            continue;
        }
        saw_tool_use = true;
        let args_json = Value::Object(input).to_string();

        events.push(SseEvent::new(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {
                    "type": "tool_use",
                    "id": call.get("id").cloned().unwrap_or(Value::Null),
                    "name": name,
                    "input": {},
                }
            }),
        ));
        events.push(SseEvent::new(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "input_json_delta", "partial_json": args_json},
            }),
        ));
        events.push(SseEvent::new(
            "content_block_stop",
            json!({"type": "content_block_stop", "index": index}),
        ));
        index += 1;
    }

    let text = match message.and_then(|m| m.get("content")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| {
                p.as_str()
                    .or_else(|| p.get("text").and_then(Value::as_str))
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    };
    if !text.is_empty() {
        events.push(SseEvent::new(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {"type": "text", "text": ""},
            }),
        ));
        events.push(SseEvent::new(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "text_delta", "text": text},
            }),
        ));
        events.push(SseEvent::new(
            "content_block_stop",
            json!({"type": "content_block_stop", "index": index}),
        ));
    }

    let finish_reason = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(Value::as_str);
    let stop_reason = if saw_tool_use {
        "tool_use"
    } else {
        crate::codecs::stop_reason_from_finish(finish_reason)
    };

    events.push(SseEvent::new(
        "message_delta",
        json!({
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason, "stop_sequence": Value::Null},
            "usage": {"output_tokens": output_tokens},
        }),
    ));
    events.push(SseEvent::new(
        "message_stop",
        json!({"type": "message_stop"}),
    ));

    events
}
