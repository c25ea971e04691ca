//! OpenAI → OpenAI pass-through.
//!
//! Clients that already speak Chat Completions still need two fixes before
//! forwarding: some send `tool_calls[].function.arguments` as objects
//! instead of JSON strings, and some leak internal metadata keys into the
//! body.

use serde_json::Value;

use switchboard_core::context::ConversionContext;
use switchboard_core::error::Result;

use crate::coerce::{coerce_arguments, ToolSchemaMap};
use crate::profile::ConversionProfile;

use super::{strip_internal_keys, Codec, ConvertedRequest};

pub struct OpenAiPassthroughCodec;

impl Codec for OpenAiPassthroughCodec {
    fn name(&self) -> &'static str {
        "openai-openai"
    }

    fn convert_request(
        &self,
        mut payload: Value,
        _profile: &ConversionProfile,
        _ctx: &ConversionContext,
    ) -> Result<ConvertedRequest> {
        let tool_schemas = ToolSchemaMap::from_openai_tools(payload.get("tools"));
        strip_internal_keys(&mut payload);
        normalize_message_tool_calls(&mut payload);
        Ok(ConvertedRequest {
            payload,
            tool_schemas,
        })
    }

    fn convert_response(
        &self,
        mut payload: Value,
        _profile: &ConversionProfile,
        _ctx: &ConversionContext,
        _tools: &ToolSchemaMap,
    ) -> Result<Value> {
        enforce_tool_call_invariants(&mut payload);
        Ok(payload)
    }
}

/// Ensure every `function.arguments` in the request is a JSON-encoded
/// string.
fn normalize_message_tool_calls(payload: &mut Value) {
    let Some(messages) = payload.get_mut("messages").and_then(Value::as_array_mut) else {
        return;
    };
    for msg in messages {
        let Some(calls) = msg.get_mut("tool_calls").and_then(Value::as_array_mut) else {
            continue;
        };
        for call in calls {
            if let Some(function) = call.get_mut("function") {
                stringify_arguments(function);
            }
        }
    }
}

fn stringify_arguments(function: &mut Value) {
    if let Some(args) = function.get("arguments") {
        if !args.is_string() {
            let encoded = args.to_string();
            function["arguments"] = Value::String(encoded);
        }
    }
}

/// Response-side invariants: no tool call leaves with arguments that parse
/// to an empty object, and when any tool calls remain the finish reason
/// reports them.
fn enforce_tool_call_invariants(payload: &mut Value) {
    let Some(choices) = payload.get_mut("choices").and_then(Value::as_array_mut) else {
        return;
    };
    for choice in choices {
        let mut kept_tool_calls = false;
        if let Some(calls) = choice
            .get_mut("message")
            .and_then(|m| m.get_mut("tool_calls"))
            .and_then(Value::as_array_mut)
        {
            calls.retain_mut(|call| {
                let Some(function) = call.get_mut("function") else {
                    return false;
                };
                let args = coerce_arguments(function.get("arguments"));
                if args.is_empty() {
                    return false;
                }
                function["arguments"] = Value::String(Value::Object(args).to_string());
                true
            });
            kept_tool_calls = !calls.is_empty();
        }
        if kept_tool_calls {
            choice["finish_reason"] = Value::String("tool_calls".into());
        } else if let Some(message) = choice.get_mut("message").and_then(Value::as_object_mut) {
            if message
                .get("tool_calls")
                .and_then(Value::as_array)
                .is_some_and(Vec::is_empty)
            {
                message.remove("tool_calls");
            }
        }
    }
}
