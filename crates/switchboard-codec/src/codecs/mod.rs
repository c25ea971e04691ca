//! The bidirectional protocol converters.
//!
//! Every codec canonicalizes inbound requests to OpenAI Chat form and
//! converts upstream responses back into the inbound protocol's shape. The
//! response side is sticky: the orchestrator re-binds it to the same codec
//! by request id regardless of what metadata survived the round trip.

pub mod anthropic;
pub mod openai;
pub mod responses;

use serde_json::Value;

use switchboard_core::context::ConversionContext;
use switchboard_core::error::Result;

use crate::coerce::ToolSchemaMap;
use crate::profile::{CodecId, ConversionProfile};

/// Result of a request conversion: the canonical payload plus the tool
/// schema map the response side will need for argument normalization.
pub struct ConvertedRequest {
    pub payload: Value,
    pub tool_schemas: ToolSchemaMap,
}

pub trait Codec: Send + Sync {
    /// Codec id for logging.
    fn name(&self) -> &'static str;

    /// Inbound payload → canonical OpenAI Chat request.
    fn convert_request(
        &self,
        payload: Value,
        profile: &ConversionProfile,
        ctx: &ConversionContext,
    ) -> Result<ConvertedRequest>;

    /// Upstream (canonical) response → inbound protocol's response shape.
    fn convert_response(
        &self,
        payload: Value,
        profile: &ConversionProfile,
        ctx: &ConversionContext,
        tools: &ToolSchemaMap,
    ) -> Result<Value>;
}

/// Default codec factory, one instance per codec id (codecs are stateless).
pub fn instantiate(id: CodecId) -> Box<dyn Codec> {
    match id {
        CodecId::OpenAiOpenAi => Box::new(openai::OpenAiPassthroughCodec),
        CodecId::AnthropicOpenAi => Box::new(anthropic::AnthropicOpenAiCodec),
        CodecId::ResponsesOpenAi => Box::new(responses::ResponsesOpenAiCodec),
    }
}

/// Map an OpenAI finish_reason onto an Anthropic stop_reason.
pub(crate) fn stop_reason_from_finish(finish_reason: Option<&str>) -> &'static str {
    match finish_reason {
        Some("tool_calls") | Some("function_call") => "tool_use",
        Some("length") => "max_tokens",
        Some("stop") => "end_turn",
        _ => "end_turn",
    }
}

/// Strip internal metadata keys (`__`-prefixed or `_metadata`) from every
/// object level of a payload before it goes on the wire.
pub fn strip_internal_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|k, _| !k.starts_with("__") && k != "_metadata");
            for v in map.values_mut() {
                strip_internal_keys(v);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                strip_internal_keys(v);
            }
        }
        _ => {}
    }
}

/// Render any tool-result content shape as a plain string: strings pass
/// through, text-block lists flatten, everything else serializes.
pub(crate) fn stringify_content(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter_map(|b| {
                    b.get("text")
                        .and_then(Value::as_str)
                        .or_else(|| b.as_str())
                })
                .collect();
            if texts.is_empty() {
                serde_json::to_string(content.unwrap()).unwrap_or_default()
            } else {
                texts.join("\n")
            }
        }
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strip_internal_keys_walks_nested_objects() {
        let mut v = json!({
            "__internal": 1,
            "_metadata": {"x": 1},
            "keep": {"__nested": 2, "ok": true},
            "list": [{"__gone": 3, "stay": 4}]
        });
        strip_internal_keys(&mut v);
        assert_eq!(
            v,
            json!({"keep": {"ok": true}, "list": [{"stay": 4}]})
        );
    }

    #[test]
    fn stringify_content_flattens_text_blocks() {
        let blocks = json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]);
        assert_eq!(stringify_content(Some(&blocks)), "a\nb");
        assert_eq!(stringify_content(Some(&json!("plain"))), "plain");
        assert_eq!(stringify_content(None), "");
        assert_eq!(stringify_content(Some(&json!({"k": 1}))), r#"{"k":1}"#);
    }

    #[test]
    fn finish_reason_mapping_defaults_to_end_turn() {
        assert_eq!(stop_reason_from_finish(Some("stop")), "end_turn");
        assert_eq!(stop_reason_from_finish(Some("length")), "max_tokens");
        assert_eq!(stop_reason_from_finish(Some("tool_calls")), "tool_use");
        assert_eq!(stop_reason_from_finish(Some("content_filter")), "end_turn");
        assert_eq!(stop_reason_from_finish(None), "end_turn");
    }
}
