//! Upstream body construction.
//!
//! The codec has already produced the canonical OpenAI-Chat body; what
//! remains is per-target shaping: Anthropic upstreams get a Messages-form
//! body, GLM rejects array content on assistant messages, and iFlow
//! web-search requests swap both body and endpoint.

use serde_json::Value;

use switchboard_codec::codecs::anthropic;
use switchboard_codec::profile::ConversionProfile;
use switchboard_codec::strip_internal_keys;
use switchboard_core::config::ServiceProfile;
use switchboard_core::context::ConversionContext;
use switchboard_core::family::{Protocol, ProviderFamily};

/// Finalized dispatch target: the body to send and the endpoint path to
/// join onto the provider base URL.
pub struct FinalizedBody {
    pub body: Value,
    pub endpoint: String,
}

pub fn finalize_body(
    mut body: Value,
    service: &ServiceProfile,
    conversion: &ConversionProfile,
    ctx: &ConversionContext,
) -> FinalizedBody {
    strip_internal_keys(&mut body);

    // iFlow web search replaces the whole request: `data` is the body and
    // the retrieve endpoint is the target
    if service.family == ProviderFamily::Iflow && ctx.metadata_flag("iflowWebSearch") {
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        return FinalizedBody {
            body: data,
            endpoint: "/chat/retrieve".to_string(),
        };
    }

    if conversion.outgoing_protocol == Protocol::AnthropicMessages {
        body = anthropic::request_to_anthropic(&body);
    }

    if service.family == ProviderFamily::Glm {
        stringify_assistant_content(&mut body);
    }

    let endpoint = resolve_endpoint(service, conversion);
    FinalizedBody { body, endpoint }
}

/// Per-request endpoint, by priority: an explicit `endpoint` option on the
/// conversion profile, then the codec's outgoing-protocol override (a
/// Responses upstream is always `/responses`), then the service default.
fn resolve_endpoint(service: &ServiceProfile, conversion: &ConversionProfile) -> String {
    if let Some(endpoint) = conversion.options.get("endpoint").and_then(Value::as_str) {
        return endpoint.to_string();
    }
    match conversion.outgoing_protocol {
        Protocol::OpenAiResponses => "/responses".to_string(),
        _ => service.endpoint.clone(),
    }
}

/// GLM rejects array content on assistant messages; collapse any non-string
/// content to a JSON string.
fn stringify_assistant_content(body: &mut Value) {
    let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
        return;
    };
    for msg in messages {
        if msg.get("role").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        let Some(content) = msg.get("content") else {
            continue;
        };
        if content.is_string() || content.is_null() {
            continue;
        }
        let encoded = content.to_string();
        msg["content"] = Value::String(encoded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use switchboard_codec::profile::CodecId;
    use switchboard_core::config::AuthMode;
    use switchboard_core::family::UaMode;

    fn service(family: ProviderFamily) -> ServiceProfile {
        ServiceProfile {
            key: "p".into(),
            family,
            base_url: "http://upstream".into(),
            endpoint: "/v1/chat/completions".into(),
            model: None,
            auth_mode: AuthMode::None,
            api_key: None,
            token_path: None,
            token_url: None,
            client_id: None,
            headers: HashMap::new(),
            timeout_ms: 1000,
            retries: 1,
            stream_idle_timeout_ms: 1000,
            stream_headers_timeout_ms: 1000,
            ua_mode: UaMode::Default,
        }
    }

    fn conversion(outgoing: Protocol) -> ConversionProfile {
        ConversionProfile {
            id: "c".into(),
            incoming_protocol: Protocol::OpenAiChat,
            outgoing_protocol: outgoing,
            codec: CodecId::OpenAiOpenAi,
            input_schema: None,
            canonical_request_schema: None,
            canonical_response_schema: None,
            provider_response_schema: None,
            client_response_schema: None,
            trace: false,
            options: Default::default(),
        }
    }

    #[test]
    fn glm_assistant_array_content_becomes_string() {
        let body = json!({
            "messages": [
                {"role": "assistant", "content": [{"type": "text", "text": "hi"}]},
                {"role": "user", "content": [{"type": "text", "text": "kept"}]}
            ]
        });
        let ctx = ConversionContext::new("r", "/v1/chat/completions");
        let out = finalize_body(
            body,
            &service(ProviderFamily::Glm),
            &conversion(Protocol::OpenAiChat),
            &ctx,
        );
        assert!(out.body["messages"][0]["content"].is_string());
        assert!(out.body["messages"][1]["content"].is_array());
    }

    #[test]
    fn iflow_web_search_swaps_body_and_endpoint() {
        let body = json!({"data": {"query": "rust"}, "messages": []});
        let mut ctx = ConversionContext::new("r", "/v1/chat/completions");
        ctx.metadata.insert("iflowWebSearch".into(), json!(true));
        let out = finalize_body(
            body,
            &service(ProviderFamily::Iflow),
            &conversion(Protocol::OpenAiChat),
            &ctx,
        );
        assert_eq!(out.endpoint, "/chat/retrieve");
        assert_eq!(out.body, json!({"query": "rust"}));
    }

    #[test]
    fn anthropic_outgoing_gets_messages_form() {
        let body = json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}]
        });
        let ctx = ConversionContext::new("r", "/v1/chat/completions");
        let out = finalize_body(
            body,
            &service(ProviderFamily::Anthropic),
            &conversion(Protocol::AnthropicMessages),
            &ctx,
        );
        assert_eq!(out.body["messages"][0]["content"][0]["type"], "text");
        assert_eq!(out.body["max_tokens"], 4096);
    }

    #[test]
    fn internal_metadata_is_stripped_before_send() {
        let body = json!({"model": "m", "__route": "r", "messages": []});
        let ctx = ConversionContext::new("r", "/v1/chat/completions");
        let out = finalize_body(
            body,
            &service(ProviderFamily::Generic),
            &conversion(Protocol::OpenAiChat),
            &ctx,
        );
        assert!(out.body.get("__route").is_none());
    }

    #[test]
    fn profile_endpoint_option_overrides_service_default() {
        let body = json!({"messages": []});
        let ctx = ConversionContext::new("r", "/v1/chat/completions");
        let mut conv = conversion(Protocol::OpenAiResponses);
        conv.options
            .insert("endpoint".into(), json!("/custom/completions"));
        let out = finalize_body(body, &service(ProviderFamily::Generic), &conv, &ctx);
        assert_eq!(out.endpoint, "/custom/completions");
    }

    #[test]
    fn responses_upstream_targets_responses_endpoint() {
        let body = json!({"messages": []});
        let ctx = ConversionContext::new("r", "/v1/responses");
        let out = finalize_body(
            body,
            &service(ProviderFamily::Generic),
            &conversion(Protocol::OpenAiResponses),
            &ctx,
        );
        assert_eq!(out.endpoint, "/responses");
    }
}
