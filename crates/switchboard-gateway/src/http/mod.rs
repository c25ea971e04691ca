//! Inbound endpoint handlers and the shared per-request pipeline.
//!
//! Every endpoint runs the same serial stages: parse → prepare_incoming →
//! dispatch → prepare_outgoing (or stream) → reply. The handlers differ
//! only in the entry endpoint they record, which drives profile resolution.

pub mod chat;
pub mod health;
pub mod messages;
pub mod responses;

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use switchboard_codec::{to_anthropic_events_from_openai, ToolSchemaMap};
use switchboard_core::context::{ConversionContext, RuntimeMetadata};
use switchboard_core::error::{ErrorBody, SwitchboardError};
use switchboard_core::family::Protocol;
use switchboard_transport::{idle_bounded_stream, UpstreamReply};

use crate::app::AppState;

/// Inbound headers worth carrying as runtime metadata for forwarding.
const FORWARDED_HEADERS: &[&str] = &[
    "session_id",
    "conversation_id",
    "anthropic-session-id",
    "anthropic-conversation-id",
    "x-request-id",
];

pub(crate) async fn run_pipeline(
    state: Arc<AppState>,
    entry_endpoint: &str,
    headers: HeaderMap,
    payload: Value,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().simple());
    let mut ctx = ConversionContext::new(request_id.clone(), entry_endpoint);
    ctx.stream = payload.get("stream") == Some(&Value::Bool(true));
    if let Some(profile_id) = header_str(&headers, "x-conversion-profile") {
        ctx.metadata
            .insert("conversionProfileId".into(), json!(profile_id));
    }
    if header_str(&headers, "x-iflow-web-search").as_deref() == Some("true") {
        ctx.metadata.insert("iflowWebSearch".into(), json!(true));
    }

    debug!(request = %request_id, endpoint = entry_endpoint, stream = ctx.stream,
        "inbound request");

    let prepared = match state.orchestrator.prepare_incoming(payload, &ctx) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    ctx.target_protocol = Some(prepared.profile.outgoing_protocol);

    let provider_opt = prepared
        .profile
        .options
        .get("provider")
        .and_then(Value::as_str);
    let service = match state.service_for(provider_opt) {
        Ok(s) => s,
        Err(e) => {
            state.orchestrator.reap_binding(&ctx.request_id);
            return error_response(&e);
        }
    };

    let meta = runtime_metadata(&ctx, &headers, &prepared, service);

    // cross-protocol streams are buffered upstream and re-emitted
    // synthetically; the client's stream flag must not leak upstream
    let mut upstream_body = prepared.payload.clone();
    if ctx.stream && !prepared.profile.is_passthrough() {
        if let Some(obj) = upstream_body.as_object_mut() {
            obj.remove("stream");
        }
    }

    let reply = state
        .transport
        .dispatch(service, &prepared.profile, upstream_body, &meta, &ctx)
        .await;

    match reply {
        Ok(UpstreamReply::Stream(response)) => {
            // same-protocol proxying: the codec never touches the bytes
            state.orchestrator.reap_binding(&ctx.request_id);
            proxy_sse(response, service.stream_idle_timeout_ms)
        }
        Ok(UpstreamReply::Json(data)) => {
            if ctx.stream && !prepared.profile.is_passthrough() {
                match prepared.profile.incoming_protocol {
                    Protocol::AnthropicMessages => {
                        state.orchestrator.reap_binding(&ctx.request_id);
                        synthesized_anthropic_sse(&data, &prepared.tool_schemas)
                    }
                    Protocol::OpenAiChat => match state.orchestrator.prepare_outgoing(data, &ctx)
                    {
                        Ok(out) => synthesized_openai_sse(&out.payload),
                        Err(e) => error_response(&e),
                    },
                    Protocol::OpenAiResponses => {
                        // no synthetic Responses event stream; reply buffered
                        warn!(request = %ctx.request_id,
                            "stream requested on a cross-protocol responses profile; replying buffered");
                        buffered_response(&state, data, &ctx)
                    }
                }
            } else {
                buffered_response(&state, data, &ctx)
            }
        }
        Err(e) => {
            state.orchestrator.reap_binding(&ctx.request_id);
            error_response(&e)
        }
    }
}

fn buffered_response(state: &AppState, data: Value, ctx: &ConversionContext) -> Response {
    match state.orchestrator.prepare_outgoing(data, ctx) {
        Ok(out) => (StatusCode::OK, Json(out.payload)).into_response(),
        Err(e) => error_response(&e),
    }
}

fn runtime_metadata(
    ctx: &ConversionContext,
    headers: &HeaderMap,
    prepared: &switchboard_codec::Prepared,
    service: &switchboard_core::config::ServiceProfile,
) -> RuntimeMetadata {
    let mut client_headers = std::collections::HashMap::new();
    for name in FORWARDED_HEADERS {
        if let Some(v) = header_str(headers, name) {
            client_headers.insert(name.to_string(), v);
        }
    }
    RuntimeMetadata {
        request_id: ctx.request_id.clone(),
        route_name: None,
        provider_key: service.key.clone(),
        provider_id: service.key.clone(),
        family: service.family,
        protocol: Some(prepared.profile.outgoing_protocol),
        pipeline_id: Some(prepared.profile.id.clone()),
        target: Some(format!("{}@{}", service.key, service.base_url)),
        // runtime target overrides, for callers that steer individual
        // requests at a specific upstream
        endpoint_url: header_str(headers, "x-target-url"),
        base_url: header_str(headers, "x-target-base-url"),
        client_headers,
        user_agent: header_str(headers, "user-agent"),
        originator: header_str(headers, "originator"),
        entry_endpoint: ctx.entry_endpoint.clone(),
        stream: ctx.stream,
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

pub(crate) fn error_response(err: &SwitchboardError) -> Response {
    warn!(code = %err.code(), error = %err, "request failed");
    let body = ErrorBody::from(err);
    let status =
        StatusCode::from_u16(body.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

/// Forward an upstream SSE body verbatim. A mid-stream failure becomes a
/// terminal error event on the open stream; the status line has already
/// been sent.
fn proxy_sse(response: reqwest::Response, idle_timeout_ms: u64) -> Response {
    let stream = async_stream::stream! {
        let mut inner = std::pin::pin!(idle_bounded_stream(response, idle_timeout_ms));
        while let Some(item) = inner.next().await {
            match item {
                Ok(chunk) => yield Ok::<Bytes, Infallible>(chunk),
                Err(e) => {
                    yield Ok(Bytes::from(error_frame(&e)));
                    break;
                }
            }
        }
    };
    sse_response(Body::from_stream(stream))
}

/// Anthropic client + non-Anthropic upstream: replay the buffered response
/// as the synthetic Messages event sequence.
fn synthesized_anthropic_sse(data: &Value, tools: &ToolSchemaMap) -> Response {
    let frames: Vec<String> = to_anthropic_events_from_openai(data, tools)
        .iter()
        .map(|e| e.to_frame())
        .collect();
    let stream = futures_util::stream::iter(
        frames
            .into_iter()
            .map(|f| Ok::<Bytes, Infallible>(Bytes::from(f))),
    );
    sse_response(Body::from_stream(stream))
}

/// OpenAI client + cross-protocol upstream: one content chunk, one finish
/// chunk, then the `[DONE]` sentinel.
fn synthesized_openai_sse(converted: &Value) -> Response {
    let mut frames: Vec<String> = Vec::new();
    let choice = converted
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first());
    let message = choice.and_then(|c| c.get("message"));
    let id = converted
        .get("id")
        .cloned()
        .unwrap_or_else(|| json!(format!("chatcmpl-{}", uuid::Uuid::new_v4())));
    let model = converted.get("model").cloned().unwrap_or(Value::Null);

    let mut delta = serde_json::Map::new();
    delta.insert("role".into(), json!("assistant"));
    if let Some(content) = message.and_then(|m| m.get("content")) {
        if !content.is_null() {
            delta.insert("content".into(), content.clone());
        }
    }
    if let Some(calls) = message.and_then(|m| m.get("tool_calls")).and_then(Value::as_array) {
        let indexed: Vec<Value> = calls
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let mut c = c.clone();
                c["index"] = json!(i);
                c
            })
            .collect();
        delta.insert("tool_calls".into(), Value::Array(indexed));
    }

    let chunk = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [{"index": 0, "delta": Value::Object(delta), "finish_reason": Value::Null}],
    });
    frames.push(format!("data: {chunk}\n\n"));

    let finish = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [{
            "index": 0,
            "delta": {},
            "finish_reason": choice
                .and_then(|c| c.get("finish_reason"))
                .cloned()
                .unwrap_or_else(|| json!("stop")),
        }],
    });
    frames.push(format!("data: {finish}\n\n"));
    frames.push("data: [DONE]\n\n".to_string());

    let stream = futures_util::stream::iter(
        frames
            .into_iter()
            .map(|f| Ok::<Bytes, Infallible>(Bytes::from(f))),
    );
    sse_response(Body::from_stream(stream))
}

fn error_frame(err: &SwitchboardError) -> String {
    let body = ErrorBody::from(err);
    format!(
        "event: error\ndata: {}\n\n",
        serde_json::to_string(&body).unwrap_or_else(|_| "{}".into())
    )
}

fn sse_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
