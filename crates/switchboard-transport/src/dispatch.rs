//! Upstream dispatch: one HTTP call per request, plus the narrow set of
//! second tries the policy allows.
//!
//! Retry policy: statuses ≥500 are retryable up to the configured attempt
//! limit (default 1, i.e. no retry; fail-over belongs to the caller). A
//! 401-class rejection gets at most one OAuth recovery and one replay with
//! rebuilt headers and the same body. Everything else surfaces immediately.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use switchboard_auth::{AuthConfig, OAuthManager, OAuthOptions};
use switchboard_codec::profile::ConversionProfile;
use switchboard_core::config::{AuthMode, ServiceProfile};
use switchboard_core::context::{ConversionContext, RuntimeMetadata};
use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::family::ProviderFamily;

use crate::body::finalize_body;
use crate::headers::{build_headers, Credential};
use crate::snapshot::{SnapshotEnvelope, SnapshotWriter};

/// Whether the upstream leg runs buffered or as a live SSE stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Buffered,
    Sse,
}

/// What came back from the upstream.
#[derive(Debug)]
pub enum UpstreamReply {
    Json(Value),
    /// The response head arrived; the body is a live SSE stream.
    Stream(reqwest::Response),
}

pub struct Transport {
    client: reqwest::Client,
    oauth: Arc<OAuthManager>,
    snapshots: Option<SnapshotWriter>,
}

impl Transport {
    pub fn new(oauth: Arc<OAuthManager>, snapshots: Option<SnapshotWriter>) -> Self {
        Self {
            client: reqwest::Client::new(),
            oauth,
            snapshots,
        }
    }

    /// Per-family stream-mode selection. Anthropic-family targets follow
    /// the body's `stream` flag; pass-through profiles follow the client's
    /// request; everything else is buffered (cross-protocol streams are
    /// synthesized from the buffered response).
    pub fn select_stream_mode(
        service: &ServiceProfile,
        conversion: &ConversionProfile,
        body: &Value,
        ctx: &ConversionContext,
    ) -> StreamMode {
        if service.family == ProviderFamily::Anthropic {
            if body.get("stream") == Some(&Value::Bool(true)) {
                return StreamMode::Sse;
            }
            return StreamMode::Buffered;
        }
        if conversion.is_passthrough() && ctx.stream {
            return StreamMode::Sse;
        }
        StreamMode::Buffered
    }

    pub async fn dispatch(
        &self,
        service: &ServiceProfile,
        conversion: &ConversionProfile,
        body: Value,
        meta: &RuntimeMetadata,
        ctx: &ConversionContext,
    ) -> Result<UpstreamReply> {
        let stream_mode = Self::select_stream_mode(service, conversion, &body, ctx);
        let finalized = finalize_body(body, service, conversion, ctx);
        let url = resolve_url(service, conversion, meta, &finalized.endpoint);

        let mut credential = self.preflight(service).await?;
        let mut headers = build_headers(service, meta, stream_mode, &credential);

        self.record_snapshot("pre", &finalized.body, &headers, &url, service, meta);

        let mut attempt: u32 = 1;
        let mut replayed = false;
        loop {
            let result = self
                .send_once(&url, &headers, &finalized.body, stream_mode, service)
                .await;

            let err = match result {
                Ok(reply) => {
                    if let UpstreamReply::Json(data) = &reply {
                        self.record_snapshot("post", data, &headers, &url, service, meta);
                    }
                    return Ok(reply);
                }
                Err(e) => e,
            };

            if err.is_auth_invalid() && !replayed && service.auth_mode == AuthMode::Oauth {
                if let Some(auth) = AuthConfig::from_profile(service) {
                    if self
                        .oauth
                        .handle_upstream_invalid_token(&service.key, &auth, &err)
                        .await
                    {
                        info!(provider = %service.key, request = %meta.request_id,
                            "replaying once after OAuth recovery");
                        replayed = true;
                        credential = self.preflight(service).await?;
                        headers = build_headers(service, meta, stream_mode, &credential);
                        continue;
                    }
                }
                return Err(err);
            }

            if err.is_retryable() && attempt < service.retries {
                // rate limits wait out the upstream's Retry-After (bounded);
                // 5xx uses the fixed schedule
                let backoff = match &err {
                    SwitchboardError::RateLimited { retry_after_ms, .. } => {
                        Duration::from_millis((*retry_after_ms).min(10_000))
                    }
                    _ => Duration::from_millis((500 * attempt as u64).min(2000)),
                };
                warn!(provider = %service.key, attempt, err = %err,
                    backoff_ms = backoff.as_millis() as u64, "upstream busy, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
                continue;
            }

            return Err(err);
        }
    }

    /// OAuth preflight in silent mode; API-key and unauthenticated
    /// providers resolve immediately.
    async fn preflight(&self, service: &ServiceProfile) -> Result<Credential> {
        match service.auth_mode {
            AuthMode::None => Ok(Credential::None),
            AuthMode::ApiKey => {
                let key = service.api_key.clone().ok_or_else(|| {
                    SwitchboardError::AuthMissing(format!(
                        "provider '{}' has api-key auth but no key",
                        service.key
                    ))
                })?;
                Ok(Credential::ApiKey(key))
            }
            AuthMode::Oauth => {
                let auth = AuthConfig::from_profile(service).ok_or_else(|| {
                    SwitchboardError::AuthMissing(format!(
                        "provider '{}' has oauth auth but no token_path",
                        service.key
                    ))
                })?;
                let snapshot = self
                    .oauth
                    .ensure_valid(&service.key, &auth, OAuthOptions::default())
                    .await?;
                match (snapshot.access_token, snapshot.api_key) {
                    (Some(token), _) => Ok(Credential::Bearer(token)),
                    (None, Some(key)) => Ok(Credential::ApiKey(key)),
                    (None, None) => Err(SwitchboardError::AuthPreflightFatal(format!(
                        "provider '{}': token file has no usable credential",
                        service.key
                    ))),
                }
            }
        }
    }

    async fn send_once(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &Value,
        stream_mode: StreamMode,
        service: &ServiceProfile,
    ) -> Result<UpstreamReply> {
        // the header map is the single source of truth, so the body is
        // serialized by hand rather than letting .json() set content-type
        let payload = serde_json::to_vec(body)?;
        let mut request = self.client.post(url).body(payload);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        match stream_mode {
            StreamMode::Buffered => {
                let request = request.timeout(Duration::from_millis(service.timeout_ms));
                let response = request.send().await.map_err(transport_error)?;
                let status = response.status().as_u16();
                let retry_after = header_value(&response, "retry-after");
                let text = response.text().await.map_err(transport_error)?;
                if status >= 300 {
                    return Err(classify_status(status, &text, retry_after));
                }
                let data: Value = serde_json::from_str(&text).map_err(|e| {
                    SwitchboardError::UpstreamTransport(format!(
                        "upstream sent unparseable JSON: {e}"
                    ))
                })?;
                if let Some(err) = in_band_error(&data) {
                    return Err(err);
                }
                Ok(UpstreamReply::Json(data))
            }
            StreamMode::Sse => {
                let headers_deadline = Duration::from_millis(service.stream_headers_timeout_ms);
                let response = tokio::time::timeout(headers_deadline, request.send())
                    .await
                    .map_err(|_| SwitchboardError::StreamTimeout {
                        phase: "headers",
                        ms: service.stream_headers_timeout_ms,
                    })?
                    .map_err(transport_error)?;
                let status = response.status().as_u16();
                if status >= 300 {
                    let retry_after = header_value(&response, "retry-after");
                    let text = response.text().await.unwrap_or_default();
                    return Err(classify_status(status, &text, retry_after));
                }
                debug!(url, "upstream SSE stream opened");
                Ok(UpstreamReply::Stream(response))
            }
        }
    }

    fn record_snapshot(
        &self,
        phase: &str,
        data: &Value,
        headers: &BTreeMap<String, String>,
        url: &str,
        service: &ServiceProfile,
        meta: &RuntimeMetadata,
    ) {
        let Some(writer) = &self.snapshots else {
            return;
        };
        writer.record(SnapshotEnvelope {
            phase: phase.to_string(),
            request_id: meta.request_id.clone(),
            data: data.clone(),
            headers: headers.clone(),
            url: url.to_string(),
            entry_endpoint: meta.entry_endpoint.clone(),
            client_request_id: meta.client_header("x-request-id").map(String::from),
            provider_key: service.key.clone(),
            provider_id: meta.provider_id.clone(),
        });
    }
}

/// Bound the gap between stream chunks. The headers timeout has already
/// been enforced by the time this wrapper sees the response.
pub fn idle_bounded_stream(
    response: reqwest::Response,
    idle_ms: u64,
) -> impl Stream<Item = Result<Bytes>> {
    async_stream::try_stream! {
        let mut inner = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(Duration::from_millis(idle_ms), inner.next()).await;
            match next {
                Err(_) => {
                    Err(SwitchboardError::StreamTimeout { phase: "idle", ms: idle_ms })?;
                }
                Ok(None) => break,
                Ok(Some(Ok(chunk))) => yield chunk,
                Ok(Some(Err(e))) => {
                    Err(SwitchboardError::UpstreamTransport(e.to_string()))?;
                }
            }
        }
    }
}

/// Dispatch URL, by priority: a runtime absolute target URL is used
/// verbatim; otherwise the base URL is the runtime override, then the
/// conversion profile's `baseUrl` option, then the service default, joined
/// with the per-request endpoint.
fn resolve_url(
    service: &ServiceProfile,
    conversion: &ConversionProfile,
    meta: &RuntimeMetadata,
    endpoint: &str,
) -> String {
    if let Some(url) = &meta.endpoint_url {
        return url.clone();
    }
    let base = meta
        .base_url
        .as_deref()
        .or_else(|| conversion.options.get("baseUrl").and_then(Value::as_str))
        .unwrap_or(&service.base_url);
    format!("{}{}", base.trim_end_matches('/'), endpoint)
}

fn transport_error(e: reqwest::Error) -> SwitchboardError {
    SwitchboardError::UpstreamTransport(e.to_string())
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Normalize a non-2xx reply: prefer the provider's error code/message from
/// the body, fall back to the raw text. A 429 becomes a rate-limit error
/// carrying the `Retry-After` hint (seconds) as a backoff in milliseconds.
fn classify_status(status: u16, body: &str, retry_after: Option<String>) -> SwitchboardError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error_obj = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .filter(|e| e.is_object());
    let provider_code = error_obj
        .and_then(|e| e.get("code").or_else(|| e.get("type")))
        .and_then(Value::as_str)
        .map(String::from);
    let message = error_obj
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| truncate(body, 512));
    if status == 429 {
        let retry_after_ms = retry_after
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(5000);
        return SwitchboardError::RateLimited {
            retry_after_ms,
            message,
        };
    }
    SwitchboardError::UpstreamStatus {
        status,
        provider_code,
        message,
    }
}

/// 2xx responses can still carry an in-band failure; surface those as
/// business errors instead of handing clients a husk.
fn in_band_error(data: &Value) -> Option<SwitchboardError> {
    let error = data.get("error")?;
    if !error.is_object() {
        return None;
    }
    let code = error
        .get("code")
        .or_else(|| error.get("type"))
        .and_then(Value::as_str)?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("upstream reported an error")
        .to_string();
    Some(SwitchboardError::UpstreamBusiness {
        code: code.to_string(),
        message,
    })
}

fn truncate(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
