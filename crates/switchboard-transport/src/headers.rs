//! Upstream header assembly.
//!
//! Each header slot is filled by priority: provider config overrides, then
//! inbound client headers, then hard defaults. Two slots break the pattern:
//! `Accept` is owned by the stream-mode selector and ignores both config and
//! inbound values, and the iFlow family prefers its configured User-Agent
//! over the inbound one because some iFlow models validate UA strings.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use switchboard_core::config::ServiceProfile;
use switchboard_core::context::RuntimeMetadata;
use switchboard_core::family::{ProviderFamily, UaMode};

use crate::dispatch::StreamMode;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_USER_AGENT: &str = concat!("switchboard/", env!("CARGO_PKG_VERSION"));
const ANTHROPIC_VERSION: &str = "2023-06-01";
const GEMINI_CLIENT_METADATA: &str =
    "ideType=IDE_UNSPECIFIED,platform=PLATFORM_UNSPECIFIED,pluginType=GEMINI";

/// Resolved outbound credential, produced by the dispatch preflight.
#[derive(Debug, Clone)]
pub enum Credential {
    Bearer(String),
    ApiKey(String),
    None,
}

/// Assemble the full outbound header map. Keys are lower-cased; the
/// dispatcher converts to a reqwest `HeaderMap` at send time.
pub fn build_headers(
    profile: &ServiceProfile,
    meta: &RuntimeMetadata,
    stream_mode: StreamMode,
    credential: &Credential,
) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    headers.insert("content-type".into(), "application/json".into());

    // configured UA outranks the inbound one; this matters for iFlow, whose
    // models validate UA strings, and is harmless elsewhere
    let user_agent = config_header(profile, "user-agent")
        .or_else(|| meta.user_agent.clone())
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
    headers.insert("user-agent".into(), user_agent);

    // originator is never synthesized: forwarded only when config or the
    // client provided one, and never to Gemini
    if !profile.family.strips_originator() {
        if let Some(originator) = config_header(profile, "originator")
            .or_else(|| meta.originator.clone())
        {
            headers.insert("originator".into(), originator);
        }
    }

    let session_id = resolve_conversation_header(profile, meta, "session");
    if !profile.family.strips_session_ids() {
        if let Some(id) = &session_id {
            headers.insert("session_id".into(), id.clone());
        }
        if let Some(id) = resolve_conversation_header(profile, meta, "conversation") {
            headers.insert("conversation_id".into(), id);
        }
    }

    match credential {
        Credential::Bearer(token) => {
            headers.insert("authorization".into(), format!("Bearer {token}"));
            if profile.family == ProviderFamily::Anthropic {
                headers.insert("anthropic-version".into(), ANTHROPIC_VERSION.into());
            }
        }
        Credential::ApiKey(key) => {
            if profile.family == ProviderFamily::Anthropic {
                headers.insert("x-api-key".into(), key.clone());
                headers.insert("anthropic-version".into(), ANTHROPIC_VERSION.into());
            } else {
                headers.insert("authorization".into(), format!("Bearer {key}"));
            }
        }
        Credential::None => {}
    }

    if profile.family == ProviderFamily::Gemini {
        headers.insert("x-goog-api-client".into(), DEFAULT_USER_AGENT.to_string());
        headers.insert("client-metadata".into(), GEMINI_CLIENT_METADATA.into());
        headers.insert("accept-encoding".into(), "gzip, deflate, br".into());
    }

    // config overrides win every slot except Accept
    for (name, value) in &profile.headers {
        let name = name.to_lowercase();
        if name == "accept" {
            continue;
        }
        headers.insert(name, value.clone());
    }

    // Accept is authoritative from the stream-mode decision
    headers.insert(
        "accept".into(),
        match stream_mode {
            StreamMode::Sse => "text/event-stream".into(),
            StreamMode::Buffered => "application/json".into(),
        },
    );

    if profile.family == ProviderFamily::Iflow {
        sign_iflow(&mut headers, session_id.as_deref().unwrap_or(""));
    }

    headers
}

fn config_header(profile: &ServiceProfile, name: &str) -> Option<String> {
    profile
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}

/// session_id / conversation_id forwarding. Codex UA mode additionally
/// honors the `anthropic-*` aliases and synthesizes a deterministic id when
/// the client sent none.
fn resolve_conversation_header(
    profile: &ServiceProfile,
    meta: &RuntimeMetadata,
    kind: &str,
) -> Option<String> {
    let primary = format!("{kind}_id");
    if let Some(v) = meta.client_header(&primary) {
        return Some(v.to_string());
    }
    if profile.ua_mode == UaMode::Codex {
        let alias = format!("anthropic-{kind}-id");
        if let Some(v) = meta.client_header(&alias) {
            return Some(v.to_string());
        }
        return Some(synthesize_codex_id(kind, meta));
    }
    None
}

/// `codex_cli_<kind>_<requestId[_routeName]>`, hashed and truncated so the
/// value is stable per request but never leaks the raw request id.
fn synthesize_codex_id(kind: &str, meta: &RuntimeMetadata) -> String {
    let seed = match &meta.route_name {
        Some(route) => format!("codex_cli_{kind}_{}_{route}", meta.request_id),
        None => format!("codex_cli_{kind}_{}", meta.request_id),
    };
    let digest = Sha256::digest(seed.as_bytes());
    let mut hashed = hex::encode(digest);
    hashed.truncate(64);
    hashed
}

/// iFlow request signature: when the request authenticates with
/// `Bearer <apiKey>`, emit `x-iflow-timestamp` and
/// `x-iflow-signature = HMAC-SHA256(apiKey, "<UA>:<sessionId>:<timestamp>")`
/// as lowercase hex.
fn sign_iflow(headers: &mut BTreeMap<String, String>, session_id: &str) {
    let Some(api_key) = headers
        .get("authorization")
        .and_then(|a| a.strip_prefix("Bearer "))
        .map(String::from)
    else {
        return;
    };
    let user_agent = headers.get("user-agent").cloned().unwrap_or_default();
    let timestamp = chrono::Utc::now().timestamp_millis().to_string();

    let payload = format!("{user_agent}:{session_id}:{timestamp}");
    let mut mac =
        HmacSha256::new_from_slice(api_key.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    headers.insert("x-iflow-timestamp".into(), timestamp);
    headers.insert("x-iflow-signature".into(), signature);
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::config::{AuthMode, ServiceProfile};

    fn profile(family: ProviderFamily) -> ServiceProfile {
        ServiceProfile {
            key: "p".into(),
            family,
            base_url: "http://upstream".into(),
            endpoint: "/v1/chat/completions".into(),
            model: None,
            auth_mode: AuthMode::ApiKey,
            api_key: Some("k".into()),
            token_path: None,
            token_url: None,
            client_id: None,
            headers: Default::default(),
            timeout_ms: 1000,
            retries: 1,
            stream_idle_timeout_ms: 1000,
            stream_headers_timeout_ms: 1000,
            ua_mode: UaMode::Default,
        }
    }

    fn meta() -> RuntimeMetadata {
        RuntimeMetadata {
            request_id: "req-1".into(),
            entry_endpoint: "/v1/messages".into(),
            ..Default::default()
        }
    }

    #[test]
    fn accept_follows_stream_mode_not_inbound() {
        let mut m = meta();
        m.client_headers
            .insert("accept".into(), "application/xml".into());
        let h = build_headers(
            &profile(ProviderFamily::Generic),
            &m,
            StreamMode::Sse,
            &Credential::None,
        );
        assert_eq!(h["accept"], "text/event-stream");

        let h = build_headers(
            &profile(ProviderFamily::Generic),
            &m,
            StreamMode::Buffered,
            &Credential::None,
        );
        assert_eq!(h["accept"], "application/json");
    }

    #[test]
    fn config_override_cannot_claim_accept() {
        let mut p = profile(ProviderFamily::Generic);
        p.headers.insert("Accept".into(), "text/plain".into());
        p.headers.insert("X-Custom".into(), "yes".into());
        let h = build_headers(&p, &meta(), StreamMode::Buffered, &Credential::None);
        assert_eq!(h["accept"], "application/json");
        assert_eq!(h["x-custom"], "yes");
    }

    #[test]
    fn anthropic_family_uses_x_api_key_and_version() {
        let h = build_headers(
            &profile(ProviderFamily::Anthropic),
            &meta(),
            StreamMode::Buffered,
            &Credential::ApiKey("sk-ant".into()),
        );
        assert_eq!(h["x-api-key"], "sk-ant");
        assert_eq!(h["anthropic-version"], ANTHROPIC_VERSION);
        assert!(!h.contains_key("authorization"));

        let h = build_headers(
            &profile(ProviderFamily::Anthropic),
            &meta(),
            StreamMode::Buffered,
            &Credential::Bearer("oat".into()),
        );
        assert_eq!(h["authorization"], "Bearer oat");
    }

    #[test]
    fn gemini_family_strips_ids_and_adds_client_headers() {
        let mut m = meta();
        m.client_headers
            .insert("session_id".into(), "sess-1".into());
        m.originator = Some("cli".into());
        let h = build_headers(
            &profile(ProviderFamily::Gemini),
            &m,
            StreamMode::Buffered,
            &Credential::Bearer("t".into()),
        );
        assert!(!h.contains_key("session_id"));
        assert!(!h.contains_key("originator"));
        assert_eq!(h["client-metadata"], GEMINI_CLIENT_METADATA);
        assert_eq!(h["accept-encoding"], "gzip, deflate, br");
        assert!(h.contains_key("x-goog-api-client"));
    }

    #[test]
    fn originator_forwarded_but_never_synthesized() {
        let h = build_headers(
            &profile(ProviderFamily::Generic),
            &meta(),
            StreamMode::Buffered,
            &Credential::None,
        );
        assert!(!h.contains_key("originator"));

        let mut m = meta();
        m.originator = Some("my-cli".into());
        let h = build_headers(
            &profile(ProviderFamily::Generic),
            &m,
            StreamMode::Buffered,
            &Credential::None,
        );
        assert_eq!(h["originator"], "my-cli");
    }

    #[test]
    fn session_ids_forward_from_inbound_headers() {
        let mut m = meta();
        m.client_headers
            .insert("session_id".into(), "sess-9".into());
        m.client_headers
            .insert("conversation_id".into(), "conv-9".into());
        let h = build_headers(
            &profile(ProviderFamily::Generic),
            &m,
            StreamMode::Buffered,
            &Credential::None,
        );
        assert_eq!(h["session_id"], "sess-9");
        assert_eq!(h["conversation_id"], "conv-9");
    }

    #[test]
    fn codex_mode_honors_aliases_and_synthesizes_deterministic_ids() {
        let mut p = profile(ProviderFamily::Generic);
        p.ua_mode = UaMode::Codex;

        let mut m = meta();
        m.client_headers
            .insert("anthropic-session-id".into(), "alias-sess".into());
        let h = build_headers(&p, &m, StreamMode::Buffered, &Credential::None);
        assert_eq!(h["session_id"], "alias-sess");
        // conversation id synthesized: stable and hex
        let conv = &h["conversation_id"];
        assert_eq!(conv.len(), 64);
        let again = build_headers(&p, &m, StreamMode::Buffered, &Credential::None);
        assert_eq!(&again["conversation_id"], conv);

        // route name changes the digest
        let mut routed = m.clone();
        routed.route_name = Some("primary".into());
        let h2 = build_headers(&p, &routed, StreamMode::Buffered, &Credential::None);
        assert_ne!(&h2["conversation_id"], conv);
    }

    #[test]
    fn iflow_signature_matches_hmac_of_ua_session_timestamp() {
        let mut p = profile(ProviderFamily::Iflow);
        p.headers.insert("User-Agent".into(), "iflow-cli/2".into());
        let mut m = meta();
        m.client_headers
            .insert("session_id".into(), "sess-sig".into());

        let h = build_headers(
            &p,
            &m,
            StreamMode::Buffered,
            &Credential::ApiKey("key-1".into()),
        );
        let timestamp = &h["x-iflow-timestamp"];
        let payload = format!("iflow-cli/2:sess-sig:{timestamp}");
        let mut mac = HmacSha256::new_from_slice(b"key-1").unwrap();
        mac.update(payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());
        assert_eq!(h["x-iflow-signature"], expected);
    }

    #[test]
    fn iflow_profile_ua_wins_over_inbound() {
        let mut p = profile(ProviderFamily::Iflow);
        p.headers.insert("User-Agent".into(), "iflow-cli/2".into());
        let mut m = meta();
        m.user_agent = Some("someone-else/1".into());
        let h = build_headers(&p, &m, StreamMode::Buffered, &Credential::None);
        assert_eq!(h["user-agent"], "iflow-cli/2");
    }
}
