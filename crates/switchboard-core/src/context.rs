use std::collections::HashMap;

use serde_json::Value;

use crate::family::{Protocol, ProviderFamily};

/// Per-request conversion metadata, created when the inbound request is
/// parsed and carried by value through the pipeline. Only the creating
/// handler mutates it; downstream stages read.
#[derive(Debug, Clone)]
pub struct ConversionContext {
    pub request_id: String,
    /// Path the request will be dispatched to upstream (codec may override).
    pub endpoint: String,
    /// Path the client called us on, e.g. `/v1/messages`.
    pub entry_endpoint: String,
    /// Protocol the upstream is expected to speak, when known up front.
    pub target_protocol: Option<Protocol>,
    pub stream: bool,
    /// Arbitrary client metadata: user agent, session ids, an explicit
    /// conversion profile id, feature flags like `iflowWebSearch`.
    pub metadata: HashMap<String, Value>,
}

impl ConversionContext {
    pub fn new(request_id: impl Into<String>, entry_endpoint: impl Into<String>) -> Self {
        let entry = entry_endpoint.into();
        Self {
            request_id: request_id.into(),
            endpoint: entry.clone(),
            entry_endpoint: entry,
            target_protocol: None,
            stream: false,
            metadata: HashMap::new(),
        }
    }

    /// Explicit conversion profile requested by the client, if any.
    pub fn profile_id(&self) -> Option<&str> {
        self.metadata
            .get("conversionProfileId")
            .and_then(Value::as_str)
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn metadata_flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Side-band per-request annotations written by the gateway preprocessor and
/// read by transport and codec layers. Never serialized into the wire body.
#[derive(Debug, Clone, Default)]
pub struct RuntimeMetadata {
    pub request_id: String,
    pub route_name: Option<String>,
    pub provider_key: String,
    pub provider_id: String,
    pub family: ProviderFamily,
    pub protocol: Option<Protocol>,
    pub pipeline_id: Option<String>,
    /// Human-readable target descriptor, e.g. `glm@open.bigmodel.cn`.
    pub target: Option<String>,
    /// Runtime absolute target URL. When set it is dispatched to verbatim;
    /// no base/endpoint joining happens. Outranks every other tier.
    pub endpoint_url: Option<String>,
    /// Runtime base-URL override, joined with the resolved per-request
    /// endpoint. Outranks profile option overrides and service defaults.
    pub base_url: Option<String>,
    /// Inbound client headers relevant to forwarding (lower-cased names).
    pub client_headers: HashMap<String, String>,
    pub user_agent: Option<String>,
    pub originator: Option<String>,
    pub entry_endpoint: String,
    pub stream: bool,
}

impl RuntimeMetadata {
    pub fn client_header(&self, name: &str) -> Option<&str> {
        self.client_headers.get(name).map(String::as_str)
    }
}
