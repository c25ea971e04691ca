//! Conversion profile table, parsed from the profiles JSON document.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use switchboard_core::error::{Result, SwitchboardError};
use switchboard_core::family::Protocol;

/// Which bidirectional converter a profile uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecId {
    #[serde(rename = "openai-openai")]
    OpenAiOpenAi,
    #[serde(rename = "anthropic-openai")]
    AnthropicOpenAi,
    #[serde(rename = "responses-openai")]
    ResponsesOpenAi,
}

impl CodecId {
    pub fn name(&self) -> &'static str {
        match self {
            CodecId::OpenAiOpenAi => "openai-openai",
            CodecId::AnthropicOpenAi => "anthropic-openai",
            CodecId::ResponsesOpenAi => "responses-openai",
        }
    }
}

/// Immutable translation recipe. Created at startup from the profiles file,
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionProfile {
    /// Filled from the document key, not the JSON body.
    #[serde(skip)]
    pub id: String,
    pub incoming_protocol: Protocol,
    pub outgoing_protocol: Protocol,
    pub codec: CodecId,
    pub input_schema: Option<String>,
    pub canonical_request_schema: Option<String>,
    pub canonical_response_schema: Option<String>,
    pub provider_response_schema: Option<String>,
    pub client_response_schema: Option<String>,
    #[serde(default)]
    pub trace: bool,
    #[serde(default)]
    pub options: HashMap<String, Value>,
}

impl ConversionProfile {
    /// A profile whose two sides speak the same protocol; streams for these
    /// are proxied end-to-end instead of being buffered and re-synthesized.
    pub fn is_passthrough(&self) -> bool {
        self.incoming_protocol == self.outgoing_protocol
    }
}

/// Raw document shape: `{"profiles": {...}, "endpointBindings": {...}}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfilesFile {
    profiles: serde_json::Map<String, Value>,
    #[serde(default)]
    endpoint_bindings: HashMap<String, String>,
    default_profile: Option<String>,
}

/// Parsed, order-preserving profile table. Write-once at initialize.
#[derive(Debug, Default)]
pub struct ProfileTable {
    /// Profiles in document order; the first entry is the fallback of last
    /// resort during resolution.
    pub profiles: Vec<ConversionProfile>,
    index: HashMap<String, usize>,
    pub endpoint_bindings: HashMap<String, String>,
    pub default_profile: Option<String>,
}

impl ProfileTable {
    pub fn parse(document: &str) -> Result<Self> {
        let file: ProfilesFile = serde_json::from_str(document)?;
        if file.profiles.is_empty() {
            return Err(SwitchboardError::NoProfile(
                "profiles document defines no profiles".into(),
            ));
        }

        let mut profiles = Vec::with_capacity(file.profiles.len());
        let mut index = HashMap::new();
        for (id, body) in file.profiles {
            let mut profile: ConversionProfile = serde_json::from_value(body).map_err(|e| {
                SwitchboardError::Config(format!("profile '{id}' is malformed: {e}"))
            })?;
            profile.id = id.clone();
            index.insert(id, profiles.len());
            profiles.push(profile);
        }

        if let Some(default) = &file.default_profile {
            if !index.contains_key(default) {
                return Err(SwitchboardError::Config(format!(
                    "defaultProfile '{default}' does not name a profile"
                )));
            }
        }
        for (endpoint, profile_id) in &file.endpoint_bindings {
            if !index.contains_key(profile_id) {
                return Err(SwitchboardError::Config(format!(
                    "endpoint binding '{endpoint}' references unknown profile '{profile_id}'"
                )));
            }
        }

        Ok(Self {
            profiles,
            index,
            endpoint_bindings: file.endpoint_bindings,
            default_profile: file.default_profile,
        })
    }

    pub fn get(&self, id: &str) -> Option<&ConversionProfile> {
        self.index.get(id).map(|&i| &self.profiles[i])
    }

    pub fn by_endpoint(&self, endpoint: &str) -> Option<&ConversionProfile> {
        self.endpoint_bindings
            .get(endpoint)
            .and_then(|id| self.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "profiles": {
            "zz-first": {
                "incomingProtocol": "anthropic-messages",
                "outgoingProtocol": "openai-chat",
                "codec": "anthropic-openai"
            },
            "aa-second": {
                "incomingProtocol": "openai-chat",
                "outgoingProtocol": "openai-chat",
                "codec": "openai-openai",
                "trace": true
            }
        },
        "endpointBindings": { "/v1/messages": "zz-first" }
    }"#;

    #[test]
    fn parses_profiles_in_document_order() {
        let table = ProfileTable::parse(DOC).unwrap();
        assert_eq!(table.profiles.len(), 2);
        assert_eq!(table.profiles[0].id, "zz-first");
        assert_eq!(table.profiles[1].id, "aa-second");
        assert!(table.profiles[1].is_passthrough());
        assert!(!table.profiles[0].is_passthrough());
    }

    #[test]
    fn endpoint_binding_resolves() {
        let table = ProfileTable::parse(DOC).unwrap();
        let p = table.by_endpoint("/v1/messages").unwrap();
        assert_eq!(p.id, "zz-first");
        assert!(table.by_endpoint("/v1/other").is_none());
    }

    #[test]
    fn empty_profiles_rejected() {
        let err = ProfileTable::parse(r#"{"profiles": {}}"#).unwrap_err();
        assert!(matches!(err, SwitchboardError::NoProfile(_)));
    }

    #[test]
    fn dangling_binding_rejected() {
        let doc = r#"{
            "profiles": {
                "p": {"incomingProtocol": "openai-chat", "outgoingProtocol": "openai-chat", "codec": "openai-openai"}
            },
            "endpointBindings": {"/v1/messages": "ghost"}
        }"#;
        assert!(ProfileTable::parse(doc).is_err());
    }
}
