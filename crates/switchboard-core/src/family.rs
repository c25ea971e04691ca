use serde::{Deserialize, Serialize};

/// Wire protocols the proxy can speak on either side of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "openai-chat")]
    OpenAiChat,
    #[serde(rename = "openai-responses")]
    OpenAiResponses,
    #[serde(rename = "anthropic-messages")]
    AnthropicMessages,
}

impl Protocol {
    /// The canonical endpoint path a client uses for this protocol.
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            Protocol::OpenAiChat => "/v1/chat/completions",
            Protocol::OpenAiResponses => "/v1/responses",
            Protocol::AnthropicMessages => "/v1/messages",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Protocol::OpenAiChat => "openai-chat",
            Protocol::OpenAiResponses => "openai-responses",
            Protocol::AnthropicMessages => "anthropic-messages",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Provider family — selects header quirks, signing, and stream-mode hooks
/// in the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderFamily {
    #[default]
    Generic,
    Anthropic,
    Gemini,
    Iflow,
    Glm,
    Antigravity,
}

impl ProviderFamily {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderFamily::Generic => "generic",
            ProviderFamily::Anthropic => "anthropic",
            ProviderFamily::Gemini => "gemini",
            ProviderFamily::Iflow => "iflow",
            ProviderFamily::Glm => "glm",
            ProviderFamily::Antigravity => "antigravity",
        }
    }

    /// Families that never receive session/conversation id headers.
    pub fn strips_session_ids(&self) -> bool {
        matches!(self, ProviderFamily::Antigravity | ProviderFamily::Gemini)
    }

    /// Families that never receive an `originator` header.
    pub fn strips_originator(&self) -> bool {
        matches!(self, ProviderFamily::Gemini)
    }
}

/// User-agent compatibility mode, activated via the `UA_MODE` env var.
/// `Codex` turns on deterministic session/conversation id synthesis for
/// clients that do not send their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum UaMode {
    #[default]
    Default,
    Codex,
}

impl UaMode {
    pub fn from_env() -> Self {
        match std::env::var("UA_MODE").as_deref() {
            Ok("codex") => UaMode::Codex,
            _ => UaMode::Default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_serde_names() {
        let p: Protocol = serde_json::from_str(r#""anthropic-messages""#).unwrap();
        assert_eq!(p, Protocol::AnthropicMessages);
        assert_eq!(
            serde_json::to_string(&Protocol::OpenAiChat).unwrap(),
            r#""openai-chat""#
        );
    }

    #[test]
    fn family_header_stripping() {
        assert!(ProviderFamily::Gemini.strips_session_ids());
        assert!(ProviderFamily::Gemini.strips_originator());
        assert!(ProviderFamily::Antigravity.strips_session_ids());
        assert!(!ProviderFamily::Antigravity.strips_originator());
        assert!(!ProviderFamily::Iflow.strips_session_ids());
    }
}
