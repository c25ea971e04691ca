use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SwitchboardError};
use crate::family::{ProviderFamily, UaMode};

pub const DEFAULT_PORT: u16 = 18100;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Default upstream request deadline.
pub const DEFAULT_TIMEOUT_MS: u64 = 500_000;
/// Default attempt limit. 1 means no retry; fail-over is the caller's job.
pub const DEFAULT_RETRIES: u32 = 1;
pub const DEFAULT_STREAM_IDLE_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_STREAM_HEADERS_TIMEOUT_MS: u64 = 30_000;

/// Top-level config (switchboard.toml + SWITCHBOARD_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Location of the conversion-profiles JSON document. Relative paths are
    /// resolved against the config file's directory by the orchestrator.
    #[serde(default = "default_profiles_path")]
    pub profiles_path: String,
    /// Providers keyed by the name routes refer to.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Provider used when a route does not name one.
    pub default_provider: Option<String>,
    /// Command used to open the interactive re-auth URL. Overridden by the
    /// OAUTH_BROWSER env var.
    pub oauth_browser: Option<String>,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            profiles_path: default_profiles_path(),
            providers: HashMap::new(),
            default_provider: None,
            oauth_browser: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// A single upstream provider entry.
///
/// Base URLs are auto-filled for known families (anthropic, glm, iflow,
/// gemini); generic providers must set one. With
/// USE_CONFIG_CORE_PROVIDER_DEFAULTS set, auto-fill is disabled and a
/// missing base URL or endpoint fails fast at resolve time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub family: ProviderFamily,
    pub base_url: Option<String>,
    /// Endpoint path appended to base_url, e.g. "/chat/completions".
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    /// Path to an OAuth token file. Presence selects OAuth auth mode.
    pub token_path: Option<String>,
    /// Token refresh endpoint for OAuth providers.
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    /// Header overrides — the highest-priority slot in header assembly.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub stream_idle_timeout_ms: Option<u64>,
    pub stream_headers_timeout_ms: Option<u64>,
}

/// How a provider authenticates outbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    ApiKey,
    Oauth,
    None,
}

/// Immutable per-provider snapshot handed to transport. Rebuilt whenever
/// configuration is injected; env overrides are baked in at resolve time.
#[derive(Debug, Clone)]
pub struct ServiceProfile {
    pub key: String,
    pub family: ProviderFamily,
    pub base_url: String,
    pub endpoint: String,
    pub model: Option<String>,
    pub auth_mode: AuthMode,
    pub api_key: Option<String>,
    pub token_path: Option<String>,
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout_ms: u64,
    pub retries: u32,
    pub stream_idle_timeout_ms: u64,
    pub stream_headers_timeout_ms: u64,
    pub ua_mode: UaMode,
}

impl SwitchboardConfig {
    /// Load config from a TOML file with SWITCHBOARD_* env var overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let mut config: SwitchboardConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SWITCHBOARD_").split("__"))
            .extract()
            .map_err(|e| SwitchboardError::Config(e.to_string()))?;

        if let Ok(p) = std::env::var("SWITCHBOARD_PROFILES_PATH") {
            config.profiles_path = p;
        }
        if let Ok(cmd) = std::env::var("OAUTH_BROWSER") {
            config.oauth_browser = Some(cmd);
        }

        Ok(config)
    }

    /// Resolve every configured provider into an immutable service profile.
    pub fn service_profiles(&self) -> Result<HashMap<String, ServiceProfile>> {
        let ua_mode = UaMode::from_env();
        self.providers
            .iter()
            .map(|(key, cfg)| ServiceProfile::resolve(key, cfg, ua_mode).map(|p| (key.clone(), p)))
            .collect()
    }
}

impl ServiceProfile {
    pub fn resolve(key: &str, cfg: &ProviderConfig, ua_mode: UaMode) -> Result<Self> {
        let strict = env_flag("USE_CONFIG_CORE_PROVIDER_DEFAULTS");

        let base_url = match (&cfg.base_url, strict) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, true) => {
                return Err(SwitchboardError::Config(format!(
                    "provider '{key}': base_url required (strict provider defaults)"
                )))
            }
            (None, false) => family_base_url(cfg.family).ok_or_else(|| {
                SwitchboardError::Config(format!(
                    "provider '{key}': base_url required for family '{}'",
                    cfg.family.name()
                ))
            })?,
        };

        let endpoint = match (&cfg.endpoint, strict) {
            (Some(ep), _) => ep.clone(),
            (None, true) => {
                return Err(SwitchboardError::Config(format!(
                    "provider '{key}': endpoint required (strict provider defaults)"
                )))
            }
            (None, false) => family_endpoint(cfg.family).to_string(),
        };

        let auth_mode = if cfg.token_path.is_some() {
            AuthMode::Oauth
        } else if cfg.api_key.is_some() {
            AuthMode::ApiKey
        } else {
            AuthMode::None
        };

        Ok(ServiceProfile {
            key: key.to_string(),
            family: cfg.family,
            base_url,
            endpoint,
            model: cfg.model.clone(),
            auth_mode,
            api_key: cfg.api_key.clone(),
            token_path: cfg.token_path.clone(),
            token_url: cfg.token_url.clone(),
            client_id: cfg.client_id.clone(),
            headers: cfg.headers.clone(),
            timeout_ms: env_u64("PROVIDER_TIMEOUT_MS")
                .or(cfg.timeout_ms)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
            retries: env_u64("PROVIDER_RETRIES")
                .map(|v| v as u32)
                .or(cfg.retries)
                .unwrap_or(DEFAULT_RETRIES),
            stream_idle_timeout_ms: env_u64("PROVIDER_STREAM_IDLE_TIMEOUT_MS")
                .or(cfg.stream_idle_timeout_ms)
                .unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT_MS),
            stream_headers_timeout_ms: env_u64("PROVIDER_STREAM_HEADERS_TIMEOUT_MS")
                .or(cfg.stream_headers_timeout_ms)
                .unwrap_or(DEFAULT_STREAM_HEADERS_TIMEOUT_MS),
            ua_mode,
        })
    }
}

fn family_base_url(family: ProviderFamily) -> Option<String> {
    match family {
        ProviderFamily::Anthropic => Some("https://api.anthropic.com".to_string()),
        ProviderFamily::Glm => Some("https://open.bigmodel.cn/api/paas/v4".to_string()),
        ProviderFamily::Iflow => Some("https://apis.iflow.cn/v1".to_string()),
        ProviderFamily::Gemini => {
            Some("https://generativelanguage.googleapis.com/v1beta".to_string())
        }
        ProviderFamily::Generic | ProviderFamily::Antigravity => None,
    }
}

fn family_endpoint(family: ProviderFamily) -> &'static str {
    match family {
        ProviderFamily::Anthropic => "/v1/messages",
        ProviderFamily::Glm | ProviderFamily::Iflow => "/chat/completions",
        _ => "/v1/chat/completions",
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_profiles_path() -> String {
    "profiles.json".to_string()
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.switchboard/switchboard.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(family: ProviderFamily) -> ProviderConfig {
        ProviderConfig {
            family,
            ..Default::default()
        }
    }

    #[test]
    fn known_family_base_url_auto_fills() {
        let profile =
            ServiceProfile::resolve("glm", &provider(ProviderFamily::Glm), UaMode::Default)
                .unwrap();
        assert_eq!(profile.base_url, "https://open.bigmodel.cn/api/paas/v4");
        assert_eq!(profile.endpoint, "/chat/completions");
        assert_eq!(profile.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(profile.retries, DEFAULT_RETRIES);
    }

    #[test]
    fn generic_provider_requires_base_url() {
        let err =
            ServiceProfile::resolve("custom", &provider(ProviderFamily::Generic), UaMode::Default)
                .unwrap_err();
        assert!(matches!(err, SwitchboardError::Config(_)));
    }

    #[test]
    fn token_path_selects_oauth_mode() {
        let cfg = ProviderConfig {
            family: ProviderFamily::Iflow,
            token_path: Some("/tmp/iflow.json".into()),
            api_key: Some("unused".into()),
            ..Default::default()
        };
        let profile = ServiceProfile::resolve("iflow", &cfg, UaMode::Default).unwrap();
        assert_eq!(profile.auth_mode, AuthMode::Oauth);
    }

    #[test]
    fn trailing_slash_trimmed_from_base_url() {
        let cfg = ProviderConfig {
            base_url: Some("http://localhost:9000/".into()),
            ..Default::default()
        };
        let profile = ServiceProfile::resolve("local", &cfg, UaMode::Default).unwrap();
        assert_eq!(profile.base_url, "http://localhost:9000");
    }
}
