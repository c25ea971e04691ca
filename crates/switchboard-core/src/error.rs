use serde::Serialize;
use thiserror::Error;

/// Pipeline error taxonomy. Every variant maps to a stable short code and an
/// HTTP status so the gateway can render the normalized client shape without
/// inspecting variant internals.
#[derive(Debug, Error)]
pub enum SwitchboardError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Schema validation failed at {phase}: {message}")]
    SchemaValidation { phase: String, message: String },

    #[error("No conversion profile resolvable: {0}")]
    NoProfile(String),

    #[error("Codec failure: {0}")]
    Codec(String),

    #[error("No usable credential: {0}")]
    AuthMissing(String),

    #[error("Upstream rejected credential: {0}")]
    AuthInvalid(String),

    #[error("Credential unusable before dispatch: {0}")]
    AuthPreflightFatal(String),

    #[error("Upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("Upstream returned {status}: {message}")]
    UpstreamStatus {
        status: u16,
        /// Provider error code extracted from the body, when present.
        provider_code: Option<String>,
        message: String,
    },

    #[error("Upstream business failure ({code}): {message}")]
    UpstreamBusiness { code: String, message: String },

    #[error("Upstream rate limited, retry after {retry_after_ms}ms: {message}")]
    RateLimited { retry_after_ms: u64, message: String },

    #[error("Stream timeout ({phase}) after {ms}ms")]
    StreamTimeout { phase: &'static str, ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwitchboardError {
    /// Short error code string sent to clients in the normalized error body.
    pub fn code(&self) -> String {
        match self {
            SwitchboardError::BadRequest(_) => "BAD_REQUEST".into(),
            SwitchboardError::SchemaValidation { .. } => "SCHEMA_VALIDATION".into(),
            SwitchboardError::NoProfile(_) => "NO_PROFILE".into(),
            SwitchboardError::Codec(_) => "CODEC_ERROR".into(),
            SwitchboardError::AuthMissing(_) => "AUTH_MISSING".into(),
            SwitchboardError::AuthInvalid(_) => "AUTH_INVALID_TOKEN".into(),
            SwitchboardError::AuthPreflightFatal(_) => "AUTH_PREFLIGHT_FATAL".into(),
            SwitchboardError::UpstreamTransport(_) => "UPSTREAM_TRANSPORT".into(),
            SwitchboardError::UpstreamStatus {
                status,
                provider_code,
                ..
            } => provider_code
                .clone()
                .unwrap_or_else(|| format!("HTTP_{status}")),
            SwitchboardError::UpstreamBusiness { code, .. } => code.clone(),
            SwitchboardError::RateLimited { .. } => "HTTP_429".into(),
            SwitchboardError::StreamTimeout { .. } => "STREAM_TIMEOUT".into(),
            SwitchboardError::Config(_) => "CONFIG_ERROR".into(),
            SwitchboardError::Serialization(_) => "SERIALIZATION_ERROR".into(),
            SwitchboardError::Io(_) => "IO_ERROR".into(),
            SwitchboardError::Internal(_) => "INTERNAL_ERROR".into(),
        }
    }

    /// HTTP status the gateway replies with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            SwitchboardError::BadRequest(_)
            | SwitchboardError::SchemaValidation { .. }
            | SwitchboardError::NoProfile(_) => 400,
            SwitchboardError::AuthMissing(_)
            | SwitchboardError::AuthInvalid(_)
            | SwitchboardError::AuthPreflightFatal(_) => 401,
            SwitchboardError::UpstreamStatus { status, .. } => *status,
            SwitchboardError::RateLimited { .. } => 429,
            SwitchboardError::StreamTimeout { .. } => 504,
            SwitchboardError::UpstreamTransport(_)
            | SwitchboardError::UpstreamBusiness { .. } => 502,
            _ => 500,
        }
    }

    /// Whether transport may attempt another try for this error, within the
    /// configured attempt limit: 5xx upstream statuses and rate limits.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwitchboardError::UpstreamStatus { status, .. } if *status >= 500
        ) || matches!(self, SwitchboardError::RateLimited { .. })
    }

    /// Whether this is a 401-class credential rejection eligible for one
    /// OAuth recovery attempt.
    pub fn is_auth_invalid(&self) -> bool {
        match self {
            SwitchboardError::AuthInvalid(_) => true,
            SwitchboardError::UpstreamStatus { status, .. } => *status == 401,
            _ => false,
        }
    }
}

/// Normalized error shape emitted to clients:
/// `{statusCode, code, message, response:{data:{error:{code,message}}}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub code: String,
    pub message: String,
    pub response: ErrorResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub data: ErrorData,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorData {
    pub error: ErrorInner,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorInner {
    pub code: String,
    pub message: String,
}

impl From<&SwitchboardError> for ErrorBody {
    fn from(err: &SwitchboardError) -> Self {
        let code = err.code();
        let message = err.to_string();
        ErrorBody {
            status_code: err.status_code(),
            code: code.clone(),
            message: message.clone(),
            response: ErrorResponse {
                data: ErrorData {
                    error: ErrorInner { code, message },
                },
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, SwitchboardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_code_prefers_provider_code() {
        let err = SwitchboardError::UpstreamStatus {
            status: 503,
            provider_code: Some("overloaded".into()),
            message: "busy".into(),
        };
        assert_eq!(err.code(), "overloaded");
        assert!(err.is_retryable());

        let err = SwitchboardError::UpstreamStatus {
            status: 418,
            provider_code: None,
            message: "teapot".into(),
        };
        assert_eq!(err.code(), "HTTP_418");
        assert!(!err.is_retryable());
    }

    #[test]
    fn rate_limited_is_retryable_with_429() {
        let err = SwitchboardError::RateLimited {
            retry_after_ms: 1500,
            message: "slow down".into(),
        };
        assert_eq!(err.status_code(), 429);
        assert_eq!(err.code(), "HTTP_429");
        assert!(err.is_retryable());
        assert!(!err.is_auth_invalid());
    }

    #[test]
    fn auth_invalid_has_401_and_stable_code() {
        let err = SwitchboardError::AuthInvalid("refresh failed".into());
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.code(), "AUTH_INVALID_TOKEN");
        assert!(err.is_auth_invalid());
    }

    #[test]
    fn error_body_nests_code_and_message() {
        let err = SwitchboardError::NoProfile("no profiles loaded".into());
        let body = ErrorBody::from(&err);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["statusCode"], 400);
        assert_eq!(json["code"], "NO_PROFILE");
        assert_eq!(json["response"]["data"]["error"]["code"], "NO_PROFILE");
    }
}
