//! Token file reading and status evaluation.
//!
//! A token file is read in a single whole-file snapshot per operation, so a
//! concurrent rewrite by the refresh path can never produce a torn read.
//! `evaluate` is pure: it performs no I/O and never fails on expiry.

use std::path::Path;

use serde::{Deserialize, Serialize};

use switchboard_core::error::{Result, SwitchboardError};

/// How close to expiry a token may be before it counts as `Expiring`.
pub const DEFAULT_EXPIRY_SKEW_MS: i64 = 60_000;

/// On-disk credential record. Covers both API-key files and OAuth token
/// files; field aliases absorb the casing variants different login tools
/// write.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenSnapshot {
    #[serde(alias = "AccessToken")]
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Absolute expiry, milliseconds since epoch.
    pub expires_at: Option<i64>,
    #[serde(alias = "projectId")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<ProjectRef>,
    pub email: Option<String>,
    pub scope: Option<String>,
    #[serde(alias = "apiKey")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub no_refresh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectRef {
    #[serde(alias = "projectId")]
    pub project_id: Option<String>,
}

impl TokenSnapshot {
    /// Read and parse a token file. Absent file → `AuthMissing`; malformed
    /// JSON → `BadRequest`-class parse error. Expiry never fails a read.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SwitchboardError::AuthMissing(format!("token file not found: {}", path.display()))
            } else {
                SwitchboardError::Io(e)
            }
        })?;
        serde_json::from_str(&data).map_err(|e| {
            SwitchboardError::AuthMissing(format!(
                "token file {} is malformed: {e}",
                path.display()
            ))
        })
    }

    /// Persist the snapshot back to disk (pretty-printed, like the login
    /// tools that write these files).
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Effective project id: the scalar field wins over the projects list.
    pub fn project_id(&self) -> Option<&str> {
        self.project_id
            .as_deref()
            .or_else(|| self.projects.iter().find_map(|p| p.project_id.as_deref()))
    }

    fn has_access_token(&self) -> bool {
        self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenStatus {
    Valid,
    Expiring,
    Expired,
    Missing,
    ApikeyOnly,
    RefreshOnly,
}

/// Computed credential status. A value object; nothing here touches disk.
#[derive(Debug, Clone, Serialize)]
pub struct TokenState {
    pub status: TokenStatus,
    pub expires_at: Option<i64>,
    pub ms_until_expiry: Option<i64>,
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub has_api_key: bool,
    pub no_refresh: bool,
}

impl TokenState {
    pub fn needs_refresh(&self) -> bool {
        matches!(
            self.status,
            TokenStatus::Expiring | TokenStatus::Expired | TokenStatus::RefreshOnly
        ) && self.has_refresh_token
            && !self.no_refresh
    }
}

/// Evaluate a snapshot against `now_ms` with the default expiry skew.
pub fn evaluate(snapshot: &TokenSnapshot, now_ms: i64) -> TokenState {
    evaluate_with_skew(snapshot, now_ms, DEFAULT_EXPIRY_SKEW_MS)
}

pub fn evaluate_with_skew(snapshot: &TokenSnapshot, now_ms: i64, skew_ms: i64) -> TokenState {
    let has_access_token = snapshot.has_access_token();
    let has_refresh_token = snapshot.has_refresh_token();
    let has_api_key = snapshot.has_api_key();
    let ms_until_expiry = snapshot.expires_at.map(|at| at - now_ms);

    let status = if !has_access_token {
        if has_api_key {
            TokenStatus::ApikeyOnly
        } else if has_refresh_token {
            TokenStatus::RefreshOnly
        } else {
            TokenStatus::Missing
        }
    } else {
        match ms_until_expiry {
            Some(ms) if ms <= 0 => TokenStatus::Expired,
            Some(ms) if ms <= skew_ms => TokenStatus::Expiring,
            // No recorded expiry counts as valid; the upstream will tell us.
            _ => TokenStatus::Valid,
        }
    };

    TokenState {
        status,
        expires_at: snapshot.expires_at,
        ms_until_expiry,
        has_access_token,
        has_refresh_token,
        has_api_key,
        no_refresh: snapshot.no_refresh,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn snapshot(access: Option<&str>, refresh: Option<&str>, expires_at: Option<i64>) -> TokenSnapshot {
        TokenSnapshot {
            access_token: access.map(String::from),
            refresh_token: refresh.map(String::from),
            expires_at,
            ..Default::default()
        }
    }

    #[test]
    fn valid_outside_skew_window() {
        let state = evaluate(&snapshot(Some("tok"), Some("r"), Some(1_000_000)), 100_000);
        assert_eq!(state.status, TokenStatus::Valid);
        assert_eq!(state.ms_until_expiry, Some(900_000));
        assert!(!state.needs_refresh());
    }

    #[test]
    fn expiring_inside_skew_window() {
        let state = evaluate(&snapshot(Some("tok"), Some("r"), Some(150_000)), 100_000);
        assert_eq!(state.status, TokenStatus::Expiring);
        assert!(state.needs_refresh());
    }

    #[test]
    fn expired_when_past_expiry() {
        let state = evaluate(&snapshot(Some("tok"), None, Some(50_000)), 100_000);
        assert_eq!(state.status, TokenStatus::Expired);
        // no refresh token, so nothing to refresh with
        assert!(!state.needs_refresh());
    }

    #[test]
    fn missing_apikey_only_and_refresh_only() {
        let state = evaluate(&snapshot(None, None, None), 0);
        assert_eq!(state.status, TokenStatus::Missing);

        let mut s = snapshot(None, None, None);
        s.api_key = Some("sk-live".into());
        assert_eq!(evaluate(&s, 0).status, TokenStatus::ApikeyOnly);

        let state = evaluate(&snapshot(None, Some("r"), None), 0);
        assert_eq!(state.status, TokenStatus::RefreshOnly);
        assert!(state.needs_refresh());
    }

    #[test]
    fn no_refresh_flag_blocks_refresh() {
        let mut s = snapshot(Some("tok"), Some("r"), Some(0));
        s.no_refresh = true;
        let state = evaluate(&s, 100_000);
        assert_eq!(state.status, TokenStatus::Expired);
        assert!(!state.needs_refresh());
    }

    #[test]
    fn read_honors_field_aliases() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"AccessToken":"abc","projects":[{{"projectId":"p-1"}}],"expires_at":123}}"#
        )
        .unwrap();
        let snap = TokenSnapshot::read(f.path()).unwrap();
        assert_eq!(snap.access_token.as_deref(), Some("abc"));
        assert_eq!(snap.project_id(), Some("p-1"));
        assert_eq!(snap.expires_at, Some(123));
    }

    #[test]
    fn read_missing_file_is_auth_missing() {
        let err = TokenSnapshot::read("/nonexistent/token.json").unwrap_err();
        assert_eq!(err.code(), "AUTH_MISSING");
    }

    #[test]
    fn read_malformed_file_is_parse_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "not json").unwrap();
        let err = TokenSnapshot::read(f.path()).unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }
}
