//! OAuth credential lifecycle.
//!
//! Keeps a provider's token usable without ever blocking the serving path on
//! human interaction:
//!   1. Before each outbound request, `ensure_valid` silently refreshes an
//!      expiring/expired token when a refresh token exists.
//!   2. After an upstream 401, `handle_upstream_invalid_token` either
//!      performs one more silent refresh (caller replays once) or schedules
//!      a background interactive re-auth and fails the current request.
//!
//! Refresh and interactive re-auth for the same provider id are serialized
//! by a per-provider lock; callers that find a refresh in flight wait for it
//! and then re-read the token file.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use switchboard_core::config::ServiceProfile;
use switchboard_core::error::{Result, SwitchboardError};

use crate::store::{evaluate, TokenSnapshot, TokenStatus};

/// Auth settings for one OAuth-backed provider, extracted from its service
/// profile.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub token_path: String,
    pub token_url: Option<String>,
    pub client_id: Option<String>,
}

impl AuthConfig {
    pub fn from_profile(profile: &ServiceProfile) -> Option<Self> {
        Some(Self {
            token_path: profile.token_path.clone()?,
            token_url: profile.token_url.clone(),
            client_id: profile.client_id.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OAuthOptions {
    pub open_browser: bool,
    pub force_reacquire: bool,
}

pub struct OAuthManager {
    client: reqwest::Client,
    /// Per-provider-id locks. Refresh and interactive re-auth take the same
    /// lock, so the two can never run concurrently for one provider.
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Providers with a background re-auth already scheduled.
    reauth_inflight: Arc<DashMap<String, ()>>,
    browser_cmd: Option<String>,
}

impl OAuthManager {
    pub fn new(browser_cmd: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            locks: DashMap::new(),
            reauth_inflight: Arc::new(DashMap::new()),
            browser_cmd,
        }
    }

    fn lock_for(&self, provider_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(provider_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Pre-dispatch token validation. Silent mode never opens a browser: it
    /// refreshes when the token is expiring/expired and a refresh token
    /// exists, and otherwise reports the credential state as-is.
    pub async fn ensure_valid(
        &self,
        provider_id: &str,
        auth: &AuthConfig,
        opts: OAuthOptions,
    ) -> Result<TokenSnapshot> {
        let snapshot = TokenSnapshot::read(&auth.token_path)?;
        let now = chrono::Utc::now().timestamp_millis();
        let state = evaluate(&snapshot, now);

        if opts.force_reacquire {
            return self.interactive_reacquire(provider_id, auth, opts).await;
        }

        match state.status {
            TokenStatus::Valid | TokenStatus::ApikeyOnly => Ok(snapshot),
            TokenStatus::Expiring | TokenStatus::Expired | TokenStatus::RefreshOnly => {
                if state.needs_refresh() {
                    self.refresh_locked(provider_id, auth, false).await
                } else if state.status == TokenStatus::Expiring {
                    // Still usable for a short window; let the upstream be
                    // the judge rather than failing preflight.
                    Ok(snapshot)
                } else {
                    Err(SwitchboardError::AuthInvalid(format!(
                        "provider '{provider_id}': token expired and no refresh token available"
                    )))
                }
            }
            TokenStatus::Missing => Err(SwitchboardError::AuthPreflightFatal(format!(
                "provider '{provider_id}': token file has no access token"
            ))),
        }
    }

    /// Post-dispatch 401 recovery arbitration. Returns `true` when the
    /// caller should replay the request exactly once with fresh headers.
    /// Never blocks on interactive re-auth: when a browser would be needed,
    /// it is scheduled on a background task and `false` is returned so the
    /// request fails fast.
    pub async fn handle_upstream_invalid_token(
        &self,
        provider_id: &str,
        auth: &AuthConfig,
        error: &SwitchboardError,
    ) -> bool {
        let snapshot = match TokenSnapshot::read(&auth.token_path) {
            Ok(s) => s,
            Err(e) => {
                warn!(provider = provider_id, error = %e, "cannot read token file during 401 recovery");
                return false;
            }
        };
        let state = evaluate(&snapshot, chrono::Utc::now().timestamp_millis());

        if state.has_refresh_token && !state.no_refresh {
            // the upstream rejected this token even if it looks valid, so
            // the refresh is forced
            match self.refresh_locked(provider_id, auth, true).await {
                Ok(_) => {
                    info!(provider = provider_id, "silent refresh after upstream 401");
                    return true;
                }
                Err(e) => {
                    warn!(provider = provider_id, error = %e, "silent refresh failed after upstream 401");
                }
            }
        }

        if self.should_trigger_interactive(provider_id, error) {
            self.schedule_background_reauth(provider_id, auth);
        }
        false
    }

    /// Whether the background repair for this failure should open a browser.
    /// Plain transport errors and 5xx do not; credential rejections do.
    pub fn should_trigger_interactive(&self, provider_id: &str, error: &SwitchboardError) -> bool {
        if self.browser_cmd.is_none() {
            debug!(provider = provider_id, "no browser command configured, skipping interactive re-auth");
            return false;
        }
        error.is_auth_invalid()
            || matches!(error, SwitchboardError::AuthPreflightFatal(_))
            || error.to_string().contains("invalid_grant")
    }

    /// Refresh under the per-provider lock, with a second read after the
    /// lock is acquired: a concurrent caller may already have refreshed.
    /// `force` skips the freshness short-circuit for 401 recovery, where
    /// the token looks valid but the upstream disagrees.
    async fn refresh_locked(
        &self,
        provider_id: &str,
        auth: &AuthConfig,
        force: bool,
    ) -> Result<TokenSnapshot> {
        let lock = self.lock_for(provider_id);
        let _guard = lock.lock().await;

        let current = TokenSnapshot::read(&auth.token_path)?;
        let now = chrono::Utc::now().timestamp_millis();
        let state = evaluate(&current, now);
        if !force && state.status == TokenStatus::Valid {
            return Ok(current);
        }

        let refresh_token = current.refresh_token.clone().ok_or_else(|| {
            SwitchboardError::AuthInvalid(format!(
                "provider '{provider_id}': no refresh token in token file"
            ))
        })?;
        let token_url = auth.token_url.as_deref().ok_or_else(|| {
            SwitchboardError::AuthInvalid(format!(
                "provider '{provider_id}': no token_url configured for refresh"
            ))
        })?;

        info!(provider = provider_id, "refreshing OAuth access token");

        let mut body = format!(
            "grant_type=refresh_token&refresh_token={}",
            urlencoding::encode(&refresh_token)
        );
        if let Some(client_id) = &auth.client_id {
            body.push_str(&format!("&client_id={}", urlencoding::encode(client_id)));
        }

        let resp = self
            .client
            .post(token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SwitchboardError::AuthInvalid(format!("token refresh failed: {e}")))?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SwitchboardError::AuthInvalid(format!(
                "token refresh rejected: {text}"
            )));
        }

        let refreshed: RefreshResponse = resp
            .json()
            .await
            .map_err(|e| SwitchboardError::AuthInvalid(format!("token refresh response: {e}")))?;

        debug!(provider = provider_id, expires_in = refreshed.expires_in, "token refreshed");

        let mut snapshot = current;
        snapshot.access_token = Some(refreshed.access_token);
        snapshot.refresh_token = refreshed.refresh_token.or(Some(refresh_token));
        snapshot.expires_at = Some(now + (refreshed.expires_in as i64) * 1000);
        if let Some(scope) = refreshed.scope {
            snapshot.scope = Some(scope);
        }

        // Persist so other workers and the next process see the new token.
        if let Err(e) = snapshot.write(&auth.token_path) {
            warn!(provider = provider_id, path = %auth.token_path, error = %e,
                "failed to save refreshed token");
        }

        Ok(snapshot)
    }

    /// One-shot interactive re-auth: runs the configured browser command and
    /// expects the external flow to rewrite the token file.
    async fn interactive_reacquire(
        &self,
        provider_id: &str,
        auth: &AuthConfig,
        opts: OAuthOptions,
    ) -> Result<TokenSnapshot> {
        if !opts.open_browser {
            return Err(SwitchboardError::AuthPreflightFatal(format!(
                "provider '{provider_id}': re-authorization required"
            )));
        }
        let cmd = self.browser_cmd.clone().ok_or_else(|| {
            SwitchboardError::AuthPreflightFatal(format!(
                "provider '{provider_id}': re-authorization required and OAUTH_BROWSER is not set"
            ))
        })?;

        let lock = self.lock_for(provider_id);
        let _guard = lock.lock().await;

        info!(provider = provider_id, command = %cmd, "launching interactive re-auth");
        let status = tokio::process::Command::new(&cmd)
            .arg(provider_id)
            .status()
            .await
            .map_err(|e| {
                SwitchboardError::AuthPreflightFatal(format!("re-auth command failed to start: {e}"))
            })?;

        if !status.success() {
            return Err(SwitchboardError::AuthPreflightFatal(format!(
                "re-auth command exited with {status}"
            )));
        }

        TokenSnapshot::read(&auth.token_path)
    }

    /// Spawn interactive re-auth on a background task. At most one per
    /// provider id is in flight at a time; the serving path never waits.
    fn schedule_background_reauth(&self, provider_id: &str, auth: &AuthConfig) {
        if self
            .reauth_inflight
            .insert(provider_id.to_string(), ())
            .is_some()
        {
            debug!(provider = provider_id, "background re-auth already scheduled");
            return;
        }

        let Some(cmd) = self.browser_cmd.clone() else {
            self.reauth_inflight.remove(provider_id);
            return;
        };
        let lock = self.lock_for(provider_id);
        let provider = provider_id.to_string();
        let token_path = auth.token_path.clone();
        let inflight = self.reauth_inflight.clone();

        tokio::spawn(async move {
            let _guard = lock.lock().await;
            info!(provider = %provider, "background interactive re-auth starting");
            match tokio::process::Command::new(&cmd).arg(&provider).status().await {
                Ok(status) if status.success() => {
                    match TokenSnapshot::read(&token_path) {
                        Ok(_) => info!(provider = %provider, "background re-auth completed"),
                        Err(e) => warn!(provider = %provider, error = %e,
                            "re-auth command succeeded but token file unreadable"),
                    }
                }
                Ok(status) => {
                    warn!(provider = %provider, %status, "background re-auth command failed")
                }
                Err(e) => warn!(provider = %provider, error = %e, "background re-auth did not start"),
            }
            inflight.remove(&provider);
        });
    }
}

#[derive(Debug, serde::Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: u64,
    scope: Option<String>,
}
