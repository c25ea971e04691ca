use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use switchboard_auth::OAuthManager;
use switchboard_codec::Orchestrator;
use switchboard_core::config::{ServiceProfile, SwitchboardConfig};
use switchboard_core::error::{Result, SwitchboardError};
use switchboard_transport::{SnapshotWriter, Transport};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: SwitchboardConfig,
    /// Resolved provider snapshots, immutable after startup.
    pub services: HashMap<String, ServiceProfile>,
    pub orchestrator: Orchestrator,
    pub transport: Transport,
}

impl AppState {
    pub fn new(
        config: SwitchboardConfig,
        base_dir: PathBuf,
        snapshot_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let services = config.service_profiles()?;
        if services.is_empty() {
            return Err(SwitchboardError::Config(
                "no providers configured".to_string(),
            ));
        }

        let orchestrator = Orchestrator::new(config.profiles_path.clone(), base_dir);
        orchestrator.initialize()?;

        let oauth = Arc::new(OAuthManager::new(config.oauth_browser.clone()));
        let transport = Transport::new(oauth, snapshot_dir.map(SnapshotWriter::new));

        Ok(Self {
            config,
            services,
            orchestrator,
            transport,
        })
    }

    /// Pick the provider for a request: the conversion profile's `provider`
    /// option, then the configured default, then a sole configured entry.
    pub fn service_for(&self, profile_provider: Option<&str>) -> Result<&ServiceProfile> {
        let key = profile_provider
            .map(String::from)
            .or_else(|| self.config.default_provider.clone())
            .or_else(|| {
                if self.services.len() == 1 {
                    self.services.keys().next().cloned()
                } else {
                    None
                }
            })
            .ok_or_else(|| {
                SwitchboardError::Config(
                    "no provider selected: set default_provider or a profile provider option"
                        .into(),
                )
            })?;
        self.services.get(&key).ok_or_else(|| {
            SwitchboardError::Config(format!("provider '{key}' is not configured"))
        })
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/v1/chat/completions",
            post(crate::http::chat::chat_completions),
        )
        .route("/v1/responses", post(crate::http::responses::responses))
        .route("/v1/messages", post(crate::http::messages::messages))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
