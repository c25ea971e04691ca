pub mod oauth;
pub mod store;

pub use oauth::{AuthConfig, OAuthManager, OAuthOptions};
pub use store::{evaluate, TokenSnapshot, TokenState, TokenStatus, DEFAULT_EXPIRY_SKEW_MS};
