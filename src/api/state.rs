//! Shared server state and runtime configuration.

use std::{sync::Arc, time::Duration};

use crate::{
    gate::AccessGate,
    identity::{IdentityProvider, gotrue::DEFAULT_TIMEOUT},
    trust::TrustKey,
};

use super::rate_limit::RateLimiter;

const DEFAULT_REFRESH_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_FACTOR_NAME: &str = "Authenticator App";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    identity_timeout: Duration,
    refresh_ttl_seconds: i64,
    factor_name: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            identity_timeout: DEFAULT_TIMEOUT,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            factor_name: DEFAULT_FACTOR_NAME.to_string(),
        }
    }

    #[must_use]
    pub fn with_identity_timeout(mut self, timeout: Duration) -> Self {
        self.identity_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_factor_name(mut self, name: String) -> Self {
        self.factor_name = name;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn identity_timeout(&self) -> Duration {
        self.identity_timeout
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn factor_name(&self) -> &str {
        &self.factor_name
    }

    /// Session cookies are only marked `Secure` when the frontend is served over HTTPS.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    gate: AccessGate,
    provider: Arc<dyn IdentityProvider>,
    trust_key: Arc<TrustKey>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        gate: AccessGate,
        provider: Arc<dyn IdentityProvider>,
        trust_key: Arc<TrustKey>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            config,
            gate,
            provider,
            trust_key,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    #[must_use]
    pub fn provider(&self) -> &dyn IdentityProvider {
        self.provider.as_ref()
    }

    #[must_use]
    pub fn trust_key(&self) -> Arc<TrustKey> {
        Arc::clone(&self.trust_key)
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_cookies_follow_frontend_scheme() {
        assert!(AuthConfig::new("https://folio.dev".to_string()).session_cookie_secure());
        assert!(!AuthConfig::new("http://localhost:3000".to_string()).session_cookie_secure());
    }

    #[test]
    fn builders_override_defaults() {
        let config = AuthConfig::new("https://folio.dev".to_string())
            .with_identity_timeout(Duration::from_millis(250))
            .with_refresh_ttl_seconds(60)
            .with_factor_name("Phone".to_string());
        assert_eq!(config.identity_timeout(), Duration::from_millis(250));
        assert_eq!(config.refresh_ttl_seconds(), 60);
        assert_eq!(config.factor_name(), "Phone");
    }
}
