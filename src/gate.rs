//! Per-request access decisions for the admin area.
//!
//! Rules, evaluated in order:
//!
//! 1. Paths outside the protected prefix are allowed.
//! 2. The login page redirects authenticated sessions to the dashboard.
//! 3. The verify page is always reachable.
//! 4. Any other protected path requires a session, the configured role, and
//!    either the required assurance level or a trusted device.
//!
//! Rule 2 ignores MFA state on purpose: an authenticated session that still
//! owes a second factor goes login, then dashboard, then verify. The dashboard
//! re-evaluates rule 4, so the login page never needs to know about factors.

use crate::identity::{AssuranceLevels, Session};

/// Outcome of the assurance query for one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Assurance {
    Known(AssuranceLevels),
    /// The query failed, timed out, or was not made.
    Unavailable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    RedirectToLogin,
    RedirectToVerify,
    RedirectToDashboard,
    /// Authenticated but missing the configured admin role.
    RedirectToHome,
}

impl AccessDecision {
    /// The redirect target, or `None` when the request may proceed.
    #[must_use]
    pub fn redirect_target<'a>(&self, config: &'a GateConfig) -> Option<&'a str> {
        match self {
            Self::Allow => None,
            Self::RedirectToLogin => Some(config.login_path.as_str()),
            Self::RedirectToVerify => Some(config.verify_path.as_str()),
            Self::RedirectToDashboard => Some(config.dashboard_path.as_str()),
            Self::RedirectToHome => Some(config.home_path.as_str()),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::RedirectToLogin => "redirect_to_login",
            Self::RedirectToVerify => "redirect_to_verify",
            Self::RedirectToDashboard => "redirect_to_dashboard",
            Self::RedirectToHome => "redirect_to_home",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathKind {
    Public,
    Login,
    Verify,
    Protected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateConfig {
    protected_prefix: String,
    login_path: String,
    verify_path: String,
    dashboard_path: String,
    home_path: String,
    required_role: Option<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::new("/admin")
    }
}

impl GateConfig {
    /// Paths derived from `prefix`: `<prefix>/login`, `<prefix>/verify`, and
    /// `<prefix>` as the dashboard.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        let prefix = normalize(prefix).to_string();
        Self {
            login_path: child(&prefix, "login"),
            verify_path: child(&prefix, "verify"),
            dashboard_path: prefix.clone(),
            home_path: "/".to_string(),
            protected_prefix: prefix,
            required_role: None,
        }
    }

    #[must_use]
    pub fn with_login_path(mut self, path: &str) -> Self {
        self.login_path = normalize(path).to_string();
        self
    }

    #[must_use]
    pub fn with_verify_path(mut self, path: &str) -> Self {
        self.verify_path = normalize(path).to_string();
        self
    }

    #[must_use]
    pub fn with_dashboard_path(mut self, path: &str) -> Self {
        self.dashboard_path = normalize(path).to_string();
        self
    }

    #[must_use]
    pub fn with_home_path(mut self, path: &str) -> Self {
        self.home_path = normalize(path).to_string();
        self
    }

    /// Require a role claim on protected pages. Empty values disable the check.
    #[must_use]
    pub fn with_required_role(mut self, role: Option<String>) -> Self {
        self.required_role = role.filter(|r| !r.trim().is_empty());
        self
    }

    #[must_use]
    pub fn protected_prefix(&self) -> &str {
        &self.protected_prefix
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn verify_path(&self) -> &str {
        &self.verify_path
    }

    #[must_use]
    pub fn dashboard_path(&self) -> &str {
        &self.dashboard_path
    }

    #[must_use]
    pub fn required_role(&self) -> Option<&str> {
        self.required_role.as_deref()
    }
}

#[derive(Clone, Debug, Default)]
pub struct AccessGate {
    config: GateConfig,
}

impl AccessGate {
    #[must_use]
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    #[must_use]
    pub fn classify(&self, path: &str) -> PathKind {
        let path = normalize(path);
        if !under_prefix(path, &self.config.protected_prefix) {
            PathKind::Public
        } else if path == self.config.login_path {
            PathKind::Login
        } else if path == self.config.verify_path {
            PathKind::Verify
        } else {
            PathKind::Protected
        }
    }

    /// Whether [`decide`](Self::decide) will look at the assurance levels.
    #[must_use]
    pub fn needs_assurance(&self, kind: PathKind, session: &Session) -> bool {
        kind == PathKind::Protected && session.is_authenticated()
    }

    #[must_use]
    pub fn decide(
        &self,
        path: &str,
        session: &Session,
        assurance: &Assurance,
        device_trusted: bool,
    ) -> AccessDecision {
        match self.classify(path) {
            PathKind::Public | PathKind::Verify => AccessDecision::Allow,
            PathKind::Login => {
                if session.is_authenticated() {
                    AccessDecision::RedirectToDashboard
                } else {
                    AccessDecision::Allow
                }
            }
            PathKind::Protected => self.decide_protected(session, assurance, device_trusted),
        }
    }

    fn decide_protected(
        &self,
        session: &Session,
        assurance: &Assurance,
        device_trusted: bool,
    ) -> AccessDecision {
        // Trust only ever replaces the second factor, never the session.
        let Some(user) = session.user() else {
            return AccessDecision::RedirectToLogin;
        };
        if let Some(role) = self.config.required_role()
            && !user.has_role(role)
        {
            return AccessDecision::RedirectToHome;
        }
        let owes_second_factor = match assurance {
            Assurance::Known(levels) => levels.owes_second_factor(),
            Assurance::Unavailable => return AccessDecision::RedirectToVerify,
        };
        if owes_second_factor && !device_trusted {
            AccessDecision::RedirectToVerify
        } else {
            AccessDecision::Allow
        }
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

// A root prefix must not yield "//login", which browsers read as a host.
fn child(prefix: &str, segment: &str) -> String {
    format!("{}/{segment}", prefix.trim_end_matches('/'))
}

fn under_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
