//! Identity provider boundary.
//!
//! The gate and the MFA endpoints only need a handful of operations from the
//! identity service: resolve a session, report assurance levels, and manage
//! TOTP factors. Any backend implementing [`IdentityProvider`] can be plugged in.

#[cfg(test)]
pub(crate) mod fake;
pub mod gotrue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use utoipa::ToSchema;

pub use self::gotrue::GoTrueProvider;

pub const TOTP_FACTOR_TYPE: &str = "totp";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("session is not authenticated")]
    Unauthorized,
    #[error("invalid verification code")]
    InvalidCode,
    #[error("identity provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("identity provider unreachable: {0}")]
    Transport(String),
    #[error("unexpected identity provider response: {0}")]
    InvalidResponse(String),
    #[error("identity provider timed out")]
    Timeout,
}

/// Authentication assurance level (`aal1` / `aal2`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssuranceLevel {
    Base,
    Elevated,
}

impl AssuranceLevel {
    #[must_use]
    pub fn from_aal(value: &str) -> Option<Self> {
        match value.trim() {
            "aal1" => Some(Self::Base),
            "aal2" => Some(Self::Elevated),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_aal(self) -> &'static str {
        match self {
            Self::Base => "aal1",
            Self::Elevated => "aal2",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AssuranceLevels {
    pub current: AssuranceLevel,
    pub required: AssuranceLevel,
}

impl AssuranceLevels {
    /// Required level is elevated iff a verified factor exists.
    #[must_use]
    pub fn for_factors(current: AssuranceLevel, factors: &[Factor]) -> Self {
        let required = if factors.iter().any(Factor::is_verified) {
            AssuranceLevel::Elevated
        } else {
            AssuranceLevel::Base
        };
        Self { current, required }
    }

    /// True when the session still owes a second factor.
    #[must_use]
    pub fn owes_second_factor(&self) -> bool {
        self.required == AssuranceLevel::Elevated && self.current != AssuranceLevel::Elevated
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl User {
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Session {
    #[default]
    Anonymous,
    Authenticated(User),
}

impl Session {
    #[must_use]
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated(user) => Some(user),
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FactorStatus {
    Verified,
    Unverified,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Factor {
    pub id: String,
    pub factor_type: String,
    pub friendly_name: Option<String>,
    pub status: FactorStatus,
}

impl Factor {
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.status == FactorStatus::Verified
    }

    #[must_use]
    pub fn is_totp(&self) -> bool {
        self.factor_type == TOTP_FACTOR_TYPE
    }
}

/// A new, not yet verified, TOTP factor.
#[derive(Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub factor_id: String,
    pub secret: String,
    pub qr_code: String,
    pub uri: String,
}

impl fmt::Debug for Enrollment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enrollment")
            .field("factor_id", &self.factor_id)
            .field("secret", &"***")
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

impl fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_token", &"***")
            .field("refresh_token", &"***")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthTokens, ProviderError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthTokens, ProviderError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError>;

    async fn get_session(&self, access_token: &str) -> Result<User, ProviderError>;

    async fn assurance_level(&self, access_token: &str)
    -> Result<AssuranceLevels, ProviderError>;

    async fn list_factors(&self, access_token: &str) -> Result<Vec<Factor>, ProviderError>;

    async fn enroll_factor(
        &self,
        access_token: &str,
        friendly_name: &str,
    ) -> Result<Enrollment, ProviderError>;

    async fn create_challenge(
        &self,
        access_token: &str,
        factor_id: &str,
    ) -> Result<String, ProviderError>;

    /// Verify a code; on success the returned tokens carry the elevated level.
    async fn verify_challenge(
        &self,
        access_token: &str,
        factor_id: &str,
        challenge_id: &str,
        code: &str,
    ) -> Result<AuthTokens, ProviderError>;

    async fn unenroll_factor(&self, access_token: &str, factor_id: &str)
    -> Result<(), ProviderError>;

    async fn health(&self) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factor(status: FactorStatus) -> Factor {
        Factor {
            id: "f1".to_string(),
            factor_type: TOTP_FACTOR_TYPE.to_string(),
            friendly_name: None,
            status,
        }
    }

    #[test]
    fn aal_round_trip() {
        assert_eq!(AssuranceLevel::from_aal("aal1"), Some(AssuranceLevel::Base));
        assert_eq!(AssuranceLevel::from_aal("aal2"), Some(AssuranceLevel::Elevated));
        assert_eq!(AssuranceLevel::from_aal("aal3"), None);
        assert_eq!(AssuranceLevel::Elevated.as_aal(), "aal2");
    }

    #[test]
    fn required_level_follows_verified_factors() {
        let none = AssuranceLevels::for_factors(AssuranceLevel::Base, &[]);
        assert_eq!(none.required, AssuranceLevel::Base);
        assert!(!none.owes_second_factor());

        let pending =
            AssuranceLevels::for_factors(AssuranceLevel::Base, &[factor(FactorStatus::Unverified)]);
        assert_eq!(pending.required, AssuranceLevel::Base);

        let verified =
            AssuranceLevels::for_factors(AssuranceLevel::Base, &[factor(FactorStatus::Verified)]);
        assert!(verified.owes_second_factor());

        let elevated = AssuranceLevels::for_factors(
            AssuranceLevel::Elevated,
            &[factor(FactorStatus::Verified)],
        );
        assert!(!elevated.owes_second_factor());
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let tokens = AuthTokens {
            access_token: "access-secret".to_string(),
            refresh_token: "refresh-secret".to_string(),
            expires_in: 3600,
        };
        let rendered = format!("{tokens:?}");
        assert!(!rendered.contains("access-secret"));
        assert!(!rendered.contains("refresh-secret"));
    }
}
