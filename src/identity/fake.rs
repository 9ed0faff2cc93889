//! In-memory identity provider for handler and middleware tests.

use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use super::{
    AssuranceLevel, AssuranceLevels, AuthTokens, Enrollment, Factor, FactorStatus,
    IdentityProvider, ProviderError, TOTP_FACTOR_TYPE, User,
};

pub(crate) const VALID_CODE: &str = "123456";

#[derive(Default)]
struct FakeState {
    sessions: HashMap<String, (User, AssuranceLevel)>,
    factors: HashMap<String, Vec<Factor>>,
    passwords: HashMap<String, (String, String)>,
    refresh: HashMap<String, String>,
    counter: u32,
    session_fails: bool,
    assurance_fails: bool,
    signed_out: Vec<String>,
}

impl FakeState {
    fn next(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{prefix}-{}", self.counter)
    }

    fn session(&self, token: &str) -> Result<(User, AssuranceLevel), ProviderError> {
        if self.session_fails {
            return Err(ProviderError::Transport("connection refused".to_string()));
        }
        self.sessions
            .get(token)
            .cloned()
            .ok_or(ProviderError::Unauthorized)
    }

    fn issue(&mut self, user: User, level: AssuranceLevel) -> AuthTokens {
        let access_token = self.next("access");
        let refresh_token = self.next("refresh");
        self.sessions.insert(access_token.clone(), (user, level));
        self.refresh
            .insert(refresh_token.clone(), access_token.clone());
        AuthTokens {
            access_token,
            refresh_token,
            expires_in: 3600,
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeProvider {
    state: Mutex<FakeState>,
}

pub(crate) fn user(id: &str, roles: &[&str]) -> User {
    User {
        id: id.to_string(),
        email: Some(format!("{id}@example.com")),
        roles: roles.iter().map(ToString::to_string).collect(),
    }
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn with_session(self, token: &str, user: User, level: AssuranceLevel) -> Self {
        self.lock()
            .sessions
            .insert(token.to_string(), (user, level));
        self
    }

    pub(crate) fn with_verified_factor(self, user_id: &str) -> Self {
        self.lock()
            .factors
            .entry(user_id.to_string())
            .or_default()
            .push(Factor {
                id: "factor-verified".to_string(),
                factor_type: TOTP_FACTOR_TYPE.to_string(),
                friendly_name: Some("Authenticator App".to_string()),
                status: FactorStatus::Verified,
            });
        self
    }

    pub(crate) fn with_password(self, email: &str, password: &str, user_id: &str) -> Self {
        self.lock().passwords.insert(
            email.to_string(),
            (password.to_string(), user_id.to_string()),
        );
        self
    }

    pub(crate) fn with_refresh(self, refresh_token: &str, access_token: &str) -> Self {
        self.lock()
            .refresh
            .insert(refresh_token.to_string(), access_token.to_string());
        self
    }

    pub(crate) fn failing_sessions(self) -> Self {
        self.lock().session_fails = true;
        self
    }

    pub(crate) fn failing_assurance(self) -> Self {
        self.lock().assurance_fails = true;
        self
    }

    pub(crate) fn factors_of(&self, user_id: &str) -> Vec<Factor> {
        self.lock().factors.get(user_id).cloned().unwrap_or_default()
    }

    pub(crate) fn signed_out(&self) -> Vec<String> {
        self.lock().signed_out.clone()
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthTokens, ProviderError> {
        let mut state = self.lock();
        let Some((expected, user_id)) = state.passwords.get(email).cloned() else {
            return Err(ProviderError::Rejected {
                status: 400,
                message: "Invalid login credentials".to_string(),
            });
        };
        if expected != password {
            return Err(ProviderError::Rejected {
                status: 400,
                message: "Invalid login credentials".to_string(),
            });
        }
        Ok(state.issue(user(&user_id, &["admin"]), AssuranceLevel::Base))
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthTokens, ProviderError> {
        let mut state = self.lock();
        let access = state
            .refresh
            .remove(refresh_token)
            .ok_or(ProviderError::Unauthorized)?;
        let (user, level) = state
            .sessions
            .get(&access)
            .cloned()
            .ok_or(ProviderError::Unauthorized)?;
        Ok(state.issue(user, level))
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.sessions.remove(access_token);
        state.signed_out.push(access_token.to_string());
        Ok(())
    }

    async fn get_session(&self, access_token: &str) -> Result<User, ProviderError> {
        self.lock().session(access_token).map(|(user, _)| user)
    }

    async fn assurance_level(
        &self,
        access_token: &str,
    ) -> Result<AssuranceLevels, ProviderError> {
        let state = self.lock();
        if state.assurance_fails {
            return Err(ProviderError::Transport("connection reset".to_string()));
        }
        let (user, current) = state.session(access_token)?;
        let factors = state.factors.get(&user.id).cloned().unwrap_or_default();
        Ok(AssuranceLevels::for_factors(current, &factors))
    }

    async fn list_factors(&self, access_token: &str) -> Result<Vec<Factor>, ProviderError> {
        let state = self.lock();
        let (user, _) = state.session(access_token)?;
        Ok(state.factors.get(&user.id).cloned().unwrap_or_default())
    }

    async fn enroll_factor(
        &self,
        access_token: &str,
        friendly_name: &str,
    ) -> Result<Enrollment, ProviderError> {
        let mut state = self.lock();
        let (user, _) = state.session(access_token)?;
        let factor_id = state.next("factor");
        state.factors.entry(user.id).or_default().push(Factor {
            id: factor_id.clone(),
            factor_type: TOTP_FACTOR_TYPE.to_string(),
            friendly_name: Some(friendly_name.to_string()),
            status: FactorStatus::Unverified,
        });
        Ok(Enrollment {
            secret: format!("SECRET{factor_id}"),
            qr_code: "data:image/svg+xml;utf-8,<svg/>".to_string(),
            uri: format!("otpauth://totp/folio:{factor_id}"),
            factor_id,
        })
    }

    async fn create_challenge(
        &self,
        access_token: &str,
        factor_id: &str,
    ) -> Result<String, ProviderError> {
        let state = self.lock();
        let (user, _) = state.session(access_token)?;
        let exists = state
            .factors
            .get(&user.id)
            .is_some_and(|factors| factors.iter().any(|f| f.id == factor_id));
        if exists {
            Ok(format!("challenge-{factor_id}"))
        } else {
            Err(ProviderError::Rejected {
                status: 404,
                message: "Factor not found".to_string(),
            })
        }
    }

    async fn verify_challenge(
        &self,
        access_token: &str,
        factor_id: &str,
        challenge_id: &str,
        code: &str,
    ) -> Result<AuthTokens, ProviderError> {
        let mut state = self.lock();
        let (user, _) = state.session(access_token)?;
        if challenge_id != format!("challenge-{factor_id}") || code != VALID_CODE {
            return Err(ProviderError::InvalidCode);
        }
        if let Some(factor) = state
            .factors
            .get_mut(&user.id)
            .and_then(|factors| factors.iter_mut().find(|f| f.id == factor_id))
        {
            factor.status = FactorStatus::Verified;
        }
        Ok(state.issue(user, AssuranceLevel::Elevated))
    }

    async fn unenroll_factor(
        &self,
        access_token: &str,
        factor_id: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.lock();
        let (user, _) = state.session(access_token)?;
        if let Some(factors) = state.factors.get_mut(&user.id) {
            factors.retain(|f| f.id != factor_id);
        }
        Ok(())
    }

    async fn health(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
