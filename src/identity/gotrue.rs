//! [`IdentityProvider`] over the `GoTrue` REST API (`/auth/v1`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{Instrument, info_span};
use url::Url;

use super::{
    AssuranceLevel, AssuranceLevels, AuthTokens, Enrollment, Factor, FactorStatus,
    IdentityProvider, ProviderError, TOTP_FACTOR_TYPE, User,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct GoTrueProvider {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl std::fmt::Debug for GoTrueProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoTrueProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

impl From<TokenResponse> for AuthTokens {
    fn from(value: TokenResponse) -> Self {
        Self {
            access_token: value.access_token,
            refresh_token: value.refresh_token,
            expires_in: value.expires_in,
        }
    }
}

#[derive(Deserialize)]
struct UserResponse {
    id: String,
    email: Option<String>,
    #[serde(default)]
    app_metadata: Value,
    #[serde(default)]
    user_metadata: Value,
    #[serde(default)]
    factors: Option<Vec<FactorResponse>>,
}

impl UserResponse {
    fn roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = [&self.app_metadata, &self.user_metadata]
            .into_iter()
            .filter_map(|metadata| metadata.get("role").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        roles.dedup();
        roles
    }

    fn factors(&self) -> Vec<Factor> {
        self.factors
            .iter()
            .flatten()
            .map(|factor| Factor {
                id: factor.id.clone(),
                factor_type: factor.factor_type.clone(),
                friendly_name: factor.friendly_name.clone().filter(|name| !name.is_empty()),
                status: if factor.status == "verified" {
                    FactorStatus::Verified
                } else {
                    FactorStatus::Unverified
                },
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct FactorResponse {
    id: String,
    factor_type: String,
    friendly_name: Option<String>,
    status: String,
}

#[derive(Deserialize)]
struct EnrollResponse {
    id: String,
    totp: TotpResponse,
}

#[derive(Deserialize)]
struct TotpResponse {
    qr_code: String,
    secret: String,
    uri: String,
}

#[derive(Deserialize)]
struct ChallengeResponse {
    id: String,
}

impl GoTrueProvider {
    /// Build a provider for `base_url` (the project URL, without `/auth/v1`).
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: SecretString, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url).context("Invalid identity provider URL")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("Identity provider URL must use http(s): {base_url}");
        }
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build identity provider HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1{path}", self.base_url)
    }

    fn request(&self, builder: RequestBuilder, access_token: Option<&str>) -> RequestBuilder {
        let builder = builder.header("apikey", self.api_key.expose_secret());
        match access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        operation: &'static str,
    ) -> Result<Response, ProviderError> {
        let span = info_span!("identity.request", operation);
        let response = builder
            .send()
            .instrument(span)
            .await
            .map_err(map_transport_error)?;
        check_status(response).await
    }

    async fn fetch_user(&self, access_token: &str) -> Result<UserResponse, ProviderError> {
        let builder = self.request(self.client.get(self.endpoint("/user")), Some(access_token));
        let response = self.send(builder, "get_user").await?;
        parse_json(response).await
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> Result<AuthTokens, ProviderError> {
        let builder = self.request(
            self.client
                .post(self.endpoint("/token"))
                .query(&[("grant_type", grant_type)])
                .json(&body),
            None,
        );
        let response = self.send(builder, "token").await?;
        parse_json::<TokenResponse>(response).await.map(Into::into)
    }
}

#[async_trait]
impl IdentityProvider for GoTrueProvider {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthTokens, ProviderError> {
        self.token_grant("password", json!({ "email": email, "password": password }))
            .await
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthTokens, ProviderError> {
        self.token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        let builder = self.request(self.client.post(self.endpoint("/logout")), Some(access_token));
        self.send(builder, "logout").await.map(|_| ())
    }

    async fn get_session(&self, access_token: &str) -> Result<User, ProviderError> {
        let user = self.fetch_user(access_token).await?;
        Ok(User {
            roles: user.roles(),
            id: user.id,
            email: user.email,
        })
    }

    async fn assurance_level(
        &self,
        access_token: &str,
    ) -> Result<AssuranceLevels, ProviderError> {
        // The user lookup validates the token before its claims are read.
        let user = self.fetch_user(access_token).await?;
        let current = aal_claim(access_token)?;
        Ok(AssuranceLevels::for_factors(current, &user.factors()))
    }

    async fn list_factors(&self, access_token: &str) -> Result<Vec<Factor>, ProviderError> {
        Ok(self.fetch_user(access_token).await?.factors())
    }

    async fn enroll_factor(
        &self,
        access_token: &str,
        friendly_name: &str,
    ) -> Result<Enrollment, ProviderError> {
        let builder = self.request(
            self.client.post(self.endpoint("/factors")).json(&json!({
                "factor_type": TOTP_FACTOR_TYPE,
                "friendly_name": friendly_name,
            })),
            Some(access_token),
        );
        let response = self.send(builder, "enroll_factor").await?;
        let enrolled: EnrollResponse = parse_json(response).await?;
        Ok(Enrollment {
            factor_id: enrolled.id,
            secret: enrolled.totp.secret,
            qr_code: enrolled.totp.qr_code,
            uri: enrolled.totp.uri,
        })
    }

    async fn create_challenge(
        &self,
        access_token: &str,
        factor_id: &str,
    ) -> Result<String, ProviderError> {
        let path = format!("/factors/{factor_id}/challenge");
        let builder = self.request(self.client.post(self.endpoint(&path)), Some(access_token));
        let response = self.send(builder, "create_challenge").await?;
        let challenge: ChallengeResponse = parse_json(response).await?;
        Ok(challenge.id)
    }

    async fn verify_challenge(
        &self,
        access_token: &str,
        factor_id: &str,
        challenge_id: &str,
        code: &str,
    ) -> Result<AuthTokens, ProviderError> {
        let path = format!("/factors/{factor_id}/verify");
        let builder = self.request(
            self.client
                .post(self.endpoint(&path))
                .json(&json!({ "challenge_id": challenge_id, "code": code })),
            Some(access_token),
        );
        let response = match self.send(builder, "verify_challenge").await {
            Ok(response) => response,
            Err(ProviderError::Rejected { status, .. }) if status == 400 || status == 422 => {
                return Err(ProviderError::InvalidCode);
            }
            Err(err) => return Err(err),
        };
        parse_json::<TokenResponse>(response).await.map(Into::into)
    }

    async fn unenroll_factor(
        &self,
        access_token: &str,
        factor_id: &str,
    ) -> Result<(), ProviderError> {
        let path = format!("/factors/{factor_id}");
        let builder = self.request(self.client.delete(self.endpoint(&path)), Some(access_token));
        self.send(builder, "unenroll_factor").await.map(|_| ())
    }

    async fn health(&self) -> Result<(), ProviderError> {
        let builder = self.request(self.client.get(self.endpoint("/health")), None);
        self.send(builder, "health").await.map(|_| ())
    }
}

fn map_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(err.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ProviderError::Unauthorized);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Rejected {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            ["msg", "error_description", "message", "error"]
                .iter()
                .find_map(|key| json.get(key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

async fn parse_json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, ProviderError> {
    response
        .json::<T>()
        .await
        .map_err(|err| ProviderError::InvalidResponse(err.to_string()))
}

/// Read the `aal` claim from a JWT payload. Missing claims count as the base level.
fn aal_claim(access_token: &str) -> Result<AssuranceLevel, ProviderError> {
    let payload = access_token
        .split('.')
        .nth(1)
        .ok_or_else(|| ProviderError::InvalidResponse("access token is not a JWT".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| ProviderError::InvalidResponse("access token payload".to_string()))?;
    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|_| ProviderError::InvalidResponse("access token claims".to_string()))?;
    Ok(claims
        .get("aal")
        .and_then(Value::as_str)
        .and_then(AssuranceLevel::from_aal)
        .unwrap_or(AssuranceLevel::Base))
}
