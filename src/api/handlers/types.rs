//! Request and response payloads for the auth endpoints.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::identity::{AssuranceLevel, Factor};

/// Local-storage entries the browser sent along.
pub type ClientStorageSnapshot = BTreeMap<String, String>;

/// Local-storage changes the browser must apply; `null` removes the key.
pub type ClientStorageChanges = BTreeMap<String, Option<String>>;

const fn default_true() -> bool {
    true
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct LoginResponse {
    pub redirect_to: String,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct SessionResponse {
    pub user_id: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub current_level: Option<AssuranceLevel>,
    pub required_level: Option<AssuranceLevel>,
    pub device_trusted: bool,
    pub trusted_until: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct FactorsResponse {
    pub factors: Vec<Factor>,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct EnrollStartResponse {
    pub factor_id: String,
    pub secret: String,
    pub qr_code: String,
    pub uri: String,
    /// Durable storage changes; set when a replaced factor took device trust with it.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub client_storage: ClientStorageChanges,
}

#[derive(Deserialize, ToSchema)]
pub struct EnrollFinishRequest {
    pub factor_id: String,
    pub code: String,
}

#[derive(Deserialize, ToSchema)]
pub struct VerifyRequest {
    pub code: String,
    /// Opt into device trust; checked by default in the admin UI.
    #[serde(default = "default_true")]
    pub trust_device: bool,
    #[serde(default)]
    pub client_storage: ClientStorageSnapshot,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct VerifyResponse {
    pub redirect_to: String,
    pub trusted_until: Option<String>,
    pub client_storage: ClientStorageChanges,
}

#[derive(Deserialize, Default, ToSchema)]
pub struct DeviceTrustRequest {
    #[serde(default)]
    pub client_storage: ClientStorageSnapshot,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct DeviceTrustResponse {
    pub trusted: bool,
    pub expires_at: Option<String>,
    pub client_storage: ClientStorageChanges,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_request_defaults_to_trusting_device() -> Result<(), serde_json::Error> {
        let request: VerifyRequest = serde_json::from_str(r#"{"code":"123456"}"#)?;
        assert!(request.trust_device);
        assert!(request.client_storage.is_empty());
        Ok(())
    }

    #[test]
    fn removed_keys_serialize_as_null() -> Result<(), serde_json::Error> {
        let response = DeviceTrustResponse {
            trusted: false,
            expires_at: None,
            client_storage: BTreeMap::from([("device_trust_token".to_string(), None)]),
        };
        let json = serde_json::to_value(&response)?;
        assert!(json["client_storage"]["device_trust_token"].is_null());
        Ok(())
    }
}
