// Backend authentication endpoints and their wire shapes.
//
// The backend issues a short-lived access token and a longer-lived
// refresh token. Only the refresh token may mint new access tokens.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// `POST` username/password, returns `{access, refresh}`.
pub const TOKEN_PATH: &str = "/api/auth/token/";

/// `POST {refresh}`, returns `{access}`.
pub const TOKEN_REFRESH_PATH: &str = "/api/auth/token/refresh/";

/// `GET`, returns the identity bound to the bearer token.
pub const ME_PATH: &str = "/api/auth/me/";

/// `GET`, reports whether the backend's own broker client is connected.
pub const BROKER_STATUS_PATH: &str = "/api/mqtt/status/";

/// The logged-in user as reported by `GET /api/auth/me/`.
///
/// The backend sends more fields (`is_staff`, `is_superuser`, ...); only
/// the ones the dashboard acts on are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Body of the credential exchange.
#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Body of the refresh exchange.
#[derive(Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Response of the credential exchange. Converted to secrets immediately.
#[derive(Deserialize)]
pub(crate) struct TokenPairResponse {
    pub access: String,
    pub refresh: String,
}

/// Response of the refresh exchange.
#[derive(Deserialize)]
pub(crate) struct AccessResponse {
    pub access: String,
}

/// Access + refresh credentials issued at login.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: SecretString,
    pub refresh: SecretString,
}

impl From<TokenPairResponse> for TokenPair {
    fn from(resp: TokenPairResponse) -> Self {
        Self {
            access: SecretString::from(resp.access),
            refresh: SecretString::from(resp.refresh),
        }
    }
}

/// Backend broker connectivity, as reported by `GET /api/mqtt/status/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStatus {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_extra_fields() {
        let json = serde_json::json!({
            "id": 7,
            "username": "alice",
            "email": "alice@example.com",
            "is_active": true,
            "is_staff": true,
            "is_superuser": false,
            "is_admin": true
        });

        let identity: Identity = serde_json::from_value(json).unwrap();
        assert_eq!(identity.id, 7);
        assert_eq!(identity.username, "alice");
        assert!(identity.is_admin);
    }

    #[test]
    fn broker_status_error_is_optional() {
        let status: BrokerStatus = serde_json::from_str(r#"{"connected":true}"#).unwrap();
        assert!(status.connected);
        assert!(status.error.is_none());
    }
}
