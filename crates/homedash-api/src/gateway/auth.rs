// Credential exchanges
//
// Both exchanges bypass 401 recovery: a rejected login or refresh is an
// answer, not something to recover from.

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;

use super::{Gateway, decode};
use crate::auth::{
    AccessResponse, LoginRequest, RefreshRequest, TOKEN_PATH, TokenPair, TokenPairResponse,
};
use crate::error::Error;

impl Gateway {
    /// Trade username/password for an access + refresh pair.
    ///
    /// HTTP 400 and 401 mean the credentials were rejected and map to
    /// [`Error::Authentication`]; other failures pass through.
    pub(crate) async fn exchange_credentials(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<TokenPair, Error> {
        let url = self.url(TOKEN_PATH)?;
        debug!(username, "exchanging credentials at {}", url);

        let resp = self
            .http
            .post(url)
            .json(&LoginRequest {
                username,
                password: password.expose_secret(),
            })
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = resp.text().await.unwrap_or_default();
            let detail = rejection_detail(&body);
            return Err(Error::Authentication {
                message: format!("login rejected (HTTP {}): {detail}", status.as_u16()),
            });
        }

        decode::<TokenPairResponse>(resp).await.map(TokenPair::from)
    }
}

/// Mint a new access token from a refresh token. No bearer is attached.
pub(super) async fn exchange_refresh(
    http: &reqwest::Client,
    url: Url,
    refresh: &SecretString,
) -> Result<SecretString, Error> {
    debug!("refreshing access credential at {}", url);

    let resp = http
        .post(url)
        .json(&RefreshRequest {
            refresh: refresh.expose_secret(),
        })
        .send()
        .await
        .map_err(Error::Transport)?;

    let AccessResponse { access } = decode(resp).await?;
    Ok(SecretString::from(access))
}

/// Pull the backend's `detail` message out of a rejection body.
fn rejection_detail(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct Detail {
        detail: String,
    }

    match serde_json::from_str::<Detail>(body) {
        Ok(d) => d.detail,
        Err(_) if body.trim().is_empty() => "invalid username or password".into(),
        Err(_) => body.chars().take(200).collect(),
    }
}
