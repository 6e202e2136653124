// Authenticated request gateway
//
// Every backend call goes through `Gateway::send`: the current access
// credential is attached as a bearer token, and a 401 triggers one round
// of recovery. Concurrent 401s share a single refresh exchange, keyed by
// the refresh credential it spends. A request is re-issued at most once,
// and an unrecoverable 401 clears the session and redirects to login.

mod auth;
mod single_flight;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{BROKER_STATUS_PATH, BrokerStatus, TOKEN_REFRESH_PATH};
use crate::error::Error;
use crate::session::SessionStore;
use crate::transport::TransportConfig;

use self::single_flight::SingleFlight;

/// Outcome of one shared refresh exchange, cloned to every waiter.
type RefreshOutcome = Result<SecretString, Arc<Error>>;

/// The refresh credential a flight exchanges. Waiters only join a flight
/// spending the credential they hold.
struct RefreshKey(SecretString);

impl PartialEq for RefreshKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.expose_secret() == other.0.expose_secret()
    }
}

// ── LoginRedirect ────────────────────────────────────────────────────

/// Navigation hook fired when the session ends involuntarily.
///
/// Implemented for any `Fn()` closure, so callers can pass
/// `|| router.go_login()` directly.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self);
}

impl<F> LoginRedirect for F
where
    F: Fn() + Send + Sync,
{
    fn redirect_to_login(&self) {
        self();
    }
}

struct NoRedirect;

impl LoginRedirect for NoRedirect {
    fn redirect_to_login(&self) {}
}

// ── ApiRequest ───────────────────────────────────────────────────────

/// Descriptor for one backend call.
///
/// Carries the `retried` marker the gateway uses to stop a request from
/// going through 401 recovery twice.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Value>,
    timeout: Option<Duration>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            timeout: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Per-request timeout, overriding the client default.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark as already re-issued. A 401 on a retried request is final.
    #[must_use]
    pub fn retried(mut self) -> Self {
        self.retried = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    fn is_refresh_exchange(&self) -> bool {
        self.path.split('?').next() == Some(TOKEN_REFRESH_PATH)
    }
}

// ── Gateway ──────────────────────────────────────────────────────────

/// HTTP client for the dashboard backend with transparent credential
/// renewal.
pub struct Gateway {
    http: reqwest::Client,
    base_url: Url,
    session: Arc<SessionStore>,
    refresh: SingleFlight<RefreshKey, RefreshOutcome>,
    redirect: Arc<dyn LoginRedirect>,
}

impl Gateway {
    /// Create a gateway from a `TransportConfig`.
    ///
    /// `base_url` is the backend root (e.g. `http://127.0.0.1:8000`);
    /// request paths are appended to it verbatim.
    pub fn new(
        base_url: Url,
        session: Arc<SessionStore>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, session))
    }

    /// Create a gateway with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, session: Arc<SessionStore>) -> Self {
        Self {
            http,
            base_url,
            session,
            refresh: SingleFlight::new(),
            redirect: Arc::new(NoRedirect),
        }
    }

    /// Install the hook fired after an involuntary logout.
    #[must_use]
    pub fn with_login_redirect(mut self, redirect: impl LoginRedirect + 'static) -> Self {
        self.redirect = Arc::new(redirect);
        self
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Typed helpers ────────────────────────────────────────────────

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        self.json(ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &(impl Serialize + ?Sized),
    ) -> Result<T, Error> {
        self.json(ApiRequest::post(path).with_json(encode(body)?))
            .await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &(impl Serialize + ?Sized),
    ) -> Result<T, Error> {
        self.json(ApiRequest::put(path).with_json(encode(body)?))
            .await
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &(impl Serialize + ?Sized),
    ) -> Result<T, Error> {
        self.json(ApiRequest::patch(path).with_json(encode(body)?))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<(), Error> {
        let resp = self.send(ApiRequest::delete(path)).await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::from_response(resp).await)
        }
    }

    /// Send and decode a success body as `T`.
    pub async fn json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, Error> {
        let resp = self.send(request).await?;
        decode(resp).await
    }

    /// Send and return the body as loose JSON. An empty body is `Null`.
    pub async fn execute(&self, request: ApiRequest) -> Result<Value, Error> {
        let resp = self.send(request).await?;
        if !resp.status().is_success() {
            return Err(Error::from_response(resp).await);
        }
        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| deserialization_error(&e, body))
    }

    /// Backend broker connectivity. The backend answers 500 with a status
    /// body when its broker client is down; that is a report, not a failure.
    pub async fn broker_status(&self) -> Result<BrokerStatus, Error> {
        let resp = self.send(ApiRequest::get(BROKER_STATUS_PATH)).await?;
        if resp.status() == StatusCode::INTERNAL_SERVER_ERROR {
            let body = resp.text().await?;
            return serde_json::from_str(&body).map_err(|_| Error::Http {
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        decode(resp).await
    }

    // ── Send path ────────────────────────────────────────────────────

    /// Issue a request with the current bearer token and recover from 401.
    ///
    /// Non-401 responses (success or not) are returned as-is; callers
    /// decide what a 404 or 500 means. A 401 either resolves into a single
    /// re-issue with a fresh token or ends in [`Error::SessionExpired`]
    /// after the session is cleared and the login redirect has fired.
    pub async fn send(&self, mut request: ApiRequest) -> Result<reqwest::Response, Error> {
        let mut bearer = self.session.access_token();
        loop {
            let resp = self.dispatch(&request, bearer.as_ref()).await?;
            if resp.status() != StatusCode::UNAUTHORIZED {
                return Ok(resp);
            }
            let original = Error::from_response(resp).await;
            bearer = Some(self.recover(&mut request, bearer.as_ref(), original).await?);
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        bearer: Option<&SecretString>,
    ) -> Result<reqwest::Response, Error> {
        let url = self.url(&request.path)?;
        debug!(retried = request.retried, "{} {}", request.method, url);

        let mut builder = self.http.request(request.method.clone(), url);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token.expose_secret());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder.send().await.map_err(Error::Transport)
    }

    /// Decide what a 401 means. Returns the token to re-issue with, after
    /// marking the request retried.
    async fn recover(
        &self,
        request: &mut ApiRequest,
        sent_with: Option<&SecretString>,
        original: Error,
    ) -> Result<SecretString, Error> {
        if request.is_refresh_exchange() {
            return Err(self.expire("refresh exchange rejected", Arc::new(original)));
        }
        if request.retried {
            return Err(self.expire("still unauthorized after retry", Arc::new(original)));
        }

        // Another caller already renewed the token since this one was sent.
        if let Some(current) = self.session.access_token() {
            let stale = sent_with.is_none_or(|sent| sent.expose_secret() != current.expose_secret());
            if stale {
                debug!(path = %request.path, "retrying with renewed access token");
                request.retried = true;
                return Ok(current);
            }
        }

        let Some(refresh) = self.session.refresh_token() else {
            return Err(self.expire("no refresh credential", Arc::new(original)));
        };

        match self.refresh_access(refresh).await {
            Ok(access) => {
                request.retried = true;
                Ok(access)
            }
            // The flight already ended the session and fired the redirect.
            Err(source) => Err(Error::SessionExpired { source }),
        }
    }

    /// Join or start the shared refresh exchange.
    ///
    /// The exchange runs to completion even if every waiter goes away. Its
    /// result only touches the session if the session still holds the
    /// refresh credential that was spent, and a failure ends the session
    /// (and redirects) once per flight, not once per waiter.
    async fn refresh_access(&self, refresh: SecretString) -> RefreshOutcome {
        let url = self.url(TOKEN_REFRESH_PATH).map_err(Arc::new)?;
        let http = self.http.clone();
        let session = Arc::clone(&self.session);
        let redirect = Arc::clone(&self.redirect);
        let key = RefreshKey(refresh.clone());

        let outcome = self
            .refresh
            .run(key, move || async move {
                match auth::exchange_refresh(&http, url, &refresh).await {
                    Ok(access) => {
                        if session.apply_refreshed_access(&refresh, access.clone()) {
                            info!("access credential refreshed");
                            Ok(access)
                        } else {
                            debug!("session changed during refresh, credential discarded");
                            Err(Arc::new(Error::RefreshAbandoned))
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "credential refresh failed");
                        if session.expire_refresh(&refresh) {
                            warn!("session expired, redirecting to login");
                            redirect.redirect_to_login();
                        }
                        Err(Arc::new(e))
                    }
                }
            })
            .await;

        outcome.unwrap_or_else(|| Err(Arc::new(Error::RefreshAbandoned)))
    }

    /// Involuntary logout: clear the session, fire the redirect, and wrap
    /// the cause for the caller.
    fn expire(&self, reason: &str, source: Arc<Error>) -> Error {
        warn!(reason, "session expired, redirecting to login");
        self.session.logout();
        self.redirect.redirect_to_login();
        Error::SessionExpired { source }
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn encode(body: &(impl Serialize + ?Sized)) -> Result<Value, Error> {
    serde_json::to_value(body).map_err(|e| Error::Deserialization {
        message: format!("could not encode request body: {e}"),
        body: String::new(),
    })
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    if !resp.status().is_success() {
        return Err(Error::from_response(resp).await);
    }
    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| deserialization_error(&e, body))
}

fn deserialization_error(e: &serde_json::Error, body: String) -> Error {
    let preview: String = body.chars().take(200).collect();
    Error::Deserialization {
        message: format!("{e} (body preview: {preview:?})"),
        body,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn gateway(base: &str) -> Gateway {
        let session = Arc::new(SessionStore::new(Arc::new(MemoryStorage::default())));
        Gateway::with_client(reqwest::Client::new(), Url::parse(base).unwrap(), session)
    }

    #[test]
    fn url_joins_without_doubling_slashes() {
        let gw = gateway("http://127.0.0.1:8000/");
        assert_eq!(
            gw.url("/api/auth/me/").unwrap().as_str(),
            "http://127.0.0.1:8000/api/auth/me/"
        );
        assert_eq!(
            gw.url("api/devices/?room=3").unwrap().as_str(),
            "http://127.0.0.1:8000/api/devices/?room=3"
        );
    }

    #[test]
    fn url_keeps_base_path_prefix() {
        let gw = gateway("https://home.example.com/dash");
        assert_eq!(
            gw.url("/api/auth/me/").unwrap().as_str(),
            "https://home.example.com/dash/api/auth/me/"
        );
    }

    #[test]
    fn refresh_exchange_is_recognized_with_query() {
        assert!(ApiRequest::post(TOKEN_REFRESH_PATH).is_refresh_exchange());
        assert!(ApiRequest::post("/api/auth/token/refresh/?x=1").is_refresh_exchange());
        assert!(!ApiRequest::post("/api/auth/token/").is_refresh_exchange());
    }

    #[test]
    fn closures_are_login_redirects() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let redirect: Arc<dyn LoginRedirect> = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        redirect.redirect_to_login();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
