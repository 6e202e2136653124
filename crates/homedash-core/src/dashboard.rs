// ── Dashboard context ──
//
// Owns the session store and the gateway for one backend. Everything that
// needs "am I logged in" or an authenticated request goes through here,
// so tests can build isolated instances instead of sharing global state.

use std::sync::Arc;

use homedash_api::{
    ApiRequest, BrokerStatus, CredentialStorage, Gateway, Identity, SessionStore,
};
use secrecy::SecretString;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::DashboardConfig;
use crate::error::CoreError;
use crate::guard::{self, Navigation, Route};

const LOGIN_REQUIRED_CHANNEL_SIZE: usize = 16;

const UNKNOWN_ROUTE: Route = Route {
    name: "",
    path: "",
    requires_admin: false,
};

/// Fired whenever the session ends involuntarily and the user must log in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginRequired;

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<DashboardInner>`.
#[derive(Clone)]
pub struct Dashboard {
    inner: Arc<DashboardInner>,
}

struct DashboardInner {
    config: DashboardConfig,
    session: Arc<SessionStore>,
    gateway: Gateway,
    login_required: broadcast::Sender<LoginRequired>,
}

impl Dashboard {
    /// Build a dashboard whose credentials live in the configured storage scope.
    pub fn new(config: DashboardConfig) -> Result<Self, CoreError> {
        let storage = config.storage.open(&config.profile);
        Self::with_storage(config, storage)
    }

    /// Build a dashboard over an explicit credential backend.
    pub fn with_storage(
        config: DashboardConfig,
        storage: Arc<dyn CredentialStorage>,
    ) -> Result<Self, CoreError> {
        let session = Arc::new(
            SessionStore::new(storage).with_bootstrap_timeout(config.bootstrap_timeout),
        );
        let (login_required, _) = broadcast::channel(LOGIN_REQUIRED_CHANNEL_SIZE);

        let tx = login_required.clone();
        let gateway = Gateway::new(
            config.backend_url.clone(),
            Arc::clone(&session),
            &config.transport(),
        )?
        .with_login_redirect(move || {
            let _ = tx.send(LoginRequired);
        });

        Ok(Self {
            inner: Arc::new(DashboardInner {
                config,
                session,
                gateway,
                login_required,
            }),
        })
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.inner.session
    }

    pub fn gateway(&self) -> &Gateway {
        &self.inner.gateway
    }

    /// Observe involuntary logouts (refresh failed or impossible).
    pub fn login_required(&self) -> broadcast::Receiver<LoginRequired> {
        self.inner.login_required.subscribe()
    }

    // ── Session lifecycle ────────────────────────────────────────────

    pub async fn bootstrap(&self) {
        self.inner.session.bootstrap(&self.inner.gateway).await;
    }

    pub async fn login(&self, username: &str, password: &SecretString) -> Result<Identity, CoreError> {
        Ok(self
            .inner
            .session
            .login(&self.inner.gateway, username, password)
            .await?)
    }

    pub fn logout(&self) {
        self.inner.session.logout();
    }

    /// The logged-in identity, bootstrapping first if needed.
    pub async fn whoami(&self) -> Result<Identity, CoreError> {
        if !self.inner.session.is_initialized() {
            self.bootstrap().await;
        }
        self.inner.session.identity().ok_or(CoreError::NotLoggedIn)
    }

    // ── Requests ─────────────────────────────────────────────────────

    pub async fn request(&self, request: ApiRequest) -> Result<Value, CoreError> {
        Ok(self.inner.gateway.execute(request).await?)
    }

    pub async fn broker_status(&self) -> Result<BrokerStatus, CoreError> {
        Ok(self.inner.gateway.broker_status().await?)
    }

    // ── Navigation ───────────────────────────────────────────────────

    /// Route guard: where does a navigation to `full_path` end up?
    ///
    /// Bootstraps on first use. Unknown paths are treated as protected,
    /// non-admin screens.
    pub async fn authorize(&self, full_path: &str) -> Navigation {
        if !self.inner.session.is_initialized() {
            self.bootstrap().await;
        }

        let route = Route::resolve(full_path).unwrap_or(&UNKNOWN_ROUTE);
        let verdict = guard::decide(route, full_path, &self.inner.session.snapshot());
        debug!(path = full_path, route = route.name, ?verdict, "route guard");
        verdict
    }
}
