//! Session Store: the single source of truth for "am I logged in".
//!
//! Holds the access/refresh credentials and the identity they belong to,
//! mirrors the credentials into a [`CredentialStorage`] backend, and
//! publishes every change through a `watch` channel. All mutations go
//! through `send_modify`, so a read and the write that depends on it
//! happen under the channel's lock even on a multi-threaded runtime.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auth::{Identity, ME_PATH, TokenPair};
use crate::error::Error;
use crate::gateway::Gateway;
use crate::storage::{ACCESS_KEY, CredentialStorage, REFRESH_KEY};

/// How long `bootstrap` waits for the identity probe before failing closed.
pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(8);

// ── Session ──────────────────────────────────────────────────────────

/// Point-in-time view of the session.
///
/// Invariant: `identity` present implies `access` present. The reverse
/// holds only briefly while `bootstrap` or `login` is in flight.
#[derive(Debug, Clone, Default)]
pub struct Session {
    access: Option<SecretString>,
    refresh: Option<SecretString>,
    identity: Option<Identity>,
    initialized: bool,
}

impl Session {
    pub fn access_token(&self) -> Option<&SecretString> {
        self.access.as_ref()
    }

    pub fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh.as_ref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// `true` once the first bootstrap attempt has resolved. Never reverts.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_authenticated(&self) -> bool {
        self.access.is_some() && self.identity.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.identity.as_ref().is_some_and(|identity| identity.is_admin)
    }

    fn clear_credentials(&mut self) {
        self.access = None;
        self.refresh = None;
        self.identity = None;
    }
}

// ── SessionStore ─────────────────────────────────────────────────────

/// Owned, injectable session context.
///
/// Writers are `bootstrap`, `login`, `logout`, and the gateway's refresh
/// path (via [`apply_refreshed_access`](Self::apply_refreshed_access) and
/// [`expire_refresh`](Self::expire_refresh)).
pub struct SessionStore {
    state: watch::Sender<Session>,
    storage: Arc<dyn CredentialStorage>,
    bootstrap_timeout: Duration,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn CredentialStorage>) -> Self {
        let (state, _) = watch::channel(Session::default());
        Self {
            state,
            storage,
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
        }
    }

    /// Override the identity-probe timeout used by `bootstrap`.
    pub fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = timeout;
        self
    }

    // ── Getters ──────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Observe session changes (login, logout, refresh, bootstrap).
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn is_admin(&self) -> bool {
        self.state.borrow().is_admin()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.borrow().is_initialized()
    }

    pub fn access_token(&self) -> Option<SecretString> {
        self.state.borrow().access.clone()
    }

    pub fn refresh_token(&self) -> Option<SecretString> {
        self.state.borrow().refresh.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Restore the persisted session and validate it against the backend.
    ///
    /// With a stored access token, fetches the identity within the
    /// bootstrap timeout. Any failure (network, timeout, non-success)
    /// clears every credential: an unverifiable session counts as logged
    /// out. Always leaves the session initialized.
    pub async fn bootstrap(&self, gateway: &Gateway) {
        let access = self.load_persisted(ACCESS_KEY);
        let refresh = self.load_persisted(REFRESH_KEY);

        if let Some(access) = access {
            self.state.send_modify(|s| {
                s.access = Some(SecretString::from(access));
                s.refresh = refresh.map(SecretString::from);
            });

            match tokio::time::timeout(self.bootstrap_timeout, gateway.get::<Identity>(ME_PATH))
                .await
            {
                Ok(Ok(identity)) => {
                    info!(user = %identity.username, "session restored");
                    self.state.send_modify(|s| s.identity = Some(identity));
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "stored session rejected, clearing credentials");
                    self.clear();
                }
                Err(_) => {
                    warn!(
                        timeout_secs = self.bootstrap_timeout.as_secs(),
                        "identity probe timed out, clearing credentials"
                    );
                    self.clear();
                }
            }
        } else {
            debug!("no stored session");
        }

        let first = self.state.send_if_modified(|s| !std::mem::replace(&mut s.initialized, true));
        if first {
            debug!("session initialized");
        }
    }

    /// Exchange username/password for credentials, persist them, and load
    /// the identity.
    ///
    /// A rejected exchange is [`Error::Authentication`]. If the identity
    /// fetch fails after a successful exchange, the freshly stored
    /// credentials are rolled back and the error is returned.
    pub async fn login(
        &self,
        gateway: &Gateway,
        username: &str,
        password: &SecretString,
    ) -> Result<Identity, Error> {
        let TokenPair { access, refresh } = gateway.exchange_credentials(username, password).await?;

        self.persist(ACCESS_KEY, Some(&access));
        self.persist(REFRESH_KEY, Some(&refresh));
        self.state.send_modify(|s| {
            s.access = Some(access);
            s.refresh = Some(refresh);
        });

        match gateway.get::<Identity>(ME_PATH).await {
            Ok(identity) => {
                info!(user = %identity.username, admin = identity.is_admin, "logged in");
                self.state.send_modify(|s| s.identity = Some(identity.clone()));
                Ok(identity)
            }
            Err(e) => {
                warn!(error = %e, "identity fetch failed after login, rolling back");
                self.clear();
                Err(e)
            }
        }
    }

    /// Forget the session in memory and in storage. No network traffic.
    pub fn logout(&self) {
        self.clear();
        debug!("logged out");
    }

    /// Replace only the access credential (after a successful refresh).
    pub fn set_access_token(&self, access: SecretString) {
        self.persist(ACCESS_KEY, Some(&access));
        self.state.send_modify(|s| s.access = Some(access));
    }

    /// Install an access credential obtained by exchanging `refresh`.
    ///
    /// Applied only while `refresh` is still the session's refresh
    /// credential; a logout or a new login during the exchange wins.
    /// Returns whether the credential was installed.
    pub fn apply_refreshed_access(&self, refresh: &SecretString, access: SecretString) -> bool {
        self.state.send_if_modified(|s| {
            if !holds_refresh(s, refresh) {
                return false;
            }
            self.persist(ACCESS_KEY, Some(&access));
            s.access = Some(access);
            true
        })
    }

    /// End the session after exchanging `refresh` failed, unless the
    /// session has already moved on to other credentials. Returns whether
    /// the session was cleared.
    pub fn expire_refresh(&self, refresh: &SecretString) -> bool {
        let cleared = self.state.send_if_modified(|s| {
            if !holds_refresh(s, refresh) {
                return false;
            }
            self.persist(ACCESS_KEY, None);
            self.persist(REFRESH_KEY, None);
            s.clear_credentials();
            true
        });
        if cleared {
            debug!("session ended after failed refresh");
        }
        cleared
    }

    // ── Internals ────────────────────────────────────────────────────

    fn clear(&self) {
        self.state.send_modify(Session::clear_credentials);
        self.persist(ACCESS_KEY, None);
        self.persist(REFRESH_KEY, None);
    }

    fn load_persisted(&self, key: &str) -> Option<String> {
        match self.storage.load(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, error = %e, "could not read stored credential");
                None
            }
        }
    }

    /// Write-through to storage. A failing backend only costs durability.
    fn persist(&self, key: &str, value: Option<&SecretString>) {
        let result = match value {
            Some(secret) => self.storage.store(key, secret.expose_secret()),
            None => self.storage.remove(key),
        };
        if let Err(e) = result {
            warn!(key, error = %e, "could not persist credential");
        }
    }
}

fn holds_refresh(session: &Session, refresh: &SecretString) -> bool {
    session
        .refresh
        .as_ref()
        .is_some_and(|current| current.expose_secret() == refresh.expose_secret())
}
