// ── Runtime configuration ──
//
// These types describe *where* the backend and broker are and how to talk
// to them. They carry credentials and tuning but never touch disk: the CLI
// builds them from its profile and hands them in.

use std::path::PathBuf;
use std::time::Duration;

use homedash_api::session::DEFAULT_BOOTSTRAP_TIMEOUT;
use homedash_api::transport::{TlsMode, TransportConfig};
use homedash_api::{LinkOptions, ProtocolVersion, StorageScope};
use secrecy::SecretString;
use url::Url;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_BROKER_URL: &str = "ws://127.0.0.1:8083/mqtt";
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

const KEEP_ALIVE_RANGE: (u64, u64) = (1, 65_535);
const CONNECT_TIMEOUT_RANGE: (u64, u64) = (1, 60);

/// TLS verification strategy for the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-signed development backends).
    DangerAcceptInvalid,
}

/// Configuration for one dashboard backend.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Backend root, e.g. `http://127.0.0.1:8000`.
    pub backend_url: Url,
    pub tls: TlsVerification,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Where credentials are persisted.
    pub storage: StorageScope,
    /// Profile name; namespaces persisted credentials.
    pub profile: String,
    /// Identity probe timeout during bootstrap.
    pub bootstrap_timeout: Duration,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            backend_url: Url::parse(DEFAULT_BACKEND_URL).expect("default backend URL is valid"),
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            storage: StorageScope::default(),
            profile: "default".into(),
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
        }
    }
}

impl DashboardConfig {
    pub(crate) fn transport(&self) -> TransportConfig {
        let tls = match &self.tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        };
        TransportConfig {
            tls,
            timeout: self.timeout,
        }
    }
}

// ── ConnectionParams ─────────────────────────────────────────────────

/// Operator-entered broker connection form for the debug console.
///
/// Numeric fields are taken as typed: zero means "use the default", and
/// anything out of range is clamped when the link is opened.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub url: String,
    /// Blank means a generated id.
    pub client_id: String,
    /// Blank means anonymous.
    pub username: String,
    pub password: Option<SecretString>,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    pub protocol: ProtocolVersion,
    /// MQTT 5 only; zero means "not set".
    pub session_expiry_secs: u32,
    /// Upgrade `ws://` to `wss://`.
    pub use_tls: bool,
    pub verify_tls: bool,
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            url: DEFAULT_BROKER_URL.into(),
            client_id: String::new(),
            username: String::new(),
            password: None,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            clean_session: true,
            protocol: ProtocolVersion::V311,
            session_expiry_secs: 0,
            use_tls: false,
            verify_tls: true,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl ConnectionParams {
    /// Effective keep-alive interval, in [1, 65535] seconds.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(clamp_or_default(
            self.keep_alive_secs,
            DEFAULT_KEEP_ALIVE_SECS,
            KEEP_ALIVE_RANGE,
        ))
    }

    /// Effective connect timeout, in [1, 60] seconds.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(clamp_or_default(
            self.connect_timeout_secs,
            DEFAULT_CONNECT_TIMEOUT_SECS,
            CONNECT_TIMEOUT_RANGE,
        ))
    }

    /// Endpoint to dial, or `None` when the address is blank.
    pub fn endpoint(&self) -> Option<String> {
        let url = self.url.trim();
        if url.is_empty() {
            return None;
        }
        match url.strip_prefix("ws://") {
            Some(rest) if self.use_tls => Some(format!("wss://{rest}")),
            _ => Some(url.to_owned()),
        }
    }

    pub(crate) fn link_options(&self, url: String) -> LinkOptions {
        let username = self.username.trim();
        let session_expiry = match self.protocol {
            ProtocolVersion::V5 if self.session_expiry_secs > 0 => Some(self.session_expiry_secs),
            _ => None,
        };
        LinkOptions {
            url,
            client_id: self.client_id.trim().to_owned(),
            username: (!username.is_empty()).then(|| username.to_owned()),
            password: self.password.clone(),
            keep_alive: self.keep_alive(),
            clean_session: self.clean_session,
            protocol: self.protocol,
            verify_tls: !self.use_tls || self.verify_tls,
            session_expiry,
        }
    }
}

fn clamp_or_default(value: u64, default: u64, (min, max): (u64, u64)) -> u64 {
    let value = if value == 0 { default } else { value };
    value.clamp(min, max)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_default() {
        let params = ConnectionParams {
            keep_alive_secs: 0,
            connect_timeout_secs: 0,
            ..ConnectionParams::default()
        };
        assert_eq!(params.keep_alive(), Duration::from_secs(60));
        assert_eq!(params.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let params = ConnectionParams {
            keep_alive_secs: 1_000_000,
            connect_timeout_secs: 600,
            ..ConnectionParams::default()
        };
        assert_eq!(params.keep_alive(), Duration::from_secs(65_535));
        assert_eq!(params.connect_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn tls_upgrades_insecure_scheme() {
        let mut params = ConnectionParams {
            url: "  ws://broker.local:8083/mqtt ".into(),
            ..ConnectionParams::default()
        };
        assert_eq!(params.endpoint().as_deref(), Some("ws://broker.local:8083/mqtt"));

        params.use_tls = true;
        assert_eq!(params.endpoint().as_deref(), Some("wss://broker.local:8083/mqtt"));

        params.url = "wss://already.secure/mqtt".into();
        assert_eq!(params.endpoint().as_deref(), Some("wss://already.secure/mqtt"));

        params.url = "   ".into();
        assert_eq!(params.endpoint(), None);
    }

    #[test]
    fn session_expiry_only_for_v5() {
        let mut params = ConnectionParams {
            session_expiry_secs: 300,
            username: "  ".into(),
            ..ConnectionParams::default()
        };
        let v4 = params.link_options("ws://x/mqtt".into());
        assert_eq!(v4.session_expiry, None);
        assert_eq!(v4.username, None);

        params.protocol = ProtocolVersion::V5;
        let v5 = params.link_options("ws://x/mqtt".into());
        assert_eq!(v5.session_expiry, Some(300));
    }
}
