//! Configuration for the homedash CLI.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext), and
//! translation to `homedash_core::DashboardConfig` / `ConnectionParams`.
//! The CLI layers its `GlobalOpts` overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use homedash_core::config::{
    DEFAULT_BACKEND_URL, DEFAULT_BROKER_URL, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_KEEP_ALIVE_SECS,
};
use homedash_core::{
    ConnectionParams, DashboardConfig, ProtocolVersion, StorageScope, TlsVerification,
};

/// Keyring service name shared with `homedash_api::KeyringStorage`.
pub const KEYRING_SERVICE: &str = "homedash";

/// Backend password, checked before the keyring.
pub const PASSWORD_ENV: &str = "HOMEDASH_PASSWORD";

/// Backend username, used when the profile has none.
pub const USERNAME_ENV: &str = "HOMEDASH_USERNAME";

/// Broker password, checked before the keyring.
pub const BROKER_PASSWORD_ENV: &str = "HOMEDASH_BROKER_PASSWORD";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level `config.toml`.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Profile name to use when none is given on the command line.
    pub fn active_profile_name(&self) -> &str {
        self.default_profile.as_deref().unwrap_or("default")
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named backend profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Backend base URL (e.g., "http://192.168.1.20:8000").
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Where login credentials are kept: "session" or "persistent".
    #[serde(default)]
    pub storage: StorageScope,

    /// Login username.
    pub username: Option<String>,

    /// Login password (plaintext, prefer keyring or env var).
    pub password: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout.
    pub timeout: Option<u64>,

    /// Debug console connection defaults.
    #[serde(default)]
    pub broker: BrokerProfile,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            storage: StorageScope::default(),
            username: None,
            password: None,
            ca_cert: None,
            insecure: None,
            timeout: None,
            broker: BrokerProfile::default(),
        }
    }
}

fn default_backend() -> String {
    DEFAULT_BACKEND_URL.into()
}

/// Broker connection defaults for `homedash mqtt`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerProfile {
    pub url: String,
    pub client_id: String,
    pub username: String,
    /// Plaintext, prefer keyring or env var.
    pub password: Option<String>,
    pub keep_alive: u64,
    pub clean_session: bool,
    /// Wire level: 4 (3.1.1) or 5.
    pub protocol: ProtocolVersion,
    /// MQTT 5 session expiry in seconds; 0 leaves it unset.
    pub session_expiry: u32,
    pub tls: bool,
    pub verify_tls: bool,
    pub connect_timeout: u64,
}

impl Default for BrokerProfile {
    fn default() -> Self {
        Self {
            url: DEFAULT_BROKER_URL.into(),
            client_id: String::new(),
            username: String::new(),
            password: None,
            keep_alive: DEFAULT_KEEP_ALIVE_SECS,
            clean_session: true,
            protocol: ProtocolVersion::V311,
            session_expiry: 0,
            tls: false,
            verify_tls: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "homedash", "homedash").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("homedash");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file. A missing file yields the defaults.
///
/// `HOMEDASH_`-prefixed variables override the file; nested keys use a
/// double underscore (`HOMEDASH_DEFAULTS__TIMEOUT=5`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HOMEDASH_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution (without CLI flags) ───────────────────────

/// Login username: profile, then `HOMEDASH_USERNAME`.
pub fn resolve_username(profile: &Profile) -> Option<String> {
    profile
        .username
        .clone()
        .or_else(|| std::env::var(USERNAME_ENV).ok())
        .filter(|u| !u.trim().is_empty())
}

/// Resolve the login password from the credential chain (no CLI flag step).
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    resolve_secret(
        PASSWORD_ENV,
        &format!("{profile_name}/password"),
        profile.password.as_deref(),
    )
    .ok_or_else(|| ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Broker password, if any is configured. Anonymous brokers need none.
pub fn resolve_broker_password(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    resolve_secret(
        BROKER_PASSWORD_ENV,
        &format!("{profile_name}/broker-password"),
        profile.broker.password.as_deref(),
    )
}

/// Store the login password in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
        .and_then(|entry| entry.set_password(password))
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

fn resolve_secret(env_name: &str, keyring_user: &str, plaintext: Option<&str>) -> Option<SecretString> {
    // 1. Env var
    if let Ok(value) = std::env::var(env_name) {
        return Some(SecretString::from(value));
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, keyring_user) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    plaintext.map(|value| SecretString::from(value.to_owned()))
}

// ── Translation to runtime config ───────────────────────────────────

/// Build a `DashboardConfig` from a profile, with no CLI flag overrides.
pub fn profile_to_dashboard_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<DashboardConfig, ConfigError> {
    let backend_url: url::Url = profile
        .backend
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "backend".into(),
            reason: format!("invalid URL: {}", profile.backend),
        })?;

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));

    Ok(DashboardConfig {
        backend_url,
        tls,
        timeout,
        storage: profile.storage,
        profile: profile_name.into(),
        ..DashboardConfig::default()
    })
}

/// Prefill the debug console connection form from a profile.
pub fn profile_to_connection_params(profile: &Profile, profile_name: &str) -> ConnectionParams {
    let broker = &profile.broker;
    ConnectionParams {
        url: broker.url.clone(),
        client_id: broker.client_id.clone(),
        username: broker.username.clone(),
        password: resolve_broker_password(profile, profile_name),
        keep_alive_secs: broker.keep_alive,
        clean_session: broker.clean_session,
        protocol: broker.protocol,
        session_expiry_secs: broker.session_expiry,
        use_tls: broker.tls,
        verify_tls: broker.verify_tls,
        connect_timeout_secs: broker.connect_timeout,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "lab"

[defaults]
output = "json"
timeout = 12

[profiles.lab]
backend = "https://lab.local:8443"
storage = "persistent"
username = "alice"
insecure = true

[profiles.lab.broker]
url = "wss://lab.local:8084/mqtt"
protocol = 5
session_expiry = 120
tls = true
verify_tls = false

[profiles.minimal]
"#;

    #[test]
    fn parses_profiles_and_fills_defaults() {
        let config: Config = toml::from_str(SAMPLE).unwrap();

        assert_eq!(config.active_profile_name(), "lab");
        assert_eq!(config.defaults.output, "json");
        assert_eq!(config.defaults.color, "auto");

        let lab = &config.profiles["lab"];
        assert_eq!(lab.storage, StorageScope::Persistent);
        assert_eq!(lab.broker.protocol, ProtocolVersion::V5);
        assert_eq!(lab.broker.keep_alive, DEFAULT_KEEP_ALIVE_SECS);

        let minimal = &config.profiles["minimal"];
        assert_eq!(minimal.backend, DEFAULT_BACKEND_URL);
        assert_eq!(minimal.storage, StorageScope::Session);
        assert_eq!(minimal.broker.url, DEFAULT_BROKER_URL);
    }

    #[test]
    fn rejects_unknown_protocol_level() {
        let err = toml::from_str::<Config>("[profiles.x.broker]\nprotocol = 3\n");
        assert!(err.is_err());
    }

    #[test]
    fn profile_translates_to_dashboard_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();

        let lab = profile_to_dashboard_config(&config.profiles["lab"], "lab", &config.defaults)
            .unwrap();
        assert_eq!(lab.backend_url.as_str(), "https://lab.local:8443/");
        assert_eq!(lab.tls, TlsVerification::DangerAcceptInvalid);
        assert_eq!(lab.timeout, Duration::from_secs(12));
        assert_eq!(lab.profile, "lab");

        let minimal =
            profile_to_dashboard_config(&config.profiles["minimal"], "minimal", &config.defaults)
                .unwrap();
        assert_eq!(minimal.tls, TlsVerification::SystemDefaults);
    }

    #[test]
    fn invalid_backend_url_is_a_validation_error() {
        let profile = Profile {
            backend: "not a url".into(),
            ..Profile::default()
        };
        let err = profile_to_dashboard_config(&profile, "x", &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "backend"));
    }

    #[test]
    fn broker_profile_prefills_connection_form() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let params = profile_to_connection_params(&config.profiles["lab"], "lab");

        assert_eq!(params.endpoint().as_deref(), Some("wss://lab.local:8084/mqtt"));
        assert_eq!(params.protocol, ProtocolVersion::V5);
        assert_eq!(params.session_expiry_secs, 120);
        assert!(params.use_tls);
        assert!(!params.verify_tls);
    }

    #[test]
    fn save_then_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.profiles.insert(
            "home".into(),
            Profile {
                backend: "http://10.0.0.5:8000".into(),
                username: Some("bob".into()),
                ..Profile::default()
            },
        );
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        let home = &loaded.profiles["home"];
        assert_eq!(home.backend, "http://10.0.0.5:8000");
        assert_eq!(home.username.as_deref(), Some("bob"));
        assert_eq!(home.broker.connect_timeout, DEFAULT_CONNECT_TIMEOUT_SECS);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded.active_profile_name(), "default");
        assert!(loaded.profiles.is_empty());
    }
}
