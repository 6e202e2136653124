//! CLI configuration: thin wrapper around `homedash_config` shared types.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--backend, --storage, --insecure, --timeout).

use std::time::Duration;

use homedash_core::{DashboardConfig, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use homedash_config::{
    Config, Profile, config_path, load_config_or_default, save_config,
};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .unwrap_or_else(|| config.active_profile_name().to_owned())
}

/// The named profile, or built-in defaults when the config has none.
///
/// An explicitly requested (`--profile`) but missing profile is an error.
pub fn profile_or_default(
    global: &GlobalOpts,
    config: &Config,
    profile_name: &str,
) -> Result<Profile, CliError> {
    if let Some(profile) = config.profiles.get(profile_name) {
        return Ok(profile.clone());
    }
    if global.profile.is_some() {
        return Err(profile_not_found(config, profile_name));
    }
    Ok(Profile::default())
}

pub fn profile_not_found(config: &Config, name: &str) -> CliError {
    let mut available: Vec<_> = config.profiles.keys().cloned().collect();
    available.sort();
    CliError::ProfileNotFound {
        name: name.into(),
        available: if available.is_empty() {
            "(none)".into()
        } else {
            available.join(", ")
        },
    }
}

/// Translate a `Profile` + global flags into a `DashboardConfig`.
///
/// CLI flag overrides take priority over profile values.
pub fn resolve_profile(
    profile: &Profile,
    profile_name: &str,
    config: &Config,
    global: &GlobalOpts,
) -> Result<DashboardConfig, CliError> {
    let mut dashboard =
        homedash_config::profile_to_dashboard_config(profile, profile_name, &config.defaults)?;

    // 1. Backend URL (flag > env > profile)
    if let Some(url_str) = global.backend.as_deref() {
        dashboard.backend_url = url_str.parse().map_err(|_| CliError::Validation {
            field: "backend".into(),
            reason: format!("invalid URL: {url_str}"),
        })?;
    }

    // 2. TLS verification
    if global.insecure {
        dashboard.tls = TlsVerification::DangerAcceptInvalid;
    }

    // 3. Credential storage
    if let Some(scope) = global.storage {
        dashboard.storage = scope;
    }

    // 4. Timeout
    if let Some(secs) = global.timeout {
        dashboard.timeout = Duration::from_secs(secs);
    }

    Ok(dashboard)
}
