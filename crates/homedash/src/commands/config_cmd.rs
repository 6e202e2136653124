//! Config subcommand handlers.

use std::collections::HashMap;

use dialoguer::{Input, Select};
use secrecy::ExposeSecret;

use homedash_config::{BrokerProfile, Defaults};
use homedash_core::StorageScope;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

use super::util::{self, prompt_err};

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking sensitive fields.
fn format_config_redacted(cfg: &Config) -> String {
    use std::fmt::Write;
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "insecure = {}", cfg.defaults.insecure);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "backend = \"{}\"", p.backend);
        let _ = writeln!(out, "storage = \"{}\"", p.storage);
        if let Some(ref u) = p.username {
            let _ = writeln!(out, "username = \"{u}\"");
        }
        if p.password.is_some() {
            let _ = writeln!(out, "password = \"****\"");
        }
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
        if let Some(insecure) = p.insecure {
            let _ = writeln!(out, "insecure = {insecure}");
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }

        let b = &p.broker;
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}.broker]");
        let _ = writeln!(out, "url = \"{}\"", b.url);
        if !b.client_id.is_empty() {
            let _ = writeln!(out, "client_id = \"{}\"", b.client_id);
        }
        if !b.username.is_empty() {
            let _ = writeln!(out, "username = \"{}\"", b.username);
        }
        if b.password.is_some() {
            let _ = writeln!(out, "password = \"****\"");
        }
        let _ = writeln!(out, "protocol = {}", u8::from(b.protocol));
        let _ = writeln!(out, "keep_alive = {}", b.keep_alive);
        let _ = writeln!(out, "clean_session = {}", b.clean_session);
        let _ = writeln!(out, "tls = {}", b.tls);
        let _ = writeln!(out, "verify_tls = {}", b.verify_tls);
        let _ = writeln!(out, "connect_timeout = {}", b.connect_timeout);
    }

    out
}

/// Delegate to the shared config crate's save function.
fn save_config(cfg: &Config) -> Result<(), CliError> {
    config::save_config(cfg)?;
    Ok(())
}

/// Offer to store the password in the system keyring or return it for
/// plaintext config.
///
/// Returns `Some(secret)` if the user chose plaintext, `None` if stored in keyring.
fn prompt_keyring_storage(secret: &str, profile_name: &str) -> Result<Option<String>, CliError> {
    let choices = &[
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
    ];
    let selection = Select::new()
        .with_prompt("Where to store the password?")
        .items(choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        homedash_config::store_password(profile_name, secret)?;
        eprintln!("   ✓ Password stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(secret.to_owned()))
    }
}

// ── Handler ─────────────────────────────────────────────────────────

#[allow(clippy::too_many_lines)]
pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init => {
            let config_path = config::config_path();
            eprintln!("homedash: configuration wizard");
            eprintln!("   Config path: {}\n", config_path.display());

            // 1. Profile name
            let profile_name: String = Input::new()
                .with_prompt("Profile name")
                .default("default".into())
                .interact_text()
                .map_err(prompt_err)?;

            // 2. Backend URL
            let backend: String = Input::new()
                .with_prompt("Backend URL")
                .default(homedash_core::config::DEFAULT_BACKEND_URL.into())
                .interact_text()
                .map_err(prompt_err)?;

            // 3. Session storage
            let storage_choices = &[
                "Session (forget the login when the command exits)",
                "Persistent (keep the login in the system keyring)",
            ];
            let storage = match Select::new()
                .with_prompt("Session storage")
                .items(storage_choices)
                .default(1)
                .interact()
                .map_err(prompt_err)?
            {
                0 => StorageScope::Session,
                _ => StorageScope::Persistent,
            };

            // 4. Optional saved credentials
            let username: String = Input::new()
                .with_prompt("Username (blank to be asked at login)")
                .allow_empty(true)
                .interact_text()
                .map_err(prompt_err)?;
            let (username, password) = if username.trim().is_empty() {
                (None, None)
            } else {
                let pass = rpassword::prompt_password("Password (blank to skip): ")
                    .map_err(prompt_err)?;
                let password = if pass.is_empty() {
                    None
                } else {
                    prompt_keyring_storage(&pass, &profile_name)?
                };
                (Some(username), password)
            };

            // 5. Broker address
            let broker_url: String = Input::new()
                .with_prompt("Broker WebSocket address")
                .default(homedash_core::config::DEFAULT_BROKER_URL.into())
                .interact_text()
                .map_err(prompt_err)?;

            // 6. Build profile and config
            let profile = Profile {
                backend,
                storage,
                username,
                password,
                broker: BrokerProfile {
                    url: broker_url,
                    ..BrokerProfile::default()
                },
                ..Profile::default()
            };

            let mut profiles = HashMap::new();
            profiles.insert(profile_name.clone(), profile);

            let cfg = Config {
                default_profile: Some(profile_name.clone()),
                defaults: Defaults::default(),
                profiles,
            };

            // 7. Write config
            save_config(&cfg)?;

            eprintln!("\n✓ Configuration written to {}", config_path.display());
            eprintln!("  Active profile: {profile_name}");
            eprintln!("\n  Test it: homedash login");

            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = config::load_config_or_default();
            let out = output::render_single(&global.output, &cfg, format_config_redacted, |_| {
                "config".into()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.active_profile_name();
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: homedash config init");
            } else {
                let mut names: Vec<_> = cfg.profiles.keys().collect();
                names.sort();
                for name in names {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        // ── Use <name> ─────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();

            if !cfg.profiles.contains_key(&name) {
                return Err(config::profile_not_found(&cfg, &name));
            }

            cfg.default_profile = Some(name.clone());
            save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        // ── SetPassword ─────────────────────────────────────────────
        ConfigCommand::SetPassword { profile } => {
            let cfg = config::load_config_or_default();
            let profile_name = profile.unwrap_or_else(|| config::active_profile_name(global, &cfg));

            if !cfg.profiles.contains_key(&profile_name) {
                return Err(config::profile_not_found(&cfg, &profile_name));
            }

            let secret = util::prompt_secret("Password: ")?;
            homedash_config::store_password(&profile_name, secret.expose_secret())?;

            eprintln!("✓ Password stored in system keyring for profile '{profile_name}'");
            Ok(())
        }
    }
}
