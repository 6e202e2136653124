//! Session command handlers: login, logout, whoami.

use dialoguer::Input;
use secrecy::SecretString;

use homedash_core::{CoreError, Identity, StorageScope};

use crate::cli::LoginArgs;
use crate::error::CliError;
use crate::output;

use super::{Context, util};

fn identity_detail(identity: &Identity) -> String {
    output::render_fields(&[
        ("ID", identity.id.to_string()),
        ("Username", identity.username.clone()),
        ("Email", identity.email.clone()),
        ("Admin", if identity.is_admin { "yes" } else { "no" }.into()),
    ])
}

fn print_identity(ctx: &Context<'_>, identity: &Identity) {
    let out = output::render_single(&ctx.global.output, identity, identity_detail, |i| {
        i.username.clone()
    });
    output::print_output(&out, ctx.global.quiet);
}

// ── Login ───────────────────────────────────────────────────────────

fn resolve_username(ctx: &Context<'_>, args: &LoginArgs) -> Result<String, CliError> {
    if let Some(username) = args
        .username
        .clone()
        .or_else(|| homedash_config::resolve_username(ctx.profile))
    {
        return Ok(username);
    }
    Input::new()
        .with_prompt("Username")
        .interact_text()
        .map_err(util::prompt_err)
}

fn resolve_password(ctx: &Context<'_>, args: &LoginArgs) -> Result<SecretString, CliError> {
    if args.password_stdin {
        return util::read_secret_from_stdin();
    }
    match homedash_config::resolve_password(ctx.profile, ctx.profile_name) {
        Ok(password) => Ok(password),
        Err(_) => util::prompt_secret("Password: "),
    }
}

pub async fn login(ctx: &Context<'_>, args: LoginArgs) -> Result<(), CliError> {
    let username = resolve_username(ctx, &args)?;
    let password = resolve_password(ctx, &args)?;

    let spinner = util::spinner("Logging in...", ctx.global.quiet);
    let result = ctx.dashboard.login(&username, &password).await;
    spinner.finish_and_clear();

    let identity = result.map_err(|e| match e {
        CoreError::AuthenticationFailed { message } => CliError::AuthFailed {
            profile: ctx.profile_name.to_owned(),
            message,
        },
        other => other.into(),
    })?;

    print_identity(ctx, &identity);
    if ctx.dashboard.config().storage == StorageScope::Session && !ctx.global.quiet {
        eprintln!(
            "note: session storage keeps credentials for this process only; \
             use --storage persistent to stay logged in"
        );
    }
    Ok(())
}

// ── Logout ──────────────────────────────────────────────────────────

#[allow(clippy::unnecessary_wraps)]
pub fn logout(ctx: &Context<'_>) -> Result<(), CliError> {
    ctx.dashboard.logout();
    if !ctx.global.quiet {
        eprintln!("✓ Logged out of profile '{}'", ctx.profile_name);
    }
    Ok(())
}

// ── Whoami ──────────────────────────────────────────────────────────

pub async fn whoami(ctx: &Context<'_>) -> Result<(), CliError> {
    let identity = ctx.dashboard.whoami().await?;
    print_identity(ctx, &identity);
    Ok(())
}
