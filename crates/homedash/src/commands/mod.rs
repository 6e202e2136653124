//! Command dispatch: bridges CLI args -> dashboard calls -> output formatting.

pub mod auth;
pub mod config_cmd;
pub mod mqtt;
pub mod request;
pub mod status;
pub mod util;

use homedash_config::Profile;
use homedash_core::Dashboard;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Everything a backend-bound handler needs.
pub struct Context<'a> {
    pub dashboard: &'a Dashboard,
    pub profile: &'a Profile,
    pub profile_name: &'a str,
    pub global: &'a GlobalOpts,
}

/// Dispatch a backend-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, ctx: &Context<'_>) -> Result<(), CliError> {
    match cmd {
        Command::Login(args) => auth::login(ctx, args).await,
        Command::Logout => auth::logout(ctx),
        Command::Whoami => auth::whoami(ctx).await,
        Command::Request(args) => request::handle(ctx, args).await,
        Command::Status => status::handle(ctx).await,
        Command::Mqtt(args) => mqtt::handle(ctx, args).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
