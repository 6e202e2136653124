//! Clap derive structures for the `homedash` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use homedash_core::{ProtocolVersion, QoS, StorageScope};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// homedash -- smart-home dashboard from the command line
#[derive(Debug, Parser)]
#[command(
    name = "homedash",
    version,
    about = "Talk to a homedash smart-home backend and its message broker",
    long_about = "Log in to a homedash backend, issue authenticated API requests, and\n\
        open an interactive MQTT debug console against the home's broker.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Backend profile to use
    #[arg(long, short = 'p', env = "HOMEDASH_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Backend URL (overrides profile)
    #[arg(long, short = 'b', env = "HOMEDASH_BACKEND", global = true)]
    pub backend: Option<String>,

    /// Where login credentials are kept (overrides profile)
    #[arg(long, env = "HOMEDASH_STORAGE", global = true)]
    pub storage: Option<StorageScope>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "HOMEDASH_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "HOMEDASH_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "HOMEDASH_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and keep the session in the configured storage
    Login(LoginArgs),

    /// Forget the stored session
    Logout,

    /// Show the logged-in user
    Whoami,

    /// Send an authenticated request to the backend
    #[command(alias = "req")]
    Request(RequestArgs),

    /// Show the backend's own broker connection status
    Status,

    /// Interactive MQTT debug console
    Mqtt(MqttArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SESSION
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Username (defaults to the profile's, then prompts)
    #[arg(long, short = 'u')]
    pub username: Option<String>,

    /// Read the password from stdin instead of the credential chain
    #[arg(long)]
    pub password_stdin: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  REQUEST
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Args)]
pub struct RequestArgs {
    /// HTTP method
    #[arg(value_enum, ignore_case = true)]
    pub method: HttpMethod,

    /// Path relative to the backend root (e.g., /api/devices/)
    pub path: String,

    /// Inline JSON body
    #[arg(long, short = 'd', conflicts_with = "from_file")]
    pub data: Option<String>,

    /// Read the JSON body from a file
    #[arg(long, short = 'F')]
    pub from_file: Option<PathBuf>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  MQTT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connection flags override the profile's `[profiles.<name>.broker]` table.
#[derive(Debug, Args)]
pub struct MqttArgs {
    /// Broker WebSocket address (e.g., ws://127.0.0.1:8083/mqtt)
    #[arg(long)]
    pub url: Option<String>,

    /// Client id (blank generates one)
    #[arg(long)]
    pub client_id: Option<String>,

    /// Broker username
    #[arg(long)]
    pub username: Option<String>,

    /// Prompt for the broker password
    #[arg(long)]
    pub ask_password: bool,

    /// Keep-alive interval in seconds
    #[arg(long)]
    pub keep_alive: Option<u64>,

    /// Resume a persistent broker session instead of starting clean
    #[arg(long)]
    pub no_clean_session: bool,

    /// Protocol level: 4 (3.1.1) or 5
    #[arg(long, value_parser = parse_protocol)]
    pub protocol: Option<ProtocolVersion>,

    /// MQTT 5 session expiry in seconds
    #[arg(long)]
    pub session_expiry: Option<u32>,

    /// Use wss:// even if the address says ws://
    #[arg(long)]
    pub tls: bool,

    /// Skip broker certificate verification
    #[arg(long)]
    pub no_verify: bool,

    /// Connect timeout in seconds
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Subscribe once connected (repeatable)
    #[arg(long, short = 's')]
    pub subscribe: Vec<String>,

    /// QoS for --subscribe topics
    #[arg(long, default_value = "0")]
    pub qos: QoS,
}

fn parse_protocol(value: &str) -> Result<ProtocolVersion, String> {
    let level: u8 = value
        .parse()
        .map_err(|_| format!("invalid protocol version '{value}' (expected 4 or 5)"))?;
    ProtocolVersion::try_from(level)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current resolved configuration
    Show,

    /// Print the config file location
    Path,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store the login password in the system keyring
    SetPassword {
        /// Profile name
        #[arg(long)]
        profile: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
