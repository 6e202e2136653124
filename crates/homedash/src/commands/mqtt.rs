//! Interactive broker debug console.
//!
//! Reads one command per line from stdin while streaming inbound messages
//! and connection changes to the terminal. Ctrl-C fires the shutdown
//! signal, which closes the live link.

use std::time::Duration;

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use homedash_core::{
    ConnectionParams, ConsoleState, ConsoleStatus, DebugConsole, Direction, MqttConnector,
    Outcome, QoS, TranscriptEntry,
};

use crate::cli::MqttArgs;
use crate::error::CliError;
use crate::output;

use super::{Context, util};

/// How long Ctrl-C waits for the link to report closed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

// ── Console command line ────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "mqtt",
    no_binary_name = true,
    disable_version_flag = true,
    subcommand_required = true
)]
struct ConsoleLine {
    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum ConsoleCommand {
    /// Subscribe to a topic filter
    Sub {
        topic: String,
        #[arg(default_value = "0")]
        qos: QoS,
    },

    /// Unsubscribe from a topic filter
    Unsub { topic: String },

    /// Publish a message
    Pub {
        /// Delivery QoS
        #[arg(long, short = 'q', default_value = "0")]
        qos: QoS,
        /// Ask the broker to retain the message
        #[arg(long, short = 'r')]
        retain: bool,
        topic: String,
        /// Message body (the rest of the line)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        payload: Vec<String>,
    },

    /// List active subscriptions
    Subs,

    /// Show the most recent transcript entries
    Log {
        #[arg(default_value = "20")]
        count: usize,
    },

    /// Empty the transcript
    Clear,

    /// Show the connection status
    Status,

    /// Connect again with the same settings
    Connect,

    /// Abort a connection attempt in progress
    Cancel,

    /// Close the connection
    Disconnect,

    /// Leave the console
    #[command(alias = "exit")]
    Quit,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, clap::Error> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Ok(None);
    }
    ConsoleLine::try_parse_from(tokens).map(|l| Some(l.command))
}

// ── Connection parameters ───────────────────────────────────────────

fn connection_params(ctx: &Context<'_>, args: &MqttArgs) -> Result<ConnectionParams, CliError> {
    let mut params = homedash_config::profile_to_connection_params(ctx.profile, ctx.profile_name);

    if let Some(url) = &args.url {
        params.url.clone_from(url);
    }
    if let Some(client_id) = &args.client_id {
        params.client_id.clone_from(client_id);
    }
    if let Some(username) = &args.username {
        params.username.clone_from(username);
    }
    if args.ask_password {
        params.password = Some(util::prompt_secret("Broker password: ")?);
    }
    if let Some(keep_alive) = args.keep_alive {
        params.keep_alive_secs = keep_alive;
    }
    if args.no_clean_session {
        params.clean_session = false;
    }
    if let Some(protocol) = args.protocol {
        params.protocol = protocol;
    }
    if let Some(expiry) = args.session_expiry {
        params.session_expiry_secs = expiry;
    }
    if args.tls {
        params.use_tls = true;
    }
    if args.no_verify {
        params.verify_tls = false;
    }
    if let Some(timeout) = args.connect_timeout {
        params.connect_timeout_secs = timeout;
    }
    Ok(params)
}

// ── Terminal rendering ──────────────────────────────────────────────

/// Prints what changed since the last published console state.
struct Printer {
    color: bool,
    status: ConsoleStatus,
    error: Option<String>,
    last: Option<TranscriptEntry>,
}

impl Printer {
    fn new(color: bool) -> Self {
        Self {
            color,
            status: ConsoleStatus::Idle,
            error: None,
            last: None,
        }
    }

    fn show(&mut self, state: &ConsoleState) {
        if state.status != self.status {
            self.status = state.status;
            eprintln!("[{}]", self.status_label(state.status));
        }
        if state.error != self.error {
            if let Some(error) = &state.error {
                eprintln!("{}", self.paint_error(error));
            }
            self.error.clone_from(&state.error);
        }

        let entries = state.transcript.entries();
        let start = self
            .last
            .as_ref()
            .and_then(|last| entries.iter().rposition(|e| e == last))
            .map_or(0, |i| i + 1);
        for entry in entries.iter().skip(start) {
            if entry.direction == Direction::In {
                println!("{}", self.format_entry(entry));
            }
        }
        self.last = entries.last().cloned();
    }

    fn status_label(&self, status: ConsoleStatus) -> String {
        let word = status.to_string();
        match status {
            ConsoleStatus::Connected => output::status_word(&word, true, self.color),
            ConsoleStatus::Idle => output::status_word(&word, false, self.color),
            ConsoleStatus::Connecting => output::dim(&word, self.color),
        }
    }

    fn paint_error(&self, error: &str) -> String {
        if self.color {
            format!("{} {error}", "error:".red().bold())
        } else {
            format!("error: {error}")
        }
    }

    fn format_entry(&self, entry: &TranscriptEntry) -> String {
        let arrow = match entry.direction {
            Direction::In => "<-",
            Direction::Out => "->",
        };
        let time = output::dim(&entry.time_label(), self.color);
        let topic = if self.color {
            entry.topic.cyan().to_string()
        } else {
            entry.topic.clone()
        };
        format!("{time} {arrow} {topic}  {}", entry.payload)
    }
}

fn report(action: &str, outcome: &Outcome) {
    match outcome {
        Outcome::Done => eprintln!("✓ {action}"),
        Outcome::Ignored(skip) => eprintln!("- {action} skipped: {skip}"),
        Outcome::Failed(message) => eprintln!("✗ {action} failed: {message}"),
    }
}

// ── Command execution ───────────────────────────────────────────────

async fn execute(
    console: &DebugConsole<MqttConnector>,
    params: &ConnectionParams,
    printer: &Printer,
    command: ConsoleCommand,
) -> Flow {
    match command {
        ConsoleCommand::Sub { topic, qos } => {
            let outcome = console.subscribe(&topic, qos).await;
            report(&format!("subscribe {topic} (qos {qos})"), &outcome);
        }
        ConsoleCommand::Unsub { topic } => {
            let outcome = console.unsubscribe(&topic).await;
            report(&format!("unsubscribe {topic}"), &outcome);
        }
        ConsoleCommand::Pub {
            qos,
            retain,
            topic,
            payload,
        } => {
            let payload = payload.join(" ");
            let outcome = console.publish(&topic, &payload, qos, retain).await;
            report(&format!("publish {topic}"), &outcome);
        }
        ConsoleCommand::Subs => {
            let state = console.state();
            if state.subscriptions.is_empty() {
                eprintln!("(no subscriptions)");
            }
            for sub in &state.subscriptions {
                println!("{}  qos {}", sub.topic, sub.qos);
            }
        }
        ConsoleCommand::Log { count } => {
            let state = console.state();
            let entries = state.transcript.entries();
            for entry in entries.iter().skip(entries.len().saturating_sub(count)) {
                println!("{}", printer.format_entry(entry));
            }
        }
        ConsoleCommand::Clear => console.clear_transcript(),
        ConsoleCommand::Status => {
            let state = console.state();
            eprintln!(
                "status: {}  subscriptions: {}  transcript: {}",
                printer.status_label(state.status),
                state.subscriptions.len(),
                state.transcript.len()
            );
            if let Some(error) = &state.error {
                eprintln!("{}", printer.paint_error(error));
            }
        }
        ConsoleCommand::Connect => console.connect(params),
        ConsoleCommand::Cancel => console.cancel_connect(),
        ConsoleCommand::Disconnect => console.disconnect(),
        ConsoleCommand::Quit => return Flow::Quit,
    }
    Flow::Continue
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(ctx: &Context<'_>, args: MqttArgs) -> Result<(), CliError> {
    let params = connection_params(ctx, &args)?;
    let mut printer = Printer::new(output::should_color(&ctx.global.color));

    let unload = CancellationToken::new();
    let console = DebugConsole::new(MqttConnector, unload.clone());
    let mut state_rx = console.watch();
    let mut pending = args.subscribe;

    if !ctx.global.quiet {
        eprintln!("Type 'help' for console commands, 'quit' to leave.");
    }
    console.connect(&params);
    printer.show(&console.state());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            biased;

            _ = &mut ctrl_c => {
                unload.cancel();
                let _ = tokio::time::timeout(
                    SHUTDOWN_GRACE,
                    state_rx.wait_for(|s| s.status == ConsoleStatus::Idle),
                )
                .await;
                break;
            }

            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                printer.show(&state);
                if state.status == ConsoleStatus::Connected {
                    for topic in std::mem::take(&mut pending) {
                        let outcome = console.subscribe(&topic, args.qos).await;
                        report(&format!("subscribe {topic} (qos {})", args.qos), &outcome);
                    }
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_line(&line) {
                    Ok(Some(command)) => {
                        if execute(&console, &params, &printer, command).await == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("{e}"),
                }
            }
        }
    }

    console.disconnect();
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_skipped() {
        assert_eq!(parse_line("   ").unwrap(), None);
    }

    #[test]
    fn sub_defaults_to_qos_zero() {
        assert_eq!(
            parse_line("sub home/+/temp").unwrap(),
            Some(ConsoleCommand::Sub {
                topic: "home/+/temp".into(),
                qos: QoS::AtMostOnce,
            })
        );
    }

    #[test]
    fn pub_takes_the_rest_of_the_line_as_payload() {
        assert_eq!(
            parse_line("pub -q 1 -r lights/kitchen turn -on now").unwrap(),
            Some(ConsoleCommand::Pub {
                qos: QoS::AtLeastOnce,
                retain: true,
                topic: "lights/kitchen".into(),
                payload: vec!["turn".into(), "-on".into(), "now".into()],
            })
        );
    }

    #[test]
    fn invalid_qos_is_a_parse_error() {
        assert!(parse_line("sub t 3").is_err());
        assert!(parse_line("bogus").is_err());
    }

    #[test]
    fn exit_is_an_alias_for_quit() {
        assert_eq!(parse_line("exit").unwrap(), Some(ConsoleCommand::Quit));
    }
}
