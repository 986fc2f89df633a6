//! Widget Host - Terminal Surface for the Chat Widget
//!
//! A line-oriented surface over the widget session core. Each input line is
//! sent as a message; replies are printed as they resolve. Useful for
//! exercising a reply service without a browser.
//!
//! # Usage
//!
//! ```bash
//! # Talk to http://localhost/api/chat
//! widget-host
//!
//! # Another service, surfacing failures instead of fallback replies
//! widget-host --base-url https://shop.example.com --endpoint /support/chat --strict
//!
//! # With config file
//! widget-host --config ./widget.toml
//!
//! # Verbose logging
//! RUST_LOG=debug widget-host
//! ```
//!
//! # Commands
//!
//! - `/new`: start a new session
//! - `/stop`: stop the reply in flight
//! - `/max`: toggle maximized layout
//! - `/quit`: exit (also Ctrl-D or Ctrl-C)

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use widget_core::{
    default_config_path, load_config_with, ConfigOverrides, DispatchMode, HostCallbacks, Message,
    MessageId, MessageStatus, ReplyOrigin, SendOutcome, Sender, SessionController,
    SessionSnapshot, WidgetError,
};

/// Widget Host - terminal surface for the chat widget
#[derive(Parser, Debug)]
#[command(name = "widget-host")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "CHAT_WIDGET_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Reply service endpoint (path or absolute URL)
    #[arg(short = 'e', long, value_name = "URL")]
    endpoint: Option<String>,

    /// Origin the widget pretends to be embedded in
    #[arg(short = 'b', long, value_name = "URL")]
    base_url: Option<String>,

    /// Anti-forgery token sent to same-origin endpoints
    #[arg(long, value_name = "TOKEN")]
    csrf_token: Option<String>,

    /// Surface reply service failures instead of masking them
    #[arg(long)]
    strict: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "CHAT_WIDGET_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref endpoint) = self.endpoint {
            overrides = overrides.with_api_endpoint(endpoint.clone());
        }
        if let Some(ref base_url) = self.base_url {
            overrides = overrides.with_base_url(base_url.clone());
        }
        if let Some(ref token) = self.csrf_token {
            overrides = overrides.with_csrf_token(token.clone());
        }
        if self.strict {
            overrides = overrides.with_dispatch_mode(DispatchMode::Strict);
        }
        overrides
    }
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so they never interleave with the conversation.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("widget_host={level},widget_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Callbacks that report to the terminal
struct TerminalCallbacks;

impl HostCallbacks for TerminalCallbacks {
    fn on_error(&self, error: &WidgetError) {
        eprintln!("! {error}");
    }

    fn on_maximize_change(&self, maximized: bool) {
        println!("[layout: {}]", if maximized { "maximized" } else { "restored" });
    }
}

/// Undo the HTML escaping of bot replies for plain-text display
fn plain_text(content: &str) -> String {
    content
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#x2F;", "/")
        .replace("&#x60;", "`")
        .replace("&amp;", "&")
}

fn render(message: &Message) -> String {
    match (message.sender, message.status, message.origin) {
        (Sender::User, _, _) => format!("you> {}", message.content),
        (Sender::Bot, MessageStatus::Error, _) => format!("bot! {}", message.content),
        (Sender::Bot, _, Some(ReplyOrigin::Fallback)) => {
            format!("bot~ {}", plain_text(&message.content))
        }
        (Sender::Bot, _, Some(ReplyOrigin::Cancelled)) => format!("bot- {}", message.content),
        (Sender::Bot, _, _) => format!("bot> {}", plain_text(&message.content)),
    }
}

/// Terminal feedback for a send that produced no reply of its own
fn outcome_notice(outcome: SendOutcome) -> Option<&'static str> {
    match outcome {
        SendOutcome::Stopped => Some("(reply stopped; message not sent)"),
        SendOutcome::Empty | SendOutcome::Replied(_) | SendOutcome::Superseded => None,
    }
}

/// Print messages as they resolve
async fn print_snapshots(mut snapshots: watch::Receiver<SessionSnapshot>) {
    let mut printed: HashSet<MessageId> = HashSet::new();
    let mut session = snapshots.borrow().session_id.clone();

    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();

        if snapshot.session_id != session {
            session = snapshot.session_id.clone();
            printed.clear();
            println!("--- new session {session} ---");
        }

        for message in snapshot.messages.iter().filter(|m| !m.is_pending()) {
            if printed.insert(message.id.clone()) && message.sender == Sender::Bot {
                println!("{}", render(message));
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config_path = args.config.clone().or_else(default_config_path);
    let config = load_config_with(config_path, |key| std::env::var(key).ok(), &args.overrides())
        .context("Failed to load widget configuration")?;

    info!(source = %config.source(), "Configuration loaded");
    println!("{} (type /quit to exit)", config.title);
    if let Some(ref disclaimer) = config.disclaimer {
        println!("{disclaimer}");
    }

    let controller = Arc::new(SessionController::connect(config, Arc::new(TerminalCallbacks))?);
    let printer = tokio::spawn(print_snapshots(controller.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                None
            }
        };

        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "/quit" => break,
            "/new" => {
                controller.on_new_session();
            }
            "/stop" => {
                if !controller.on_cancel() {
                    println!("(nothing to stop)");
                }
            }
            "/max" => {
                controller.toggle_maximize();
            }
            _ => {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move {
                    match controller.on_send(&line).await {
                        Ok(outcome) => {
                            if let Some(notice) = outcome_notice(outcome) {
                                println!("{notice}");
                            }
                        }
                        Err(e) => warn!(error = %e, "Send failed"),
                    }
                });
            }
        }
    }

    controller.teardown();
    printer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_reverses_escaping() {
        let escaped = widget_core::sanitize("it's <b>\"fine\"</b> & done");
        assert_eq!(plain_text(&escaped), "it's <b>\"fine\"</b> & done");
    }

    #[test]
    fn test_stopped_send_is_reported() {
        assert_eq!(
            outcome_notice(SendOutcome::Stopped),
            Some("(reply stopped; message not sent)")
        );
        assert_eq!(outcome_notice(SendOutcome::Replied(ReplyOrigin::Live)), None);
        assert_eq!(outcome_notice(SendOutcome::Empty), None);
        assert_eq!(outcome_notice(SendOutcome::Superseded), None);
    }

    #[test]
    fn test_overrides_from_args() {
        let args = Args::parse_from([
            "widget-host",
            "--endpoint",
            "/support/chat",
            "--csrf-token",
            "tok",
            "--strict",
        ]);
        let overrides = args.overrides();

        assert_eq!(overrides.api_endpoint.as_deref(), Some("/support/chat"));
        assert_eq!(overrides.csrf_token.as_deref(), Some("tok"));
        assert_eq!(overrides.dispatch_mode, Some(DispatchMode::Strict));
        assert!(overrides.base_url.is_none());
    }

    #[test]
    fn test_no_flags_no_overrides() {
        let args = Args::parse_from(["widget-host"]);
        assert!(args.overrides().is_empty());
    }
}
