//! gnu-shell - terminal host for the GNU text commands.
//!
//! Each stdin line is a chat message from one user in one channel. Channel
//! messages go to stdout and logs go to stderr, so the two never interleave.
//! Prompts such as "Type 'more'..." consume the next stdin line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::filter::EnvFilter;

use gnu_runtime::chatlog::{ChatLog, LoggedMessage};
use gnu_runtime::shell::{Channel, Gnu, GnuCommands, Invocation, Location, UserId};
use gnu_runtime::{GnuConfig, GnuError};

const HELP: &str = "\
gnu-shell - GNU text commands in a terminal chat

Usage: gnu-shell [OPTIONS]

Options:
  -c, --config PATH     Configuration file (default: gnu.toml)
  -u, --user NAME       Name you chat as (default: user)
      --channel NAME    Channel name used for the chat log (default: general)
  -h, --help            Show this help";

/// `--help` text with the command table appended.
fn help_text() -> String {
    let commands: Vec<String> = GnuCommands::list_commands()
        .into_iter()
        .chain(["clog"])
        .map(|name| format!("!{name}"))
        .collect();
    format!(
        "{HELP}\n\nCommands: {}\nType a command without arguments for its help.",
        commands.join(", ")
    )
}

const BOT_NAME: &str = "gnu";

struct Args {
    config: PathBuf,
    user: String,
    channel: String,
}

fn parse_args() -> Result<Option<Args>, lexopt::Error> {
    use lexopt::prelude::*;

    let mut args = Args {
        config: PathBuf::from("gnu.toml"),
        user: "user".to_string(),
        channel: "general".to_string(),
    };
    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Short('c') | Long("config") => args.config = parser.value()?.into(),
            Short('u') | Long("user") => args.user = parser.value()?.string()?,
            Long("channel") => args.channel = parser.value()?.string()?,
            Short('h') | Long("help") => return Ok(None),
            _ => return Err(arg.unexpected()),
        }
    }
    Ok(Some(args))
}

/// The terminal as a chat channel.
struct TerminalChannel {
    lines: async_channel::Receiver<String>,
    log: Arc<ChatLog>,
    location: Location,
    user: String,
}

impl TerminalChannel {
    fn record(&self, author: &str, content: &str, from_bot: bool) {
        let message = LoggedMessage {
            author,
            content,
            from_bot,
            timestamp: Local::now(),
        };
        if let Err(e) = self.log.record(&self.location, &message) {
            tracing::warn!(error = %e, "failed to record message");
        }
    }
}

#[async_trait]
impl Channel for TerminalChannel {
    async fn send(&self, content: &str) -> Result<(), GnuError> {
        let mut stdout = tokio::io::stdout();
        let channel_error = |e: std::io::Error| GnuError::Channel(e.to_string());
        stdout.write_all(content.as_bytes()).await.map_err(channel_error)?;
        stdout.write_all(b"\n").await.map_err(channel_error)?;
        stdout.flush().await.map_err(channel_error)?;
        self.record(BOT_NAME, content, true);
        Ok(())
    }

    async fn wait_for_reply(&self, _user: &UserId, timeout: Duration) -> Option<String> {
        let line = tokio::time::timeout(timeout, self.lines.recv()).await.ok()?.ok()?;
        self.record(&self.user, &line, false);
        Some(line)
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gnu_runtime=info,gnu_shell=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<(), GnuError> {
    let config = GnuConfig::load(&args.config)?;
    let timeout = config.output.response_timeout();
    let prefix = config.prefix.clone();
    let log = Arc::new(ChatLog::open(&config.chat_log)?.with_prefix(&prefix));
    let gnu = Gnu::new(config).with_transcript(log.clone());

    let (tx, rx) = async_channel::unbounded();
    tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = stdin.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let terminal = TerminalChannel {
        lines: rx.clone(),
        log: log.clone(),
        location: Location {
            server: "terminal".to_string(),
            channel: args.channel,
            private: false,
        },
        user: args.user,
    };
    tracing::info!(user = %terminal.user, channel = %terminal.location.channel, "gnu-shell ready");

    while let Ok(line) = rx.recv().await {
        terminal.record(&terminal.user, &line, false);
        let Some(body) = line.trim().strip_prefix(prefix.as_str()) else {
            continue;
        };
        let (name, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
        let inv = Invocation {
            user: UserId(terminal.user.clone()),
            location: terminal.location.clone(),
            channel: &terminal,
        };

        let result = if name == "clog" {
            log.command(&inv, rest, timeout).await
        } else if GnuCommands::get_command(name).is_some() {
            gnu.invoke(&inv, name, rest).await
        } else {
            tracing::debug!(name, "not a command of this bot");
            Ok(())
        };

        match result {
            Ok(()) => {}
            Err(e @ GnuError::Channel(_)) => return Err(e),
            Err(e) => {
                tracing::error!(error = %e, "command failed");
                terminal.send(&e.to_string()).await?;
            }
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_logging();
    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => {
            println!("{}", help_text());
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("gnu-shell: {e}\n\n{}", help_text());
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "gnu-shell stopped");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_help_lists_every_command() {
        let help = help_text();
        assert!(help.starts_with("gnu-shell - "));
        assert!(help.contains("Commands: !cat, !grep, !sed, !tac, !tail, !wc, !clog"));
    }
}
