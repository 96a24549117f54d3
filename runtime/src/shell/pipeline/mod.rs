//! Pipe dispatcher - runs a command and whatever it pipes into.
//!
//! Supports:
//! - Pipes with the `|` word; the next command name may carry the prefix
//! - Redirect of the final output to a paste service with `>` and `>>`
//! - Full help when a command is called without arguments
//!
//! Stages run one after the other in a loop. A stage's captured output, joined
//! with newlines, is the literal input of the next one.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::GnuConfig;
use crate::error::GnuError;

use super::commands::Command;
use super::input::{
    FetchFormat, Fetcher, InputResolver, InputSources, Location, NoFetcher, Transcript,
};
use super::sink::{BufferStore, Channel, OutputSink, UserId};
use super::tokenizer::{split_arguments, tokenize, PasteExpiry, Redirect};

/// Publishes redirected output and returns a link to it. Provided by the host.
#[async_trait]
pub trait PasteService: Send + Sync {
    async fn paste(
        &self,
        title: &str,
        content: &str,
        expiry: PasteExpiry,
    ) -> Result<String, GnuError>;
}

/// Who invoked a command, and where.
pub struct Invocation<'a> {
    pub user: UserId,
    pub location: Location,
    pub channel: &'a dyn Channel,
}

/// What one stage left for the dispatcher.
enum Stage {
    Done,
    /// Run `command` next with `words`, feeding it `input`.
    Next {
        command: Command,
        words: Vec<String>,
        input: String,
    },
}

/// The command suite with its collaborators.
pub struct Gnu {
    config: GnuConfig,
    fetcher: Arc<dyn Fetcher>,
    transcript: Option<Arc<dyn Transcript>>,
    paste: Option<Arc<dyn PasteService>>,
}

impl Gnu {
    pub fn new(config: GnuConfig) -> Self {
        Self {
            config,
            fetcher: Arc::new(NoFetcher),
            transcript: None,
            paste: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_transcript(mut self, transcript: Arc<dyn Transcript>) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn with_paste_service(mut self, paste: Arc<dyn PasteService>) -> Self {
        self.paste = Some(paste);
        self
    }

    pub fn config(&self) -> &GnuConfig {
        &self.config
    }

    /// Run `name` with the raw argument text that followed it in the message.
    ///
    /// Command failures are reported to the channel and are not returned; only
    /// a channel that cannot deliver messages surfaces as an error.
    pub async fn invoke(
        &self,
        inv: &Invocation<'_>,
        name: &str,
        args: &str,
    ) -> Result<(), GnuError> {
        let Some(mut command) = Command::from_name(name) else {
            let error = GnuError::Pipe(format!("{name}: command not found"));
            return self.report(inv, None, error).await;
        };
        tracing::info!(
            command = name,
            user = %inv.user.0,
            channel = %inv.location.channel,
            "invocation"
        );

        let mut words = match split_arguments(args) {
            Ok(words) => words,
            Err(e) => return self.report(inv, Some(command), e).await,
        };
        if words.is_empty() {
            return self.send_help(inv, command).await;
        }

        let buffers = BufferStore::new();
        let mut piped = None;
        loop {
            match self.run_stage(inv, &buffers, command, words, piped).await {
                Ok(Stage::Done) => return Ok(()),
                Ok(Stage::Next { command: next, words: next_words, input }) => {
                    tracing::debug!(from = command.name(), to = next.name(), "piping");
                    command = next;
                    words = next_words;
                    piped = Some(input);
                }
                Err(e) => return self.report(inv, Some(command), e).await,
            }
        }
    }

    async fn run_stage(
        &self,
        inv: &Invocation<'_>,
        buffers: &BufferStore,
        command: Command,
        words: Vec<String>,
        piped: Option<String>,
    ) -> Result<Stage, GnuError> {
        let parsed = tokenize(words, command.grammar())?;
        let sources = InputSources {
            fetcher: self.fetcher.as_ref(),
            transcript: self.transcript.as_deref(),
            location: &inv.location,
        };
        let format = FetchFormat::from_options(parsed.has('@'), parsed.has('p'));
        let input = InputResolver::new(parsed.input(), piped, format, sources);

        let limits = &self.config.output;
        let user = inv.user.clone();
        let mut sink = if parsed.captures_output() {
            OutputSink::capture(inv.channel, user, buffers, limits)
        } else {
            OutputSink::channel(inv.channel, user, buffers, limits)
        };

        if command.run(&parsed, &input, &mut sink).await?.is_stopped() {
            return Ok(Stage::Done);
        }
        sink.flush().await?;
        let Some(captured) = sink.into_captured() else {
            return Ok(Stage::Done);
        };

        if let Some(redirect) = &parsed.redirect {
            self.post_paste(inv, redirect, &captured).await?;
            return Ok(Stage::Done);
        }

        let mut segment = parsed.pipe_segment.into_iter();
        let Some(next) = segment.next() else {
            return Ok(Stage::Done);
        };
        let name = next.strip_prefix(self.config.prefix.as_str()).unwrap_or(next.as_str());
        let command = Command::from_name(name)
            .ok_or_else(|| GnuError::Pipe(format!("{name}: command not found")))?;
        Ok(Stage::Next {
            command,
            words: segment.collect(),
            input: captured.join("\n"),
        })
    }

    async fn post_paste(
        &self,
        inv: &Invocation<'_>,
        redirect: &Redirect,
        lines: &[String],
    ) -> Result<(), GnuError> {
        if lines.is_empty() {
            return inv.channel.send("No output").await;
        }
        let paste = self.paste.as_ref().ok_or_else(|| {
            GnuError::ResourceUnavailable(
                "Redirect is not available: no paste service configured.".to_string(),
            )
        })?;
        let url = paste.paste(&redirect.name, &lines.join("\n"), redirect.expiry).await?;
        tracing::info!(title = %redirect.name, expiry = ?redirect.expiry, %url, "output pasted");
        inv.channel
            .send(&format!("Output to paste service with the following result: {url}"))
            .await
    }

    async fn send_help(&self, inv: &Invocation<'_>, command: Command) -> Result<(), GnuError> {
        let help = command.help();
        inv.channel.send(help.summary).await?;
        inv.channel.send(&format!("```{}```", help.usage)).await?;
        inv.channel.send(&format!("```{}```", help.details)).await
    }

    /// Tell the user what went wrong. Channel failures are passed back instead.
    async fn report(
        &self,
        inv: &Invocation<'_>,
        command: Option<Command>,
        error: GnuError,
    ) -> Result<(), GnuError> {
        if let GnuError::Channel(_) = error {
            return Err(error);
        }
        tracing::info!(%error, "invocation failed");
        let message = match (&error, command) {
            (GnuError::Usage(reason), Some(command)) => {
                let prefix = &self.config.prefix;
                let mut message = String::new();
                if !reason.is_empty() {
                    message.push_str(reason);
                    message.push('\n');
                }
                message.push_str(&format!(
                    "Usage: `{prefix}{}`\n\nType `{prefix}{}` for more information.",
                    command.usage(),
                    command.name()
                ));
                message
            }
            _ => error.to_string(),
        };
        inv.channel.send(&message).await
    }
}
