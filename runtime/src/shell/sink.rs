//! Output sink.
//!
//! Everything a command prints goes through [`OutputSink::emit`]. Depending on how
//! the command was invoked, a line is either:
//! - appended to the pipe buffer (piping or redirecting; nothing is sent), or
//! - coalesced with neighbouring lines into one message up to the length limit, or
//! - sent as its own message (`-%`).
//!
//! Every `more_limit` messages the invoking user is asked to type `more`; anything
//! else, or silence, stops the output.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::OutputConfig;
use crate::error::GnuError;

/// Identity of the person who invoked a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

/// The chat channel a command was invoked from. Implemented by the host.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Post a message.
    async fn send(&self, content: &str) -> Result<(), GnuError>;

    /// Wait for the next message from `user`; `None` once `timeout` elapses.
    async fn wait_for_reply(&self, user: &UserId, timeout: Duration) -> Option<String>;
}

/// Outcome of a yes/no style prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Affirmed,
    Declined,
    TimedOut,
}

/// Post `question` and classify the user's answer against `accepted` (case-insensitive).
pub async fn prompt(
    channel: &dyn Channel,
    user: &UserId,
    question: &str,
    accepted: &[&str],
    timeout: Duration,
) -> Result<Reply, GnuError> {
    channel.send(question).await?;
    Ok(match channel.wait_for_reply(user, timeout).await {
        None => Reply::TimedOut,
        Some(answer) => {
            let answer = answer.trim().to_lowercase();
            if accepted.iter().any(|a| *a == answer) {
                Reply::Affirmed
            } else {
                Reply::Declined
            }
        }
    })
}

/// Whether the producer should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The user declined to see more output.
    Stopped,
}

impl Flow {
    pub fn is_stopped(self) -> bool {
        self == Flow::Stopped
    }
}

/// Line-number label in front of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLabel {
    Number(usize),
    /// Continuation chunk of an over-long numbered line.
    Continued,
}

/// How a single line should be emitted.
#[derive(Debug, Clone, Copy)]
pub struct EmitOptions {
    /// Wrap the message in a code fence. Default: true.
    pub code_block: bool,
    /// Coalesce with neighbouring lines. Default: true.
    pub buffered: bool,
    /// Optional `N: ` prefix. Default: none.
    pub label: Option<LineLabel>,
    /// Right-align width for the label; at least 3 so `...` fits. Default: 0.
    pub label_width: usize,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            code_block: true,
            buffered: true,
            label: None,
            label_width: 0,
        }
    }
}

impl EmitOptions {
    pub fn buffered(buffered: bool) -> Self {
        Self {
            buffered,
            ..Self::default()
        }
    }

    pub fn numbered(mut self, label: Option<usize>, width: usize) -> Self {
        self.label = label.map(LineLabel::Number);
        self.label_width = width;
        self
    }

    /// Characters the label adds in front of a line.
    fn label_len(&self) -> usize {
        self.format("").chars().count()
    }

    fn format(&self, line: &str) -> String {
        match self.label {
            None => line.to_string(),
            Some(label) => {
                let width = self.label_width.max(3);
                let text = match label {
                    LineLabel::Number(n) => n.to_string(),
                    LineLabel::Continued => "...".to_string(),
                };
                format!("{text:>width$}: {line}")
            }
        }
    }
}

/// Pending output lines per user. Lives for one invocation chain.
#[derive(Debug, Default)]
pub struct BufferStore {
    buffers: Mutex<HashMap<UserId, Vec<String>>>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, user: &UserId, f: impl FnOnce(&mut Vec<String>) -> R) -> R {
        let mut guard = match self.buffers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(guard.entry(user.clone()).or_default())
    }

    fn take(&self, user: &UserId) -> Vec<String> {
        self.with(user, std::mem::take)
    }
}

/// Escape fences so content cannot break out of the code block.
pub fn escape_fences(text: &str) -> String {
    text.replace("```", "\\`\\`\\`")
}

/// Split `line` into pieces of at most `limit` characters.
fn chunks(line: &str, limit: usize) -> Vec<&str> {
    if limit == 0 || line.chars().count() <= limit {
        return vec![line];
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (count, (idx, _)) in line.char_indices().enumerate() {
        if count > 0 && count % limit == 0 {
            pieces.push(&line[start..idx]);
            start = idx;
        }
    }
    pieces.push(&line[start..]);
    pieces
}

/// Per-invocation output sink.
pub struct OutputSink<'a> {
    channel: &'a dyn Channel,
    user: UserId,
    buffers: &'a BufferStore,
    limits: &'a OutputConfig,
    /// Captured output when piping or redirecting.
    pipe: Option<Vec<String>>,
    /// Messages sent to the channel so far.
    sent: usize,
}

impl<'a> OutputSink<'a> {
    /// Sink that sends to the channel.
    pub fn channel(
        channel: &'a dyn Channel,
        user: UserId,
        buffers: &'a BufferStore,
        limits: &'a OutputConfig,
    ) -> Self {
        Self {
            channel,
            user,
            buffers,
            limits,
            pipe: None,
            sent: 0,
        }
    }

    /// Sink that captures lines for the next pipe stage or a redirect.
    pub fn capture(
        channel: &'a dyn Channel,
        user: UserId,
        buffers: &'a BufferStore,
        limits: &'a OutputConfig,
    ) -> Self {
        Self {
            pipe: Some(Vec::new()),
            ..Self::channel(channel, user, buffers, limits)
        }
    }

    /// Captured lines, if this sink captures.
    pub fn into_captured(self) -> Option<Vec<String>> {
        self.pipe
    }

    /// Emit one line of command output.
    pub async fn emit(&mut self, line: &str, opts: EmitOptions) -> Result<Flow, GnuError> {
        if let Some(pipe) = self.pipe.as_mut() {
            pipe.push(opts.format(line));
            return Ok(Flow::Continue);
        }

        let mut opts = opts;
        let room = self
            .limits
            .max_message_length
            .saturating_sub(opts.label_len())
            .max(1);
        for (i, piece) in chunks(line, room).into_iter().enumerate() {
            if i > 0 && opts.label.is_some() {
                opts.label = Some(LineLabel::Continued);
            }
            if self.emit_piece(&opts.format(piece), &opts).await?.is_stopped() {
                return Ok(Flow::Stopped);
            }
        }
        Ok(Flow::Continue)
    }

    async fn emit_piece(&mut self, line: &str, opts: &EmitOptions) -> Result<Flow, GnuError> {
        if !opts.buffered {
            return self.send_message(line, opts.code_block).await;
        }

        let limit = self.limits.max_message_length;
        let full = self.buffers.with(&self.user, |buffer| {
            let used: usize = buffer.iter().map(|l| l.chars().count() + 1).sum();
            if buffer.is_empty() || used + line.chars().count() <= limit {
                buffer.push(line.to_string());
                None
            } else {
                Some(std::mem::replace(buffer, vec![line.to_string()]))
            }
        });

        match full {
            None => Ok(Flow::Continue),
            Some(lines) => self.send_message(&lines.join("\n"), opts.code_block).await,
        }
    }

    /// Send buffered lines, if any. Call once the command has produced everything.
    pub async fn flush(&mut self) -> Result<Flow, GnuError> {
        let lines = self.buffers.take(&self.user);
        if lines.is_empty() {
            return Ok(Flow::Continue);
        }
        self.send_message(&lines.join("\n"), true).await
    }

    /// Drop buffered lines without sending them.
    pub fn discard(&mut self) {
        self.buffers.take(&self.user);
    }

    /// Send a status line straight to the channel, even when capturing.
    pub async fn notice(&self, text: &str) -> Result<(), GnuError> {
        self.channel.send(text).await
    }

    async fn send_message(&mut self, content: &str, code_block: bool) -> Result<Flow, GnuError> {
        let more_limit = self.limits.more_limit;
        if more_limit > 0 && self.sent > 0 && self.sent % more_limit == 0 {
            let reply = prompt(
                self.channel,
                &self.user,
                "Type 'more' or 'm' to continue...",
                &["more", "m"],
                self.limits.response_timeout(),
            )
            .await?;
            if reply != Reply::Affirmed {
                tracing::info!(user = %self.user.0, ?reply, sent = self.sent, "output stopped");
                self.channel.send("Output stopped.").await?;
                self.discard();
                return Ok(Flow::Stopped);
            }
        }

        let content = escape_fences(content);
        if code_block {
            self.channel.send(&format!("```\n{content}\n```")).await?;
        } else {
            self.channel.send(&content).await?;
        }
        self.sent += 1;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory channel used across the crate's tests.

    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub struct FakeChannel {
        pub sent: Mutex<Vec<String>>,
        pub replies: Mutex<VecDeque<Option<String>>>,
    }

    impl FakeChannel {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue replies; `None` simulates a timeout.
        pub fn with_replies(replies: &[Option<&str>]) -> Self {
            let channel = Self::new();
            *channel.replies.lock().unwrap() =
                replies.iter().map(|r| r.map(str::to_string)).collect();
            channel
        }

        pub fn messages(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        /// Messages with code fences removed, prompts excluded.
        pub fn output(&self) -> Vec<String> {
            self.messages()
                .into_iter()
                .filter_map(|m| {
                    m.strip_prefix("```\n")
                        .and_then(|m| m.strip_suffix("\n```"))
                        .map(str::to_string)
                })
                .collect()
        }
    }

    #[async_trait]
    impl Channel for FakeChannel {
        async fn send(&self, content: &str) -> Result<(), GnuError> {
            self.sent.lock().unwrap().push(content.to_string());
            Ok(())
        }

        async fn wait_for_reply(&self, _user: &UserId, _timeout: Duration) -> Option<String> {
            self.replies.lock().unwrap().pop_front().flatten()
        }
    }
}
