//! Channel chat logs.
//!
//! Messages of channels with logging switched on are appended to
//! `<base_dir>/<server>/<channel>`, one line per message. The log is what `@chat`
//! reads. Per-channel settings live in `<base_dir>/config.json`.
//!
//! The `clog` command manages the settings of the current channel.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::config::ChatLogConfig;
use crate::error::GnuError;
use crate::shell::{prompt, Invocation, Location, Reply, Transcript};

const MIB: u64 = 1024 * 1024;

/// Logging settings of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub active: bool,
    pub max_size: u64,
    pub log_bot: bool,
}

/// A chat message to be logged.
#[derive(Debug, Clone)]
pub struct LoggedMessage<'a> {
    pub author: &'a str,
    pub content: &'a str,
    /// Sent by the bot itself.
    pub from_bot: bool,
    pub timestamp: DateTime<Local>,
}

/// `1.5 MiB` style size.
pub fn format_size(bytes: u64) -> String {
    let mut num = bytes as f64;
    for unit in ["Bytes", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB"] {
        if num.abs() < 1024.0 {
            return format!("{num:3.1} {unit}");
        }
        num /= 1024.0;
    }
    format!("{num:.1} YiB")
}

pub struct ChatLog {
    base_dir: PathBuf,
    defaults: ChannelSettings,
    log_buffer: u64,
    /// Command prefix used in hints.
    prefix: String,
    settings: Mutex<BTreeMap<String, ChannelSettings>>,
}

impl ChatLog {
    /// Open the store, creating the base directory if needed.
    pub fn open(config: &ChatLogConfig) -> Result<Self, GnuError> {
        fs::create_dir_all(&config.base_dir)?;
        let path = config.base_dir.join("config.json");
        let settings = match fs::read_to_string(&path) {
            Ok(text) if !text.trim().is_empty() => serde_json::from_str(&text)?,
            Ok(_) => BTreeMap::new(),
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(base_dir = %config.base_dir.display(), "chat log opened");
        Ok(Self {
            base_dir: config.base_dir.clone(),
            defaults: ChannelSettings {
                active: false,
                max_size: config.max_size,
                log_bot: config.log_bot,
            },
            log_buffer: config.log_buffer,
            prefix: "!".to_string(),
            settings: Mutex::new(settings),
        })
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ChannelSettings>> {
        match self.settings.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn log_path(&self, location: &Location) -> PathBuf {
        self.base_dir.join(&location.server).join(&location.channel)
    }

    pub fn settings(&self, channel: &str) -> Option<ChannelSettings> {
        self.lock().get(channel).cloned()
    }

    /// Change the settings of `channel`, starting from the defaults, and persist them.
    pub fn update(
        &self,
        channel: &str,
        change: impl FnOnce(&mut ChannelSettings),
    ) -> Result<ChannelSettings, GnuError> {
        let mut all = self.lock();
        let entry = all
            .entry(channel.to_string())
            .or_insert_with(|| self.defaults.clone());
        change(entry);
        let updated = entry.clone();
        fs::write(self.base_dir.join("config.json"), serde_json::to_string_pretty(&*all)?)?;
        tracing::info!(channel, ?updated, "chat log settings changed");
        Ok(updated)
    }

    /// Append a message if logging is on for its channel.
    pub fn record(&self, location: &Location, message: &LoggedMessage<'_>) -> Result<(), GnuError> {
        if location.private {
            return Ok(());
        }
        let Some(settings) = self.settings(&location.channel).filter(|s| s.active) else {
            return Ok(());
        };
        if message.from_bot && !settings.log_bot {
            return Ok(());
        }

        let path = self.log_path(location);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        self.trim(&path, settings.max_size)?;

        let line = format!(
            "{} @{}: {}\n",
            message.timestamp.format("%Y-%m-%d %H:%M:%S"),
            message.author,
            message.content
        );
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?
            .write_all(line.as_bytes())?;
        Ok(())
    }

    /// Log an edited message with both versions.
    pub fn record_edit(
        &self,
        location: &Location,
        before: &str,
        after: &LoggedMessage<'_>,
    ) -> Result<(), GnuError> {
        let content = format!("EDIT:\nBefore: {before}\nAfter: {}", after.content);
        let edited = LoggedMessage {
            content: &content,
            ..after.clone()
        };
        self.record(location, &edited)
    }

    /// Keep the newest `max_size - log_buffer` bytes once the file outgrows `max_size`.
    fn trim(&self, path: &Path, max_size: u64) -> Result<(), GnuError> {
        let size = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if size <= max_size {
            return Ok(());
        }
        let keep = max_size.saturating_sub(self.log_buffer) as usize;
        let data = fs::read(path)?;
        let mut start = data.len().saturating_sub(keep);
        if start > 0 && data[start - 1] != b'\n' {
            start = data[start..]
                .iter()
                .position(|b| *b == b'\n')
                .map_or(data.len(), |p| start + p + 1);
        }
        fs::write(path, &data[start..])?;
        tracing::info!(path = %path.display(), from = size, to = data.len() - start, "chat log trimmed");
        Ok(())
    }

    /// Size of the channel's log in bytes; 0 when there is none.
    pub fn current_size(&self, location: &Location) -> u64 {
        fs::metadata(self.log_path(location)).map_or(0, |m| m.len())
    }

    /// Remove the channel's log. `false` when there was nothing to remove.
    pub fn delete(&self, location: &Location) -> Result<bool, GnuError> {
        match fs::remove_file(self.log_path(location)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Run `clog` with the words that followed it.
    pub async fn command(
        &self,
        inv: &Invocation<'_>,
        args: &str,
        timeout: Duration,
    ) -> Result<(), GnuError> {
        let words: Vec<String> = args.split_whitespace().map(str::to_lowercase).collect();
        let channel = inv.channel;
        let Some(sub) = words.first() else {
            channel.send("*clog* manages logging options for the current channel.").await?;
            return channel
                .send(
                    "```\
\nclog [on|off]      Turn logging on or off for current channel.\
\nclog size num      Set the maximum log size for current channel to num MiB.\
\nclog bot [on|off]  Set whether or not bot logs its own messages.\
\nclog status        Display log settings and status for current channel.\
\nclog delete        Delete all logs for current channel.\
```",
                )
                .await;
        };
        if inv.location.private {
            return channel.send("Chat log not available for private channels.").await;
        }

        let id = inv.location.channel.as_str();
        let reply = match sub.as_str() {
            "on" => {
                self.update(id, |s| s.active = true)?;
                "Chat log enabled.".to_string()
            }
            "off" => {
                self.update(id, |s| s.active = false)?;
                "Chat log disabled.".to_string()
            }
            "size" => match words.get(1).and_then(|w| w.parse::<u64>().ok()) {
                None => "Please specify an integer for size.".to_string(),
                Some(0) => "Minimum size is 1.".to_string(),
                Some(mib) => {
                    let updated = self.update(id, |s| s.max_size = mib.saturating_mul(MIB))?;
                    format!("Chat log size set to `{}`", format_size(updated.max_size))
                }
            },
            "bot" => match words.get(1).map(String::as_str) {
                Some("on" | "true") => {
                    self.update(id, |s| s.log_bot = true)?;
                    "Bot self log enabled.".to_string()
                }
                Some("off" | "false") => {
                    self.update(id, |s| s.log_bot = false)?;
                    "Bot self log disabled.".to_string()
                }
                _ => "Please specify 'on' or 'off'.".to_string(),
            },
            "status" => match self.settings(id) {
                Some(s) => format!(
                    "Active: `{}`, Log bot: `{}`, Max size: `{}`, Current size: `{}`",
                    s.active,
                    s.log_bot,
                    format_size(s.max_size),
                    format_size(self.current_size(&inv.location))
                ),
                None => "Chat log not setup for this channel.".to_string(),
            },
            "delete" => {
                let answer = prompt(
                    channel,
                    &inv.user,
                    "Deleting chat log is permanent! Type 'yes' or 'y' to proceed...",
                    &["yes", "y"],
                    timeout,
                )
                .await?;
                if answer != Reply::Affirmed {
                    "No action taken.".to_string()
                } else if self.delete(&inv.location)? {
                    tracing::info!(channel = id, "chat log deleted");
                    "Chat log deleted.".to_string()
                } else {
                    "Chat log not found.".to_string()
                }
            }
            _ => format!("Unknown command. Type `{}clog` for help.", self.prefix),
        };
        channel.send(&reply).await
    }
}

impl Transcript for ChatLog {
    fn transcript(&self, location: &Location) -> Result<String, GnuError> {
        if location.private {
            return Err(GnuError::ResourceUnavailable(
                "Chat log not available for private channels.".to_string(),
            ));
        }
        if !self.settings(&location.channel).is_some_and(|s| s.active) {
            return Err(GnuError::ResourceUnavailable(format!(
                "Chat log does not appear to be enabled for this channel. \
Type`{}clog on` to enable chat log.",
                self.prefix
            )));
        }
        match fs::read_to_string(self.log_path(location)) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::{FakeChannel, UserId};
    use futures_lite::future::block_on;

    fn config(dir: &Path) -> ChatLogConfig {
        ChatLogConfig {
            base_dir: dir.join("gnu"),
            max_size: 100,
            log_buffer: 40,
            log_bot: false,
        }
    }

    fn location() -> Location {
        Location {
            server: "guild".to_string(),
            channel: "general".to_string(),
            private: false,
        }
    }

    fn message<'a>(author: &'a str, content: &'a str) -> LoggedMessage<'a> {
        LoggedMessage {
            author,
            content,
            from_bot: false,
            timestamp: Local::now(),
        }
    }

    fn clog(log: &ChatLog, channel: &FakeChannel, args: &str) -> String {
        let inv = Invocation {
            user: UserId("admin".to_string()),
            location: location(),
            channel,
        };
        block_on(log.command(&inv, args, Duration::from_secs(1))).unwrap();
        channel.messages().last().cloned().unwrap_or_default()
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.0 Bytes");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(MIB), "1.0 MiB");
    }

    #[test]
    fn test_inactive_channel_is_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatLog::open(&config(dir.path())).unwrap();
        log.record(&location(), &message("bob", "hello")).unwrap();
        assert_eq!(log.current_size(&location()), 0);
        let err = log.with_prefix("?").transcript(&location()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Chat log does not appear to be enabled for this channel. Type`?clog on` to enable chat log."
        );
    }

    #[test]
    fn test_record_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatLog::open(&config(dir.path())).unwrap();
        log.update("general", |s| s.active = true).unwrap();
        assert_eq!(log.transcript(&location()).unwrap(), "");

        log.record(&location(), &message("bob", "hello")).unwrap();
        let bot = LoggedMessage { from_bot: true, ..message("gnu", "beep") };
        log.record(&location(), &bot).unwrap();

        let text = log.transcript(&location()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.ends_with(" @bob: hello\n"));
    }

    #[test]
    fn test_bot_messages_logged_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatLog::open(&config(dir.path())).unwrap();
        log.update("general", |s| {
            s.active = true;
            s.log_bot = true;
        })
        .unwrap();
        let bot = LoggedMessage { from_bot: true, ..message("gnu", "beep") };
        log.record(&location(), &bot).unwrap();
        assert!(log.transcript(&location()).unwrap().contains("@gnu: beep"));
    }

    #[test]
    fn test_record_edit() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatLog::open(&config(dir.path())).unwrap();
        log.update("general", |s| s.active = true).unwrap();
        log.record_edit(&location(), "old", &message("bob", "new")).unwrap();
        let text = log.transcript(&location()).unwrap();
        assert!(text.contains("@bob: EDIT:\nBefore: old\nAfter: new\n"));
    }

    #[test]
    fn test_oversized_log_is_trimmed_on_line_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatLog::open(&config(dir.path())).unwrap();
        log.update("general", |s| s.active = true).unwrap();
        for i in 0..10 {
            log.record(&location(), &message("bob", &format!("message number {i}"))).unwrap();
        }
        let text = log.transcript(&location()).unwrap();
        assert!(text.len() as u64 <= 100 + 60);
        assert!(text.lines().all(|l| l.contains(" @bob: message number ")));
        assert!(text.ends_with("message number 9\n"));
    }

    #[test]
    fn test_private_channels_have_no_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatLog::open(&config(dir.path())).unwrap();
        let private = Location { private: true, ..location() };
        let err = log.transcript(&private).unwrap_err();
        assert_eq!(err.to_string(), "Chat log not available for private channels.");
    }

    #[test]
    fn test_settings_persist_across_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = ChatLog::open(&config(dir.path())).unwrap();
            log.update("general", |s| s.active = true).unwrap();
        }
        let log = ChatLog::open(&config(dir.path())).unwrap();
        assert!(log.settings("general").unwrap().active);
        assert!(log.settings("random").is_none());
    }

    #[test]
    fn test_clog_subcommands() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatLog::open(&config(dir.path())).unwrap();
        let channel = FakeChannel::new();

        assert_eq!(clog(&log, &channel, "status"), "Chat log not setup for this channel.");
        assert_eq!(clog(&log, &channel, "ON"), "Chat log enabled.");
        assert_eq!(clog(&log, &channel, "size 0"), "Minimum size is 1.");
        assert_eq!(clog(&log, &channel, "size lots"), "Please specify an integer for size.");
        assert_eq!(clog(&log, &channel, "size 2"), "Chat log size set to `2.0 MiB`");
        assert_eq!(clog(&log, &channel, "bot"), "Please specify 'on' or 'off'.");
        assert_eq!(clog(&log, &channel, "bot on"), "Bot self log enabled.");
        assert_eq!(
            clog(&log, &channel, "status"),
            "Active: `true`, Log bot: `true`, Max size: `2.0 MiB`, Current size: `0.0 Bytes`"
        );
        assert_eq!(clog(&log, &channel, "off"), "Chat log disabled.");
        assert!(clog(&log, &channel, "frobnicate").starts_with("Unknown command."));
    }

    #[test]
    fn test_clog_without_arguments_shows_help() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatLog::open(&config(dir.path())).unwrap();
        let channel = FakeChannel::new();
        clog(&log, &channel, "");
        let messages = channel.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].contains("clog delete"));
    }

    #[test]
    fn test_clog_delete_requires_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let log = ChatLog::open(&config(dir.path())).unwrap();
        log.update("general", |s| s.active = true).unwrap();
        log.record(&location(), &message("bob", "keep me")).unwrap();

        let channel = FakeChannel::with_replies(&[Some("nope"), Some("Y"), Some("yes")]);
        assert_eq!(clog(&log, &channel, "delete"), "No action taken.");
        assert!(log.current_size(&location()) > 0);
        assert_eq!(clog(&log, &channel, "delete"), "Chat log deleted.");
        assert_eq!(log.current_size(&location()), 0);
        assert_eq!(clog(&log, &channel, "delete"), "Chat log not found.");
    }
}
