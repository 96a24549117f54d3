//! GNU text utilities for chat bots.
//!
//! A message such as `!grep -in foo @chat | wc -l` is handed to [`Gnu::invoke`],
//! which runs the commands and writes their output to a [`Channel`]. The host
//! provides the channel and, optionally, URL fetching, a paste service and the
//! chat log.

pub mod chatlog;
pub mod config;
pub mod error;
pub mod shell;

pub use chatlog::ChatLog;
pub use config::GnuConfig;
pub use error::GnuError;
pub use shell::{Channel, Gnu, Invocation, Location, UserId};
