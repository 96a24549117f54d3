//! Shell module - GNU-style text commands for chat channels
//!
//! Provides grep, wc, tail, cat, tac and sed over literal text, fetched URLs
//! or the channel chat log, with pipes between commands and paced output.

mod commands;
mod input;
mod pipeline;
mod sink;
mod tokenizer;

pub use commands::{Command, GnuCommands, Help};
pub use input::{FetchFormat, Fetched, Fetcher, Location, NoFetcher, Transcript};
pub use pipeline::{Gnu, Invocation, PasteService};
pub use sink::{prompt, Channel, Reply, UserId};
pub use tokenizer::PasteExpiry;

#[cfg(test)]
pub(crate) use sink::testing::FakeChannel;
