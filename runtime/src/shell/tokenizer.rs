//! Argument tokenizer.
//!
//! Turns the words of a chat message into a [`ParsedCommand`]:
//! - leading `-xyz` option clusters (some flags consume the next word as a value)
//! - the primary operand (grep pattern / sed script) for commands that take one
//! - input words, later joined with single spaces
//! - everything after a literal `|`, kept verbatim for the next command
//!
//! A trailing `> name` / `>> name` redirect is stripped before tokenizing.

use std::collections::{BTreeSet, HashMap};

use crate::error::GnuError;

/// Where redirected output should be posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Paste title.
    pub name: String,
    pub expiry: PasteExpiry,
}

/// `>` pastes expire, `>>` pastes are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasteExpiry {
    OneDay,
    Never,
}

/// Which flags of a command consume the following word.
#[derive(Debug, Clone, Copy)]
pub struct Grammar {
    /// Flags such as `m` in `-m 3`.
    pub value_flags: &'static [char],
    /// Whether the first plain word is a pattern/script rather than input.
    pub takes_operand: bool,
}

/// A tokenized command line. Built once per invocation, then only read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Single-character flags, combined clusters already expanded.
    pub options: BTreeSet<char>,
    /// Raw values of value-consuming flags.
    pub values: HashMap<char, String>,
    /// Search pattern or sed script; empty when none was given.
    pub operand: String,
    /// Words that make up the input string.
    pub input_tokens: Vec<String>,
    /// Raw words after `|`.
    pub pipe_segment: Vec<String>,
    pub redirect: Option<Redirect>,
}

impl ParsedCommand {
    pub fn has(&self, flag: char) -> bool {
        self.options.contains(&flag)
    }

    /// Input words joined with single spaces.
    pub fn input(&self) -> String {
        self.input_tokens.join(" ")
    }

    /// Raw value of a value-consuming flag.
    pub fn value(&self, flag: char) -> Option<&str> {
        self.values.get(&flag).map(String::as_str)
    }

    /// Value of a flag parsed as a non-negative count.
    pub fn count(&self, flag: char) -> Result<Option<usize>, GnuError> {
        self.value(flag)
            .map(|raw| {
                raw.trim().parse::<usize>().map_err(|_| {
                    GnuError::Usage(format!("Option -{flag} expects a number, got `{raw}`"))
                })
            })
            .transpose()
    }

    /// Output is captured instead of sent when piping or redirecting.
    pub fn captures_output(&self) -> bool {
        !self.pipe_segment.is_empty() || self.redirect.is_some()
    }

    /// Lines are coalesced into messages unless `-%` asks for one message per line.
    pub fn buffered(&self) -> bool {
        !self.has('%')
    }
}

/// Split message text into words, honouring shell-style quoting.
pub fn split_arguments(text: &str) -> Result<Vec<String>, GnuError> {
    shlex::split(text)
        .ok_or_else(|| GnuError::Usage("Unbalanced quotes in command.".to_string()))
}

/// Remove a trailing redirect from `words`, unless the line contains a pipe.
pub fn take_redirect(words: &mut Vec<String>) -> Option<Redirect> {
    if words.iter().any(|w| w == "|") {
        return None;
    }

    let len = words.len();
    if len > 1 && (words[len - 2] == ">>" || words[len - 2] == ">") {
        let expiry = if words[len - 2] == ">>" {
            PasteExpiry::Never
        } else {
            PasteExpiry::OneDay
        };
        let name = words.pop()?;
        words.pop();
        return Some(Redirect { name, expiry });
    }

    let last = words.last()?;
    let (name, expiry) = if let Some(name) = last.strip_prefix(">>") {
        (name, PasteExpiry::Never)
    } else if let Some(name) = last.strip_prefix('>') {
        (name, PasteExpiry::OneDay)
    } else {
        return None;
    };
    if name.is_empty() {
        return None;
    }
    let redirect = Redirect {
        name: name.to_string(),
        expiry,
    };
    words.pop();
    Some(redirect)
}

/// Tokenize one command's words.
pub fn tokenize(mut words: Vec<String>, grammar: Grammar) -> Result<ParsedCommand, GnuError> {
    let redirect = take_redirect(&mut words);
    let mut parsed = ParsedCommand {
        redirect,
        ..ParsedCommand::default()
    };
    let mut clusters: Vec<String> = Vec::new();

    let mut iter = words.into_iter();
    while let Some(word) = iter.next() {
        if word == "|" {
            parsed.pipe_segment.extend(iter.by_ref());
            break;
        }

        if let Some(cluster) = word.strip_prefix('-') {
            // Any value flag anywhere in the cluster takes the next word, so
            // `-A 3` and `-nA 3` both work.
            for &flag in grammar.value_flags {
                if cluster.contains(flag) {
                    let value = iter.next().ok_or_else(|| {
                        GnuError::Usage(format!("Option -{flag} requires a value."))
                    })?;
                    parsed.values.insert(flag, value);
                }
            }
            clusters.push(cluster.to_string());
        } else if grammar.takes_operand && parsed.operand.is_empty() {
            parsed.operand = word;
        } else {
            parsed.input_tokens.push(word);
        }
    }

    parsed.options = clusters.iter().flat_map(|c| c.chars()).collect();
    tracing::debug!(
        options = ?parsed.options,
        operand = %parsed.operand,
        inputs = parsed.input_tokens.len(),
        pipe = parsed.pipe_segment.len(),
        "tokenized command"
    );
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREP: Grammar = Grammar {
        value_flags: &['m', 'A', 'B', 'C'],
        takes_operand: true,
    };
    const CAT: Grammar = Grammar {
        value_flags: &[],
        takes_operand: false,
    };

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_operand_and_input() {
        let parsed = tokenize(words(&["-i", "foo", "a", "b"]), GREP).unwrap();
        assert!(parsed.has('i'));
        assert_eq!(parsed.operand, "foo");
        assert_eq!(parsed.input(), "a b");
    }

    #[test]
    fn test_combined_flags_expand() {
        let combined = tokenize(words(&["-in", "foo", "x"]), GREP).unwrap();
        let separate = tokenize(words(&["-i", "-n", "foo", "x"]), GREP).unwrap();
        assert_eq!(combined.options, separate.options);
        assert!(combined.has('i') && combined.has('n'));
    }

    #[test]
    fn test_value_flag_inside_cluster() {
        let parsed = tokenize(words(&["-nA", "3", "foo", "x"]), GREP).unwrap();
        assert_eq!(parsed.count('A').unwrap(), Some(3));
        assert!(parsed.has('n'));
        assert_eq!(parsed.operand, "foo");
    }

    #[test]
    fn test_missing_value_is_usage_error() {
        let err = tokenize(words(&["-m"]), GREP).unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_non_numeric_count() {
        let parsed = tokenize(words(&["-m", "lots", "foo", "x"]), GREP).unwrap();
        assert!(parsed.count('m').is_err());
    }

    #[test]
    fn test_pipe_segment_is_verbatim() {
        let parsed = tokenize(words(&["foo", "x", "|", "wc", "-l", "|", "cat"]), GREP).unwrap();
        assert_eq!(parsed.pipe_segment, words(&["wc", "-l", "|", "cat"]));
        assert!(parsed.captures_output());
    }

    #[test]
    fn test_no_operand_for_cat() {
        let parsed = tokenize(words(&["-n", "hello", "world"]), CAT).unwrap();
        assert!(parsed.operand.is_empty());
        assert_eq!(parsed.input(), "hello world");
    }

    #[test]
    fn test_redirect_forms() {
        let parsed = tokenize(words(&["hello", ">", "paste"]), CAT).unwrap();
        assert_eq!(
            parsed.redirect,
            Some(Redirect { name: "paste".into(), expiry: PasteExpiry::OneDay })
        );
        assert_eq!(parsed.input(), "hello");

        let parsed = tokenize(words(&["hello", ">>keep"]), CAT).unwrap();
        assert_eq!(
            parsed.redirect,
            Some(Redirect { name: "keep".into(), expiry: PasteExpiry::Never })
        );
        assert!(parsed.captures_output());
    }

    #[test]
    fn test_redirect_ignored_with_pipe() {
        let parsed = tokenize(words(&["hello", "|", "cat", ">x"]), CAT).unwrap();
        assert!(parsed.redirect.is_none());
        assert_eq!(parsed.pipe_segment, words(&["cat", ">x"]));
    }

    #[test]
    fn test_split_arguments_keeps_quoted_newlines() {
        let split = split_arguments("foo 'a\nb c'").unwrap();
        assert_eq!(split, words(&["foo", "a\nb c"]));
        assert!(split_arguments("foo 'open").is_err());
    }

    #[test]
    fn test_percent_disables_buffering() {
        let parsed = tokenize(words(&["-%", "x"]), CAT).unwrap();
        assert!(!parsed.buffered());
    }
}
