//! Text processing commands: grep, wc, tail, cat, tac

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};

use crate::error::GnuError;

use super::super::input::InputResolver;
use super::super::sink::{EmitOptions, Flow, OutputSink};
use super::super::tokenizer::ParsedCommand;

/// Usage error without extra detail; the caller adds the synopsis.
fn usage() -> GnuError {
    GnuError::Usage(String::new())
}

/// Build the grep matcher.
///
/// `-r` compiles the operand as-is. Otherwise it is escaped, wrapped in word
/// boundaries for `-w`, and folded for `-i`. `-v` is applied to the match result,
/// never to the pattern.
fn grep_pattern(cmd: &ParsedCommand) -> Result<Regex, GnuError> {
    let (source, fold) = if cmd.has('r') {
        (cmd.operand.clone(), false)
    } else {
        let escaped = regex::escape(&cmd.operand);
        let source = if cmd.has('w') {
            format!(r"\b{escaped}\b")
        } else {
            escaped
        };
        (source, cmd.has('i'))
    };
    RegexBuilder::new(&source)
        .case_insensitive(fold)
        .build()
        .map_err(|e| GnuError::pattern(&cmd.operand, e))
}

/// grep - print lines that contain a match for a pattern
pub(super) async fn grep(
    cmd: &ParsedCommand,
    input: &InputResolver<'_>,
    out: &mut OutputSink<'_>,
) -> Result<Flow, GnuError> {
    if cmd.operand.is_empty() || input.is_empty() {
        return Err(usage());
    }
    let pattern = grep_pattern(cmd)?;
    let limit = cmd.count('m')?;
    let after = cmd.count('A')?.unwrap_or(0);
    let before = cmd.count('B')?.unwrap_or(0);
    let both = cmd.count('C')?.unwrap_or(0);
    let invert = cmd.has('v');
    let count_only = cmd.has('c');
    let numbered = cmd.has('n');

    let lines = input.lines(false).await?;
    let width = lines.len().to_string().len();
    let opts = EmitOptions::buffered(cmd.buffered());

    let mut emitted: HashSet<usize> = HashSet::new();
    let mut matches = 0usize;
    for (i, line) in lines.iter().enumerate() {
        if limit.is_some_and(|m| matches >= m) {
            break;
        }
        if pattern.is_match(line) == invert {
            continue;
        }
        matches += 1;
        if count_only {
            continue;
        }

        let start = i.saturating_sub(before.saturating_add(both));
        let end = i.saturating_add(after).saturating_add(both).min(lines.len() - 1);
        for j in start..=end {
            if !emitted.insert(j) {
                continue;
            }
            let label = numbered.then_some(j + 1);
            if out.emit(&lines[j], opts.numbered(label, width)).await?.is_stopped() {
                return Ok(Flow::Stopped);
            }
        }
    }

    tracing::debug!(matches, lines = lines.len(), "grep finished");
    if count_only {
        return out.emit(&matches.to_string(), opts).await;
    }
    Ok(Flow::Continue)
}

/// Character, word and line counts of a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Counts {
    pub chars: usize,
    pub words: usize,
    pub lines: usize,
}

impl Counts {
    pub fn of(text: &str) -> Self {
        Self {
            chars: text.chars().count(),
            words: text.split_whitespace().count(),
            lines: text.lines().count(),
        }
    }
}

/// wc - count characters, whitespace-separated words and lines
pub(super) async fn wc(
    cmd: &ParsedCommand,
    input: &InputResolver<'_>,
    out: &mut OutputSink<'_>,
) -> Result<Flow, GnuError> {
    if input.is_empty() {
        return Err(usage());
    }
    let counts = Counts::of(&input.text().await?);

    let single = if cmd.has('m') {
        Some(counts.chars)
    } else if cmd.has('w') {
        Some(counts.words)
    } else if cmd.has('l') {
        Some(counts.lines)
    } else {
        None
    };

    let opts = EmitOptions::default();
    match single {
        Some(n) => out.emit(&n.to_string(), opts).await,
        None => {
            let rows = [
                format!("{:<10}{:<10}{:<10}", "char", "words", "lines"),
                "-".repeat(30),
                format!("{:<10}{:<10}{:<10}", counts.chars, counts.words, counts.lines),
            ];
            for row in rows {
                if out.emit(&row, opts).await?.is_stopped() {
                    return Ok(Flow::Stopped);
                }
            }
            Ok(Flow::Continue)
        }
    }
}

/// First line index shown by `tail -n <window>` over `len` lines.
fn tail_start(window: Option<&str>, len: usize) -> Result<usize, GnuError> {
    let Some(raw) = window.map(str::trim) else {
        return Ok(len.saturating_sub(10));
    };
    let invalid = || GnuError::Usage(format!("Invalid number of lines: `{raw}`"));
    match raw.strip_prefix('+') {
        Some(from) => {
            let n: usize = from.parse().map_err(|_| invalid())?;
            Ok(n.saturating_sub(1).min(len))
        }
        None => {
            let n: usize = raw.parse().map_err(|_| invalid())?;
            Ok(len.saturating_sub(n))
        }
    }
}

/// tail - print the last part of the input
pub(super) async fn tail(
    cmd: &ParsedCommand,
    input: &InputResolver<'_>,
    out: &mut OutputSink<'_>,
) -> Result<Flow, GnuError> {
    if input.is_empty() {
        return Err(usage());
    }
    let window = cmd.value('n');
    // Validate before resolving so a typo never costs a fetch.
    tail_start(window, 0)?;

    let lines = input.lines(false).await?;
    let start = tail_start(window, lines.len())?;
    let opts = EmitOptions::buffered(cmd.buffered());
    for line in &lines[start..] {
        if out.emit(line, opts).await?.is_stopped() {
            return Ok(Flow::Stopped);
        }
    }
    Ok(Flow::Continue)
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// cat - echo the input, optionally numbered and squeezed
pub(super) async fn cat(
    cmd: &ParsedCommand,
    input: &InputResolver<'_>,
    out: &mut OutputSink<'_>,
) -> Result<Flow, GnuError> {
    if input.is_empty() {
        return Err(usage());
    }
    let number_nonblank = cmd.has('b');
    let number_all = cmd.has('n') && !number_nonblank;
    let squeeze = cmd.has('s');

    let lines = input.lines(false).await?;
    let width = lines.len().to_string().len();
    let opts = EmitOptions::buffered(cmd.buffered());

    let mut nonblank_count = 0usize;
    let mut all_count = 0usize;
    let mut previous_blank = false;
    for line in &lines {
        let blank = is_blank(line);
        if squeeze && blank && previous_blank {
            continue;
        }
        previous_blank = blank;

        let label = if number_nonblank {
            if blank {
                None
            } else {
                nonblank_count += 1;
                Some(nonblank_count)
            }
        } else if number_all {
            all_count += 1;
            Some(all_count)
        } else {
            None
        };

        if out.emit(line, opts.numbered(label, width)).await?.is_stopped() {
            return Ok(Flow::Stopped);
        }
    }
    Ok(Flow::Continue)
}

/// tac - print records in reverse order
pub(super) async fn tac(
    cmd: &ParsedCommand,
    input: &InputResolver<'_>,
    out: &mut OutputSink<'_>,
) -> Result<Flow, GnuError> {
    if input.is_empty() {
        return Err(usage());
    }
    let separator = cmd.value('s').filter(|s| !s.is_empty());
    let splitter = match separator {
        Some(sep) if cmd.has('r') => {
            Some(Regex::new(sep).map_err(|e| GnuError::pattern(sep, e))?)
        }
        Some(sep) => Some(Regex::new(&regex::escape(sep)).map_err(|e| GnuError::pattern(sep, e))?),
        None => None,
    };

    let text = input.text().await?;
    let records: Vec<&str> = match &splitter {
        Some(re) => re.split(&text).collect(),
        None => text.lines().collect(),
    };

    let opts = EmitOptions::buffered(cmd.buffered());
    for record in records.into_iter().rev() {
        if out.emit(record, opts).await?.is_stopped() {
            return Ok(Flow::Stopped);
        }
    }
    Ok(Flow::Continue)
}
