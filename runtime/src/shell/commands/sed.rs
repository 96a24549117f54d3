//! sed - a small stream editor.
//!
//! A script is `[address]command[text]`:
//! - address: `/re/` (optionally `/re/I`), `N`, `$`, `A,B` or `A~N`; none selects every line
//! - command: one of `a c d i p s =`
//!
//! Scripts are parsed completely before any input is resolved, so a syntax
//! error never produces partial output.

use regex::{Captures, Regex, RegexBuilder};

use crate::error::GnuError;

use super::super::input::InputResolver;
use super::super::sink::{EmitOptions, Flow, OutputSink};
use super::super::tokenizer::ParsedCommand;

const COMMANDS: &[char] = &['a', 'c', 'd', 'i', 'p', 's', '='];

/// A line number in an address; `$` is the last line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineRef {
    Number(usize),
    Last,
}

impl LineRef {
    fn parse(text: &str) -> Result<Self, GnuError> {
        if text == "$" {
            return Ok(LineRef::Last);
        }
        text.parse()
            .map(LineRef::Number)
            .map_err(|_| GnuError::Syntax(format!("Invalid line address: `{text}`")))
    }

    fn resolve(self, last: usize) -> usize {
        match self {
            LineRef::Number(n) => n,
            LineRef::Last => last,
        }
    }
}

#[derive(Debug, Clone)]
enum Address {
    Blank,
    Line(LineRef),
    Range(LineRef, LineRef),
    Step(LineRef, LineRef),
    Pattern(Regex),
}

/// An address with `$` resolved against the final line count.
#[derive(Debug, Clone, Copy)]
enum Selector<'a> {
    All,
    Line(usize),
    Range(usize, usize),
    Step(usize, usize),
    Pattern(&'a Regex),
}

impl Address {
    fn resolve(&self, last: usize) -> Selector<'_> {
        match self {
            Address::Blank => Selector::All,
            Address::Line(n) => Selector::Line(n.resolve(last)),
            Address::Range(a, b) => {
                let (a, b) = (a.resolve(last), b.resolve(last));
                if a >= b {
                    Selector::Line(a)
                } else {
                    Selector::Range(a, b)
                }
            }
            Address::Step(a, n) => Selector::Step(a.resolve(last), n.resolve(last)),
            Address::Pattern(re) => Selector::Pattern(re),
        }
    }
}

impl Selector<'_> {
    fn matches(&self, line_num: usize, line: &str) -> bool {
        match *self {
            Selector::All => true,
            Selector::Line(n) => line_num == n,
            Selector::Range(a, b) => (a..=b).contains(&line_num),
            Selector::Step(a, 0) => line_num == a,
            Selector::Step(a, n) => line_num >= a && (line_num - a) % n == 0,
            Selector::Pattern(re) => re.is_match(line),
        }
    }

    /// Lines of a range after its first one.
    fn is_range_tail(&self, line_num: usize) -> bool {
        matches!(*self, Selector::Range(a, _) if line_num != a)
    }
}

/// A capture group named in a replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
enum GroupRef {
    Index(usize),
    Name(String),
}

#[derive(Debug, Clone)]
struct Substitution {
    search: Regex,
    /// Replacement in `regex` expansion syntax.
    replacement: String,
    groups: Vec<GroupRef>,
    print: bool,
}

impl Substitution {
    /// Replace the first match in `line`. `Ok(None)` when nothing matched; `Err`
    /// when a referenced group did not take part in the match.
    fn apply(&self, line: &str) -> Result<Option<String>, String> {
        let Some(caps) = self.search.captures(line) else {
            return Ok(None);
        };
        if let Some(missing) = self.groups.iter().find(|g| !participated(&caps, g)) {
            return Err(match missing {
                GroupRef::Index(i) => format!("unmatched group {i}"),
                GroupRef::Name(name) => format!("unmatched group `{name}`"),
            });
        }
        let Some(whole) = caps.get(0) else {
            return Ok(None);
        };
        let mut result = String::with_capacity(line.len());
        result.push_str(&line[..whole.start()]);
        caps.expand(&self.replacement, &mut result);
        result.push_str(&line[whole.end()..]);
        Ok(Some(result))
    }
}

fn participated(caps: &Captures<'_>, group: &GroupRef) -> bool {
    match group {
        GroupRef::Index(i) => caps.get(*i).is_some(),
        GroupRef::Name(name) => caps.name(name).is_some(),
    }
}

#[derive(Debug, Clone)]
enum Action {
    Append(String),
    Change(String),
    Delete,
    Insert(String),
    Print,
    Substitute(Substitution),
    LineNumber,
}

#[derive(Debug, Clone)]
struct Script {
    address: Address,
    action: Action,
}

/// Byte offset of the first `/` at or after `from` that is not backslash-escaped.
fn find_unescaped_slash(text: &str, from: usize) -> Option<usize> {
    let mut chars = text[from..].char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '/' => return Some(from + i),
            _ => {}
        }
    }
    None
}

/// Turn `\/` into `/`, leaving every other escape alone.
fn unescape_slashes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('/') => out.push('/'),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn compile(pattern: &str, fold: bool) -> Result<Regex, GnuError> {
    RegexBuilder::new(pattern)
        .case_insensitive(fold)
        .build()
        .map_err(|e| GnuError::pattern(pattern, e))
}

/// Split the address off the front of a script.
fn parse_address(script: &str) -> Result<(Address, &str), GnuError> {
    if let Some(body) = script.strip_prefix('/') {
        let end = find_unescaped_slash(body, 0).ok_or_else(|| {
            GnuError::Syntax(format!("Unterminated address regex: `{script}`"))
        })?;
        let pattern = unescape_slashes(&body[..end]);
        let mut rest = &body[end + 1..];

        // `I`/`i` right after the address folds case, unless it is the insert command.
        let mut fold = false;
        if let Some(after) = rest.strip_prefix(['i', 'I']) {
            let next = after.trim_start().chars().next();
            if next.is_some_and(|c| COMMANDS.contains(&c)) {
                fold = true;
                rest = after;
            }
        }
        return Ok((Address::Pattern(compile(&pattern, fold)?), rest));
    }

    if !script.starts_with(|c: char| c == '$' || c.is_ascii_digit()) {
        return Ok((Address::Blank, script));
    }

    let is_ref = |c: char| c == '$' || c.is_ascii_digit();
    let first_end = script.find(|c: char| !is_ref(c)).unwrap_or(script.len());
    let first = LineRef::parse(&script[..first_end])?;
    let rest = &script[first_end..];

    let Some(sep) = rest.chars().next().filter(|c| *c == ',' || *c == '~') else {
        return Ok((Address::Line(first), rest));
    };
    let rest = &rest[1..];
    let second_end = rest.find(|c: char| !is_ref(c)).unwrap_or(rest.len());
    if second_end == 0 {
        return Err(GnuError::Syntax(format!(
            "Expected line number after `{sep}`: `{script}`"
        )));
    }
    let second = LineRef::parse(&rest[..second_end])?;
    let address = if sep == ',' {
        Address::Range(first, second)
    } else {
        Address::Step(first, second)
    };
    Ok((address, &rest[second_end..]))
}

/// Translate `\1`, `\g<name>` and friends into `regex` expansion syntax.
fn parse_replacement(text: &str) -> (String, Vec<GroupRef>) {
    let mut out = String::with_capacity(text.len());
    let mut groups = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.next() {
                Some(d) if d.is_ascii_digit() => {
                    let mut digits = String::from(d);
                    while let Some(d) = chars.next_if(char::is_ascii_digit) {
                        digits.push(d);
                    }
                    let index = digits.parse().unwrap_or(0);
                    out.push_str(&format!("${{{index}}}"));
                    groups.push(GroupRef::Index(index));
                }
                Some('g') if chars.peek() == Some(&'<') => {
                    chars.next();
                    let name: String = chars.by_ref().take_while(|c| *c != '>').collect();
                    out.push_str(&format!("${{{name}}}"));
                    match name.parse::<usize>() {
                        Ok(index) => groups.push(GroupRef::Index(index)),
                        Err(_) => groups.push(GroupRef::Name(name)),
                    }
                }
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('&') => out.push('&'),
                Some(other) if other == '/' || other == '\\' => out.push(other),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            _ => out.push(c),
        }
    }
    (out, groups)
}

fn parse_substitution(body: &str) -> Result<Substitution, GnuError> {
    let unknown = || GnuError::Syntax(format!("Unknown substitution pattern: `s{body}`"));
    let rest = body.strip_prefix('/').ok_or_else(unknown)?;
    let search_end = find_unescaped_slash(rest, 0).ok_or_else(unknown)?;
    let replace_end = find_unescaped_slash(rest, search_end + 1).ok_or_else(unknown)?;
    let search = unescape_slashes(&rest[..search_end]);
    let (replacement, groups) = parse_replacement(&rest[search_end + 1..replace_end]);
    let flags = rest[replace_end + 1..].trim();

    let mut fold = false;
    let mut print = false;
    for flag in flags.chars() {
        match flag.to_ascii_lowercase() {
            'i' if !fold => fold = true,
            'p' if !print => print = true,
            _ => {
                return Err(GnuError::Syntax(format!(
                    "Unrecognized pattern flag: `{flags}`"
                )))
            }
        }
    }

    let search = compile(&search, fold)?;
    for group in &groups {
        let known = match group {
            GroupRef::Index(i) => *i < search.captures_len(),
            GroupRef::Name(name) => search.capture_names().flatten().any(|n| n == name),
        };
        if !known {
            return Err(GnuError::Syntax(format!(
                "Invalid group reference in replacement: `{group:?}`"
            )));
        }
    }

    Ok(Substitution {
        search,
        replacement,
        groups,
        print,
    })
}

fn parse_script(script: &str) -> Result<Script, GnuError> {
    let script = script.trim();
    let (address, rest) = parse_address(script)?;
    let rest = rest.trim();
    let Some(command) = rest.chars().next() else {
        return Err(GnuError::Usage("Script command not found.".to_string()));
    };
    let tail = &rest[command.len_utf8()..];

    let text = |tail: &str| {
        let text = tail.trim_start();
        if text.is_empty() {
            Err(GnuError::Syntax(format!("Expected characters after: `{command}`")))
        } else {
            Ok(text.to_string())
        }
    };
    let bare = |action: Action| {
        if tail.is_empty() {
            Ok(action)
        } else {
            Err(GnuError::Syntax(format!(
                "Extra characters after command: `{command}`"
            )))
        }
    };

    let action = match command {
        'a' => Action::Append(text(tail)?),
        'c' => Action::Change(text(tail)?),
        'i' => Action::Insert(text(tail)?),
        'd' => bare(Action::Delete)?,
        'p' => bare(Action::Print)?,
        '=' => bare(Action::LineNumber)?,
        's' => Action::Substitute(parse_substitution(tail)?),
        other => return Err(GnuError::Syntax(format!("Unknown command: `{other}`"))),
    };
    Ok(Script { address, action })
}

/// sed - apply one script command to each line of the input
pub(super) async fn sed(
    cmd: &ParsedCommand,
    input: &InputResolver<'_>,
    out: &mut OutputSink<'_>,
) -> Result<Flow, GnuError> {
    if cmd.operand.trim().is_empty() {
        return Err(GnuError::Usage("Script command not found.".to_string()));
    }
    if input.is_empty() {
        return Err(GnuError::Usage("Input not found.".to_string()));
    }
    let script = parse_script(&cmd.operand)?;
    let silent = cmd.has('n');

    let lines = input.lines(cmd.has('g')).await?;
    let selector = script.address.resolve(lines.len());
    let opts = EmitOptions::buffered(cmd.buffered());

    macro_rules! emit {
        ($line:expr) => {
            if out.emit($line, opts).await?.is_stopped() {
                return Ok(Flow::Stopped);
            }
        };
    }

    for (i, original) in lines.iter().enumerate() {
        let line_num = i + 1;
        let matched = selector.matches(line_num, original);
        let mut line = original.clone();
        let mut substituted = false;
        let mut suppressed = false;

        if matched {
            match &script.action {
                Action::Insert(text) => emit!(text),
                Action::Print => emit!(&line),
                Action::LineNumber => emit!(&line_num.to_string()),
                Action::Change(text) => {
                    if selector.is_range_tail(line_num) {
                        suppressed = true;
                    } else {
                        line = text.clone();
                    }
                }
                Action::Substitute(sub) => match sub.apply(&line) {
                    Ok(Some(replaced)) => {
                        line = replaced;
                        substituted = true;
                    }
                    Ok(None) => {}
                    Err(reason) => {
                        tracing::warn!(line = line_num, %reason, "substitution skipped");
                        out.notice(&format!("Line {line_num}: substitution skipped, {reason}."))
                            .await?;
                    }
                },
                Action::Append(_) | Action::Delete => {}
            }
        }

        let deleted = matched && matches!(script.action, Action::Delete);
        let echo = if silent {
            substituted && matches!(&script.action, Action::Substitute(sub) if sub.print)
        } else {
            !deleted && !suppressed
        };
        if echo {
            emit!(&line);
        }

        if matched {
            if let Action::Append(text) = &script.action {
                emit!(text);
            }
        }
    }
    Ok(Flow::Continue)
}
