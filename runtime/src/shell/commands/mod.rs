//! GNU-style text commands.
//!
//! Each command is a variant of [`Command`]. A command:
//! - declares which flags take a value ([`Command::grammar`])
//! - validates its arguments before touching the input, so a bad pattern never
//!   triggers a fetch
//! - writes every line through the [`OutputSink`] and stops as soon as the sink
//!   reports [`Flow::Stopped`]
//!
//! Flushing the sink is left to the caller.

mod sed;
mod text;

use crate::error::GnuError;

use super::input::InputResolver;
use super::sink::{Flow, OutputSink};
use super::tokenizer::{Grammar, ParsedCommand};

/// The command table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Grep,
    Wc,
    Tail,
    Cat,
    Tac,
    Sed,
}

const HELP_OPTIONS: &str = "\n\t-p       If input is a URL, this will treat the URL content as (prettified) html instead of a DOM.\
\n\t-@       Same as -p except source is not passed through a prettifier.\
\n\t-%       Print each line as a separate message; more likely to hit rate limits.";

const HELP_INPUT: &str = "\n\nInput\
\n\tURL      If input matches a URL pattern, bot will fetch URL content as input.\
\n\t         By default, DOM will be parsed from URL content and text elements will be treated as 'lines'\
\n\t         Unless -p or -@ options are set.\
\n\t@chat    If '@chat' is specified as the input, chat log will be used as input.\
\n\t         Logging must be activated in the channel for this to work.\
\n\t<input>  If none of the previous inputs are detected, remaining text is treated as input.\
\n\t         To preserve whitespace (including newlines), enclose entire input in quotes.";

/// Full help for a command, posted as three messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Help {
    pub summary: &'static str,
    pub usage: &'static str,
    pub details: String,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Grep,
        Command::Wc,
        Command::Tail,
        Command::Cat,
        Command::Tac,
        Command::Sed,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Grep => "grep",
            Command::Wc => "wc",
            Command::Tail => "tail",
            Command::Cat => "cat",
            Command::Tac => "tac",
            Command::Sed => "sed",
        }
    }

    pub fn grammar(self) -> Grammar {
        match self {
            Command::Grep => Grammar {
                value_flags: &['m', 'A', 'B', 'C'],
                takes_operand: true,
            },
            Command::Tail => Grammar {
                value_flags: &['n'],
                takes_operand: false,
            },
            Command::Tac => Grammar {
                value_flags: &['s'],
                takes_operand: false,
            },
            Command::Sed => Grammar {
                value_flags: &[],
                takes_operand: true,
            },
            Command::Wc | Command::Cat => Grammar {
                value_flags: &[],
                takes_operand: false,
            },
        }
    }

    /// One-line synopsis, without the command prefix.
    pub fn usage(self) -> &'static str {
        match self {
            Command::Grep => "grep [options] [pattern] [input]",
            Command::Wc => "wc [option] [input]",
            Command::Tail => "tail [options] [input]",
            Command::Cat => "cat [options] [input]",
            Command::Tac => "tac [options] [input]",
            Command::Sed => "sed [options] [script] [input]",
        }
    }

    pub fn help(self) -> Help {
        let (summary, options) = match self {
            Command::Grep => (
                "*grep* prints lines that contain a match for a pattern.",
                "\nMatching Options\
\n\t-i       Ignore case distinctions, so that characters that differ only in case match each other.\
\n\t-w       Select only those lines containing matches that form whole words.\
\n\t-v       Invert the sense of matching, to select non-matching lines.\
\n\t-r       Treats search string as a regex pattern; other Matching Options are ignored.\
\n\nOutput Options\
\n\t-c       Suppress normal output; instead print a count of matching lines.\
\n\t-n       Prefix each line of output with its line number.\
\n\t-m num   Stop reading from input after num matching lines.\
\n\t-A num   Print num lines of trailing context after matching lines.\
\n\t-B num   Print num lines of leading context before matching lines.\
\n\t-C num   Print num lines of leading and trailing context.\
\n\nOther Options",
            ),
            Command::Wc => (
                "*wc* counts the number of characters, whitespace-separated words, and newlines in the given input.",
                "\nOptions\
\n\t-m       Print only the character counts.\
\n\t-w       Print only the word counts.\
\n\t-l       Print only the newline counts.",
            ),
            Command::Tail => (
                "*tail* prints the last part (10 lines by default) of input.",
                "\nOptions\
\n\t-n [+]N  Output the last N lines. However, if N is prefixed with a '+',\
\n\t         start printing with line N from the start of input, instead of from the end.",
            ),
            Command::Cat => (
                "*cat* echoes the contents of the input.",
                "\nOptions\
\n\t-b       Number all nonempty output lines, starting with 1.\
\n\t-n       Number all output lines, starting with 1. This option is ignored if -b is in effect.\
\n\t-s       Suppress repeated adjacent blank lines; output just one empty line instead of several.",
            ),
            Command::Tac => (
                "*tac* echoes input to output in reverse by line or user specified separator.",
                "\nOptions\
\n\t-s sep   Use \"sep\" as the record separator, instead of newline.\
\n\t-r       Treat the separator string as a regular expression.",
            ),
            Command::Sed => (
                "*sed* is a simple stream editor.",
                "\nOptions\
\n\t-g       Process entire input as a single string, rather than line by line.\
\n\t-n       Disable automatic printing; only produce output when explicitly told to.",
            ),
        };

        let mut details = String::from(options);
        details.push_str(HELP_OPTIONS);
        if self == Command::Sed {
            details.push_str(
                "\n\nScript Address\
\n\t/.../    Returns lines that match the regular expression.\
\n\tA        Returns line number A.\
\n\tA,B      Returns lines from A to B.\
\n\tA~N      Returns every Nth line, starting from A\
\n\nScript Command\
\n\ta...     Append after each line.\
\n\tc...     Change lines with new line.\
\n\td        Delete lines.\
\n\ti...     Insert before each line.\
\n\tp        Print line.\
\n\ts/././   Substitute with regular expression pattern.\
\n\t=        Print line number.\
\n\nScript Pattern Flag\
\n\t/i       Ignore case\
\n\t/p       Print (mostly used when -n option is active)",
            );
        }
        details.push_str(HELP_INPUT);

        Help {
            summary,
            usage: self.usage(),
            details,
        }
    }

    /// Run the command against its input.
    pub async fn run(
        self,
        cmd: &ParsedCommand,
        input: &InputResolver<'_>,
        out: &mut OutputSink<'_>,
    ) -> Result<Flow, GnuError> {
        match self {
            Command::Grep => text::grep(cmd, input, out).await,
            Command::Wc => text::wc(cmd, input, out).await,
            Command::Tail => text::tail(cmd, input, out).await,
            Command::Cat => text::cat(cmd, input, out).await,
            Command::Tac => text::tac(cmd, input, out).await,
            Command::Sed => sed::sed(cmd, input, out).await,
        }
    }
}

/// Name-based access to the command table.
pub struct GnuCommands;

impl GnuCommands {
    pub fn get_command(name: &str) -> Option<Command> {
        Command::from_name(name)
    }

    pub fn list_commands() -> Vec<&'static str> {
        let mut cmds: Vec<&'static str> = Command::ALL.iter().map(|c| c.name()).collect();
        cmds.sort();
        cmds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_command() {
        assert_eq!(GnuCommands::get_command("grep"), Some(Command::Grep));
        assert_eq!(GnuCommands::get_command("sed"), Some(Command::Sed));
        assert!(GnuCommands::get_command("ls").is_none());
        assert!(GnuCommands::get_command("GREP").is_none());
    }

    #[test]
    fn test_tac_help() {
        let help = Command::Tac.help();
        assert!(help.summary.contains("tac"));
        assert_eq!(help.usage, "tac [options] [input]");
        assert!(help.details.contains("-s sep"));
        assert!(help.details.contains("-%"));
        assert!(help.details.contains("@chat"));
    }

    #[test]
    fn test_sed_help_lists_script_commands() {
        let help = Command::Sed.help();
        assert!(help.details.contains("Script Address"));
        assert!(help.details.contains("s/././"));
        assert!(!Command::Grep.help().details.contains("Script Address"));
    }

    #[test]
    fn test_list_commands() {
        assert_eq!(
            GnuCommands::list_commands(),
            vec!["cat", "grep", "sed", "tac", "tail", "wc"]
        );
    }

    #[test]
    fn test_value_flags() {
        assert!(Command::Grep.grammar().value_flags.contains(&'A'));
        assert!(Command::Tail.grammar().value_flags.contains(&'n'));
        assert!(Command::Cat.grammar().value_flags.is_empty());
        assert!(Command::Sed.grammar().takes_operand);
        assert!(!Command::Wc.grammar().takes_operand);
    }
}
