//! Input resolution.
//!
//! The input string of a command is one of:
//! - a URL, fetched through a [`Fetcher`] in raw, pretty or visible-text form
//! - `@chat`, the channel transcript provided by a [`Transcript`]
//! - literal text
//!
//! Output piped in from a previous stage is always literal.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use crate::error::GnuError;

/// How fetched markup is turned into lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFormat {
    /// `-@`: response body as plain text.
    Raw,
    /// `-p`: markup re-serialized with indentation.
    Pretty,
    /// Default: visible text nodes only.
    Visible,
}

impl FetchFormat {
    pub fn from_options(raw: bool, pretty: bool) -> Self {
        if pretty {
            FetchFormat::Pretty
        } else if raw {
            FetchFormat::Raw
        } else {
            FetchFormat::Visible
        }
    }
}

/// Result of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    Text(String),
    /// One entry per visible text node.
    Nodes(Vec<String>),
}

/// Fetches URL content. Provided by the host.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, format: FetchFormat) -> Result<Fetched, GnuError>;
}

/// Fetcher for hosts without network access.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFetcher;

#[async_trait]
impl Fetcher for NoFetcher {
    async fn fetch(&self, url: &str, _format: FetchFormat) -> Result<Fetched, GnuError> {
        Err(GnuError::ResourceUnavailable(format!(
            "Unable to fetch {url}: URL input is not available here."
        )))
    }
}

/// Where a command was invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub server: String,
    pub channel: String,
    /// Direct messages have no transcript.
    pub private: bool,
}

/// Supplies the running transcript of a channel.
pub trait Transcript: Send + Sync {
    fn transcript(&self, location: &Location) -> Result<String, GnuError>;
}

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(
        r"^(?:http|ftp)s?://(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+(?:[A-Z]{2,6}\.?|[A-Z0-9-]{2,}\.?)|localhost|\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?::\d+)?(?:/?|[/?]\S+)$",
    )
    .case_insensitive(true)
    .build()
    .expect("static regex must compile")
});

/// Whether `input` looks like an absolute http(s)/ftp(s) URL.
pub fn is_url(input: &str) -> bool {
    URL_RE.is_match(input)
}

/// Everything the resolver may consult.
pub struct InputSources<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub transcript: Option<&'a dyn Transcript>,
    pub location: &'a Location,
}

/// Input of one invocation, resolved lazily so commands can validate their
/// arguments before any fetch happens.
pub struct InputResolver<'a> {
    input: String,
    piped: bool,
    format: FetchFormat,
    sources: InputSources<'a>,
}

impl<'a> InputResolver<'a> {
    /// Own input words win; piped text is used only when there are none.
    pub fn new(
        own: String,
        piped: Option<String>,
        format: FetchFormat,
        sources: InputSources<'a>,
    ) -> Self {
        let (input, piped) = match piped {
            Some(text) if own.is_empty() => (text, true),
            _ => (own, false),
        };
        Self {
            input,
            piped,
            format,
            sources,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    /// Resolved input, keeping fetched text nodes apart.
    async fn resolve(&self) -> Result<Fetched, GnuError> {
        if self.piped {
            return Ok(Fetched::Text(self.input.clone()));
        }
        if is_url(&self.input) {
            tracing::info!(url = %self.input, format = ?self.format, "fetching input");
            return self
                .sources
                .fetcher
                .fetch(&self.input, self.format)
                .await
                .inspect_err(|e| tracing::warn!(url = %self.input, error = %e, "fetch failed"));
        }
        if self.input.eq_ignore_ascii_case("@chat") {
            let transcript = self.sources.transcript.ok_or_else(|| {
                GnuError::ResourceUnavailable("Chat log is not available.".to_string())
            })?;
            return transcript.transcript(self.sources.location).map(Fetched::Text);
        }
        Ok(Fetched::Text(self.input.clone()))
    }

    /// Resolved input as one string.
    pub async fn text(&self) -> Result<String, GnuError> {
        Ok(match self.resolve().await? {
            Fetched::Text(text) => text,
            Fetched::Nodes(nodes) => nodes.join("\n"),
        })
    }

    /// Resolved input as lines; `whole` keeps it as a single element.
    ///
    /// Each fetched text node is one line, even when it spans several.
    pub async fn lines(&self, whole: bool) -> Result<Vec<String>, GnuError> {
        Ok(match self.resolve().await? {
            Fetched::Nodes(nodes) if whole => vec![nodes.join("\n")],
            Fetched::Nodes(nodes) => nodes,
            Fetched::Text(text) if whole => vec![text],
            Fetched::Text(text) => text.lines().map(str::to_string).collect(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Serves one canned response and remembers the requests.
    pub struct FakeFetcher {
        pub response: Fetched,
        pub requests: Mutex<Vec<(String, FetchFormat)>>,
    }

    impl FakeFetcher {
        pub fn new(response: Fetched) -> Self {
            Self {
                response,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, url: &str, format: FetchFormat) -> Result<Fetched, GnuError> {
            self.requests.lock().unwrap().push((url.to_string(), format));
            Ok(self.response.clone())
        }
    }

    pub struct FakeTranscript(pub String);

    impl Transcript for FakeTranscript {
        fn transcript(&self, _location: &Location) -> Result<String, GnuError> {
            Ok(self.0.clone())
        }
    }

    pub fn location() -> Location {
        Location {
            server: "guild".to_string(),
            channel: "general".to_string(),
            private: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use futures_lite::future::block_on;

    #[test]
    fn test_url_detection() {
        assert!(is_url("https://example.com"));
        assert!(is_url("http://localhost:8080/path?q=1"));
        assert!(is_url("FTP://10.0.0.1/file.txt"));
        assert!(!is_url("example.com"));
        assert!(!is_url("https://example.com and more"));
    }

    #[test]
    fn test_literal_input_splits_lines() {
        let loc = location();
        let sources = InputSources { fetcher: &NoFetcher, transcript: None, location: &loc };
        let resolver = InputResolver::new("a\nb\nc".into(), None, FetchFormat::Visible, sources);
        assert_eq!(block_on(resolver.lines(false)).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(block_on(resolver.lines(true)).unwrap(), vec!["a\nb\nc"]);
    }

    #[test]
    fn test_url_uses_fetcher_with_format() {
        let fetcher = FakeFetcher::new(Fetched::Nodes(vec!["Title".into(), "Body".into()]));
        let loc = location();
        let sources = InputSources { fetcher: &fetcher, transcript: None, location: &loc };
        let format = FetchFormat::from_options(false, true);
        let resolver = InputResolver::new("https://example.com".into(), None, format, sources);
        assert_eq!(block_on(resolver.lines(false)).unwrap(), vec!["Title", "Body"]);
        assert_eq!(
            fetcher.requests.lock().unwrap().as_slice(),
            &[("https://example.com".to_string(), FetchFormat::Pretty)]
        );
    }

    #[test]
    fn test_visible_nodes_stay_one_line_each() {
        let fetcher = FakeFetcher::new(Fetched::Nodes(vec![
            "Title".into(),
            "para one\npara two".into(),
        ]));
        let loc = location();
        let sources = InputSources { fetcher: &fetcher, transcript: None, location: &loc };
        let resolver =
            InputResolver::new("https://example.com".into(), None, FetchFormat::Visible, sources);
        assert_eq!(
            block_on(resolver.lines(false)).unwrap(),
            vec!["Title", "para one\npara two"]
        );
        assert_eq!(
            block_on(resolver.lines(true)).unwrap(),
            vec!["Title\npara one\npara two"]
        );
        assert_eq!(block_on(resolver.text()).unwrap(), "Title\npara one\npara two");
    }

    #[test]
    fn test_unwired_fetcher_is_unavailable() {
        let loc = location();
        let sources = InputSources { fetcher: &NoFetcher, transcript: None, location: &loc };
        let resolver = InputResolver::new("https://example.com".into(), None, FetchFormat::Raw, sources);
        assert!(matches!(
            block_on(resolver.text()),
            Err(GnuError::ResourceUnavailable(_))
        ));
    }

    #[test]
    fn test_chat_placeholder_reads_transcript() {
        let transcript = FakeTranscript("one\ntwo".into());
        let loc = location();
        let sources = InputSources { fetcher: &NoFetcher, transcript: Some(&transcript), location: &loc };
        let resolver = InputResolver::new("@CHAT".into(), None, FetchFormat::Visible, sources);
        assert_eq!(block_on(resolver.lines(false)).unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn test_piped_input_is_literal() {
        let fetcher = FakeFetcher::new(Fetched::Text("fetched".into()));
        let loc = location();
        let sources = InputSources { fetcher: &fetcher, transcript: None, location: &loc };
        let resolver = InputResolver::new(
            String::new(),
            Some("https://example.com".into()),
            FetchFormat::Visible,
            sources,
        );
        assert_eq!(block_on(resolver.text()).unwrap(), "https://example.com");
        assert!(fetcher.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_own_input_wins_over_pipe() {
        let loc = location();
        let sources = InputSources { fetcher: &NoFetcher, transcript: None, location: &loc };
        let resolver = InputResolver::new("mine".into(), Some("piped".into()), FetchFormat::Visible, sources);
        assert_eq!(block_on(resolver.text()).unwrap(), "mine");
    }
}
