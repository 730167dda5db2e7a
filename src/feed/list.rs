//! Feed-list tokenizer.
//!
//! The feed list is a line-oriented text file, one `TAG URL` entry per line:
//!
//! ```text
//! # comments run to end of line
//! tech        https://a.example/rss.xml
//! "my tag"    https://b.example/atom.xml   # quoted tag keeps its space
//! foo\#bar    https://c.example/feed       # escaped '#' is literal
//! ```
//!
//! Parsing is line-tolerant: malformed lines are dropped with a warning and
//! never abort the load.

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;

use crate::util::validate_url;

/// A feed subscription taken from the feed list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSpec {
    /// User-chosen name; also the channel file name.
    pub tag: String,
    /// HTTP(S) endpoint of the RSS/Atom document.
    pub url: String,
}

/// Why a feed-list line (or part of one) was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningKind {
    /// A tag was accumulated but a comment started before any url.
    TagBeforeComment(String),
    /// A tag reached end of line (or a comment) with no url.
    MissingUrl(String),
    /// Text after a complete `TAG URL` pair was ignored.
    TrailingText(String),
    /// The url is not an http/https URL.
    InvalidUrl { tag: String, url: String },
    /// The tag cannot be used as a file name inside the output directory.
    InvalidTag(String),
    /// The tag was already used by an earlier entry.
    DuplicateTag(String),
    /// One of the tag's channel files is also a channel of an earlier
    /// entry, e.g. `tech desc` next to `tech`.
    ChannelClash(String),
}

/// A warning tied to the 1-based line where the entry started, when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedListWarning {
    pub line: Option<usize>,
    pub kind: WarningKind,
}

/// Result of tokenizing a feed list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedList {
    /// Entries in input order.
    pub feeds: Vec<FeedSpec>,
    /// One record per dropped entry or ignored fragment.
    pub warnings: Vec<FeedListWarning>,
}

/// Errors that prevent the feed list from being read at all.
#[derive(Debug, Error)]
pub enum FeedListError {
    #[error("Failed to read feed list {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Tag,
    Url,
    Trailing,
}

/// Per-line tokenizer state. Reset at every end of line.
struct LineState {
    side: Side,
    tag: String,
    url: String,
    trailing: String,
    quote: Option<char>,
    escaped: bool,
    in_comment: bool,
    start_line: usize,
}

impl LineState {
    fn new(start_line: usize) -> Self {
        Self {
            side: Side::Tag,
            tag: String::new(),
            url: String::new(),
            trailing: String::new(),
            quote: None,
            escaped: false,
            in_comment: false,
            start_line,
        }
    }

    fn push(&mut self, c: char) {
        match self.side {
            Side::Tag => self.tag.push(c),
            Side::Url => self.url.push(c),
            Side::Trailing => self.trailing.push(c),
        }
    }

    /// Commits a complete pair, or records why the pending entry is dropped.
    fn finish(&mut self, out: &mut FeedList) {
        let line = Some(self.start_line);
        if !self.tag.is_empty() && !self.url.is_empty() {
            out.feeds.push(FeedSpec {
                tag: std::mem::take(&mut self.tag),
                url: std::mem::take(&mut self.url),
            });
        } else if !self.tag.is_empty() {
            out.warnings.push(FeedListWarning {
                line,
                kind: WarningKind::MissingUrl(std::mem::take(&mut self.tag)),
            });
        }
        if !self.trailing.is_empty() {
            out.warnings.push(FeedListWarning {
                line,
                kind: WarningKind::TrailingText(self.trailing.trim_end().to_string()),
            });
        }
        self.tag.clear();
        self.url.clear();
        self.trailing.clear();
    }
}

/// Tokenizes feed-list text into `TAG URL` pairs.
///
/// - `\` makes the next character literal; before a newline it joins the
///   next line into the same entry.
/// - `"` and `'` toggle quoting; the quote characters are not copied.
/// - An unquoted `#` starts a comment. A bare tag before it is discarded;
///   a complete pair before it is committed.
/// - The first unquoted whitespace run after the tag switches to the url.
/// - A newline always ends the entry and resets quote/comment/escape state.
///
/// Tags are not de-duplicated here; see [`validate`].
pub fn parse_feed_list(text: &str) -> FeedList {
    let mut out = FeedList::default();
    let mut line_no = 1;
    let mut state = LineState::new(line_no);

    for c in text.chars() {
        if c == '\n' {
            line_no += 1;
            if state.escaped {
                state.escaped = false;
                continue;
            }
            state.finish(&mut out);
            state = LineState::new(line_no);
            continue;
        }

        if state.in_comment {
            continue;
        }

        if state.escaped {
            state.escaped = false;
            state.push(c);
            continue;
        }

        if c == '\\' {
            state.escaped = true;
            continue;
        }

        if let Some(q) = state.quote {
            if c == q {
                state.quote = None;
            } else {
                state.push(c);
            }
            continue;
        }

        match c {
            '"' | '\'' => state.quote = Some(c),
            '#' => {
                if state.side == Side::Tag && !state.tag.is_empty() {
                    out.warnings.push(FeedListWarning {
                        line: Some(state.start_line),
                        kind: WarningKind::TagBeforeComment(std::mem::take(&mut state.tag)),
                    });
                }
                state.finish(&mut out);
                state.in_comment = true;
            }
            c if c.is_whitespace() => match state.side {
                Side::Tag if !state.tag.is_empty() => state.side = Side::Url,
                Side::Url if !state.url.is_empty() => state.side = Side::Trailing,
                Side::Trailing if !state.trailing.is_empty() => state.trailing.push(c),
                _ => {}
            },
            c => state.push(c),
        }
    }

    state.finish(&mut out);

    for warning in &out.warnings {
        tracing::warn!(line = ?warning.line, warning = ?warning.kind, "Dropped feed-list entry");
    }

    out
}

/// Drops entries the daemon cannot serve: non-http(s) urls, tags that would
/// escape the output directory, and tags whose channel files collide with
/// an earlier entry's (first one wins).
pub fn validate(list: FeedList) -> FeedList {
    let FeedList { feeds, mut warnings } = list;
    let mut seen = HashSet::new();
    let mut channels: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(feeds.len());

    for feed in feeds {
        let kind = if !is_safe_tag(&feed.tag) {
            Some(WarningKind::InvalidTag(feed.tag.clone()))
        } else if validate_url(&feed.url).is_err() {
            Some(WarningKind::InvalidUrl {
                tag: feed.tag.clone(),
                url: feed.url.clone(),
            })
        } else if seen.contains(&feed.tag) {
            Some(WarningKind::DuplicateTag(feed.tag.clone()))
        } else if channel_names(&feed.tag).iter().any(|n| channels.contains(n)) {
            Some(WarningKind::ChannelClash(feed.tag.clone()))
        } else {
            seen.insert(feed.tag.clone());
            channels.extend(channel_names(&feed.tag));
            None
        };

        match kind {
            Some(kind) => {
                tracing::warn!(tag = %feed.tag, url = %feed.url, warning = ?kind, "Skipping feed");
                warnings.push(FeedListWarning { line: None, kind });
            }
            None => kept.push(feed),
        }
    }

    FeedList {
        feeds: kept,
        warnings,
    }
}

/// File names of the output and description channels for `tag`.
fn channel_names(tag: &str) -> [String; 2] {
    [tag.to_string(), format!("{tag} desc")]
}

fn is_safe_tag(tag: &str) -> bool {
    !tag.is_empty() && tag != "." && tag != ".." && !tag.contains(['/', '\0'])
}

/// Reads, tokenizes and validates the feed list at `path`.
///
/// Synchronous: the list is read once at startup, before the process
/// detaches and the async runtime exists.
pub fn load(path: &Path) -> Result<FeedList, FeedListError> {
    let text = std::fs::read_to_string(path).map_err(|source| FeedListError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(validate(parse_feed_list(&text)))
}
