use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::io::BufRead;
use std::str::FromStr;
use thiserror::Error;

use super::cursor::{Node, XmlCursor};
use crate::storage::{FeedMetadata, ParsedEpisode};

/// Errors that abort parsing of a single feed document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The byte stream is not well-formed XML
    #[error("Feed XML could not be parsed: {0}")]
    Xml(String),
    /// A `<pubDate>` value is not a recognizable date
    #[error("Unrecognized publish date: {value:?}")]
    DateFormat { value: String },
    /// An `<item>` has no `<guid>`, so it cannot be stored
    #[error("Malformed feed: item {index} has no guid")]
    MissingGuid { index: usize },
}

/// A fully drained feed document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub metadata: FeedMetadata,
    pub episodes: Vec<ParsedEpisode>,
}

// ============================================================================
// Decision Tables
// ============================================================================

/// Channel fields recognized at depth 2 (`rss/channel/*`)
#[derive(Debug, Clone, Copy)]
enum ChannelField {
    Title,
    Description,
    Link,
    Image,
}

const CHANNEL_FIELDS: &[(&str, ChannelField)] = &[
    ("title", ChannelField::Title),
    ("description", ChannelField::Description),
    ("link", ChannelField::Link),
    ("image", ChannelField::Image),
];

/// Item fields recognized anywhere inside `<item>`
#[derive(Debug, Clone, Copy)]
enum ItemField {
    Guid,
    Title,
    Link,
    PubDate,
    Description,
    Content,
}

const ITEM_FIELDS: &[(&str, ItemField)] = &[
    ("guid", ItemField::Guid),
    ("title", ItemField::Title),
    ("link", ItemField::Link),
    ("pubDate", ItemField::PubDate),
    ("description", ItemField::Description),
    ("content:encoded", ItemField::Content),
];

/// Depth of `rss/channel/<field>`
const CHANNEL_FIELD_DEPTH: usize = 2;

fn lookup<T: Copy>(table: &[(&str, T)], name: &str) -> Option<T> {
    table
        .iter()
        .find(|(tag, _)| *tag == name)
        .map(|(_, field)| *field)
}

// ============================================================================
// Streaming Reader
// ============================================================================

/// Streaming RSS reader.
///
/// Iterating yields one [`ParsedEpisode`] per `<item>` as soon as its end tag
/// has been read. Channel metadata is collected along the way and is complete
/// once iteration finishes (see [`FeedReader::finish`]).
///
/// The first error ends iteration; the document is not read any further.
pub struct FeedReader<R> {
    cursor: XmlCursor<R>,
    metadata: FeedMetadata,
    items_seen: usize,
    done: bool,
}

impl<R: BufRead> FeedReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            cursor: XmlCursor::new(source),
            metadata: FeedMetadata::default(),
            items_seen: 0,
            done: false,
        }
    }

    /// Channel metadata read so far
    pub fn metadata(&self) -> &FeedMetadata {
        &self.metadata
    }

    /// Drain the remaining items and return everything that was read.
    pub fn finish(mut self) -> Result<ParsedFeed, ParseError> {
        let mut episodes = Vec::new();
        while let Some(episode) = self.next_episode()? {
            episodes.push(episode);
        }
        Ok(ParsedFeed {
            metadata: self.metadata,
            episodes,
        })
    }

    fn next_episode(&mut self) -> Result<Option<ParsedEpisode>, ParseError> {
        if self.done {
            return Ok(None);
        }

        while let Some(node) = self.cursor.next_node()? {
            if self.try_read_metadata(&node)? {
                continue;
            }
            if node.is_element_start() && node.name == "item" {
                return self.read_item(&node).map(Some);
            }
        }

        self.done = true;
        Ok(None)
    }

    /// Consume `node` as channel metadata if it is one. Returns whether it was.
    fn try_read_metadata(&mut self, node: &Node) -> Result<bool, ParseError> {
        if node.depth != CHANNEL_FIELD_DEPTH || !node.is_element_start() {
            return Ok(false);
        }
        let Some(field) = lookup(CHANNEL_FIELDS, &node.name) else {
            return Ok(false);
        };

        match field {
            ChannelField::Title => self.metadata.title = self.cursor.read_text(node)?,
            ChannelField::Link => self.metadata.link = self.cursor.read_text(node)?,
            ChannelField::Description => {
                self.metadata.description = non_empty(self.cursor.read_text(node)?)
            }
            ChannelField::Image => {
                let mut scope = self.cursor.subtree(node);
                while let Some(child) = scope.next_node()? {
                    if child.is_element_start() && child.name == "url" {
                        self.metadata.icon_url = non_empty(scope.read_text(&child)?);
                        scope.skip_rest()?;
                    }
                }
            }
        }
        Ok(true)
    }

    fn read_item(&mut self, item: &Node) -> Result<ParsedEpisode, ParseError> {
        let index = self.items_seen;
        self.items_seen += 1;

        let mut episode = ParsedEpisode::default();
        let mut scope = self.cursor.subtree(item);

        while let Some(node) = scope.next_node()? {
            if !node.is_element_start() {
                continue;
            }
            let Some(field) = lookup(ITEM_FIELDS, &node.name) else {
                continue;
            };

            let text = scope.read_text(&node)?;
            match field {
                ItemField::Guid => episode.guid = text.trim().to_string(),
                ItemField::Title => episode.title = text,
                ItemField::Link => episode.link = text,
                ItemField::PubDate => episode.published = parse_pub_date(&text)?,
                ItemField::Description => episode.description = non_empty(text),
                ItemField::Content => episode.content = non_empty(text),
            }
        }

        if episode.guid.is_empty() {
            return Err(ParseError::MissingGuid { index });
        }
        Ok(episode)
    }
}

impl<R: BufRead> Iterator for FeedReader<R> {
    type Item = Result<ParsedEpisode, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_episode() {
            Ok(Some(episode)) => Some(Ok(episode)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read a whole feed document from `source`, pulling input only as needed.
pub fn read_feed<R: BufRead>(source: R) -> Result<ParsedFeed, ParseError> {
    let feed = FeedReader::new(source).finish()?;
    tracing::debug!(
        title = %feed.metadata.title,
        episodes = feed.episodes.len(),
        "Parsed feed"
    );
    Ok(feed)
}

/// Parse a complete feed document held in memory.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    read_feed(bytes)
}

/// Timestamps without an offset, as some generators write them
const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Date component of a feed timestamp, in the timestamp's own offset.
///
/// Accepts RFC 2822 (the RSS format), RFC 3339, bare `YYYY-MM-DD`, and the
/// common deviations seen in the wild: offset-less `YYYY-MM-DD HH:MM:SS`
/// (space or `T`), a `UTC` zone name, and full weekday names.
/// Blank input means "no date".
pub fn parse_pub_date(raw: &str) -> Result<Option<NaiveDate>, ParseError> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Ok(Some(dt.date_naive()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(dt.date_naive()));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(Some(date));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Some(dt.date()));
        }
    }
    if let Some(normalized) = normalize_rfc2822(value) {
        if let Ok(dt) = DateTime::parse_from_rfc2822(&normalized) {
            return Ok(Some(dt.date_naive()));
        }
    }

    Err(ParseError::DateFormat {
        value: value.to_string(),
    })
}

/// Rewrite the RFC 2822 near-misses chrono rejects: `Monday,` becomes
/// `Mon,` and a trailing `UTC` becomes `GMT`. `None` if nothing changed.
fn normalize_rfc2822(value: &str) -> Option<String> {
    let mut normalized = value.to_string();

    if let Some((weekday, rest)) = value.split_once(',') {
        let is_long_weekday = weekday.len() > 3
            && weekday.chars().all(|c| c.is_ascii_alphabetic())
            && chrono::Weekday::from_str(weekday).is_ok();
        if is_long_weekday {
            normalized = format!("{},{}", &weekday[..3], rest);
        }
    }

    if let Some(stripped) = normalized.strip_suffix("UTC") {
        normalized = format!("{}GMT", stripped);
    }

    (normalized != value).then_some(normalized)
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
