use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::storage::Feed;
use crate::util::validate_feed_url;

/// Maximum allowed nesting depth for OPML outline elements.
const MAX_OPML_DEPTH: usize = 50;

/// Title of the grouping outline that holds every exported feed.
const EXPORT_GROUP: &str = "RSS Feeds";

const EXPORT_TITLE: &str = "My RSS Subscriptions";

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// An `outline type="rss"` has no `xmlUrl` attribute.
    #[error("Malformed OPML: rss outline {outline:?} has no xmlUrl")]
    MissingXmlUrl { outline: String },

    /// File I/O error.
    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// A feed subscription read from or written to an OPML file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlFeed {
    /// Display title. Sourced from `title`, falling back to `text`, then to
    /// the feed URL itself.
    pub title: String,
    /// URL of the RSS document.
    pub xml_url: String,
    /// URL of the feed's website, if provided via `htmlUrl` attribute.
    pub html_url: Option<String>,
}

impl From<&Feed> for OpmlFeed {
    fn from(feed: &Feed) -> Self {
        Self {
            title: feed.title.clone(),
            xml_url: feed.id.clone(),
            html_url: (!feed.link.is_empty()).then(|| feed.link.clone()),
        }
    }
}

/// Parses an OPML file from disk and extracts feed subscriptions.
///
/// See [`parse_opml_content`] for the selection rules.
pub async fn parse(path: &str) -> Result<Vec<OpmlFeed>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml_content(&content)
}

/// Parses OPML text and extracts feed subscriptions.
///
/// Every `<outline type="rss">` at any nesting depth is a subscription and
/// must carry an `xmlUrl`. Other outlines (folders, links) are traversed
/// but not returned. Subscriptions whose URL is not `http`/`https` are
/// skipped with a warning.
///
/// # Security
///
/// quick-xml (0.37) never reads `<!ENTITY>` declarations; only the five
/// predefined XML entities are resolved, so external entity payloads fail
/// with an unrecognized-entity error instead of expanding.
pub fn parse_opml_content(content: &str) -> Result<Vec<OpmlFeed>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Vec::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }

                if let Some(feed) = parse_outline_attributes(&e, &reader)? {
                    feeds.push(feed);
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                // Self-closing outline doesn't affect depth
                if let Some(feed) = parse_outline_attributes(&e, &reader)? {
                    feeds.push(feed);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    tracing::debug!(count = feeds.len(), "Parsed OPML subscriptions");
    Ok(feeds)
}

/// Extracts a subscription from an outline element.
///
/// Returns `None` for outlines that are not `type="rss"` and for
/// subscriptions with an unusable URL.
fn parse_outline_attributes(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<Option<OpmlFeed>, OpmlError> {
    let mut is_rss = false;
    let mut xml_url = None;
    let mut html_url = None;
    let mut title = None;
    let mut text = None;

    let decoder = reader.decoder();
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = || -> Result<String, OpmlError> {
            attr.decode_and_unescape_value(decoder)
                .map(|v| v.into_owned())
                .map_err(|e| OpmlError::XmlParse(e.to_string()))
        };
        match attr.key.as_ref() {
            b"type" => is_rss = value()?.eq_ignore_ascii_case("rss"),
            b"xmlUrl" => xml_url = Some(value()?),
            b"htmlUrl" => html_url = Some(value()?).filter(|u| !u.is_empty()),
            b"title" => title = Some(value()?),
            b"text" => text = Some(value()?),
            _ => {}
        }
    }

    if !is_rss {
        return Ok(None);
    }

    let title = title.or(text).filter(|t| !t.is_empty());
    let Some(url) = xml_url.filter(|u| !u.trim().is_empty()) else {
        return Err(OpmlError::MissingXmlUrl {
            outline: title.unwrap_or_default(),
        });
    };

    if let Err(e) = validate_feed_url(&url) {
        tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
        return Ok(None);
    }

    Ok(Some(OpmlFeed {
        title: title.unwrap_or_else(|| url.clone()),
        xml_url: url,
        html_url,
    }))
}

/// Exports feed subscriptions as an OPML 2.0 XML string.
///
/// The `head` carries a title and the creation time; the `body` holds one
/// "RSS Feeds" outline whose children are the subscriptions, each with
/// `type="rss"`, `text`, `title`, `xmlUrl` and, when known, `htmlUrl`.
pub fn export_opml(feeds: &[OpmlFeed]) -> Result<String> {
    write_opml(feeds, Utc::now())
}

fn write_opml(feeds: &[OpmlFeed], created: DateTime<Utc>) -> Result<String> {
    use quick_xml::events::{BytesDecl, BytesEnd, BytesText};
    use quick_xml::Writer;
    use std::io::Cursor;

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(opml))
        .context("Failed to write opml element")?;

    // <head>
    let date_created = created.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    writer
        .write_event(Event::Start(BytesStart::new("head")))
        .context("Failed to write head element")?;
    for (name, value) in [("title", EXPORT_TITLE), ("dateCreated", date_created.as_str())] {
        writer
            .write_event(Event::Start(BytesStart::new(name)))
            .and_then(|_| writer.write_event(Event::Text(BytesText::new(value))))
            .and_then(|_| writer.write_event(Event::End(BytesEnd::new(name))))
            .with_context(|| format!("Failed to write {} element", name))?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("head")))
        .context("Failed to write head end")?;

    // <body><outline text="RSS Feeds">
    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .context("Failed to write body element")?;
    let mut group = BytesStart::new("outline");
    group.push_attribute(("text", EXPORT_GROUP));
    group.push_attribute(("title", EXPORT_GROUP));
    writer
        .write_event(Event::Start(group))
        .context("Failed to write group outline")?;

    for feed in feeds {
        let mut outline = BytesStart::new("outline");
        outline.push_attribute(("type", "rss"));
        outline.push_attribute(("text", feed.title.as_str()));
        outline.push_attribute(("title", feed.title.as_str()));
        outline.push_attribute(("xmlUrl", feed.xml_url.as_str()));
        if let Some(ref html_url) = feed.html_url {
            outline.push_attribute(("htmlUrl", html_url.as_str()));
        }
        writer
            .write_event(Event::Empty(outline))
            .context("Failed to write outline element")?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("outline")))
        .context("Failed to write group outline end")?;
    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .context("Failed to write body end")?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .context("Failed to write opml end")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).context("Generated OPML contains invalid UTF-8")
}

/// Exports feed subscriptions to an OPML file atomically.
///
/// Writes to a temporary file in the same directory, syncs it, then renames
/// it over `path`. The destination is never left partially written.
pub fn export_to_file(feeds: &[OpmlFeed], path: &std::path::Path) -> Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let content = export_opml(feeds)?;

    // Unpredictable temp name; create_new refuses to follow an existing file
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .with_context(|| {
            format!(
                "Failed to create temporary file '{}': check directory permissions",
                temp_path.display()
            )
        })?;

    let written = std::io::Write::write_all(&mut file, content.as_bytes())
        .with_context(|| format!("Failed to write OPML to '{}'", temp_path.display()))
        .and_then(|_| {
            file.sync_all()
                .with_context(|| format!("Failed to sync '{}' to disk", temp_path.display()))
        });
    drop(file);

    let renamed = written.and_then(|_| {
        std::fs::rename(&temp_path, path).with_context(|| {
            format!(
                "Failed to rename '{}' to '{}'",
                temp_path.display(),
                path.display()
            )
        })
    });

    if renamed.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    renamed?;

    tracing::info!(path = %path.display(), feeds = feeds.len(), "Exported OPML");
    Ok(())
}
