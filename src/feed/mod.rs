//! Feed acquisition: download, parse, deduplicate and store RSS feeds.
//!
//! - [`cursor`] - Depth-aware pull cursor over `quick-xml` events
//! - [`parser`] - Streaming RSS reader built on the cursor
//! - [`dedup`] - Filters out episodes already in the store
//! - [`fetcher`] - HTTP download with retry, backoff and size limits,
//!   streamed into a blocking reader
//! - [`ingest`] - The fetch → parse → dedup → commit pipeline
//! - [`opml`] - OPML subscription list import and export
//!
//! # Example
//!
//! ```no_run
//! use tumbleweed::config::Config;
//! use tumbleweed::feed::Ingestor;
//! use tumbleweed::storage::Database;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let db = Database::open("tumbleweed.db").await?;
//! let ingestor = Ingestor::new(db, &Config::default())?;
//! let outcome = ingestor.ingest("https://example.com/podcast.xml").await?;
//! println!("{} new episodes", outcome.new_episodes);
//! # Ok(())
//! # }
//! ```

pub mod cursor;
pub mod dedup;
pub mod fetcher;
pub mod ingest;
pub mod opml;
pub mod parser;

pub use dedup::new_episodes;
pub use fetcher::{build_client, fetch_feed_with, BodyReader, FetchError};
pub use ingest::{IngestError, IngestOutcome, IngestReport, Ingestor};
pub use opml::{export_opml, export_to_file, parse, parse_opml_content, OpmlError, OpmlFeed};
pub use parser::{parse_feed, parse_pub_date, read_feed, FeedReader, ParseError, ParsedFeed};
