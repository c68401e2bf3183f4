//! Fetch, parse, deduplicate and store one feed at a time.

use futures::stream::{self, StreamExt};
use thiserror::Error;

use super::dedup::new_episodes;
use super::fetcher::{build_client, fetch_feed_with, FetchError};
use super::parser::{read_feed, ParseError};
use crate::config::{Config, FetchConfig};
use crate::storage::{Database, DatabaseError, FeedWrite};
use crate::util::{validate_feed_url, UrlValidationError};

/// Why a single feed could not be ingested.
///
/// Every variant leaves the store untouched.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid feed URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: UrlValidationError,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

/// What a successful ingestion changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    /// A feed row was created for this URL
    pub feed_created: bool,
    /// Episodes actually inserted
    pub new_episodes: usize,
}

/// Result of one URL within [`Ingestor::ingest_all`].
#[derive(Debug)]
pub struct IngestReport {
    pub url: String,
    pub result: Result<IngestOutcome, IngestError>,
}

/// Feed ingestion pipeline bound to one store and one HTTP client.
///
/// Cheap to clone; clones share the connection pool and the HTTP client.
#[derive(Clone)]
pub struct Ingestor {
    db: Database,
    client: reqwest::Client,
    fetch: FetchConfig,
    refresh_metadata: bool,
    concurrency: usize,
}

impl Ingestor {
    pub fn new(db: Database, config: &Config) -> Result<Self, FetchError> {
        let client = build_client(&config.fetch)?;
        Ok(Self::with_client(db, client, config))
    }

    /// Use an existing HTTP client instead of building one from `config`.
    pub fn with_client(db: Database, client: reqwest::Client, config: &Config) -> Self {
        Self {
            db,
            client,
            fetch: config.fetch.clone(),
            refresh_metadata: config.refresh_metadata,
            concurrency: config.import_concurrency.max(1),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Fetch `url`, store its feed row if it is new, and store every episode
    /// not seen before.
    ///
    /// The body is parsed while it downloads. Network, parse and lookup steps
    /// run before anything is written; the feed row and the new episodes are
    /// then committed in one transaction.
    ///
    /// Two concurrent ingestions of the same URL may both fetch and both try
    /// to insert; the store ignores duplicate keys, so neither fails and no
    /// episode is stored twice.
    pub async fn ingest(&self, url: &str) -> Result<IngestOutcome, IngestError> {
        let url = url.trim();
        validate_feed_url(url).map_err(|source| IngestError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        let feed = fetch_feed_with(&self.client, url, &self.fetch, |body| read_feed(body)).await??;

        let exists = self.db.feed_exists(url).await?;
        let write = match (exists, self.refresh_metadata) {
            (false, _) => FeedWrite::Insert(&feed.metadata),
            (true, true) => FeedWrite::Refresh(&feed.metadata),
            (true, false) => FeedWrite::Keep,
        };

        let known = self.db.episode_ids_for_feed(url).await?;
        let parsed_count = feed.episodes.len();
        let fresh = new_episodes(&known, feed.episodes);

        let inserted = self.db.commit_ingestion(url, write, &fresh).await?;

        tracing::info!(
            feed = %url,
            created = !exists,
            parsed = parsed_count,
            new_episodes = inserted,
            "Feed ingested"
        );

        Ok(IngestOutcome {
            feed_created: !exists,
            new_episodes: inserted,
        })
    }

    /// Ingest many URLs with bounded concurrency.
    ///
    /// Returns one report per URL, in completion order. A failing URL never
    /// stops the others.
    pub async fn ingest_all<I>(&self, urls: I) -> Vec<IngestReport>
    where
        I: IntoIterator<Item = String>,
    {
        stream::iter(urls)
            .map(|url| async move {
                let result = self.ingest(&url).await;
                if let Err(e) = &result {
                    tracing::warn!(feed = %url, error = %e, "Feed ingestion failed");
                }
                IngestReport { url, result }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss(title: &str, guids: &[&str]) -> String {
        let items: String = guids
            .iter()
            .map(|g| format!("<item><guid>{g}</guid><title>Episode {g}</title></item>"))
            .collect();
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{title}</title><link>https://example.com</link>{items}</channel></rss>"#
        )
    }

    fn test_config() -> Config {
        Config {
            fetch: FetchConfig {
                retry_base_delay_ms: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn test_ingestor(config: &Config) -> Ingestor {
        let db = Database::open(":memory:").await.unwrap();
        Ingestor::new(db, config).unwrap()
    }

    async fn serve(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_first_ingest_creates_feed() {
        let server = MockServer::start().await;
        serve(&server, "/feed", rss("Show", &["1", "2"])).await;
        let ingestor = test_ingestor(&test_config()).await;
        let url = format!("{}/feed", server.uri());

        let outcome = ingestor.ingest(&url).await.unwrap();
        assert_eq!(
            outcome,
            IngestOutcome {
                feed_created: true,
                new_episodes: 2
            }
        );

        let feed = ingestor.database().get_feed(&url).await.unwrap().unwrap();
        assert_eq!(feed.title, "Show");
        assert_eq!(feed.link, "https://example.com");
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let server = MockServer::start().await;
        serve(&server, "/feed", rss("Show", &["1", "2", "3"])).await;
        let ingestor = test_ingestor(&test_config()).await;
        let url = format!("{}/feed", server.uri());

        ingestor.ingest(&url).await.unwrap();
        let outcome = ingestor.ingest(&url).await.unwrap();
        assert!(!outcome.feed_created);
        assert_eq!(outcome.new_episodes, 0);
        assert_eq!(
            ingestor.database().episodes_for_feed(&url).await.unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn test_metadata_not_refreshed_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss("Old", &["1"])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        serve(&server, "/feed", rss("New", &["1", "2"])).await;
        let ingestor = test_ingestor(&test_config()).await;
        let url = format!("{}/feed", server.uri());

        ingestor.ingest(&url).await.unwrap();
        let outcome = ingestor.ingest(&url).await.unwrap();
        assert_eq!(outcome.new_episodes, 1);

        let feed = ingestor.database().get_feed(&url).await.unwrap().unwrap();
        assert_eq!(feed.title, "Old");
    }

    #[tokio::test]
    async fn test_metadata_refreshed_when_enabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss("Old", &["1"])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        serve(&server, "/feed", rss("New", &["1"])).await;

        let config = Config {
            refresh_metadata: true,
            ..test_config()
        };
        let ingestor = test_ingestor(&config).await;
        let url = format!("{}/feed", server.uri());

        ingestor.ingest(&url).await.unwrap();
        ingestor.ingest(&url).await.unwrap();

        let feed = ingestor.database().get_feed(&url).await.unwrap().unwrap();
        assert_eq!(feed.title, "New");
    }

    #[tokio::test]
    async fn test_http_error_writes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let ingestor = test_ingestor(&test_config()).await;
        let url = format!("{}/feed", server.uri());

        let err = ingestor.ingest(&url).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch(FetchError::HttpStatus(404))));
        assert!(!ingestor.database().feed_exists(&url).await.unwrap());
    }

    #[tokio::test]
    async fn test_parse_error_writes_nothing() {
        let server = MockServer::start().await;
        serve(&server, "/feed", "<rss><channel><item>".to_string()).await;
        let ingestor = test_ingestor(&test_config()).await;
        let url = format!("{}/feed", server.uri());

        let err = ingestor.ingest(&url).await.unwrap_err();
        assert!(matches!(err, IngestError::Parse(ParseError::Xml(_))));
        assert!(!ingestor.database().feed_exists(&url).await.unwrap());
    }

    #[tokio::test]
    async fn test_item_without_guid_writes_nothing() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/feed",
            "<rss><channel><title>T</title><item><guid>1</guid></item><item><title>x</title></item></channel></rss>"
                .to_string(),
        )
        .await;
        let ingestor = test_ingestor(&test_config()).await;
        let url = format!("{}/feed", server.uri());

        let err = ingestor.ingest(&url).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::Parse(ParseError::MissingGuid { index: 1 })
        ));
        assert!(ingestor.database().episodes_for_feed(&url).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_fetch() {
        let ingestor = test_ingestor(&test_config()).await;
        let err = ingestor.ingest("ftp://example.com/feed").await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_ingest_all_isolates_failures() {
        let server = MockServer::start().await;
        serve(&server, "/a", rss("A", &["1"])).await;
        serve(&server, "/b", rss("B", &["1", "2"])).await;
        Mock::given(path("/broken"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let ingestor = test_ingestor(&test_config()).await;
        let urls = vec![
            format!("{}/a", server.uri()),
            format!("{}/broken", server.uri()),
            format!("{}/b", server.uri()),
        ];

        let reports = ingestor.ingest_all(urls).await;
        assert_eq!(reports.len(), 3);

        let failed: Vec<&str> = reports
            .iter()
            .filter(|r| r.result.is_err())
            .map(|r| r.url.as_str())
            .collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].ends_with("/broken"));

        let feeds = ingestor.database().feeds_with_unread_counts().await.unwrap();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].unread_count, 1);
        assert_eq!(feeds[1].unread_count, 2);
    }

    #[tokio::test]
    async fn test_ingest_all_isolates_parse_and_date_failures() {
        let server = MockServer::start().await;
        serve(&server, "/a", rss("A", &["1", "2"])).await;
        serve(&server, "/b", rss("B", &["1"])).await;
        serve(&server, "/malformed", "<rss><channel><title>M</title><item><guid>1</guid></channel></rss>".to_string()).await;
        serve(
            &server,
            "/bad-date",
            "<rss><channel><title>D</title><item><guid>1</guid><pubDate>the other day</pubDate></item></channel></rss>"
                .to_string(),
        )
        .await;

        let ingestor = test_ingestor(&test_config()).await;
        let url = |route: &str| format!("{}{}", server.uri(), route);
        let reports = ingestor
            .ingest_all(vec![url("/a"), url("/malformed"), url("/b"), url("/bad-date")])
            .await;
        assert_eq!(reports.len(), 4);

        let report = |route: &str| {
            reports
                .iter()
                .find(|r| r.url == url(route))
                .map(|r| &r.result)
                .unwrap()
        };
        assert!(matches!(
            report("/malformed"),
            Err(IngestError::Parse(ParseError::Xml(_)))
        ));
        match report("/bad-date") {
            Err(IngestError::Parse(ParseError::DateFormat { value })) => {
                assert_eq!(value, "the other day")
            }
            other => panic!("Expected DateFormat error, got {:?}", other),
        }
        assert_eq!(report("/a").as_ref().unwrap().new_episodes, 2);
        assert_eq!(report("/b").as_ref().unwrap().new_episodes, 1);

        let db = ingestor.database();
        assert!(!db.feed_exists(&url("/malformed")).await.unwrap());
        assert!(!db.feed_exists(&url("/bad-date")).await.unwrap());
        assert!(db.episodes_for_feed(&url("/bad-date")).await.unwrap().is_empty());

        let titles: Vec<String> = db
            .feeds_with_unread_counts()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.feed.title)
            .collect();
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_oversized_feed_writes_nothing() {
        let server = MockServer::start().await;
        let guids: Vec<String> = (0..500).map(|i| i.to_string()).collect();
        let guid_refs: Vec<&str> = guids.iter().map(String::as_str).collect();
        serve(&server, "/feed", rss("Huge", &guid_refs)).await;

        let mut config = test_config();
        config.fetch.max_feed_size = 4096;
        let ingestor = test_ingestor(&config).await;
        let url = format!("{}/feed", server.uri());

        let err = ingestor.ingest(&url).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch(FetchError::ResponseTooLarge)));
        assert!(!ingestor.database().feed_exists(&url).await.unwrap());
    }

    #[tokio::test]
    async fn test_large_feed_is_parsed_while_streaming() {
        let server = MockServer::start().await;
        let guids: Vec<String> = (0..5_000).map(|i| format!("ep-{i}")).collect();
        let guid_refs: Vec<&str> = guids.iter().map(String::as_str).collect();
        serve(&server, "/feed", rss("Long Running", &guid_refs)).await;

        let ingestor = test_ingestor(&test_config()).await;
        let url = format!("{}/feed", server.uri());

        let outcome = ingestor.ingest(&url).await.unwrap();
        assert_eq!(outcome.new_episodes, 5_000);
        let feed = ingestor.database().get_feed(&url).await.unwrap().unwrap();
        assert_eq!(feed.title, "Long Running");
    }

    #[tokio::test]
    async fn test_concurrent_same_url_ingestion_stores_once() {
        let server = MockServer::start().await;
        serve(&server, "/feed", rss("Show", &["1", "2"])).await;
        let ingestor = test_ingestor(&test_config()).await;
        let url = format!("{}/feed", server.uri());

        let (a, b) = tokio::join!(ingestor.ingest(&url), ingestor.ingest(&url));
        let total = a.unwrap().new_episodes + b.unwrap().new_episodes;
        assert_eq!(total, 2);
        assert_eq!(
            ingestor.database().episodes_for_feed(&url).await.unwrap().len(),
            2
        );
    }
}
