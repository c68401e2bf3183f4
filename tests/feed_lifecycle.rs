//! Integration tests for the feed lifecycle: subscribe, refresh, read, remove,
//! and OPML round trips.
//!
//! Each test creates its own in-memory SQLite database and mock HTTP server.
//! Feeds are driven through `AppState`, the same surface a front end uses.

use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use tumbleweed::app::AppState;
use tumbleweed::config::{Config, FetchConfig};
use tumbleweed::feed::{self, IngestError, ParseError};
use tumbleweed::storage::Database;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rss(title: &str, items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, title)| {
            format!(
                "<item><guid>{guid}</guid><title>{title}</title><pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>{title}</title>
    <link>https://show.example.com</link>
    <description>A show</description>
    {items}
  </channel>
</rss>"#
    )
}

async fn test_state() -> AppState {
    let db = Database::open(":memory:").await.unwrap();
    let config = Config {
        fetch: FetchConfig {
            retry_base_delay_ms: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    AppState::new(db, &config).unwrap()
}

async fn serve_once(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

// ============================================================================
// Subscribe and Refresh
// ============================================================================

#[tokio::test]
async fn test_add_feed_appears_with_unread_count() {
    let server = MockServer::start().await;
    serve_once(&server, "/feed", rss("Show", &[("1", "One"), ("2", "Two")])).await;
    let mut state = test_state().await;
    let url = format!("{}/feed", server.uri());

    let outcome = state.add_feed(&url).await.unwrap();
    assert!(outcome.feed_created);
    assert_eq!(outcome.new_episodes, 2);

    assert_eq!(state.feeds().len(), 1);
    assert_eq!(state.feeds()[0].feed.id, url);
    assert_eq!(state.feeds()[0].feed.title, "Show");
    assert_eq!(state.feeds()[0].unread_count, 2);
}

#[tokio::test]
async fn test_reingest_unchanged_feed_adds_nothing() {
    let server = MockServer::start().await;
    let body = rss("Show", &[("1", "One"), ("2", "Two")]);
    serve_once(&server, "/feed", body.clone()).await;
    serve_once(&server, "/feed", body).await;
    let mut state = test_state().await;
    let url = format!("{}/feed", server.uri());

    state.add_feed(&url).await.unwrap();
    let outcome = state.add_feed(&url).await.unwrap();

    assert!(!outcome.feed_created);
    assert_eq!(outcome.new_episodes, 0);
    assert_eq!(state.feeds()[0].unread_count, 2);
}

#[tokio::test]
async fn test_one_new_item_adds_one_episode_and_keeps_title() {
    let server = MockServer::start().await;
    serve_once(&server, "/feed", rss("Original", &[("1", "One")])).await;
    serve_once(
        &server,
        "/feed",
        rss("Renamed", &[("2", "Two"), ("1", "One")]),
    )
    .await;
    let mut state = test_state().await;
    let url = format!("{}/feed", server.uri());

    state.add_feed(&url).await.unwrap();
    let outcome = state.add_feed(&url).await.unwrap();

    assert_eq!(outcome.new_episodes, 1);
    assert_eq!(state.feeds()[0].feed.title, "Original");

    let ids: BTreeSet<String> = state
        .database()
        .episodes_for_feed(&url)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(
        ids,
        ["1", "2"].iter().map(|s| s.to_string()).collect::<BTreeSet<_>>()
    );
}

#[tokio::test]
async fn test_failed_ingest_leaves_store_untouched() {
    let server = MockServer::start().await;
    serve_once(
        &server,
        "/feed",
        "<rss><channel><title>T</title><item><guid>1</guid><pubDate>whenever</pubDate></item></channel></rss>"
            .to_string(),
    )
    .await;
    let mut state = test_state().await;
    let url = format!("{}/feed", server.uri());

    let err = state.add_feed(&url).await.unwrap_err();
    assert!(matches!(
        err,
        tumbleweed::app::StateError::Ingest(IngestError::Parse(ParseError::DateFormat { .. }))
    ));
    assert!(state.feeds().is_empty());
    assert!(!state.database().feed_exists(&url).await.unwrap());
    assert!(!state.is_loading());
}

// ============================================================================
// Read State and Removal
// ============================================================================

#[tokio::test]
async fn test_remove_feed_keeps_only_starred_episodes() {
    let server = MockServer::start().await;
    serve_once(
        &server,
        "/feed",
        rss("Show", &[("1", "One"), ("2", "Two"), ("3", "Three"), ("4", "Four")]),
    )
    .await;
    let mut state = test_state().await;
    let url = format!("{}/feed", server.uri());
    state.add_feed(&url).await.unwrap();

    let feed = state.feeds()[0].feed.clone();
    state.select_feed(Some(feed)).await.unwrap();
    for index in [0, 2] {
        let episode = state.episodes()[index].clone();
        state.select_episode(Some(episode)).await.unwrap();
        assert!(state.star_current_episode().await.unwrap());
    }

    let removal = state.remove_feed(&url).await.unwrap();
    assert_eq!(removal.feeds_deleted, 1);
    assert_eq!(removal.episodes_deleted, 2);

    assert!(state.feeds().is_empty());
    assert!(!state.database().feed_exists(&url).await.unwrap());
    let kept = state.database().episodes_for_feed(&url).await.unwrap();
    assert_eq!(kept.len(), 2);
    assert!(kept.iter().all(|e| e.starred));
}

#[tokio::test]
async fn test_reading_updates_unread_counts() {
    let server = MockServer::start().await;
    serve_once(&server, "/feed", rss("Show", &[("1", "One"), ("2", "Two")])).await;
    let mut state = test_state().await;
    let url = format!("{}/feed", server.uri());
    state.add_feed(&url).await.unwrap();

    let feed = state.feeds()[0].feed.clone();
    state.select_feed(Some(feed)).await.unwrap();
    let episode = state.episodes()[0].clone();
    state.select_episode(Some(episode)).await.unwrap();
    assert_eq!(state.feeds()[0].unread_count, 1);

    // Counts computed in memory agree with the store
    state.load_feeds().await.unwrap();
    assert_eq!(state.feeds()[0].unread_count, 1);

    state.mark_all_as_read(Some(&url)).await.unwrap();
    assert_eq!(state.feeds()[0].unread_count, 0);
}

// ============================================================================
// OPML
// ============================================================================

#[tokio::test]
async fn test_opml_export_then_import_reproduces_urls() {
    let server = MockServer::start().await;
    for route in ["/a", "/b", "/c"] {
        // Served once for the initial subscription and once for the reimport
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&format!("Show {}", route), &[("1", "One")])),
            )
            .mount(&server)
            .await;
    }

    let mut source = test_state().await;
    let mut urls = BTreeSet::new();
    for route in ["/a", "/b", "/c"] {
        let url = format!("{}{}", server.uri(), route);
        source.add_feed(&url).await.unwrap();
        urls.insert(url);
    }

    let exported = source.export_opml().unwrap();
    let listed: BTreeSet<String> = feed::parse_opml_content(&exported)
        .unwrap()
        .into_iter()
        .map(|f| f.xml_url)
        .collect();
    assert_eq!(listed, urls);

    let mut target = test_state().await;
    let reports = target.import_opml(&exported).await.unwrap();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.result.is_ok()));

    let imported: BTreeSet<String> = target.feeds().iter().map(|s| s.feed.id.clone()).collect();
    assert_eq!(imported, urls);
}

#[tokio::test]
async fn test_import_isolates_broken_feeds() {
    let server = MockServer::start().await;
    serve_once(&server, "/good", rss("Good", &[("1", "One")])).await;
    Mock::given(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let opml = format!(
        r#"<?xml version="1.0"?>
<opml version="2.0"><body>
  <outline text="Podcasts">
    <outline type="rss" text="Good" xmlUrl="{0}/good"/>
    <outline type="rss" text="Gone" xmlUrl="{0}/gone"/>
  </outline>
</body></opml>"#,
        server.uri()
    );

    let mut state = test_state().await;
    let reports = state.import_opml(&opml).await.unwrap();

    let failed: Vec<&str> = reports
        .iter()
        .filter(|r| r.result.is_err())
        .map(|r| r.url.as_str())
        .collect();
    assert_eq!(failed, vec![format!("{}/gone", server.uri()).as_str()]);
    assert_eq!(state.feeds().len(), 1);
    assert_eq!(state.feeds()[0].feed.title, "Good");
}

#[tokio::test]
async fn test_import_isolates_unparseable_feeds() {
    let server = MockServer::start().await;
    serve_once(&server, "/good", rss("Good", &[("1", "One"), ("2", "Two")])).await;
    serve_once(&server, "/truncated", "<rss><channel><title>Cut".to_string()).await;
    serve_once(
        &server,
        "/undated",
        "<rss><channel><title>Undated</title><item><guid>1</guid><pubDate>yesterday-ish</pubDate></item></channel></rss>"
            .to_string(),
    )
    .await;

    let opml = format!(
        r#"<?xml version="1.0"?>
<opml version="2.0"><body>
  <outline type="rss" text="Good" xmlUrl="{0}/good"/>
  <outline type="rss" text="Truncated" xmlUrl="{0}/truncated"/>
  <outline type="rss" text="Undated" xmlUrl="{0}/undated"/>
</body></opml>"#,
        server.uri()
    );

    let mut state = test_state().await;
    let reports = state.import_opml(&opml).await.unwrap();
    assert_eq!(reports.len(), 3);

    for report in &reports {
        let route = report.url.trim_start_matches(&server.uri());
        match (route, &report.result) {
            ("/good", Ok(outcome)) => assert_eq!(outcome.new_episodes, 2),
            ("/truncated", Err(IngestError::Parse(ParseError::Xml(_)))) => {}
            ("/undated", Err(IngestError::Parse(ParseError::DateFormat { .. }))) => {}
            (route, result) => panic!("Unexpected result for {}: {:?}", route, result),
        }
    }

    assert_eq!(state.feeds().len(), 1);
    assert_eq!(state.feeds()[0].feed.title, "Good");
    assert_eq!(state.feeds()[0].unread_count, 2);
    assert!(!state.is_loading());
}
