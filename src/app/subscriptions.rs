use std::path::Path;

use super::{AppState, StateError};
use crate::feed::{self, IngestOutcome, IngestReport, OpmlFeed};
use crate::storage::{Feed, FeedRemoval};

impl AppState {
    // ========================================================================
    // Feed Directory
    // ========================================================================

    /// Reload the feed list with unread counts.
    ///
    /// The selected feed is looked up again by URL; if it no longer exists
    /// the selection, the episode list and the selected episode are cleared.
    pub async fn load_feeds(&mut self) -> Result<(), StateError> {
        let feeds = self.db.feeds_with_unread_counts().await?;

        let reselected = self.selected_feed.as_ref().map(|current| {
            feeds
                .iter()
                .find(|s| s.feed.id == current.id)
                .map(|s| s.feed.clone())
        });

        self.set_feeds(feeds);

        match reselected {
            None => {}
            Some(None) => {
                self.set_selected_feed(None);
                self.set_episodes(Vec::new());
                self.set_selected_episode(None);
            }
            Some(Some(feed)) => {
                if self.selected_feed.as_ref() != Some(&feed) {
                    self.set_selected_feed(Some(feed));
                }
            }
        }
        Ok(())
    }

    /// Subscribe to `url`: ingest it, then reload the feed list.
    ///
    /// Adding a URL that is already subscribed fetches it again and stores
    /// any new episodes.
    pub async fn add_feed(&mut self, url: &str) -> Result<IngestOutcome, StateError> {
        self.set_loading(true);
        let result = self.add_feed_inner(url).await;
        self.set_loading(false);
        result
    }

    async fn add_feed_inner(&mut self, url: &str) -> Result<IngestOutcome, StateError> {
        let outcome = self.ingestor.ingest(url).await?;
        self.load_feeds().await?;
        Ok(outcome)
    }

    /// Unsubscribe from a feed. Its starred episodes are kept.
    ///
    /// On failure nothing was deleted and the in-memory state is unchanged.
    pub async fn remove_feed(&mut self, url: &str) -> Result<FeedRemoval, StateError> {
        let removal = self.db.remove_feed(url).await?;
        self.load_feeds().await?;
        Ok(removal)
    }

    // ========================================================================
    // OPML
    // ========================================================================

    /// Subscribe to every feed listed in an OPML document.
    ///
    /// Feeds are ingested concurrently; one feed failing does not affect the
    /// others. Only a malformed document fails the whole import, in which
    /// case nothing is fetched.
    pub async fn import_opml(&mut self, content: &str) -> Result<Vec<IngestReport>, StateError> {
        let feeds = feed::parse_opml_content(content)?;
        self.import_feeds(feeds).await
    }

    /// Like [`AppState::import_opml`], reading the document from `path`.
    pub async fn import_opml_file(&mut self, path: &str) -> Result<Vec<IngestReport>, StateError> {
        let feeds = feed::parse(path).await?;
        self.import_feeds(feeds).await
    }

    async fn import_feeds(&mut self, feeds: Vec<OpmlFeed>) -> Result<Vec<IngestReport>, StateError> {
        self.set_loading(true);
        let reports = self
            .ingestor
            .ingest_all(feeds.into_iter().map(|f| f.xml_url))
            .await;
        let reloaded = self.load_feeds().await;
        self.set_loading(false);
        reloaded?;

        let failed = reports.iter().filter(|r| r.result.is_err()).count();
        tracing::info!(
            feeds = reports.len(),
            failed = failed,
            "OPML import finished"
        );
        Ok(reports)
    }

    /// The current feed list as an OPML 2.0 document.
    pub fn export_opml(&self) -> Result<String, StateError> {
        Ok(feed::export_opml(&self.export_feeds())?)
    }

    /// Write the current feed list to `path` as OPML, atomically.
    pub fn export_opml_to_file(&self, path: &Path) -> Result<usize, StateError> {
        let feeds = self.export_feeds();
        feed::export_to_file(&feeds, path)?;
        Ok(feeds.len())
    }

    fn export_feeds(&self) -> Vec<OpmlFeed> {
        self.feeds.iter().map(|s| OpmlFeed::from(&s.feed)).collect()
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Select a feed (or none) and load its episodes.
    pub async fn select_feed(&mut self, feed: Option<Feed>) -> Result<(), StateError> {
        self.set_selected_feed(feed);
        self.load_episodes().await
    }

    /// Reload the selected feed's episodes.
    ///
    /// The selected episode is looked up again by identity and cleared if it
    /// is not in the new list.
    pub async fn load_episodes(&mut self) -> Result<(), StateError> {
        let episodes = match &self.selected_feed {
            Some(feed) => self.db.episodes_for_feed(&feed.id).await?,
            None => Vec::new(),
        };

        let reselected = self.selected_episode.as_ref().map(|current| {
            episodes
                .iter()
                .find(|e| e.feed_id == current.feed_id && e.id == current.id)
                .cloned()
        });

        self.set_episodes(episodes);

        if let Some(episode) = reselected {
            if self.selected_episode != episode {
                self.set_selected_episode(episode);
            }
        }
        Ok(())
    }
}
