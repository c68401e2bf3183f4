//! Observable application state.
//!
//! [`AppState`] owns the feed list, the current selection and the reading
//! flags, and is the only thing that mutates them. Every field write is
//! published on a broadcast bus as [`StateEvent::Changed`] for that field,
//! immediately followed by [`StateEvent::Any`], so a front end can either
//! watch specific fields or simply redraw on any change.
//!
//! Operations are split by concern:
//!
//! - `subscriptions` - feed list, adding/removing feeds, OPML, selection
//! - `reading` - episode selection and read/starred/viewer flags

mod reading;
mod subscriptions;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::feed::{FetchError, IngestError, Ingestor, OpmlError};
use crate::storage::{Database, DatabaseError, Episode, Feed, FeedSummary};

/// Capacity of the notification bus. Slow subscribers beyond this lag and
/// receive `RecvError::Lagged`.
const EVENT_CAPACITY: usize = 256;

/// Observable fields of [`AppState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    Loading,
    Feeds,
    SelectedFeed,
    Episodes,
    SelectedEpisode,
    UseEmbeddedViewer,
}

/// Published on every state write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// One field was written
    Changed(StateField),
    /// Follows every `Changed`
    Any,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Storage(#[from] DatabaseError),
    #[error(transparent)]
    Opml(#[from] OpmlError),
    #[error(transparent)]
    Export(#[from] anyhow::Error),
}

/// Single-owner application state with change notifications.
pub struct AppState {
    db: Database,
    ingestor: Ingestor,
    events: broadcast::Sender<StateEvent>,

    loading: bool,
    feeds: Vec<FeedSummary>,
    selected_feed: Option<Feed>,
    episodes: Vec<Episode>,
    selected_episode: Option<Episode>,
    use_embedded_viewer: bool,
}

impl AppState {
    pub fn new(db: Database, config: &Config) -> Result<Self, FetchError> {
        let ingestor = Ingestor::new(db.clone(), config)?;
        Ok(Self::with_ingestor(ingestor))
    }

    pub fn with_ingestor(ingestor: Ingestor) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db: ingestor.database().clone(),
            ingestor,
            events,
            loading: false,
            feeds: Vec::new(),
            selected_feed: None,
            episodes: Vec::new(),
            selected_episode: None,
            use_embedded_viewer: false,
        }
    }

    /// Receive every notification published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ========================================================================
    // Read Access
    // ========================================================================

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn feeds(&self) -> &[FeedSummary] {
        &self.feeds
    }

    pub fn selected_feed(&self) -> Option<&Feed> {
        self.selected_feed.as_ref()
    }

    pub fn episodes(&self) -> &[Episode] {
        &self.episodes
    }

    pub fn selected_episode(&self) -> Option<&Episode> {
        self.selected_episode.as_ref()
    }

    pub fn use_embedded_viewer(&self) -> bool {
        self.use_embedded_viewer
    }

    // ========================================================================
    // Notifying Writes
    // ========================================================================

    fn notify(&self, field: StateField) {
        // send only fails when nobody is subscribed
        let _ = self.events.send(StateEvent::Changed(field));
        let _ = self.events.send(StateEvent::Any);
    }

    fn set_loading(&mut self, value: bool) {
        self.loading = value;
        self.notify(StateField::Loading);
    }

    fn set_feeds(&mut self, feeds: Vec<FeedSummary>) {
        self.feeds = feeds;
        self.notify(StateField::Feeds);
    }

    fn set_selected_feed(&mut self, feed: Option<Feed>) {
        self.selected_feed = feed;
        self.notify(StateField::SelectedFeed);
    }

    fn set_episodes(&mut self, episodes: Vec<Episode>) {
        self.episodes = episodes;
        self.notify(StateField::Episodes);
    }

    fn set_selected_episode(&mut self, episode: Option<Episode>) {
        self.selected_episode = episode;
        self.notify(StateField::SelectedEpisode);
    }

    fn set_use_embedded_viewer(&mut self, value: bool) {
        self.use_embedded_viewer = value;
        self.notify(StateField::UseEmbeddedViewer);
    }
}
