use chrono::NaiveDate;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of tumbleweed appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error (includes rolled-back transactions)
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all mean
/// some other process owns the file.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Parser Output
// ============================================================================

/// Channel-level metadata read from a feed document.
///
/// Fields missing from the source stay at their default value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedMetadata {
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
}

/// One `<item>` read from a feed document, not yet stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEpisode {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub published: Option<NaiveDate>,
    pub description: Option<String>,
    pub content: Option<String>,
}

/// How an ingestion treats the feed row it belongs to.
#[derive(Debug, Clone, Copy)]
pub enum FeedWrite<'a> {
    /// Feed row already exists and is left untouched.
    Keep,
    /// First successful fetch of this URL: create the row.
    Insert(&'a FeedMetadata),
    /// Feed row exists; overwrite its metadata with the fetched values.
    Refresh(&'a FeedMetadata),
}

// ============================================================================
// Data Structures
// ============================================================================

/// Feed row. The source URL is the primary key.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Feed {
    pub id: String,
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub use_embedded_viewer: bool,
}

/// Feed with its number of unread episodes, as shown in the feed list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSummary {
    pub feed: Feed,
    pub unread_count: i64,
}

/// Episode row. `id` is the item guid, unique within its feed.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Episode {
    pub id: String,
    pub feed_id: String,
    pub title: String,
    pub link: String,
    pub published: Option<NaiveDate>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub read: bool,
    pub starred: bool,
}

/// Per-episode boolean columns that the reading-state tracker flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeFlag {
    Read,
    Starred,
}

impl EpisodeFlag {
    pub(crate) fn column(self) -> &'static str {
        match self {
            EpisodeFlag::Read => "read",
            EpisodeFlag::Starred => "starred",
        }
    }
}

/// Row counts deleted by a feed removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedRemoval {
    pub feeds_deleted: u64,
    pub episodes_deleted: u64,
}

/// Row type for feed query with unread count
pub(crate) type FeedRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    bool,
    i64,
);

pub(crate) fn feed_summary_from_row(row: FeedRow) -> FeedSummary {
    let (id, title, link, description, icon_url, use_embedded_viewer, unread_count) = row;
    FeedSummary {
        feed: Feed {
            id,
            title,
            link,
            description,
            icon_url,
            use_embedded_viewer,
        },
        unread_count,
    }
}
