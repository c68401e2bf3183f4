mod episodes;
mod feeds;
mod schema;
mod types;

pub use schema::Database;
pub use types::{
    DatabaseError, Episode, EpisodeFlag, Feed, FeedMetadata, FeedRemoval, FeedSummary, FeedWrite,
    ParsedEpisode,
};
