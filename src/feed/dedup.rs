use std::collections::HashSet;

use crate::storage::ParsedEpisode;

/// Keep only the episodes whose guid is not already stored for the feed.
///
/// Order is preserved. Duplicate guids within `batch` are passed through
/// unchanged; the storage layer ignores the second insert of a key, so the
/// count it reports is the number of rows actually added.
pub fn new_episodes(existing: &HashSet<String>, batch: Vec<ParsedEpisode>) -> Vec<ParsedEpisode> {
    batch
        .into_iter()
        .filter(|episode| !existing.contains(&episode.guid))
        .collect()
}
