use sqlx::QueryBuilder;
use std::collections::HashSet;

use super::schema::Database;
use super::types::{DatabaseError, Episode, EpisodeFlag, FeedWrite, ParsedEpisode};

/// Rows per multi-value INSERT. 7 binds per row keeps us well under
/// SQLite's 999 parameter limit (7 * 50 = 350).
const BATCH_SIZE: usize = 50;

impl Database {
    // ========================================================================
    // Episode Queries
    // ========================================================================

    /// Identities of every episode already stored for a feed
    pub async fn episode_ids_for_feed(
        &self,
        feed_id: &str,
    ) -> Result<HashSet<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM episodes WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// All episodes for a feed, newest first; undated episodes last in
    /// insertion order
    pub async fn episodes_for_feed(&self, feed_id: &str) -> Result<Vec<Episode>, DatabaseError> {
        let episodes = sqlx::query_as::<_, Episode>(
            r#"
            SELECT id, feed_id, title, link, published, description, content, read, starred
            FROM episodes
            WHERE feed_id = ?
            ORDER BY published DESC, rowid ASC
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(episodes)
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Persist one ingestion: the feed row (per `feed`) and the new episodes,
    /// all in a single transaction.
    ///
    /// Returns the number of episode rows actually inserted. Episodes whose
    /// identity is already stored for this feed (including repeats within
    /// `episodes`) are ignored. If any statement fails nothing is written.
    pub async fn commit_ingestion(
        &self,
        feed_id: &str,
        feed: FeedWrite<'_>,
        episodes: &[ParsedEpisode],
    ) -> Result<usize, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        match feed {
            FeedWrite::Keep => {}
            FeedWrite::Insert(meta) => {
                // OR IGNORE: a concurrent ingestion of the same URL may have won
                sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO feeds (id, title, link, description, icon_url)
                    VALUES (?, ?, ?, ?, ?)
                "#,
                )
                .bind(feed_id)
                .bind(&meta.title)
                .bind(&meta.link)
                .bind(&meta.description)
                .bind(&meta.icon_url)
                .execute(&mut *tx)
                .await?;
            }
            FeedWrite::Refresh(meta) => {
                sqlx::query(
                    r#"
                    UPDATE feeds SET title = ?, link = ?, description = ?, icon_url = ?
                    WHERE id = ?
                "#,
                )
                .bind(&meta.title)
                .bind(&meta.link)
                .bind(&meta.description)
                .bind(&meta.icon_url)
                .bind(feed_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        let mut inserted: usize = 0;
        for chunk in episodes.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO episodes (id, feed_id, title, link, published, description, content) ",
            );

            builder.push_values(chunk, |mut b, episode| {
                b.push_bind(&episode.guid)
                    .push_bind(feed_id)
                    .push_bind(&episode.title)
                    .push_bind(&episode.link)
                    .push_bind(episode.published)
                    .push_bind(&episode.description)
                    .push_bind(&episode.content);
            });

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    // ========================================================================
    // Episode Mutations
    // ========================================================================

    /// Set a single flag on one episode, returns whether the episode exists
    pub async fn set_episode_flag(
        &self,
        feed_id: &str,
        episode_id: &str,
        flag: EpisodeFlag,
        value: bool,
    ) -> Result<bool, DatabaseError> {
        let sql = format!(
            "UPDATE episodes SET {} = ? WHERE feed_id = ? AND id = ?",
            flag.column()
        );
        let result = sqlx::query(&sql)
            .bind(value)
            .bind(feed_id)
            .bind(episode_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark every episode as read, optionally only those of one feed.
    ///
    /// Single bulk UPDATE; returns the number of episodes that changed.
    pub async fn mark_all_read(&self, feed_id: Option<&str>) -> Result<u64, DatabaseError> {
        let result = match feed_id {
            Some(feed_id) => {
                sqlx::query("UPDATE episodes SET read = 1 WHERE feed_id = ? AND read = 0")
                    .bind(feed_id)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("UPDATE episodes SET read = 1 WHERE read = 0")
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }
}
