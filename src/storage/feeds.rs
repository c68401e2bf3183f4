use super::schema::Database;
use super::types::{feed_summary_from_row, DatabaseError, Feed, FeedRemoval, FeedRow, FeedSummary};

impl Database {
    // ========================================================================
    // Feed Queries
    // ========================================================================

    /// Whether a feed row exists for this URL
    pub async fn feed_exists(&self, feed_id: &str) -> Result<bool, DatabaseError> {
        let row: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM feeds WHERE id = ?)")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Get a single feed by its URL
    pub async fn get_feed(&self, feed_id: &str) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            SELECT id, title, link, description, icon_url, use_embedded_viewer
            FROM feeds
            WHERE id = ?
        "#,
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// Get all feeds with their unread episode counts
    ///
    /// Feeds without any episode are included with a count of zero.
    pub async fn feeds_with_unread_counts(&self) -> Result<Vec<FeedSummary>, DatabaseError> {
        let rows: Vec<FeedRow> = sqlx::query_as(
            r#"
                SELECT
                    f.id, f.title, f.link, f.description, f.icon_url, f.use_embedded_viewer,
                    COUNT(CASE WHEN e.read = 0 THEN 1 END) as unread_count
                FROM feeds f
                LEFT JOIN episodes e ON f.id = e.feed_id
                GROUP BY f.id
                ORDER BY f.title, f.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(feed_summary_from_row).collect())
    }

    // ========================================================================
    // Feed Mutations
    // ========================================================================

    /// Remove a feed and every non-starred episode it owns.
    ///
    /// Both deletes run in one transaction: either the feed row and its
    /// unstarred episodes are gone, or nothing changed. Starred episodes are
    /// kept and still reference the (now missing) feed URL.
    pub async fn remove_feed(&self, feed_id: &str) -> Result<FeedRemoval, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let feeds = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        let episodes = sqlx::query("DELETE FROM episodes WHERE feed_id = ? AND starred = 0")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        // Dropping `tx` on an early return above rolls back.
        tx.commit().await?;

        let removal = FeedRemoval {
            feeds_deleted: feeds.rows_affected(),
            episodes_deleted: episodes.rows_affected(),
        };
        tracing::info!(
            feed = %feed_id,
            episodes_deleted = removal.episodes_deleted,
            "Feed removed"
        );
        Ok(removal)
    }

    /// Persist the "open in embedded viewer" preference for a feed
    pub async fn set_use_embedded_viewer(
        &self,
        feed_id: &str,
        value: bool,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE feeds SET use_embedded_viewer = ? WHERE id = ?")
            .bind(value)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
