use super::{AppState, StateError, StateField};
use crate::storage::{Episode, EpisodeFlag};

impl AppState {
    /// Select an episode (or none).
    ///
    /// The embedded-viewer flag is reset to the owning feed's preference,
    /// and a selected episode is marked read.
    pub async fn select_episode(&mut self, episode: Option<Episode>) -> Result<(), StateError> {
        let viewer = episode
            .as_ref()
            .and_then(|e| self.owning_feed_preference(&e.feed_id))
            .or_else(|| self.selected_feed.as_ref().map(|f| f.use_embedded_viewer))
            .unwrap_or(false);
        let has_episode = episode.is_some();

        self.set_selected_episode(episode);
        self.set_use_embedded_viewer(viewer);

        if has_episode {
            self.mark_current_episode_read().await?;
        }
        Ok(())
    }

    /// Returns whether anything changed.
    pub async fn mark_current_episode_read(&mut self) -> Result<bool, StateError> {
        self.set_current_flag(EpisodeFlag::Read, true).await
    }

    pub async fn mark_current_episode_unread(&mut self) -> Result<bool, StateError> {
        self.set_current_flag(EpisodeFlag::Read, false).await
    }

    pub async fn star_current_episode(&mut self) -> Result<bool, StateError> {
        self.set_current_flag(EpisodeFlag::Starred, true).await
    }

    pub async fn unstar_current_episode(&mut self) -> Result<bool, StateError> {
        self.set_current_flag(EpisodeFlag::Starred, false).await
    }

    /// Mark every episode read, or only those of `feed_id`, then reload the
    /// feed list and the episode list.
    pub async fn mark_all_as_read(&mut self, feed_id: Option<&str>) -> Result<u64, StateError> {
        let changed = self.db.mark_all_read(feed_id).await?;
        tracing::info!(feed = ?feed_id, episodes = changed, "Marked all as read");
        self.load_feeds().await?;
        self.load_episodes().await?;
        Ok(changed)
    }

    /// Flip the embedded-viewer preference of the selected feed and persist
    /// it. Without a selected feed nothing happens.
    pub async fn toggle_use_embedded_viewer(&mut self) -> Result<(), StateError> {
        let Some(feed_id) = self.selected_feed.as_ref().map(|f| f.id.clone()) else {
            return Ok(());
        };
        let value = !self.use_embedded_viewer;

        self.db.set_use_embedded_viewer(&feed_id, value).await?;

        if let Some(feed) = self.selected_feed.as_mut() {
            feed.use_embedded_viewer = value;
        }
        if let Some(summary) = self.feeds.iter_mut().find(|s| s.feed.id == feed_id) {
            summary.feed.use_embedded_viewer = value;
        }
        self.notify(StateField::SelectedFeed);
        self.set_use_embedded_viewer(value);
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn owning_feed_preference(&self, feed_id: &str) -> Option<bool> {
        self.feeds
            .iter()
            .find(|s| s.feed.id == feed_id)
            .map(|s| s.feed.use_embedded_viewer)
    }

    /// Persist one flag of the selected episode and mirror it in memory.
    ///
    /// Setting a flag to the value it already has writes nothing and
    /// notifies nobody.
    async fn set_current_flag(&mut self, flag: EpisodeFlag, value: bool) -> Result<bool, StateError> {
        let Some(current) = self.selected_episode.as_ref() else {
            return Ok(false);
        };
        let held = match flag {
            EpisodeFlag::Read => current.read,
            EpisodeFlag::Starred => current.starred,
        };
        if held == value {
            return Ok(false);
        }
        let (feed_id, episode_id) = (current.feed_id.clone(), current.id.clone());

        self.db
            .set_episode_flag(&feed_id, &episode_id, flag, value)
            .await?;

        let apply = |episode: &mut Episode| match flag {
            EpisodeFlag::Read => episode.read = value,
            EpisodeFlag::Starred => episode.starred = value,
        };

        if let Some(listed) = self
            .episodes
            .iter_mut()
            .find(|e| e.feed_id == feed_id && e.id == episode_id)
        {
            apply(listed);
            self.notify(StateField::Episodes);
        }

        if flag == EpisodeFlag::Read {
            if let Some(summary) = self.feeds.iter_mut().find(|s| s.feed.id == feed_id) {
                let delta = if value { -1 } else { 1 };
                summary.unread_count = (summary.unread_count + delta).max(0);
                self.notify(StateField::Feeds);
            }
        }

        if let Some(selected) = self.selected_episode.as_mut() {
            apply(selected);
        }
        self.notify(StateField::SelectedEpisode);

        tracing::debug!(
            feed = %feed_id,
            episode = %episode_id,
            flag = ?flag,
            value = value,
            "Episode flag updated"
        );
        Ok(true)
    }
}
