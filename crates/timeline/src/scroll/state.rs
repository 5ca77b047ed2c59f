/// Whether the viewport follows new content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowMode {
    /// Auto-scroll keeps the newest message in view.
    Tracking,
    /// The user scrolled away; arrivals are counted instead of followed.
    Detached,
}

/// Scroll bookkeeping owned by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollState {
    pub auto_scroll_enabled: bool,
    pub user_has_scrolled: bool,
    pub unseen_count: usize,
    pub last_seen_message_count: usize,
    pub smooth_scroll_in_progress: bool,
}

impl ScrollState {
    pub fn mode(&self) -> FollowMode {
        if self.auto_scroll_enabled {
            FollowMode::Tracking
        } else {
            FollowMode::Detached
        }
    }

    pub(crate) fn attach(&mut self, message_count: usize) {
        self.auto_scroll_enabled = true;
        self.user_has_scrolled = false;
        self.mark_caught_up(message_count);
    }

    pub(crate) fn detach(&mut self) {
        self.auto_scroll_enabled = false;
        self.user_has_scrolled = true;
    }

    pub(crate) fn mark_caught_up(&mut self, message_count: usize) {
        self.unseen_count = 0;
        self.last_seen_message_count = message_count;
    }
}

impl Default for ScrollState {
    fn default() -> Self {
        Self {
            auto_scroll_enabled: true,
            user_has_scrolled: false,
            unseen_count: 0,
            last_seen_message_count: 0,
            smooth_scroll_in_progress: false,
        }
    }
}
