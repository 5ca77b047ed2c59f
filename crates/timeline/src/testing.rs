//! Deterministic stand-ins for the host viewport and the history backend.
//!
//! Used by the crate's own tests and by `timeline_qa_runner`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use zova_model::{
    BoxFuture, ChatId, FetchError, FetchResult, Message, MessagePage, OlderPageFetcher,
    PageCursor, PageRequest,
};

use crate::merge::sort_by_timestamp;
use crate::scroll::{ScrollBehavior, ScrollMetrics, ScrollSurface};

const CURSOR_PREFIX: &str = "before:";

/// A scroll container laid out as a column of rows.
///
/// Smooth scrolls only record their target; call [`Self::step_animation`] or
/// [`Self::finish_animation`] to move the offset.
#[derive(Debug, Clone, Default)]
pub struct SimulatedViewport {
    row_heights: Vec<f32>,
    client_height: f32,
    scroll_top: f32,
    animation_target: Option<f32>,
    programmatic_scrolls: Vec<(f32, ScrollBehavior)>,
}

impl SimulatedViewport {
    pub fn new(client_height: f32) -> Self {
        Self {
            client_height,
            ..Self::default()
        }
    }

    pub fn with_uniform_rows(rows: usize, row_height: f32, client_height: f32) -> Self {
        let mut viewport = Self::new(client_height);
        viewport.push_rows(rows, row_height);
        viewport
    }

    /// Replaces the layout, keeping the numeric offset like a browser without scroll anchoring.
    pub fn set_rows(&mut self, row_heights: Vec<f32>) {
        self.row_heights = row_heights;
        self.scroll_top = self.clamp(self.scroll_top);
    }

    pub fn push_rows(&mut self, rows: usize, row_height: f32) {
        self.row_heights.extend(std::iter::repeat_n(row_height, rows));
    }

    pub fn insert_rows_at_top(&mut self, rows: usize, row_height: f32) {
        self.row_heights
            .splice(0..0, std::iter::repeat_n(row_height, rows));
        self.scroll_top = self.clamp(self.scroll_top);
    }

    pub fn user_scroll_to(&mut self, top: f32) {
        self.scroll_top = self.clamp(top);
    }

    /// Advances an in-flight smooth scroll by `fraction` of the remaining distance. Returns
    /// true when the animation reached its target.
    pub fn step_animation(&mut self, fraction: f32) -> bool {
        let Some(target) = self.animation_target else {
            return false;
        };

        let target = self.clamp(target);
        self.scroll_top += (target - self.scroll_top) * fraction.clamp(0.0, 1.0);
        if (target - self.scroll_top).abs() < 0.5 {
            self.scroll_top = target;
            self.animation_target = None;
            return true;
        }
        false
    }

    pub fn finish_animation(&mut self) -> bool {
        self.step_animation(1.0)
    }

    pub fn is_animating(&self) -> bool {
        self.animation_target.is_some()
    }

    pub fn scroll_top(&self) -> f32 {
        self.scroll_top
    }

    pub fn scroll_height(&self) -> f32 {
        self.row_heights.iter().sum()
    }

    pub fn client_height(&self) -> f32 {
        self.client_height
    }

    pub fn row_count(&self) -> usize {
        self.row_heights.len()
    }

    pub fn row_top(&self, index: usize) -> f32 {
        self.row_heights.iter().take(index).sum()
    }

    /// Where row `index` sits relative to the top edge of the viewport.
    pub fn screen_offset_of_row(&self, index: usize) -> f32 {
        self.row_top(index) - self.scroll_top
    }

    pub fn programmatic_scrolls(&self) -> &[(f32, ScrollBehavior)] {
        &self.programmatic_scrolls
    }

    fn clamp(&self, top: f32) -> f32 {
        let max = (self.scroll_height() - self.client_height).max(0.0);
        top.clamp(0.0, max)
    }
}

impl ScrollSurface for SimulatedViewport {
    fn metrics(&self) -> Option<ScrollMetrics> {
        if self.client_height <= 0.0 {
            return None;
        }

        Some(ScrollMetrics {
            scroll_top: self.scroll_top,
            scroll_height: self.scroll_height(),
            client_height: self.client_height,
        })
    }

    fn scroll_to(&mut self, top: f32, behavior: ScrollBehavior) {
        let top = self.clamp(top);
        self.programmatic_scrolls.push((top, behavior));
        match behavior {
            ScrollBehavior::Instant => {
                self.scroll_top = top;
                self.animation_target = None;
            }
            ScrollBehavior::Smooth => self.animation_target = Some(top),
        }
    }
}

/// Complete history of one chat served in pages, newest last.
#[derive(Debug)]
pub struct InMemoryHistory {
    chat_id: ChatId,
    messages: Vec<Message>,
    fail_next: AtomicBool,
    fetches: AtomicUsize,
}

impl InMemoryHistory {
    pub fn new(chat_id: ChatId, mut messages: Vec<Message>) -> Self {
        sort_by_timestamp(&mut messages);
        Self {
            chat_id,
            messages,
            fail_next: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        sort_by_timestamp(&mut self.messages);
    }

    /// The newest `size` messages, as the reactive subscription would deliver them.
    pub fn latest_window(&self, size: usize) -> MessagePage {
        let start = self.messages.len().saturating_sub(size);
        page_before(&self.messages, start, self.messages.len())
    }

    /// The next fetch fails with a transport error.
    pub fn fail_next_fetch(&self) {
        self.fail_next.store(true, Ordering::Release);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Acquire)
    }

    fn serve(&self, request: &PageRequest) -> FetchResult<MessagePage> {
        self.fetches.fetch_add(1, Ordering::AcqRel);

        if self.fail_next.swap(false, Ordering::AcqRel) {
            return Err(FetchError::Transport {
                stage: "serve-older-page",
                message: "injected failure".to_string(),
            });
        }

        if request.chat_id != self.chat_id {
            return Err(FetchError::ChatUnavailable {
                stage: "serve-older-page",
                chat_id: request.chat_id.to_string(),
            });
        }

        let end = match &request.cursor {
            Some(cursor) => parse_cursor(cursor)?.min(self.messages.len()),
            None => self.messages.len(),
        };
        let start = end.saturating_sub(request.limit.max(1));
        Ok(page_before(&self.messages, start, end))
    }
}

impl OlderPageFetcher for InMemoryHistory {
    fn fetch_older_page(&self, request: PageRequest) -> BoxFuture<'_, FetchResult<MessagePage>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.serve(&request)
        })
    }
}

fn page_before(messages: &[Message], start: usize, end: usize) -> MessagePage {
    let has_more = start > 0;
    MessagePage::new(
        messages[start..end].to_vec(),
        has_more.then(|| PageCursor::new(format!("{CURSOR_PREFIX}{start}"))),
        has_more,
    )
}

fn parse_cursor(cursor: &PageCursor) -> FetchResult<usize> {
    cursor
        .as_str()
        .strip_prefix(CURSOR_PREFIX)
        .and_then(|index| index.parse().ok())
        .ok_or_else(|| FetchError::InvalidCursor {
            stage: "parse-cursor",
            cursor: cursor.to_string(),
        })
}
