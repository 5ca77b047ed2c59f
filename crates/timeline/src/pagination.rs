use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use zova_model::{ChatId, Message, MessagePage, PageCursor, PageRequest};

use crate::merge::{merge_initial_page_with_loaded_messages, prepend_older_messages};

/// Single-flight gate for older-page loads.
#[derive(Debug, Clone, Default)]
struct LoadGate {
    busy: Arc<AtomicBool>,
}

impl LoadGate {
    fn try_acquire(&self) -> Option<LoadGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LoadGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the gate when the ticket holding it is consumed or dropped.
#[derive(Debug)]
struct LoadGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Permission to fetch one older page. Dropping it without completing releases the gate and
/// leaves the buffer untouched.
#[derive(Debug)]
pub struct LoadMoreTicket {
    request: PageRequest,
    generation: u64,
    _guard: LoadGuard,
}

impl LoadMoreTicket {
    pub fn request(&self) -> &PageRequest {
        &self.request
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrependOutcome {
    /// Messages that were not in the buffer before this page.
    pub inserted: usize,
    pub has_more: bool,
    /// The chat changed while the page was in flight; nothing was applied.
    pub discarded: bool,
}

/// Owns the accumulated history buffer for the active chat.
#[derive(Debug)]
pub struct PaginationEngine {
    chat_id: ChatId,
    loaded: Vec<Message>,
    next_cursor: Option<PageCursor>,
    has_more: bool,
    window_received: bool,
    older_pages_loaded: usize,
    page_size: usize,
    generation: u64,
    gate: LoadGate,
}

impl PaginationEngine {
    pub fn new(chat_id: ChatId, page_size: usize) -> Self {
        Self {
            chat_id,
            loaded: Vec::new(),
            next_cursor: None,
            has_more: false,
            window_received: false,
            older_pages_loaded: 0,
            page_size: page_size.max(1),
            generation: 0,
            gate: LoadGate::default(),
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    /// The merged, sorted, deduplicated history for the active chat.
    pub fn paginated_messages(&self) -> &[Message] {
        &self.loaded
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading_more(&self) -> bool {
        self.gate.is_busy()
    }

    /// True until the first reactive window for the active chat arrives.
    pub fn is_awaiting_initial_window(&self) -> bool {
        !self.window_received
    }

    pub fn older_pages_loaded(&self) -> usize {
        self.older_pages_loaded
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
    }

    /// Drops all history and starts over for `chat_id`. In-flight tickets become stale.
    pub fn reset(&mut self, chat_id: ChatId) {
        self.chat_id = chat_id;
        self.loaded.clear();
        self.next_cursor = None;
        self.has_more = false;
        self.window_received = false;
        self.older_pages_loaded = 0;
        self.generation += 1;
        tracing::debug!(chat_id = %chat_id, generation = self.generation, "reset pagination");
    }

    /// Applies one tick of the reactive latest-window subscription.
    pub fn apply_latest_window(&mut self, window: MessagePage) {
        let messages = self.scoped(window.messages);
        self.loaded = merge_initial_page_with_loaded_messages(&self.loaded, &messages);

        // Once older pages are loaded the cursor belongs to them, not to the window.
        if self.older_pages_loaded == 0 {
            self.next_cursor = window.next_cursor;
            self.has_more = window.has_more;
        }
        self.window_received = true;

        tracing::debug!(
            chat_id = %self.chat_id,
            window = messages.len(),
            loaded = self.loaded.len(),
            has_more = self.has_more,
            "applied latest window"
        );
    }

    /// Claims the single load-more slot, or `None` when history is exhausted or a load is
    /// already running.
    pub fn begin_load_more(&self) -> Option<LoadMoreTicket> {
        if !self.has_more {
            return None;
        }

        let Some(guard) = self.gate.try_acquire() else {
            tracing::debug!(chat_id = %self.chat_id, "load more already in flight");
            return None;
        };

        Some(LoadMoreTicket {
            request: PageRequest {
                chat_id: self.chat_id,
                cursor: self.next_cursor.clone(),
                limit: self.page_size,
            },
            generation: self.generation,
            _guard: guard,
        })
    }

    /// Applies a fetched older page. Consumes the ticket, releasing the gate.
    pub fn complete_load_more(&mut self, ticket: LoadMoreTicket, page: MessagePage) -> PrependOutcome {
        if ticket.generation != self.generation {
            tracing::debug!(
                chat_id = %ticket.request.chat_id,
                "discarding older page for a chat that is no longer active"
            );
            return PrependOutcome {
                inserted: 0,
                has_more: self.has_more,
                discarded: true,
            };
        }

        let messages = self.scoped(page.messages);
        let before = self.loaded.len();
        self.loaded = prepend_older_messages(&self.loaded, &messages);
        self.next_cursor = page.next_cursor;
        self.has_more = page.has_more;
        self.older_pages_loaded += 1;

        let inserted = self.loaded.len().saturating_sub(before);
        tracing::info!(
            chat_id = %self.chat_id,
            inserted,
            has_more = self.has_more,
            "loaded older page"
        );

        PrependOutcome {
            inserted,
            has_more: self.has_more,
            discarded: false,
        }
    }

    fn scoped(&self, messages: Vec<Message>) -> Vec<Message> {
        let total = messages.len();
        let scoped = messages
            .into_iter()
            .filter(|message| message.chat_id == self.chat_id)
            .collect::<Vec<_>>();
        if scoped.len() != total {
            tracing::warn!(
                chat_id = %self.chat_id,
                dropped = total - scoped.len(),
                "ignoring messages from another chat"
            );
        }
        scoped
    }
}
