use futures::{Stream, StreamExt};
use snafu::ResultExt;
use zova_model::{ChatId, IdentityKey, Message, MessagePage, OlderPageFetcher, PageRequest, Role};

use crate::context::TimelineContext;
use crate::error::{FetchOlderPageSnafu, TimelineResult};
use crate::events::ViewportEvent;
use crate::pagination::{LoadMoreTicket, PaginationEngine, PrependOutcome};
use crate::scroll::{ScrollAnchor, ScrollCoordinator, ScrollState, ScrollSurface};
use crate::select::{SelectedSource, select_effective_messages};

/// Everything the host needs to draw one frame of the message list.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSnapshot {
    pub messages: Vec<Message>,
    pub source: SelectedSource,
    pub unseen_count: usize,
    pub user_has_scrolled: bool,
    pub has_more: bool,
    pub loading_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMoreOutcome {
    /// History is exhausted or a load is already running.
    Skipped,
    Loaded(PrependOutcome),
}

/// An older-page load that has been started but not applied.
#[derive(Debug)]
pub struct PendingLoadMore {
    ticket: LoadMoreTicket,
    anchor: Option<ScrollAnchor>,
}

impl PendingLoadMore {
    pub fn request(&self) -> &PageRequest {
        self.ticket.request()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TailProbe {
    key: IdentityKey,
    streaming: bool,
    content_len: usize,
}

/// Length of each array the last time it was drawn. The live sources share one slot.
#[derive(Debug, Clone, Copy, Default)]
struct ShownCounts {
    live: Option<usize>,
    paginated: Option<usize>,
}

impl ShownCounts {
    fn slot(&mut self, source: SelectedSource) -> &mut Option<usize> {
        if source.is_live() {
            &mut self.live
        } else {
            &mut self.paginated
        }
    }
}

/// One chat's message list: source selection, history pagination and scroll behavior.
#[derive(Debug)]
pub struct Timeline<S> {
    context: TimelineContext,
    chat_id: ChatId,
    pagination: PaginationEngine,
    scroll: ScrollCoordinator<S>,
    last_source: Option<SelectedSource>,
    shown_counts: ShownCounts,
    tail: Option<TailProbe>,
}

impl<S: ScrollSurface> Timeline<S> {
    pub fn new(context: TimelineContext, chat_id: ChatId) -> Self {
        let pagination = PaginationEngine::new(chat_id, context.settings().older_page_size);
        let scroll = ScrollCoordinator::new(&context);
        Self {
            context,
            chat_id,
            pagination,
            scroll,
            last_source: None,
            shown_counts: ShownCounts::default(),
            tail: None,
        }
    }

    pub fn context(&self) -> &TimelineContext {
        &self.context
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn pagination(&self) -> &PaginationEngine {
        &self.pagination
    }

    pub fn scroll(&self) -> &ScrollCoordinator<S> {
        &self.scroll
    }

    pub fn scroll_mut(&mut self) -> &mut ScrollCoordinator<S> {
        &mut self.scroll
    }

    pub fn scroll_state(&self) -> &ScrollState {
        self.scroll.state()
    }

    pub fn mount(&mut self, surface: S) {
        self.scroll.mount(surface);
    }

    pub fn unmount(&mut self) -> Option<S> {
        self.scroll.unmount()
    }

    /// Makes `chat_id` the active chat. History and scroll state start over, and pages still
    /// in flight for the previous chat are discarded when they land. Page size and scroll
    /// thresholds are re-read from the context settings.
    pub fn switch_chat(&mut self, chat_id: ChatId) {
        if chat_id == self.chat_id {
            return;
        }

        tracing::info!(from = %self.chat_id, to = %chat_id, "switching chat");
        self.chat_id = chat_id;
        self.pagination.reset(chat_id);
        self.scroll.reset();
        self.apply_settings();
        self.last_source = None;
        self.shown_counts = ShownCounts::default();
        self.tail = None;
    }

    pub fn apply_latest_window(&mut self, window: MessagePage) {
        self.pagination.apply_latest_window(window);
    }

    /// Applies every window from the reactive subscription until it ends. Returns the number
    /// of windows applied.
    pub async fn pump_latest_windows<W>(&mut self, windows: W) -> usize
    where
        W: Stream<Item = MessagePage>,
    {
        let mut windows = std::pin::pin!(windows);
        let mut applied = 0;
        while let Some(window) = windows.next().await {
            self.apply_latest_window(window);
            applied += 1;
        }
        tracing::debug!(chat_id = %self.chat_id, applied, "latest window subscription ended");
        applied
    }

    pub fn set_generating(&mut self, generating: bool) {
        self.scroll.set_generating(generating);
    }

    pub fn on_progress_changed(&mut self) {
        self.scroll.on_progress_changed();
    }

    pub fn set_keyboard_open(&mut self, open: bool) {
        self.scroll.set_keyboard_open(open);
    }

    pub fn handle_event(&mut self, event: ViewportEvent) {
        self.scroll.handle_event(event);
    }

    pub fn handle_scroll_to_bottom(&mut self) {
        self.scroll.handle_scroll_to_bottom();
    }

    /// Selects the messages to draw for the current live buffer and updates scroll state.
    pub fn render(&mut self, live_messages: &[Message]) -> RenderSnapshot {
        let selection = select_effective_messages(
            live_messages,
            self.pagination.paginated_messages(),
            &self.chat_id,
            self.context.settings().prefer_paginated_source,
            self.pagination.is_awaiting_initial_window(),
        );
        let source = selection.source;
        let messages = selection.into_owned();
        let count = messages.len();

        if let Some(previous) = self.last_source.filter(|previous| *previous != source) {
            tracing::debug!(
                chat_id = %self.chat_id,
                ?previous,
                ?source,
                "effective source changed"
            );
            // Counts of different arrays are not comparable.
            if previous.is_live() != source.is_live() {
                let baseline = self.shown_counts.slot(source).unwrap_or(count);
                self.scroll.on_source_changed(baseline);
            }
        }
        self.last_source = Some(source);
        self.observe_tail(&messages);
        self.scroll.on_message_count_changed(count);
        *self.shown_counts.slot(source) = Some(count);

        let state = self.scroll.state();
        RenderSnapshot {
            source,
            unseen_count: state.unseen_count,
            user_has_scrolled: state.user_has_scrolled,
            has_more: self.pagination.has_more(),
            loading_more: self.pagination.is_loading_more(),
            messages,
        }
    }

    /// Starts an older-page load, capturing the scroll anchor first. `None` when history is
    /// exhausted or a load is already running.
    pub fn begin_load_more(&mut self) -> Option<PendingLoadMore> {
        let ticket = self.pagination.begin_load_more()?;
        Some(PendingLoadMore {
            ticket,
            anchor: self.scroll.capture_anchor(),
        })
    }

    /// Applies a fetched older page and schedules the anchor restore for the next frame.
    pub fn complete_load_more(&mut self, pending: PendingLoadMore, page: MessagePage) -> PrependOutcome {
        let outcome = self.pagination.complete_load_more(pending.ticket, page);
        if outcome.discarded {
            return outcome;
        }

        if let Some(count) = self.shown_counts.paginated.as_mut() {
            *count += outcome.inserted;
        }
        // Only a paginated render actually shows the new rows.
        let shown = if self.last_source == Some(SelectedSource::Paginated) {
            outcome.inserted
        } else {
            0
        };
        self.scroll.on_history_prepended(shown, pending.anchor);
        outcome
    }

    /// Fetches and applies one older page.
    ///
    /// A failed fetch leaves the history untouched and releases the load slot, so the caller
    /// may retry.
    pub async fn handle_load_more<F>(&mut self, fetcher: &F) -> TimelineResult<LoadMoreOutcome>
    where
        F: OlderPageFetcher + ?Sized,
    {
        let Some(pending) = self.begin_load_more() else {
            return Ok(LoadMoreOutcome::Skipped);
        };

        let request = pending.request().clone();
        let chat_id = request.chat_id;
        let page = fetcher
            .fetch_older_page(request)
            .await
            .inspect_err(|error| {
                tracing::warn!(chat_id = %chat_id, error = %error, "failed to load older messages");
            })
            .context(FetchOlderPageSnafu {
                stage: "fetch-older-page",
                chat_id: chat_id.to_string(),
            })?;

        Ok(LoadMoreOutcome::Loaded(self.complete_load_more(pending, page)))
    }

    fn apply_settings(&mut self) {
        let settings = self.context.settings();
        self.pagination.set_page_size(settings.older_page_size);
        self.scroll.apply_settings(&settings);
    }

    fn observe_tail(&mut self, messages: &[Message]) {
        let Some(last) = messages.last() else {
            self.tail = None;
            return;
        };

        let probe = TailProbe {
            key: last.identity_key(),
            streaming: last.is_streaming(),
            content_len: last.content.len(),
        };
        let previous = self.tail.replace(probe.clone());

        let stream_started = last.role == Role::Assistant
            && probe.streaming
            && previous
                .as_ref()
                .is_none_or(|previous| previous.key != probe.key || !previous.streaming);
        if stream_started {
            self.scroll.on_assistant_stream_started();
            return;
        }

        let content_changed = previous.is_some_and(|previous| {
            previous.key == probe.key && previous.content_len != probe.content_len
        });
        if content_changed {
            self.scroll.on_content_changed();
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use uuid::Uuid;
    use zova_model::{ClientMessageId, ConversationId, MessageId, Timestamp};

    use super::*;
    use crate::error::TimelineError;
    use crate::scroll::FollowMode;
    use crate::settings::{SettingsStore, TimelineSettings};
    use crate::testing::{InMemoryHistory, SimulatedViewport};

    const ROW: f32 = 50.0;

    fn chat(seed: u128) -> ChatId {
        ChatId::Remote(ConversationId::new(Uuid::from_u128(seed)))
    }

    fn history(chat_id: ChatId, len: u128) -> InMemoryHistory {
        let messages = (1..=len)
            .map(|n| {
                let role = if n % 2 == 0 { Role::Assistant } else { Role::User };
                Message::persisted(
                    MessageId::new(Uuid::from_u128(n)),
                    chat_id,
                    role,
                    format!("m{n}"),
                    Timestamp(n as i64 * 1_000),
                )
            })
            .collect();
        InMemoryHistory::new(chat_id, messages)
    }

    fn timeline(chat_id: ChatId) -> Timeline<SimulatedViewport> {
        let settings = TimelineSettings {
            older_page_size: 10,
            ..TimelineSettings::default()
        };
        let mut timeline = Timeline::new(TimelineContext::new(settings), chat_id);
        timeline.mount(SimulatedViewport::new(300.0));
        timeline
    }

    fn viewport(timeline: &mut Timeline<SimulatedViewport>) -> &mut SimulatedViewport {
        timeline.scroll_mut().surface_mut().unwrap()
    }

    /// Renders and lays out one row per message, as a host would.
    fn draw(timeline: &mut Timeline<SimulatedViewport>, live: &[Message]) -> RenderSnapshot {
        let snapshot = timeline.render(live);
        let rows = vec![ROW; snapshot.messages.len()];
        viewport(timeline).set_rows(rows);
        timeline.handle_event(ViewportEvent::AnimationFrame);
        snapshot
    }

    #[tokio::test(start_paused = true)]
    async fn load_more_prepends_and_keeps_reading_position() {
        let chat_id = chat(1);
        let history = history(chat_id, 30);
        let mut timeline = timeline(chat_id);

        let window = history.latest_window(10);
        let live = window.messages.clone();
        timeline.apply_latest_window(window);
        let snapshot = draw(&mut timeline, &live);
        assert_eq!(snapshot.source, SelectedSource::Paginated);
        assert_eq!(snapshot.messages.len(), 10);
        assert!(snapshot.has_more);
        assert_eq!(viewport(&mut timeline).scroll_top(), 200.0);

        tokio::time::advance(std::time::Duration::from_millis(100)).await;
        viewport(&mut timeline).user_scroll_to(0.0);
        timeline.handle_event(ViewportEvent::Scroll);
        assert_eq!(timeline.scroll().mode(), FollowMode::Detached);

        let outcome = timeline.handle_load_more(&history).await.unwrap();
        assert_eq!(
            outcome,
            LoadMoreOutcome::Loaded(PrependOutcome {
                inserted: 10,
                has_more: true,
                discarded: false,
            })
        );

        let snapshot = timeline.render(&live);
        assert_eq!(snapshot.messages.len(), 20);
        assert_eq!(snapshot.messages[0].content, "m11");
        assert_eq!(snapshot.unseen_count, 0);
        viewport(&mut timeline).insert_rows_at_top(10, ROW);
        timeline.handle_event(ViewportEvent::AnimationFrame);

        // The row that was at the top edge is still there.
        assert_eq!(viewport(&mut timeline).scroll_top(), 500.0);
        assert_eq!(viewport(&mut timeline).screen_offset_of_row(10), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn older_history_is_not_unseen_after_a_live_round_trip() {
        let chat_id = chat(1);
        let mut history = history(chat_id, 30);
        let mut timeline = timeline(chat_id);
        let window = history.latest_window(10);
        let live = window.messages.clone();
        timeline.apply_latest_window(window);
        draw(&mut timeline, &live);

        tokio::time::advance(std::time::Duration::from_millis(100)).await;
        viewport(&mut timeline).user_scroll_to(0.0);
        timeline.handle_event(ViewportEvent::Scroll);
        timeline.handle_load_more(&history).await.unwrap();
        let snapshot = draw(&mut timeline, &live);
        assert_eq!(snapshot.messages.len(), 20);
        assert_eq!(snapshot.unseen_count, 0);

        let mut sending = live.clone();
        sending.push(Message::local(
            ClientMessageId::new(Uuid::from_u128(90)),
            chat_id,
            Role::User,
            "follow-up",
            Timestamp(40_000),
        ));
        let snapshot = draw(&mut timeline, &sending);
        assert_eq!(snapshot.source, SelectedSource::LiveOptimistic);
        assert_eq!(snapshot.messages.len(), 11);
        assert_eq!(snapshot.unseen_count, 0);

        history.push(Message::persisted(
            MessageId::new(Uuid::from_u128(31)),
            chat_id,
            Role::User,
            "follow-up",
            Timestamp(40_000),
        ));
        let window = history.latest_window(10);
        let settled = window.messages.clone();
        timeline.apply_latest_window(window);
        let snapshot = draw(&mut timeline, &settled);
        assert_eq!(snapshot.source, SelectedSource::Paginated);
        assert_eq!(snapshot.messages.len(), 21);
        assert_eq!(snapshot.unseen_count, 1);
        assert!(snapshot.user_has_scrolled);
        assert_eq!(viewport(&mut timeline).row_count(), 21);
    }

    #[tokio::test(start_paused = true)]
    async fn history_loaded_behind_the_live_view_is_not_unseen() {
        let chat_id = chat(1);
        let history = history(chat_id, 30);
        let mut timeline = timeline(chat_id);
        let window = history.latest_window(10);
        let live = window.messages.clone();
        timeline.apply_latest_window(window);
        draw(&mut timeline, &live);

        tokio::time::advance(std::time::Duration::from_millis(100)).await;
        viewport(&mut timeline).user_scroll_to(0.0);
        timeline.handle_event(ViewportEvent::Scroll);

        let mut sending = live.clone();
        sending.push(Message::local(
            ClientMessageId::new(Uuid::from_u128(90)),
            chat_id,
            Role::User,
            "draft",
            Timestamp(40_000),
        ));
        draw(&mut timeline, &sending);
        timeline.handle_load_more(&history).await.unwrap();

        let snapshot = draw(&mut timeline, &live);
        assert_eq!(snapshot.source, SelectedSource::Paginated);
        assert_eq!(snapshot.messages.len(), 20);
        assert_eq!(snapshot.unseen_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reloaded_settings_reach_the_timeline() {
        let path = std::env::temp_dir()
            .join(format!("zova-timeline-reload-{}", std::process::id()))
            .join("timeline.json");
        let directory = path.parent().unwrap().to_path_buf();
        std::fs::create_dir_all(&directory).unwrap();
        std::fs::write(&path, r#"{ "older_page_size": 10 }"#).unwrap();
        let store = SettingsStore::open(path.clone()).unwrap();

        let chat_id = chat(1);
        let chat_history = history(chat_id, 30);
        let mut timeline =
            Timeline::<SimulatedViewport>::new(TimelineContext::from_store(&store), chat_id);
        let window = chat_history.latest_window(10);
        let live = window.messages.clone();
        timeline.apply_latest_window(window);
        assert_eq!(timeline.render(&live).source, SelectedSource::Paginated);
        assert_eq!(timeline.begin_load_more().unwrap().request().limit, 10);

        std::fs::write(
            &path,
            r#"{ "older_page_size": 5, "prefer_paginated_source": false }"#,
        )
        .unwrap();
        store.reload().unwrap();
        assert_eq!(timeline.render(&live).source, SelectedSource::LiveFallback);

        let other = chat(2);
        timeline.switch_chat(other);
        timeline.apply_latest_window(history(other, 30).latest_window(10));
        assert_eq!(timeline.begin_load_more().unwrap().request().limit, 5);

        let _ = std::fs::remove_dir_all(directory);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_load_more_can_be_retried() {
        let chat_id = chat(1);
        let history = history(chat_id, 30);
        let mut timeline = timeline(chat_id);
        let window = history.latest_window(10);
        let live = window.messages.clone();
        timeline.apply_latest_window(window);
        let before = draw(&mut timeline, &live);

        history.fail_next_fetch();
        let error = timeline.handle_load_more(&history).await.unwrap_err();
        assert!(matches!(error, TimelineError::FetchOlderPage { .. }));
        assert!(!timeline.pagination().is_loading_more());
        assert_eq!(timeline.render(&live).messages, before.messages);

        let outcome = timeline.handle_load_more(&history).await.unwrap();
        assert!(matches!(outcome, LoadMoreOutcome::Loaded(PrependOutcome { inserted: 10, .. })));
        assert_eq!(history.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn second_load_while_first_is_pending_is_skipped() {
        let chat_id = chat(1);
        let history = history(chat_id, 30);
        let mut timeline = timeline(chat_id);
        timeline.apply_latest_window(history.latest_window(10));

        let pending = timeline.begin_load_more().unwrap();
        let outcome = timeline.handle_load_more(&history).await.unwrap();
        assert_eq!(outcome, LoadMoreOutcome::Skipped);
        assert_eq!(history.fetch_count(), 0);

        let page = history.fetch_older_page(pending.request().clone()).await.unwrap();
        timeline.complete_load_more(pending, page);
        assert_eq!(timeline.pagination().paginated_messages().len(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_reply_renders_live_and_stays_pinned() {
        let chat_id = chat(1);
        let history = history(chat_id, 10);
        let mut timeline = timeline(chat_id);
        let window = history.latest_window(10);
        let mut live = window.messages.clone();
        timeline.apply_latest_window(window);
        draw(&mut timeline, &live);

        live.push(
            Message::local(
                ClientMessageId::new(Uuid::from_u128(50)),
                chat_id,
                Role::User,
                "question",
                Timestamp(20_000),
            )
            .confirmed(None),
        );
        live.push(Message::assistant_streaming(
            ClientMessageId::new(Uuid::from_u128(51)),
            chat_id,
            Timestamp(20_001),
        ));
        timeline.set_generating(true);
        let snapshot = draw(&mut timeline, &live);
        assert_eq!(snapshot.source, SelectedSource::LiveOptimistic);
        assert_eq!(snapshot.messages.len(), 12);
        assert!(viewport(&mut timeline).is_animating());

        viewport(&mut timeline).finish_animation();
        timeline.handle_event(ViewportEvent::SmoothScrollFinished);
        if let Some(last) = live.last_mut() {
            last.append_content("partial answer");
        }
        viewport(&mut timeline).push_rows(1, ROW);
        let snapshot = timeline.render(&live);
        timeline.handle_event(ViewportEvent::AnimationFrame);
        assert_eq!(snapshot.messages[11].content, "partial answer");
        assert!(viewport(&mut timeline).is_animating());
        assert_eq!(timeline.scroll_state().unseen_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_chat_starts_over() {
        let first = chat(1);
        let second = chat(2);
        let history = history(first, 30);
        let mut timeline = timeline(first);
        let window = history.latest_window(10);
        let live = window.messages.clone();
        timeline.apply_latest_window(window);
        draw(&mut timeline, &live);

        tokio::time::advance(std::time::Duration::from_millis(100)).await;
        viewport(&mut timeline).user_scroll_to(0.0);
        timeline.handle_event(ViewportEvent::Scroll);
        let pending = timeline.begin_load_more().unwrap();

        timeline.switch_chat(second);
        assert_eq!(timeline.scroll().mode(), FollowMode::Tracking);
        assert!(timeline.pagination().is_awaiting_initial_window());

        let page = history.fetch_older_page(pending.request().clone()).await.unwrap();
        assert!(timeline.complete_load_more(pending, page).discarded);

        // The first chat's live buffer is ignored; nothing for the second chat yet.
        let snapshot = timeline.render(&live);
        assert_eq!(snapshot.source, SelectedSource::LiveFallback);
        assert!(snapshot.messages.is_empty());
    }

    #[tokio::test]
    async fn pump_applies_every_window() {
        let chat_id = chat(1);
        let mut history = history(chat_id, 3);
        let first = history.latest_window(10);
        history.push(Message::persisted(
            MessageId::new(Uuid::from_u128(99)),
            chat_id,
            Role::Assistant,
            "m4",
            Timestamp(4_000),
        ));
        let second = history.latest_window(10);

        let mut timeline = timeline(chat_id);
        let applied = timeline.pump_latest_windows(stream::iter(vec![first, second])).await;

        assert_eq!(applied, 2);
        assert_eq!(timeline.pagination().paginated_messages().len(), 4);
        assert!(!timeline.pagination().has_more());
    }
}
