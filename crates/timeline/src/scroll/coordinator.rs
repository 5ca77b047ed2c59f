use std::time::Duration;

use tokio::time::Instant;

use crate::context::TimelineContext;
use crate::events::{GestureKind, ViewportEvent};
use crate::scroll::state::{FollowMode, ScrollState};
use crate::scroll::surface::{ScrollAnchor, ScrollBehavior, ScrollMetrics, ScrollSurface};
use crate::scroll::throttle::ScrollThrottle;
use crate::settings::TimelineSettings;

/// Offsets closer than this are treated as the same position.
const SCROLL_EPSILON_PX: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Thresholds {
    stuck_px: f32,
    percent: f32,
    reattach_multiplier: f32,
}

impl Thresholds {
    fn from_settings(settings: &TimelineSettings) -> Self {
        Self {
            stuck_px: settings.stuck_threshold_px,
            percent: settings.scroll_percent_threshold,
            reattach_multiplier: settings.reattach_multiplier,
        }
    }

    fn is_near_bottom(&self, metrics: &ScrollMetrics) -> bool {
        metrics.is_near_bottom(self.stuck_px, self.percent)
    }

    fn is_within_reattach_range(&self, metrics: &ScrollMetrics) -> bool {
        metrics.is_near_bottom(
            self.stuck_px * self.reattach_multiplier,
            self.percent * self.reattach_multiplier,
        )
    }
}

/// Keeps the viewport pinned to the newest message unless the user has scrolled away.
///
/// Scroll requests triggered by rendering are queued and issued on the next
/// [`ViewportEvent::AnimationFrame`], once the host has laid out the new content.
#[derive(Debug)]
pub struct ScrollCoordinator<S> {
    surface: Option<S>,
    state: ScrollState,
    thresholds: Thresholds,
    smooth_scroll_settle: Duration,
    throttle: ScrollThrottle,
    message_count: usize,
    keyboard_open: bool,
    generating: bool,
    smooth_scroll_deadline: Option<Instant>,
    pending_scroll: Option<ScrollBehavior>,
    pending_anchor: Option<ScrollAnchor>,
}

impl<S: ScrollSurface> ScrollCoordinator<S> {
    pub fn new(context: &TimelineContext) -> Self {
        let settings = context.settings();
        Self {
            surface: None,
            state: ScrollState::default(),
            thresholds: Thresholds::from_settings(&settings),
            smooth_scroll_settle: settings.smooth_scroll_settle(),
            throttle: ScrollThrottle::new(settings.scroll_throttle()),
            message_count: 0,
            keyboard_open: false,
            generating: false,
            smooth_scroll_deadline: None,
            pending_scroll: Some(ScrollBehavior::Instant),
            pending_anchor: None,
        }
    }

    /// Attaches the rendered container. A tracking timeline jumps to the bottom on the next frame.
    pub fn mount(&mut self, surface: S) {
        self.surface = Some(surface);
        self.throttle.reset();
        if self.state.mode() == FollowMode::Tracking {
            self.pending_scroll = Some(ScrollBehavior::Instant);
        }
        tracing::debug!(mode = ?self.state.mode(), "mounted scroll surface");
    }

    /// Detaches the container. Every later scroll operation is a no-op until the next mount.
    pub fn unmount(&mut self) -> Option<S> {
        self.end_smooth_scroll();
        self.pending_anchor = None;
        tracing::debug!("unmounted scroll surface");
        self.surface.take()
    }

    pub fn is_mounted(&self) -> bool {
        self.surface.is_some()
    }

    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    pub fn surface_mut(&mut self) -> Option<&mut S> {
        self.surface.as_mut()
    }

    pub fn state(&self) -> &ScrollState {
        &self.state
    }

    pub fn mode(&self) -> FollowMode {
        self.state.mode()
    }

    pub fn message_count(&self) -> usize {
        self.message_count
    }

    /// Takes new thresholds and timings. Scroll state is left as it is.
    pub fn apply_settings(&mut self, settings: &TimelineSettings) {
        self.thresholds = Thresholds::from_settings(settings);
        self.smooth_scroll_settle = settings.smooth_scroll_settle();
        self.throttle.set_interval(settings.scroll_throttle());
    }

    /// Back to tracking with nothing unseen, as on a chat switch.
    pub fn reset(&mut self) {
        self.state = ScrollState::default();
        self.message_count = 0;
        self.smooth_scroll_deadline = None;
        self.pending_anchor = None;
        self.pending_scroll = Some(ScrollBehavior::Instant);
        self.throttle.reset();
    }

    pub fn handle_event(&mut self, event: ViewportEvent) {
        let now = Instant::now();
        if let Some(gesture) = event.gesture() {
            self.on_user_gesture(gesture);
            return;
        }

        match event {
            ViewportEvent::Scroll => {
                if self.throttle.admit(now) {
                    self.evaluate_position(now);
                }
            }
            ViewportEvent::SmoothScrollFinished => self.end_smooth_scroll(),
            ViewportEvent::KeyboardChanged { open } => self.set_keyboard_open(open),
            ViewportEvent::AnimationFrame => self.on_frame(now),
            ViewportEvent::TouchStart | ViewportEvent::Wheel => {}
        }
    }

    pub fn set_keyboard_open(&mut self, open: bool) {
        if self.keyboard_open != open {
            tracing::debug!(open, "keyboard visibility changed");
        }
        self.keyboard_open = open;
    }

    pub fn set_generating(&mut self, generating: bool) {
        let started = generating && !self.generating;
        self.generating = generating;
        if started {
            self.request_follow("generation-started");
        }
    }

    /// The tail message's text changed, typically a streamed token.
    pub fn on_content_changed(&mut self) {
        if self.generating {
            self.request_follow("streamed-content");
        }
    }

    pub fn on_progress_changed(&mut self) {
        self.request_follow("progress");
    }

    /// A new assistant reply began streaming. A reader resting just above the bottom is
    /// pulled back into tracking.
    pub fn on_assistant_stream_started(&mut self) {
        if self.state.mode() == FollowMode::Detached {
            let Some(metrics) = self.metrics() else {
                return;
            };
            if !self.thresholds.is_within_reattach_range(&metrics) {
                return;
            }
            self.state.attach(self.message_count);
            tracing::debug!(
                distance = metrics.distance_from_bottom(),
                "re-attached for new assistant reply"
            );
        }
        self.request_follow("assistant-stream-started");
    }

    pub fn on_message_count_changed(&mut self, count: usize) {
        let previous = std::mem::replace(&mut self.message_count, count);
        if count < previous {
            self.state.last_seen_message_count = self.state.last_seen_message_count.min(count);
            return;
        }
        if count == previous {
            return;
        }

        match self.state.mode() {
            FollowMode::Tracking => self.request_follow("message-count"),
            FollowMode::Detached => {
                let baseline = previous.max(self.state.last_seen_message_count);
                if count > baseline {
                    self.state.unseen_count += count - baseline;
                    tracing::trace!(unseen = self.state.unseen_count, "new messages while detached");
                }
            }
        }
    }

    /// The rendered list now comes from a different array. `baseline` is its length when it
    /// was last drawn, so the next count change only reports growth past that point.
    pub fn on_source_changed(&mut self, baseline: usize) {
        self.message_count = baseline;
        match self.state.mode() {
            FollowMode::Tracking => self.request_follow("source-changed"),
            FollowMode::Detached => self.state.last_seen_message_count = baseline,
        }
    }

    /// The user asked to jump to the newest message.
    pub fn handle_scroll_to_bottom(&mut self) {
        self.state.attach(self.message_count);
        self.pending_scroll = None;

        let Some(surface) = self.surface.as_mut() else {
            self.pending_scroll = Some(ScrollBehavior::Smooth);
            return;
        };
        let Some(metrics) = surface.metrics() else {
            self.pending_scroll = Some(ScrollBehavior::Smooth);
            return;
        };

        surface.scroll_to(metrics.max_scroll_top(), ScrollBehavior::Smooth);
        self.begin_smooth_scroll(Instant::now());
    }

    /// Snapshot to pass to [`Self::on_history_prepended`] once older messages are inserted.
    pub fn capture_anchor(&self) -> Option<ScrollAnchor> {
        self.metrics().map(|metrics| ScrollAnchor::capture(&metrics))
    }

    /// Older messages were inserted above everything rendered so far. They shift the count
    /// baselines so they never show up as unseen, and the anchor is restored on the next frame.
    pub fn on_history_prepended(&mut self, inserted: usize, anchor: Option<ScrollAnchor>) {
        self.message_count += inserted;
        self.state.last_seen_message_count += inserted;
        if anchor.is_some() {
            self.pending_anchor = anchor;
        }
    }

    fn on_frame(&mut self, now: Instant) {
        self.restore_anchor();
        self.flush_pending_scroll(now);
        if self.throttle.take_trailing(now) {
            self.evaluate_position(now);
        }
        self.expire_smooth_scroll(now);
    }

    fn on_user_gesture(&mut self, gesture: GestureKind) {
        if !self.state.smooth_scroll_in_progress {
            return;
        }

        // Pin the animation where it is so the gesture takes over from there.
        if let Some(surface) = self.surface.as_mut() {
            if let Some(metrics) = surface.metrics() {
                surface.scroll_to(metrics.scroll_top, ScrollBehavior::Instant);
            }
        }
        self.end_smooth_scroll();
        tracing::debug!(?gesture, "user gesture cancelled smooth scroll");
    }

    fn evaluate_position(&mut self, now: Instant) {
        let Some(metrics) = self.metrics() else {
            return;
        };
        let near_bottom = self.thresholds.is_near_bottom(&metrics);

        match (self.state.mode(), near_bottom) {
            (FollowMode::Tracking, false) => {
                if self.is_smooth_scroll_active(now) {
                    tracing::trace!("ignoring scroll sample from programmatic animation");
                    return;
                }
                self.state.detach();
                tracing::debug!(
                    distance = metrics.distance_from_bottom(),
                    "user scrolled away from bottom"
                );
            }
            (FollowMode::Detached, true) => {
                self.state.attach(self.message_count);
                tracing::debug!("user returned to bottom");
            }
            _ => {}
        }
    }

    fn request_follow(&mut self, reason: &'static str) {
        if self.state.mode() != FollowMode::Tracking {
            return;
        }
        if self.keyboard_open {
            tracing::trace!(reason, "keyboard open, skipping follow");
            return;
        }

        self.state.mark_caught_up(self.message_count);
        if self.pending_scroll.is_none() {
            self.pending_scroll = Some(ScrollBehavior::Smooth);
        }
        tracing::trace!(reason, "follow requested");
    }

    fn flush_pending_scroll(&mut self, now: Instant) {
        let Some(behavior) = self.pending_scroll else {
            return;
        };
        if self.state.mode() != FollowMode::Tracking || self.keyboard_open {
            self.pending_scroll = None;
            return;
        }

        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        let Some(metrics) = surface.metrics() else {
            return;
        };
        self.pending_scroll = None;

        let target = metrics.max_scroll_top();
        if (target - metrics.scroll_top).abs() < SCROLL_EPSILON_PX {
            return;
        }

        surface.scroll_to(target, behavior);
        if behavior == ScrollBehavior::Smooth {
            self.begin_smooth_scroll(now);
        }
    }

    fn restore_anchor(&mut self) {
        let Some(anchor) = self.pending_anchor.take() else {
            return;
        };
        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        let Some(metrics) = surface.metrics() else {
            self.pending_anchor = Some(anchor);
            return;
        };

        let target = anchor.restored_top(&metrics);
        if (target - metrics.scroll_top).abs() >= SCROLL_EPSILON_PX {
            surface.scroll_to(target, ScrollBehavior::Instant);
        }
        tracing::debug!(
            from = metrics.scroll_top,
            to = target,
            "restored scroll anchor after prepend"
        );
    }

    fn metrics(&self) -> Option<ScrollMetrics> {
        self.surface.as_ref().and_then(|surface| surface.metrics())
    }

    fn begin_smooth_scroll(&mut self, now: Instant) {
        self.state.smooth_scroll_in_progress = true;
        self.smooth_scroll_deadline = Some(now + self.smooth_scroll_settle);
    }

    fn end_smooth_scroll(&mut self) {
        self.state.smooth_scroll_in_progress = false;
        self.smooth_scroll_deadline = None;
    }

    fn expire_smooth_scroll(&mut self, now: Instant) {
        if self.smooth_scroll_deadline.is_some_and(|deadline| now >= deadline) {
            tracing::trace!("smooth scroll settle window elapsed");
            self.end_smooth_scroll();
        }
    }

    fn is_smooth_scroll_active(&mut self, now: Instant) -> bool {
        self.expire_smooth_scroll(now);
        self.state.smooth_scroll_in_progress
    }
}
