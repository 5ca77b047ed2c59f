/// Geometry of the scroll container, in pixels, top-anchored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f32,
    pub scroll_height: f32,
    pub client_height: f32,
}

impl ScrollMetrics {
    pub fn max_scroll_top(&self) -> f32 {
        (self.scroll_height - self.client_height).max(0.0)
    }

    pub fn distance_from_bottom(&self) -> f32 {
        (self.max_scroll_top() - self.scroll_top).max(0.0)
    }

    /// True when the viewport is within `threshold_px` pixels or `threshold_percent` percent of
    /// the scrollable height from the bottom. Content that fits without scrolling is always at
    /// the bottom.
    pub fn is_near_bottom(&self, threshold_px: f32, threshold_percent: f32) -> bool {
        if self.max_scroll_top() <= 0.0 {
            return true;
        }

        let distance = self.distance_from_bottom();
        if distance <= threshold_px {
            return true;
        }

        self.scroll_height > 0.0 && distance / self.scroll_height * 100.0 <= threshold_percent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollBehavior {
    Smooth,
    Instant,
}

/// Scroll position captured before older history is inserted above the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    pub scroll_top: f32,
    pub scroll_height: f32,
}

impl ScrollAnchor {
    pub fn capture(metrics: &ScrollMetrics) -> Self {
        Self {
            scroll_top: metrics.scroll_top,
            scroll_height: metrics.scroll_height,
        }
    }

    /// Offset that keeps the previously visible content on the same screen position.
    pub fn restored_top(&self, metrics: &ScrollMetrics) -> f32 {
        let scroll_diff = metrics.scroll_height - self.scroll_height;
        (self.scroll_top + scroll_diff).clamp(0.0, metrics.max_scroll_top())
    }
}

/// The rendered scroll container.
pub trait ScrollSurface {
    /// Current geometry, or `None` while the container has no layout yet.
    fn metrics(&self) -> Option<ScrollMetrics>;

    fn scroll_to(&mut self, top: f32, behavior: ScrollBehavior);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(scroll_top: f32) -> ScrollMetrics {
        ScrollMetrics {
            scroll_top,
            scroll_height: 10_000.0,
            client_height: 1_000.0,
        }
    }

    #[test]
    fn pixel_and_percent_thresholds_are_either_or() {
        // 9_000 is the bottom; 5% of 10_000 is 500px.
        assert!(metrics(8_950.0).is_near_bottom(100.0, 5.0));
        assert!(metrics(8_600.0).is_near_bottom(100.0, 5.0));
        assert!(!metrics(8_400.0).is_near_bottom(100.0, 5.0));
        assert!(metrics(8_400.0).is_near_bottom(200.0, 10.0));
    }

    #[test]
    fn short_content_is_always_at_bottom() {
        let short = ScrollMetrics {
            scroll_top: 0.0,
            scroll_height: 300.0,
            client_height: 500.0,
        };
        assert!(short.is_near_bottom(0.0, 0.0));
    }

    #[test]
    fn anchor_restores_by_height_delta() {
        let anchor = ScrollAnchor::capture(&metrics(100.0));
        let grown = ScrollMetrics {
            scroll_top: 100.0,
            scroll_height: 10_250.0,
            client_height: 1_000.0,
        };
        assert_eq!(anchor.restored_top(&grown), 350.0);
    }
}
