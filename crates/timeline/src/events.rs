/// Direct user input on the scroll container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GestureKind {
    TouchStart,
    Wheel,
}

/// Host events delivered to the scroll coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewportEvent {
    /// The container's scroll offset changed, by the user or programmatically.
    Scroll,
    TouchStart,
    Wheel,
    /// A smooth scroll started by the coordinator reached its target.
    SmoothScrollFinished,
    /// The on-screen keyboard opened or closed.
    KeyboardChanged { open: bool },
    /// Layout for the latest render has been committed.
    AnimationFrame,
}

impl ViewportEvent {
    /// Returns the gesture for events that signal direct user intent.
    pub fn gesture(self) -> Option<GestureKind> {
        match self {
            Self::TouchStart => Some(GestureKind::TouchStart),
            Self::Wheel => Some(GestureKind::Wheel),
            Self::Scroll
            | Self::SmoothScrollFinished
            | Self::KeyboardChanged { .. }
            | Self::AnimationFrame => None,
        }
    }
}
