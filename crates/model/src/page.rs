use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::ChatId;
use super::message::Message;

/// Opaque continuation token handed out by the history backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// One window of history, either the reactive latest window or an older page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub next_cursor: Option<PageCursor>,
    pub has_more: bool,
}

impl MessagePage {
    pub fn new(messages: Vec<Message>, next_cursor: Option<PageCursor>, has_more: bool) -> Self {
        Self {
            messages,
            next_cursor,
            has_more,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Request for the page of history older than `cursor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub chat_id: ChatId,
    /// `None` asks for the newest page.
    pub cursor: Option<PageCursor>,
    pub limit: usize,
}
