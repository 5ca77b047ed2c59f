use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use uuid::Uuid;

use super::error::{InvalidChatIdSnafu, InvalidIdSnafu, ModelError, ModelResult};

/// Text prefix marking a chat that only exists on this client.
pub const LOCAL_CHAT_PREFIX: &str = "local:";

// One macro for every uuid-backed id so parsing and display never drift between kinds.
macro_rules! define_model_id {
    ($(#[$meta:meta])* $name:ident, $id_type:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(raw: Uuid) -> Self {
                Self(raw)
            }

            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse(raw: &str) -> ModelResult<Self> {
                let parsed = Uuid::parse_str(raw.trim()).context(InvalidIdSnafu {
                    stage: "parse-model-id",
                    id_type: $id_type,
                    raw: raw.to_string(),
                })?;
                Ok(Self(parsed))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self::new(value)
            }
        }

        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(raw: &str) -> ModelResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_model_id!(
    /// Conversation persisted by the backend.
    ConversationId,
    "conversation-id"
);
define_model_id!(
    /// Conversation that has never left this client.
    LocalChatId,
    "local-chat-id"
);
define_model_id!(
    /// Backend-assigned message id.
    MessageId,
    "message-id"
);
define_model_id!(
    /// Client-assigned key for an optimistic message.
    ClientMessageId,
    "client-message-id"
);

/// Owning conversation of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum ChatId {
    Remote(ConversationId),
    Local(LocalChatId),
}

impl ChatId {
    /// True for purely local (unauthenticated) chats that have no paginated source.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn parse(raw: &str) -> ModelResult<Self> {
        let trimmed = raw.trim();
        let parsed = match trimmed.strip_prefix(LOCAL_CHAT_PREFIX) {
            Some(rest) => LocalChatId::parse(rest).map(Self::Local),
            None => ConversationId::parse(trimmed).map(Self::Remote),
        };

        parsed.map_err(Box::new).context(InvalidChatIdSnafu {
            stage: "parse-chat-id",
            raw: raw.to_string(),
        })
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(id) => write!(formatter, "{id}"),
            Self::Local(id) => write!(formatter, "{LOCAL_CHAT_PREFIX}{id}"),
        }
    }
}

impl From<ConversationId> for ChatId {
    fn from(value: ConversationId) -> Self {
        Self::Remote(value)
    }
}

impl From<LocalChatId> for ChatId {
    fn from(value: LocalChatId) -> Self {
        Self::Local(value)
    }
}

impl FromStr for ChatId {
    type Err = ModelError;

    fn from_str(raw: &str) -> ModelResult<Self> {
        Self::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_text_form_keeps_scope() {
        let remote = ChatId::Remote(ConversationId::new_v7());
        let local = ChatId::Local(LocalChatId::new_v7());

        assert_eq!(ChatId::parse(&remote.to_string()).ok(), Some(remote));
        assert_eq!(ChatId::parse(&local.to_string()).ok(), Some(local));
        assert!(local.is_local());
        assert!(!remote.is_local());
    }

    #[test]
    fn invalid_chat_id_reports_raw_value() {
        let error = ChatId::parse("local:not-a-uuid").unwrap_err();
        assert!(error.to_string().contains("local:not-a-uuid"));
    }
}
