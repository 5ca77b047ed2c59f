use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::{ChatId, ClientMessageId, MessageId};
use super::identity::{IdentityKey, SyntheticKey, identity_key};

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Milliseconds since the Unix epoch. The only ordering key for messages.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }
}

/// Key carried by a message that has no backend id yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LocalKey {
    Client(ClientMessageId),
    Synthesized(SyntheticKey),
}

/// Optimistic message owned by the send/stream pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMessage {
    pub key: LocalKey,
    /// Flipped once the backend confirms the write, even before `server_id` is known.
    pub persisted: bool,
    pub server_id: Option<MessageId>,
}

/// Message read back from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedMessage {
    pub id: MessageId,
}

/// Where a message came from, resolved once when it enters the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum MessageOrigin {
    Local(LocalMessage),
    Persisted(PersistedMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub origin: MessageOrigin,
    pub chat_id: ChatId,
    pub role: Role,
    pub content: String,
    pub timestamp: Timestamp,
    pub streaming: bool,
}

impl Message {
    /// Creates a message already stored by the backend.
    pub fn persisted(
        id: MessageId,
        chat_id: ChatId,
        role: Role,
        content: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            origin: MessageOrigin::Persisted(PersistedMessage { id }),
            chat_id,
            role,
            content: content.into(),
            timestamp,
            streaming: false,
        }
    }

    /// Creates an optimistic message that the backend has not confirmed yet.
    pub fn local(
        client_id: ClientMessageId,
        chat_id: ChatId,
        role: Role,
        content: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self::with_local_key(LocalKey::Client(client_id), chat_id, role, content, timestamp)
    }

    pub fn with_local_key(
        key: LocalKey,
        chat_id: ChatId,
        role: Role,
        content: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            origin: MessageOrigin::Local(LocalMessage {
                key,
                persisted: false,
                server_id: None,
            }),
            chat_id,
            role,
            content: content.into(),
            timestamp,
            streaming: false,
        }
    }

    /// Creates an empty assistant placeholder that is receiving tokens.
    pub fn assistant_streaming(
        client_id: ClientMessageId,
        chat_id: ChatId,
        timestamp: Timestamp,
    ) -> Self {
        Self::local(client_id, chat_id, Role::Assistant, String::new(), timestamp)
            .with_streaming(true)
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Marks a local message as durably stored, optionally recording the backend id.
    pub fn confirmed(mut self, server_id: Option<MessageId>) -> Self {
        if let MessageOrigin::Local(local) = &mut self.origin {
            local.persisted = true;
            local.server_id = server_id.or(local.server_id);
        }
        self
    }

    pub fn is_persisted(&self) -> bool {
        match &self.origin {
            MessageOrigin::Persisted(_) => true,
            MessageOrigin::Local(local) => local.persisted,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// True while this message is ahead of anything the backend can return.
    pub fn is_optimistic(&self) -> bool {
        self.streaming || !self.is_persisted()
    }

    /// Backend id when one is known.
    pub fn server_id(&self) -> Option<MessageId> {
        match &self.origin {
            MessageOrigin::Persisted(persisted) => Some(persisted.id),
            MessageOrigin::Local(local) => local.server_id,
        }
    }

    /// True when the identity key survives a round trip through the backend.
    pub fn has_stable_key(&self) -> bool {
        self.server_id().is_some()
    }

    pub fn identity_key(&self) -> IdentityKey {
        identity_key(self)
    }

    pub fn append_content(&mut self, delta: &str) {
        self.content.push_str(delta);
    }
}
