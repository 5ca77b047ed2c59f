use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::error::ModelResult;
use super::identity::KeyRegistry;
use super::ids::{ChatId, ClientMessageId, MessageId};
use super::message::{LocalKey, LocalMessage, Message, MessageOrigin, PersistedMessage, Role, Timestamp};

/// Message record as handed over by subscription, fetch, and send collaborators.
///
/// Every identity and ordering field is optional here; [`MessageNormalizer`] resolves the shape
/// once so nothing downstream probes fields again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub client_key: Option<String>,
    pub chat_id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub persisted: Option<bool>,
    #[serde(default)]
    pub is_streaming: bool,
}

/// Converts boundary records into typed messages.
#[derive(Debug)]
pub struct MessageNormalizer {
    registry: KeyRegistry,
    // Newest timestamp seen per chat; the last resort for undated records.
    watermarks: HashMap<ChatId, Timestamp>,
}

impl MessageNormalizer {
    pub fn new(key_cache_capacity: usize) -> Self {
        Self {
            registry: KeyRegistry::new(key_cache_capacity),
            watermarks: HashMap::new(),
        }
    }

    pub fn normalize(&mut self, raw: RawMessage) -> ModelResult<Message> {
        self.normalize_with_occurrence(raw, &mut HashMap::new())
    }

    /// Normalizes a batch, skipping records whose chat id cannot be parsed.
    ///
    /// An undated record borrows the timestamp of the nearest dated record of the same chat in
    /// the batch, preferring the one before it.
    pub fn normalize_batch(&mut self, mut records: Vec<RawMessage>) -> Vec<Message> {
        fill_from_neighbours(&mut records);

        let mut occurrences = HashMap::new();
        let mut messages = Vec::with_capacity(records.len());

        for raw in records {
            let chat_id = raw.chat_id.clone();
            match self.normalize_with_occurrence(raw, &mut occurrences) {
                Ok(message) => messages.push(message),
                Err(error) => {
                    tracing::warn!(chat_id = %chat_id, %error, "dropping message record");
                }
            }
        }

        messages
    }

    fn normalize_with_occurrence(
        &mut self,
        raw: RawMessage,
        occurrences: &mut HashMap<(ChatId, Role, String), u32>,
    ) -> ModelResult<Message> {
        let chat_id = ChatId::parse(&raw.chat_id)?;
        let timestamp = self.resolve_timestamp(chat_id, raw.timestamp);
        let server_id = raw.id.as_deref().and_then(|id| parse_optional_id(id, MessageId::parse));
        let client_id = raw
            .client_key
            .as_deref()
            .and_then(|key| parse_optional_id(key, ClientMessageId::parse));

        let origin = match (server_id, client_id) {
            (Some(id), _) if raw.persisted != Some(false) => {
                MessageOrigin::Persisted(PersistedMessage { id })
            }
            (server_id, Some(client_id)) => MessageOrigin::Local(LocalMessage {
                key: LocalKey::Client(client_id),
                persisted: raw.persisted.unwrap_or(server_id.is_some()),
                server_id,
            }),
            (server_id, None) => {
                let slot = occurrences
                    .entry((chat_id, raw.role, raw.content.clone()))
                    .or_insert(0);
                let occurrence = *slot;
                *slot += 1;

                let (surrogate, key) =
                    self.registry.key_for(chat_id, raw.role, &raw.content, occurrence);
                tracing::debug!(
                    chat_id = %chat_id,
                    surrogate = surrogate.0,
                    key = %key,
                    "synthesized key for keyless message"
                );
                MessageOrigin::Local(LocalMessage {
                    key: LocalKey::Synthesized(key),
                    persisted: raw.persisted.unwrap_or(false),
                    server_id,
                })
            }
        };

        Ok(Message {
            origin,
            chat_id,
            role: raw.role,
            content: raw.content,
            timestamp,
            streaming: raw.is_streaming,
        })
    }

    fn resolve_timestamp(&mut self, chat_id: ChatId, raw: Option<i64>) -> Timestamp {
        let watermark = self.watermarks.entry(chat_id).or_default();
        match raw {
            Some(millis) => {
                let timestamp = Timestamp::from_millis(millis);
                *watermark = (*watermark).max(timestamp);
                timestamp
            }
            None => *watermark,
        }
    }
}

impl Default for MessageNormalizer {
    fn default() -> Self {
        Self::new(super::identity::DEFAULT_KEY_CACHE_CAPACITY)
    }
}

fn fill_from_neighbours(records: &mut [RawMessage]) {
    let resolved = (0..records.len())
        .map(|index| {
            let record = &records[index];
            record.timestamp.or_else(|| {
                let same_chat = |other: &&RawMessage| other.chat_id == record.chat_id;
                let before = records[..index]
                    .iter()
                    .rev()
                    .filter(same_chat)
                    .find_map(|other| other.timestamp);
                before.or_else(|| {
                    records[index + 1..]
                        .iter()
                        .filter(same_chat)
                        .find_map(|other| other.timestamp)
                })
            })
        })
        .collect::<Vec<_>>();

    for (record, timestamp) in records.iter_mut().zip(resolved) {
        record.timestamp = timestamp;
    }
}

fn parse_optional_id<T, F>(raw: &str, parse: F) -> Option<T>
where
    F: FnOnce(&str) -> ModelResult<T>,
{
    if raw.trim().is_empty() {
        return None;
    }

    match parse(raw) {
        Ok(id) => Some(id),
        Err(error) => {
            tracing::warn!(%error, "ignoring unparseable message id");
            None
        }
    }
}
