use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::ids::{ChatId, ClientMessageId, MessageId};
use super::message::{LocalKey, Message, MessageOrigin, Role};

/// Default number of synthesized keys remembered before the least recently used is dropped.
pub const DEFAULT_KEY_CACHE_CAPACITY: usize = 1024;

/// Fallback key minted for records that arrive with neither a backend id nor a client key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyntheticKey(String);

impl SyntheticKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyntheticKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Value used to deduplicate and merge messages across sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityKey {
    Persisted(MessageId),
    Local(ClientMessageId),
    Synthesized(SyntheticKey),
}

impl IdentityKey {
    pub fn is_stable(&self) -> bool {
        matches!(self, Self::Persisted(_))
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persisted(id) => write!(formatter, "p:{id}"),
            Self::Local(id) => write!(formatter, "l:{id}"),
            Self::Synthesized(key) => write!(formatter, "s:{key}"),
        }
    }
}

/// Resolves the identity key of a message.
///
/// A local message that already learned its backend id keys as persisted so it collapses with
/// the copy the backend returns.
pub fn identity_key(message: &Message) -> IdentityKey {
    match &message.origin {
        MessageOrigin::Persisted(persisted) => IdentityKey::Persisted(persisted.id),
        MessageOrigin::Local(local) => match (local.server_id, &local.key) {
            (Some(server_id), _) => IdentityKey::Persisted(server_id),
            (None, LocalKey::Client(client_id)) => IdentityKey::Local(*client_id),
            (None, LocalKey::Synthesized(key)) => IdentityKey::Synthesized(key.clone()),
        },
    }
}

/// Creation-time surrogate assigned to a keyless record on first sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurrogateId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Fingerprint {
    chat_id: ChatId,
    role: Role,
    content_hash: u64,
    occurrence: u32,
}

#[derive(Debug)]
struct RegistryEntry {
    surrogate: SurrogateId,
    key: SyntheticKey,
    last_used: u64,
}

/// Bounded side table from keyless-record fingerprints to synthesized keys.
///
/// The same record seen on every subscription tick keeps the key it got the first time, so a
/// keyless message never duplicates itself across merges while it stays in the table.
#[derive(Debug)]
pub struct KeyRegistry {
    capacity: usize,
    entries: HashMap<Fingerprint, RegistryEntry>,
    next_surrogate: u64,
    clock: u64,
}

impl KeyRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            next_surrogate: 0,
            clock: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the key for the `occurrence`-th identical keyless record in a batch.
    pub fn key_for(
        &mut self,
        chat_id: ChatId,
        role: Role,
        content: &str,
        occurrence: u32,
    ) -> (SurrogateId, SyntheticKey) {
        let content_hash = content_hash(content);
        let fingerprint = Fingerprint {
            chat_id,
            role,
            content_hash,
            occurrence,
        };
        self.clock += 1;

        if let Some(entry) = self.entries.get_mut(&fingerprint) {
            entry.last_used = self.clock;
            return (entry.surrogate, entry.key.clone());
        }

        let surrogate = SurrogateId(self.next_surrogate);
        self.next_surrogate += 1;
        let key = SyntheticKey(format!("{role}-{content_hash:016x}-{}", surrogate.0));
        self.entries.insert(
            fingerprint,
            RegistryEntry {
                surrogate,
                key: key.clone(),
                last_used: self.clock,
            },
        );
        self.evict_over_capacity();

        (surrogate, key)
    }

    fn evict_over_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(fingerprint, _)| fingerprint.clone())
            else {
                return;
            };
            self.entries.remove(&oldest);
        }
    }
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_CACHE_CAPACITY)
    }
}

fn content_hash(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}
