use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use zova_model::{Message, MessageNormalizer, ModelResult, RawMessage};

use crate::settings::{SettingsStore, TimelineSettings};

/// Shared collaborators handed to every timeline component at construction.
///
/// Replaces process-wide registries: each timeline (or group of timelines sharing a key
/// table) gets its own context.
#[derive(Debug, Clone)]
pub struct TimelineContext {
    settings: Arc<ArcSwap<TimelineSettings>>,
    normalizer: Arc<Mutex<MessageNormalizer>>,
}

impl TimelineContext {
    pub fn new(settings: TimelineSettings) -> Self {
        Self::with_shared(Arc::new(ArcSwap::from_pointee(settings.normalized())))
    }

    /// Follows the store: settings it reloads reach this context.
    pub fn from_store(store: &SettingsStore) -> Self {
        Self::with_shared(store.shared())
    }

    fn with_shared(settings: Arc<ArcSwap<TimelineSettings>>) -> Self {
        let normalizer = MessageNormalizer::new(settings.load().key_cache_capacity);
        Self {
            settings,
            normalizer: Arc::new(Mutex::new(normalizer)),
        }
    }

    /// Current settings. Read again after a reload to see new values.
    pub fn settings(&self) -> Arc<TimelineSettings> {
        self.settings.load_full()
    }

    /// Resolves one boundary record into a typed message.
    pub fn normalize(&self, raw: RawMessage) -> ModelResult<Message> {
        self.normalizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .normalize(raw)
    }

    /// Resolves a batch of boundary records, dropping ones with unusable chat ids.
    pub fn normalize_batch(&self, records: Vec<RawMessage>) -> Vec<Message> {
        self.normalizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .normalize_batch(records)
    }
}

impl Default for TimelineContext {
    fn default() -> Self {
        Self::new(TimelineSettings::default())
    }
}
