//! Keyed merges between the accumulated history buffer and incoming pages.
//!
//! The two entry points differ only in which side wins an identity-key conflict. The reactive
//! window overrides loaded copies; an older page never replaces what is already loaded. The two
//! directions do not commute.

use std::collections::HashMap;

use zova_model::{IdentityKey, Message};

/// Which side keeps its copy when both carry the same identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConflictWinner {
    Existing,
    Incoming,
}

/// Folds the reactive "latest N" window into everything loaded so far.
///
/// The window's copy wins every conflict. Entries outside the window (older pages) are kept as
/// they are. Output is sorted ascending by timestamp and unique by identity key.
pub fn merge_initial_page_with_loaded_messages(
    previously_loaded: &[Message],
    reactive_initial_page: &[Message],
) -> Vec<Message> {
    union_by_identity(previously_loaded, reactive_initial_page, ConflictWinner::Incoming)
}

/// Inserts a freshly fetched older page beneath everything loaded so far.
///
/// The already-loaded copy wins every conflict. Entries only in the older page land at their
/// sorted position. Output is sorted ascending by timestamp and unique by identity key.
pub fn prepend_older_messages(
    previously_loaded: &[Message],
    older_page: &[Message],
) -> Vec<Message> {
    union_by_identity(previously_loaded, older_page, ConflictWinner::Existing)
}

/// Stable timestamp sort; equal timestamps keep insertion order.
pub fn sort_by_timestamp(messages: &mut [Message]) {
    messages.sort_by_key(|message| message.timestamp);
}

/// True when `messages` is non-decreasing by timestamp.
pub fn is_sorted_by_timestamp(messages: &[Message]) -> bool {
    messages
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp)
}

fn union_by_identity(
    existing: &[Message],
    incoming: &[Message],
    winner: ConflictWinner,
) -> Vec<Message> {
    if incoming.is_empty() {
        return collapse(existing);
    }
    if existing.is_empty() {
        return collapse(incoming);
    }

    let mut merged = Vec::with_capacity(existing.len() + incoming.len());
    let mut slots: HashMap<IdentityKey, usize> = HashMap::with_capacity(merged.capacity());

    // Duplicates inside one input collapse to their last occurrence.
    for message in existing {
        upsert(&mut merged, &mut slots, message);
    }
    let existing_count = merged.len();

    let mut replaced = 0usize;
    let mut inserted = 0usize;
    for message in incoming {
        let key = message.identity_key();
        match slots.get(&key) {
            Some(&slot) if slot < existing_count => {
                if winner == ConflictWinner::Incoming {
                    merged[slot] = message.clone();
                    replaced += 1;
                }
            }
            Some(&slot) => merged[slot] = message.clone(),
            None => {
                slots.insert(key, merged.len());
                merged.push(message.clone());
                inserted += 1;
            }
        }
    }

    sort_by_timestamp(&mut merged);
    tracing::trace!(
        existing = existing.len(),
        incoming = incoming.len(),
        replaced,
        inserted,
        output = merged.len(),
        "merged message windows"
    );
    merged
}

fn collapse(messages: &[Message]) -> Vec<Message> {
    let mut merged = Vec::with_capacity(messages.len());
    let mut slots = HashMap::with_capacity(messages.len());
    for message in messages {
        upsert(&mut merged, &mut slots, message);
    }
    sort_by_timestamp(&mut merged);
    merged
}

fn upsert(merged: &mut Vec<Message>, slots: &mut HashMap<IdentityKey, usize>, message: &Message) {
    let key = message.identity_key();
    match slots.get(&key) {
        Some(&slot) => merged[slot] = message.clone(),
        None => {
            slots.insert(key, merged.len());
            merged.push(message.clone());
        }
    }
}
