use std::borrow::Cow;

use zova_model::{ChatId, Message, Role};

/// Which input the selector picked for this render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectedSource {
    /// Live buffer holds streaming or unconfirmed messages.
    LiveOptimistic,
    /// A just-finished answer has not reached the paginated view yet.
    LiveSyncLag,
    Paginated,
    LiveFallback,
}

impl SelectedSource {
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Paginated)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection<'a> {
    pub source: SelectedSource,
    pub messages: Cow<'a, [Message]>,
}

impl Selection<'_> {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_owned(self) -> Vec<Message> {
        self.messages.into_owned()
    }
}

/// Picks the authoritative message array for the current render.
///
/// Live messages from other chats are dropped before any rule is evaluated. Rules, first match
/// wins: optimistic live state, sync lag of the newest assistant answer, the paginated source
/// when preferred and settled, and finally the live buffer.
pub fn select_effective_messages<'a>(
    live_messages: &'a [Message],
    paginated_messages: &'a [Message],
    current_chat_id: &ChatId,
    prefer_paginated_source: bool,
    is_paginated_loading: bool,
) -> Selection<'a> {
    let live = scope_to_chat(live_messages, current_chat_id);

    if live.iter().any(Message::is_optimistic) {
        return pick(SelectedSource::LiveOptimistic, live);
    }

    if has_sync_lag(&live, paginated_messages) {
        return pick(SelectedSource::LiveSyncLag, live);
    }

    if prefer_paginated_source
        && !current_chat_id.is_local()
        && !is_paginated_loading
        && !paginated_messages.is_empty()
    {
        return pick(
            SelectedSource::Paginated,
            Cow::Borrowed(paginated_messages),
        );
    }

    pick(SelectedSource::LiveFallback, live)
}

fn pick(source: SelectedSource, messages: Cow<'_, [Message]>) -> Selection<'_> {
    tracing::trace!(?source, count = messages.len(), "selected effective messages");
    Selection { source, messages }
}

fn scope_to_chat<'a>(messages: &'a [Message], chat_id: &ChatId) -> Cow<'a, [Message]> {
    if messages.iter().all(|message| message.chat_id == *chat_id) {
        return Cow::Borrowed(messages);
    }

    Cow::Owned(
        messages
            .iter()
            .filter(|message| message.chat_id == *chat_id)
            .cloned()
            .collect(),
    )
}

/// True when the newest live assistant answer is finished but missing from the paginated view.
fn has_sync_lag(live: &[Message], paginated: &[Message]) -> bool {
    let Some(latest) = live
        .iter()
        .rev()
        .find(|message| message.role == Role::Assistant)
    else {
        return false;
    };

    if !latest.is_persisted() || latest.is_streaming() || latest.content.is_empty() {
        return false;
    }

    !contains_counterpart(paginated, latest)
}

fn contains_counterpart(paginated: &[Message], message: &Message) -> bool {
    if message.has_stable_key() {
        let key = message.identity_key();
        return paginated
            .iter()
            .any(|candidate| candidate.identity_key() == key);
    }

    // Without a backend id the only signal left is identical text from the same speaker,
    // which cannot tell two identical consecutive replies apart.
    paginated
        .iter()
        .any(|candidate| candidate.role == message.role && candidate.content == message.content)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;
    use zova_model::{ClientMessageId, ConversationId, LocalChatId, MessageId, Timestamp};

    use super::*;

    fn chat(seed: u128) -> ChatId {
        ChatId::Remote(ConversationId::new(Uuid::from_u128(seed)))
    }

    fn persisted(seed: u128, chat_id: ChatId, role: Role, content: &str, millis: i64) -> Message {
        Message::persisted(
            MessageId::new(Uuid::from_u128(seed)),
            chat_id,
            role,
            content,
            Timestamp(millis),
        )
    }

    fn local(seed: u128, chat_id: ChatId, role: Role, content: &str, millis: i64) -> Message {
        Message::local(
            ClientMessageId::new(Uuid::from_u128(seed)),
            chat_id,
            role,
            content,
            Timestamp(millis),
        )
    }

    #[test]
    fn streaming_live_message_beats_preferred_paginated() {
        let current = chat(1);
        let live = vec![
            local(10, current, Role::User, "question", 100).confirmed(None),
            Message::assistant_streaming(ClientMessageId::new(Uuid::from_u128(11)), current, Timestamp(110)),
        ];
        let paginated = vec![persisted(90, chat(2), Role::User, "elsewhere", 5)];

        let selection = select_effective_messages(&live, &paginated, &current, true, false);

        assert_eq!(selection.source, SelectedSource::LiveOptimistic);
        assert_eq!(selection.messages.as_ref(), live.as_slice());
    }

    #[test]
    fn settled_state_returns_paginated_verbatim() {
        let current = chat(1);
        let live = vec![persisted(1, current, Role::User, "hi", 100)];
        let paginated = vec![
            persisted(1, current, Role::User, "hi", 100),
            persisted(2, current, Role::Assistant, "hello", 200),
        ];

        let selection = select_effective_messages(&live, &paginated, &current, true, false);

        assert_eq!(selection.source, SelectedSource::Paginated);
        assert!(matches!(selection.messages, Cow::Borrowed(_)));
        assert_eq!(selection.messages.as_ref(), paginated.as_slice());
    }

    #[test]
    fn finished_answer_missing_from_paginated_keeps_live() {
        let current = chat(1);
        let live = vec![
            persisted(1, current, Role::User, "hi", 100),
            persisted(2, current, Role::Assistant, "fresh answer", 200),
        ];
        let paginated = vec![persisted(1, current, Role::User, "hi", 100)];

        let selection = select_effective_messages(&live, &paginated, &current, true, false);
        assert_eq!(selection.source, SelectedSource::LiveSyncLag);
    }

    #[test]
    fn sync_lag_falls_back_to_content_match_without_server_id() {
        let current = chat(1);
        let answer = local(2, current, Role::Assistant, "same words", 200).confirmed(None);
        let live = vec![answer];
        let paginated = vec![persisted(7, current, Role::Assistant, "same words", 200)];

        let selection = select_effective_messages(&live, &paginated, &current, true, false);
        assert_eq!(selection.source, SelectedSource::Paginated);
    }

    #[test]
    fn empty_finished_answer_does_not_hold_live() {
        let current = chat(1);
        let live = vec![persisted(2, current, Role::Assistant, "", 200)];
        let paginated = vec![persisted(1, current, Role::User, "hi", 100)];

        let selection = select_effective_messages(&live, &paginated, &current, true, false);
        assert_eq!(selection.source, SelectedSource::Paginated);
    }

    #[test]
    fn stale_chat_entries_are_filtered_before_precedence() {
        let current = chat(1);
        let live = vec![
            Message::assistant_streaming(ClientMessageId::new(Uuid::from_u128(5)), chat(2), Timestamp(1)),
            persisted(1, current, Role::User, "hi", 100),
        ];
        let paginated = vec![persisted(1, current, Role::User, "hi", 100)];

        let selection = select_effective_messages(&live, &paginated, &current, true, false);
        assert_eq!(selection.source, SelectedSource::Paginated);

        let selection = select_effective_messages(&live, &paginated, &current, false, false);
        assert_eq!(selection.source, SelectedSource::LiveFallback);
        assert_eq!(selection.len(), 1);
        assert_eq!(selection.messages[0].chat_id, current);
    }

    #[test]
    fn local_chat_and_loading_state_suppress_paginated() {
        let local_chat = ChatId::Local(LocalChatId::new(Uuid::from_u128(3)));
        let live = vec![persisted(1, local_chat, Role::User, "hi", 100)];
        let paginated = vec![persisted(1, local_chat, Role::User, "hi", 100)];

        let selection = select_effective_messages(&live, &paginated, &local_chat, true, false);
        assert_eq!(selection.source, SelectedSource::LiveFallback);

        let current = chat(1);
        let live = vec![persisted(1, current, Role::User, "hi", 100)];
        let selection = select_effective_messages(&live, &paginated, &current, true, true);
        assert_eq!(selection.source, SelectedSource::LiveFallback);

        let selection = select_effective_messages(&live, &[], &current, true, false);
        assert_eq!(selection.source, SelectedSource::LiveFallback);
    }
}
