#![deny(unsafe_code)]

//! Message data model shared by the timeline reconciliation layer.

use std::future::Future;
use std::pin::Pin;

pub mod error;
pub mod identity;
pub mod ids;
pub mod message;
pub mod normalize;
pub mod page;

pub use error::{FetchError, FetchResult, ModelError, ModelResult};
pub use identity::{
    DEFAULT_KEY_CACHE_CAPACITY, IdentityKey, KeyRegistry, SurrogateId, SyntheticKey, identity_key,
};
pub use ids::{ChatId, ClientMessageId, ConversationId, LOCAL_CHAT_PREFIX, LocalChatId, MessageId};
pub use message::{
    LocalKey, LocalMessage, Message, MessageOrigin, PersistedMessage, Role, Timestamp,
};
pub use normalize::{MessageNormalizer, RawMessage};
pub use page::{MessagePage, PageCursor, PageRequest};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Cursor-paginated history source for one chat.
///
/// Implementations perform the I/O; the timeline only awaits the result and never retries.
pub trait OlderPageFetcher: Send + Sync {
    fn fetch_older_page(&self, request: PageRequest) -> BoxFuture<'_, FetchResult<MessagePage>>;
}
