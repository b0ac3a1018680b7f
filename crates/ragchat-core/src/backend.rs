use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::api::ApiResult;
use crate::state::{Conversation, ConversationId, Message};

/// Raw response body of a streaming exchange, in delivery order
pub type ChunkStream = BoxStream<'static, ApiResult<Bytes>>;

/// The chat endpoints the exchange controller drives.
///
/// [`ApiClient`](crate::ApiClient) is the HTTP implementation; tests plug in
/// an in-memory one.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_conversations(&self) -> ApiResult<Vec<Conversation>>;

    async fn load_thread(&self, id: &ConversationId) -> ApiResult<Vec<Message>>;

    async fn create_conversation(&self, title: &str) -> ApiResult<Conversation>;

    async fn rename_conversation(&self, id: &ConversationId, title: &str) -> ApiResult<Conversation>;

    /// Start the exchange and hand back the body once the server accepted it
    async fn stream_exchange(&self, message: &str, id: &ConversationId) -> ApiResult<ChunkStream>;
}
