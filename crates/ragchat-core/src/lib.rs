pub mod api;
pub mod backend;
pub mod config;
pub mod decode;
pub mod exchange;
pub mod session;
pub mod state;
pub mod store;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use api::{ApiClient, ApiError, ApiResult};
pub use backend::{ChatBackend, ChunkStream};
pub use config::Config;
pub use exchange::{ExchangeController, ExchangeOutcome};
pub use session::{Session, UserProfile};
pub use state::{Conversation, ConversationId, Message, Role, TextSegment};
pub use store::{ConversationStore, ExchangeId, ExchangeRequest, Failure, SendRejected, StoreEvent};
