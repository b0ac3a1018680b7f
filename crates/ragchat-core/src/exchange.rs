use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ApiResult};
use crate::backend::ChatBackend;
use crate::decode::Utf8ChunkDecoder;
use crate::state::{Conversation, ConversationId};
use crate::store::{ExchangeId, ExchangeRequest, Failure, StoreEvent};

/// Words of the first message used as a new conversation's provisional title
const PROVISIONAL_TITLE_WORDS: usize = 8;

/// Result of a completed exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    pub conversation: ConversationId,
    pub content: String,
}

/// Runs backend operations and reports every state change as a [`StoreEvent`].
///
/// Clones share the backend and the event channel, so each operation can be
/// moved onto its own task.
#[derive(Clone)]
pub struct ExchangeController {
    backend: Arc<dyn ChatBackend>,
    events: mpsc::UnboundedSender<StoreEvent>,
}

impl ExchangeController {
    pub fn new(backend: Arc<dyn ChatBackend>, events: mpsc::UnboundedSender<StoreEvent>) -> Self {
        Self { backend, events }
    }

    /// Send one message and stream the reply.
    ///
    /// Creates the conversation first when the request has none. The
    /// conversation list is refreshed afterwards whether or not the exchange
    /// succeeded.
    pub async fn send_message(&self, request: ExchangeRequest) -> ApiResult<ExchangeOutcome> {
        let result = self.run_exchange(&request).await;
        // A failed refresh is already reported as its own event
        self.refresh_conversations().await.ok();
        result
    }

    async fn run_exchange(&self, request: &ExchangeRequest) -> ApiResult<ExchangeOutcome> {
        let exchange = request.id;

        let conversation = match &request.conversation {
            Some(id) => id.clone(),
            None => {
                let title = provisional_title(&request.text);
                let created = self
                    .backend
                    .create_conversation(&title)
                    .await
                    .map_err(|e| self.fail(exchange, e))?;
                info!(%exchange, chat_id = %created.id, "conversation created");
                let id = created.id.clone();
                self.emit(StoreEvent::ConversationCreated {
                    exchange,
                    conversation: created,
                });
                id
            }
        };

        self.emit(StoreEvent::ExchangeStarted {
            exchange,
            conversation: conversation.clone(),
            text: request.text.clone(),
        });

        let mut stream = self
            .backend
            .stream_exchange(&request.text, &conversation)
            .await
            .map_err(|e| self.fail(exchange, e))?;

        let mut decoder = Utf8ChunkDecoder::new();
        let mut content = String::new();
        let mut chunks = 0usize;

        while let Some(item) = stream.next().await {
            let bytes = item.map_err(|e| self.fail(exchange, e))?;
            chunks += 1;
            let text = decoder.push(&bytes);
            if text.is_empty() {
                continue;
            }
            content.push_str(&text);
            let delivered = self.emit(StoreEvent::ExchangeChunk {
                exchange,
                conversation: conversation.clone(),
                content: content.clone(),
            });
            if !delivered {
                debug!(%exchange, "event receiver closed, abandoning stream");
                return Ok(ExchangeOutcome {
                    conversation,
                    content,
                });
            }
        }

        let tail = decoder.finish();
        if !tail.is_empty() {
            content.push_str(&tail);
            self.emit(StoreEvent::ExchangeChunk {
                exchange,
                conversation: conversation.clone(),
                content: content.clone(),
            });
        }

        self.emit(StoreEvent::ExchangeFinished {
            exchange,
            conversation: conversation.clone(),
        });
        info!(%exchange, chunks, chars = content.chars().count(), "exchange finished");

        Ok(ExchangeOutcome {
            conversation,
            content,
        })
    }

    /// Fetch the conversation list; the store replaces its copy wholesale
    pub async fn refresh_conversations(&self) -> ApiResult<Vec<Conversation>> {
        match self.backend.list_conversations().await {
            Ok(conversations) => {
                debug!(count = conversations.len(), "conversations refreshed");
                self.emit(StoreEvent::ConversationsRefreshed(conversations.clone()));
                Ok(conversations)
            }
            Err(e) => {
                warn!(error = %e, "conversation refresh failed");
                self.emit(StoreEvent::ConversationsRefreshFailed(Failure::from(&e)));
                Err(e)
            }
        }
    }

    pub async fn load_thread(&self, id: ConversationId) -> ApiResult<()> {
        match self.backend.load_thread(&id).await {
            Ok(messages) => {
                debug!(chat_id = %id, count = messages.len(), "thread loaded");
                self.emit(StoreEvent::ThreadLoaded {
                    conversation: id,
                    messages,
                });
                Ok(())
            }
            Err(e) => {
                warn!(chat_id = %id, error = %e, "thread load failed");
                self.emit(StoreEvent::ThreadLoadFailed {
                    conversation: id,
                    failure: Failure::from(&e),
                });
                Err(e)
            }
        }
    }

    pub async fn rename_conversation(&self, id: ConversationId, title: &str) -> ApiResult<Conversation> {
        let title = title.trim();
        let result = if title.is_empty() {
            Err(ApiError::InvalidInput("Title cannot be empty".to_string()))
        } else {
            self.backend.rename_conversation(&id, title).await
        };

        match result {
            Ok(renamed) => {
                info!(chat_id = %renamed.id, "conversation renamed");
                self.emit(StoreEvent::ConversationRenamed(renamed.clone()));
                Ok(renamed)
            }
            Err(e) => {
                warn!(chat_id = %id, error = %e, "rename failed");
                self.emit(StoreEvent::RenameFailed {
                    conversation: id,
                    failure: Failure::from(&e),
                });
                Err(e)
            }
        }
    }

    fn fail(&self, exchange: ExchangeId, error: ApiError) -> ApiError {
        warn!(%exchange, error = %error, "exchange failed");
        self.emit(StoreEvent::ExchangeFailed {
            exchange,
            failure: Failure::from(&error),
        });
        error
    }

    fn emit(&self, event: StoreEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

/// First few words of a message, used until the server names the conversation
pub fn provisional_title(text: &str) -> String {
    text.split_whitespace()
        .take(PROVISIONAL_TITLE_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}
