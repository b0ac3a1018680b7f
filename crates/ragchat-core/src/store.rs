//! In-memory conversation state owned by the UI task.
//!
//! Backend work happens elsewhere and reports back as [`StoreEvent`]s; the
//! store applies them in arrival order and is the only place the conversation
//! list and the active thread change.

use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::api::ApiError;
use crate::state::{Conversation, ConversationId, Message, Role, TextSegment};

/// Identifies one send-then-stream cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(u64);

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything the exchange controller needs to run one exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    pub id: ExchangeId,
    pub text: String,
    /// `None` means a conversation has to be created first
    pub conversation: Option<ConversationId>,
}

impl ExchangeRequest {
    /// Build a request outside of a store, e.g. for one-shot commands
    pub fn standalone(text: &str, conversation: Option<ConversationId>) -> Result<Self, SendRejected> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendRejected::Empty);
        }
        Ok(Self {
            id: ExchangeId(0),
            text: text.to_string(),
            conversation,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendRejected {
    #[error("message is empty")]
    Empty,
    #[error("a reply is still streaming")]
    Busy,
}

/// User-facing summary of a failed backend operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub message: String,
    pub requires_login: bool,
}

impl From<&ApiError> for Failure {
    fn from(error: &ApiError) -> Self {
        Self {
            message: error.user_message(),
            requires_login: error.requires_login(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ConversationCreated {
        exchange: ExchangeId,
        conversation: Conversation,
    },
    ExchangeStarted {
        exchange: ExchangeId,
        conversation: ConversationId,
        text: String,
    },
    /// `content` is the full accumulated reply so far, not a delta
    ExchangeChunk {
        exchange: ExchangeId,
        conversation: ConversationId,
        content: String,
    },
    ExchangeFinished {
        exchange: ExchangeId,
        conversation: ConversationId,
    },
    ExchangeFailed {
        exchange: ExchangeId,
        failure: Failure,
    },
    ConversationsRefreshed(Vec<Conversation>),
    ConversationsRefreshFailed(Failure),
    ThreadLoaded {
        conversation: ConversationId,
        messages: Vec<Message>,
    },
    ThreadLoadFailed {
        conversation: ConversationId,
        failure: Failure,
    },
    ConversationRenamed(Conversation),
    RenameFailed {
        conversation: ConversationId,
        failure: Failure,
    },
}

impl StoreEvent {
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            StoreEvent::ExchangeFailed { failure, .. }
            | StoreEvent::ConversationsRefreshFailed(failure)
            | StoreEvent::ThreadLoadFailed { failure, .. }
            | StoreEvent::RenameFailed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct InFlight {
    exchange: ExchangeId,
    conversation: Option<ConversationId>,
    /// A thread load arrived mid-exchange and has to be repeated afterwards
    reload_thread: bool,
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active: Option<ConversationId>,
    thread: Vec<Message>,
    in_flight: Option<InFlight>,
    next_exchange: u64,
    last_error: Option<String>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn active(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        let active = self.active.as_ref()?;
        self.conversations.iter().find(|c| &c.id == active)
    }

    pub fn thread(&self) -> &[Message] {
        &self.thread
    }

    /// True from `prepare_exchange` until the exchange finishes or fails
    pub fn is_streaming(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Switch the active conversation. Returns false if it was already active.
    ///
    /// The thread is emptied right away and filled by a later `ThreadLoaded`;
    /// any exchange still streaming into the old thread is orphaned.
    pub fn select(&mut self, id: ConversationId) -> bool {
        if self.active.as_ref() == Some(&id) {
            return false;
        }
        if let Some(in_flight) = self.in_flight.take() {
            debug!(exchange = %in_flight.exchange, "orphaning in-flight exchange");
        }
        self.active = Some(id);
        self.thread.clear();
        self.last_error = None;
        true
    }

    /// Deselect everything so the next message starts a new conversation
    pub fn start_new(&mut self) {
        self.in_flight = None;
        self.active = None;
        self.thread.clear();
        self.last_error = None;
    }

    /// Drop all conversation state, e.g. on logout. Exchange ids keep counting
    /// so events from a previous session can never match a new exchange.
    pub fn reset(&mut self) {
        self.start_new();
        self.conversations.clear();
    }

    /// Validate a send and mark the thread busy until it completes
    pub fn prepare_exchange(&mut self, text: &str) -> Result<ExchangeRequest, SendRejected> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendRejected::Empty);
        }
        if self.in_flight.is_some() {
            return Err(SendRejected::Busy);
        }

        self.next_exchange += 1;
        let id = ExchangeId(self.next_exchange);
        self.in_flight = Some(InFlight {
            exchange: id,
            conversation: self.active.clone(),
            reload_thread: false,
        });
        self.last_error = None;

        Ok(ExchangeRequest {
            id,
            text: text.to_string(),
            conversation: self.active.clone(),
        })
    }

    /// Apply one event. Returns a conversation whose thread the caller should
    /// now load: one the list refresh auto-selected, or one whose load was held
    /// back while a reply streamed into it.
    pub fn apply(&mut self, event: StoreEvent) -> Option<ConversationId> {
        match event {
            StoreEvent::ConversationCreated {
                exchange,
                conversation,
            } => {
                self.conversations.retain(|c| c.id != conversation.id);
                let id = conversation.id.clone();
                self.conversations.insert(0, conversation);

                let creating = matches!(
                    &self.in_flight,
                    Some(f) if f.exchange == exchange && f.conversation.is_none()
                );
                if creating && self.active.is_none() {
                    self.active = Some(id.clone());
                    self.thread.clear();
                    if let Some(in_flight) = self.in_flight.as_mut() {
                        in_flight.conversation = Some(id);
                    }
                }
            }
            StoreEvent::ExchangeStarted {
                exchange,
                conversation,
                text,
            } => {
                if self.targets_active(exchange, &conversation) {
                    self.thread.push(Message::user(text));
                    self.thread.push(Message::placeholder());
                }
            }
            StoreEvent::ExchangeChunk {
                exchange,
                conversation,
                content,
            } => {
                if !self.targets_active(exchange, &conversation) {
                    debug!(%exchange, "dropping chunk for inactive exchange");
                    return None;
                }
                if let Some(last) = self.thread.last_mut() {
                    if last.role == Role::Assistant {
                        last.content = vec![TextSegment { text: content }];
                    }
                }
            }
            StoreEvent::ExchangeFinished { exchange, .. } => {
                if self.owns_in_flight(exchange) {
                    return self.finish_in_flight();
                }
            }
            StoreEvent::ExchangeFailed { exchange, failure } => {
                if self.owns_in_flight(exchange) {
                    self.last_error = Some(format!("Message not sent: {}", failure.message));
                    return self.finish_in_flight();
                }
            }
            StoreEvent::ConversationsRefreshed(conversations) => {
                self.conversations = conversations;
                if self.active.is_none() && self.in_flight.is_none() {
                    if let Some(first) = self.conversations.first() {
                        let id = first.id.clone();
                        self.active = Some(id.clone());
                        self.thread.clear();
                        return Some(id);
                    }
                }
            }
            StoreEvent::ConversationsRefreshFailed(failure) => {
                self.last_error = Some(format!("Could not load conversations: {}", failure.message));
            }
            StoreEvent::ThreadLoaded {
                conversation,
                messages,
            } => {
                if self.active.as_ref() != Some(&conversation) {
                    return None;
                }
                match self.in_flight.as_mut() {
                    // Replacing the thread now would drop the streaming reply
                    Some(in_flight) if in_flight.conversation.as_ref() == Some(&conversation) => {
                        debug!(exchange = %in_flight.exchange, "holding thread load until the reply ends");
                        in_flight.reload_thread = true;
                    }
                    _ => self.thread = messages,
                }
            }
            StoreEvent::ThreadLoadFailed {
                conversation,
                failure,
            } => {
                if self.active.as_ref() == Some(&conversation) {
                    self.last_error = Some(format!("Could not load conversation: {}", failure.message));
                }
            }
            StoreEvent::ConversationRenamed(renamed) => {
                if let Some(existing) = self.conversations.iter_mut().find(|c| c.id == renamed.id) {
                    existing.title = renamed.title;
                }
            }
            StoreEvent::RenameFailed { failure, .. } => {
                self.last_error = Some(format!("Rename failed: {}", failure.message));
            }
        }
        None
    }

    /// Clear the in-flight marker; returns the conversation to reload if a
    /// load was held back
    fn finish_in_flight(&mut self) -> Option<ConversationId> {
        let in_flight = self.in_flight.take()?;
        if !in_flight.reload_thread {
            return None;
        }
        let conversation = in_flight.conversation?;
        (self.active.as_ref() == Some(&conversation)).then_some(conversation)
    }

    fn owns_in_flight(&self, exchange: ExchangeId) -> bool {
        matches!(&self.in_flight, Some(f) if f.exchange == exchange)
    }

    fn targets_active(&self, exchange: ExchangeId, conversation: &ConversationId) -> bool {
        self.owns_in_flight(exchange)
            && self.in_flight.as_ref().and_then(|f| f.conversation.as_ref()) == Some(conversation)
            && self.active.as_ref() == Some(conversation)
    }
}
