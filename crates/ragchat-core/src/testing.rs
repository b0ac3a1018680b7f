//! In-memory chat backend for controller tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use reqwest::StatusCode;

use crate::api::{ApiError, ApiResult};
use crate::backend::{ChatBackend, ChunkStream};
use crate::state::{Conversation, ConversationId, Message};

#[derive(Default)]
struct Inner {
    conversations: Vec<Conversation>,
    threads: HashMap<ConversationId, Vec<Message>>,
    created_titles: Vec<String>,
    server_title: Option<String>,
    create_failure: Option<StatusCode>,
    stream_failure: Option<StatusCode>,
    list_calls: usize,
    stream_calls: usize,
    next_id: usize,
}

#[derive(Default)]
pub struct FakeBackend {
    inner: Mutex<Inner>,
    chunks: Vec<Vec<u8>>,
    trailing_error: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunks(mut self, chunks: &[&str]) -> Self {
        self.chunks = chunks.iter().map(|c| c.as_bytes().to_vec()).collect();
        self
    }

    pub fn with_byte_chunks(mut self, chunks: Vec<Vec<u8>>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_trailing_error(mut self) -> Self {
        self.trailing_error = true;
        self
    }

    /// Newest first, like the real listing
    pub fn add_conversation(&self, id: &str, title: &str) {
        self.inner.lock().unwrap().conversations.insert(
            0,
            Conversation {
                id: ConversationId::new(id),
                title: title.to_string(),
            },
        );
    }

    pub fn set_thread(&self, id: &str, messages: Vec<Message>) {
        self.inner
            .lock()
            .unwrap()
            .threads
            .insert(ConversationId::new(id), messages);
    }

    /// Title the server assigns once a conversation has streamed a reply
    pub fn set_server_title(&self, title: &str) {
        self.inner.lock().unwrap().server_title = Some(title.to_string());
    }

    pub fn fail_create(&self, status: StatusCode) {
        self.inner.lock().unwrap().create_failure = Some(status);
    }

    pub fn fail_stream(&self, status: StatusCode) {
        self.inner.lock().unwrap().stream_failure = Some(status);
    }

    pub fn created_titles(&self) -> Vec<String> {
        self.inner.lock().unwrap().created_titles.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.inner.lock().unwrap().list_calls
    }

    pub fn stream_calls(&self) -> usize {
        self.inner.lock().unwrap().stream_calls
    }
}

fn status_error(status: StatusCode) -> ApiError {
    ApiError::Status {
        status,
        body: "fake failure".to_string(),
    }
}

fn not_found() -> ApiError {
    status_error(StatusCode::NOT_FOUND)
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn list_conversations(&self) -> ApiResult<Vec<Conversation>> {
        let mut inner = self.inner.lock().unwrap();
        inner.list_calls += 1;
        Ok(inner.conversations.clone())
    }

    async fn load_thread(&self, id: &ConversationId) -> ApiResult<Vec<Message>> {
        let inner = self.inner.lock().unwrap();
        if !inner.conversations.iter().any(|c| &c.id == id) {
            return Err(not_found());
        }
        Ok(inner.threads.get(id).cloned().unwrap_or_default())
    }

    async fn create_conversation(&self, title: &str) -> ApiResult<Conversation> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(status) = inner.create_failure {
            return Err(status_error(status));
        }
        inner.next_id += 1;
        let conversation = Conversation {
            id: ConversationId::new(format!("chat-{}", inner.next_id)),
            title: title.to_string(),
        };
        inner.created_titles.push(title.to_string());
        inner.conversations.insert(0, conversation.clone());
        Ok(conversation)
    }

    async fn rename_conversation(&self, id: &ConversationId, title: &str) -> ApiResult<Conversation> {
        let mut inner = self.inner.lock().unwrap();
        let conversation = inner
            .conversations
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(not_found)?;
        conversation.title = title.to_string();
        Ok(conversation.clone())
    }

    async fn stream_exchange(&self, _message: &str, id: &ConversationId) -> ApiResult<ChunkStream> {
        let mut inner = self.inner.lock().unwrap();
        inner.stream_calls += 1;
        if let Some(status) = inner.stream_failure {
            return Err(status_error(status));
        }
        if let Some(title) = inner.server_title.clone() {
            if let Some(conversation) = inner.conversations.iter_mut().find(|c| &c.id == id) {
                conversation.title = title;
            }
        }

        let mut items: Vec<ApiResult<Bytes>> = self
            .chunks
            .iter()
            .map(|c| Ok(Bytes::from(c.clone())))
            .collect();
        if self.trailing_error {
            items.push(Err(ApiError::InvalidBody("connection reset".to_string())));
        }
        Ok(stream::iter(items).boxed())
    }
}

/// Canned HTTP/1.1 response with a JSON content type
pub fn http_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    )
}

/// Serve a single request on a local port with `response`. Returns the base
/// URL and a handle resolving to the raw request that was received.
pub async fn serve_once(response: String) -> (String, tokio::task::JoinHandle<String>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];

        // Read the headers, then as much body as Content-Length announces
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let body_len = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= end + 4 + body_len {
                    break;
                }
            }
        }

        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&request).to_string()
    });

    (format!("http://{}", addr), handle)
}
