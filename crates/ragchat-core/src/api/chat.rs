use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::debug;

use super::client::{checked, send_json, ApiClient};
use super::error::{ApiError, ApiResult};
use crate::backend::{ChatBackend, ChunkStream};
use crate::state::{Conversation, ConversationId, Message};

#[derive(Serialize)]
struct NewChatRequest<'a> {
    title: &'a str,
}

#[derive(Serialize)]
struct RenameChatRequest<'a> {
    chat_id: &'a str,
    title: &'a str,
}

#[derive(Serialize)]
struct StreamRequest<'a> {
    message: &'a str,
    chat_id: &'a str,
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn list_conversations(&self) -> ApiResult<Vec<Conversation>> {
        send_json(self.get("/chats")?).await
    }

    async fn load_thread(&self, id: &ConversationId) -> ApiResult<Vec<Message>> {
        send_json(self.get(&format!("/chat/{}", id))?).await
    }

    async fn create_conversation(&self, title: &str) -> ApiResult<Conversation> {
        send_json(self.post("/chat/new")?.json(&NewChatRequest { title })).await
    }

    async fn rename_conversation(&self, id: &ConversationId, title: &str) -> ApiResult<Conversation> {
        let request = RenameChatRequest {
            chat_id: id.as_str(),
            title,
        };
        send_json(self.post("/chat/rename")?.json(&request)).await
    }

    async fn stream_exchange(&self, message: &str, id: &ConversationId) -> ApiResult<ChunkStream> {
        let request = StreamRequest {
            message,
            chat_id: id.as_str(),
        };

        let response = checked(self.post("/chat/stream")?.json(&request).send().await?).await?;
        debug!(chat_id = %id, status = %response.status(), "stream opened");

        Ok(response.bytes_stream().map_err(ApiError::from).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::testing::{http_response, serve_once};
    use reqwest::StatusCode;

    #[test]
    fn test_request_bodies() {
        let body = serde_json::to_value(StreamRequest {
            message: "Hello",
            chat_id: "c1",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"message": "Hello", "chat_id": "c1"}));

        let body = serde_json::to_value(RenameChatRequest {
            chat_id: "c1",
            title: "Trip plans",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"chat_id": "c1", "title": "Trip plans"}));
    }

    #[tokio::test]
    async fn test_calls_without_session_fail_before_sending() {
        let client = ApiClient::new("http://127.0.0.1:9");
        let err = client.list_conversations().await.unwrap_err();
        assert!(matches!(err, ApiError::NotAuthenticated));

        let err = client
            .stream_exchange("hi", &ConversationId::new("c1"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_http_401_maps_to_unauthorized() {
        let (url, server) = serve_once(http_response("401 Unauthorized", r#"{"detail":"expired"}"#)).await;
        let client = ApiClient::new(&url).with_session(Session::new("stale"));

        let err = client.list_conversations().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert!(err.requires_login());

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /chats "));
        assert!(request.to_lowercase().contains("authorization: bearer stale"));
    }

    #[tokio::test]
    async fn test_stream_error_status_fails_before_body() {
        let (url, server) = serve_once(http_response("500 Internal Server Error", "boom")).await;
        let client = ApiClient::new(&url).with_session(Session::new("tok"));

        let err = client
            .stream_exchange("Hello", &ConversationId::new("c1"))
            .await
            .err()
            .unwrap();
        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /chat/stream "));
        assert!(request.contains(r#""chat_id":"c1""#));
    }

    #[tokio::test]
    async fn test_stream_yields_body_bytes() {
        let (url, _server) = serve_once(http_response("200 OK", "Hi there!")).await;
        let client = ApiClient::new(&url).with_session(Session::new("tok"));

        let stream = client
            .stream_exchange("Hello", &ConversationId::new("c1"))
            .await
            .ok()
            .unwrap();
        let chunks: Vec<_> = stream.try_collect().await.unwrap();
        let body: Vec<u8> = chunks.concat();
        assert_eq!(body, b"Hi there!");
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid_body() {
        let (url, _server) = serve_once(http_response("200 OK", "not json")).await;
        let client = ApiClient::new(&url).with_session(Session::new("tok"));

        let err = client.list_conversations().await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidBody(_)));
    }
}
