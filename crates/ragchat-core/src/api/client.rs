use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::{ApiError, ApiResult};
use crate::session::Session;

/// HTTP client for the chat backend.
///
/// Cheap to clone; the underlying connection pool is shared. Authenticated
/// endpoints require a [`Session`] attached through [`ApiClient::with_session`].
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Option<Session>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            session: None,
        }
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    pub(crate) fn get(&self, path: &str) -> ApiResult<RequestBuilder> {
        debug!(path, "GET");
        self.authorized(self.client.get(self.url(path)))
    }

    pub(crate) fn post(&self, path: &str) -> ApiResult<RequestBuilder> {
        debug!(path, "POST");
        self.authorized(self.client.post(self.url(path)))
    }

    fn authorized(&self, builder: RequestBuilder) -> ApiResult<RequestBuilder> {
        let session = self.session.as_ref().ok_or(ApiError::NotAuthenticated)?;
        Ok(builder.header(AUTHORIZATION, session.bearer()))
    }
}

/// Send a request and decode its JSON body
pub(crate) async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> ApiResult<T> {
    let response = checked(builder.send().await?).await?;
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| ApiError::InvalidBody(e.to_string()))
}

/// Turn a non-success status into an error, pass successful responses through
pub(crate) async fn checked(response: Response) -> ApiResult<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ApiError::from_response(response).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = ApiClient::new("http://localhost:8000/");
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(client.url("/chats"), "http://localhost:8000/chats");
    }

    #[test]
    fn test_requests_need_a_session() {
        let client = ApiClient::new("http://localhost:8000");
        assert!(matches!(client.get("/chats"), Err(ApiError::NotAuthenticated)));

        let client = client.with_session(Session::new("abc"));
        let request = client.get("/chats").unwrap().build().unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer abc");
        assert_eq!(client.session().map(Session::token), Some("abc"));
    }
}
