use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single backend operation
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("session expired or credentials rejected")]
    Unauthorized,

    #[error("not signed in")]
    NotAuthenticated,

    #[error("incorrect username or password")]
    InvalidCredentials,

    #[error("unexpected response body: {0}")]
    InvalidBody(String),

    #[error("{0}")]
    InvalidInput(String),
}

impl ApiError {
    /// Map a non-success response into an error, keeping a short body excerpt
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return ApiError::Unauthorized;
        }
        let body = response.text().await.unwrap_or_default();
        ApiError::Status {
            status,
            body: excerpt(&body, 200),
        }
    }

    /// Whether the caller should send the user back to the login screen
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::NotAuthenticated)
    }

    /// Short, generic description suitable for a status line
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Transport(_) => "Could not reach the server".to_string(),
            ApiError::Status { status, .. } => format!("Server error ({})", status.as_u16()),
            ApiError::Unauthorized => "Session expired, please sign in again".to_string(),
            ApiError::NotAuthenticated => "Please sign in first".to_string(),
            ApiError::InvalidCredentials => "Incorrect username or password".to_string(),
            ApiError::InvalidBody(_) => "Unexpected response from server".to_string(),
            ApiError::InvalidInput(msg) => msg.clone(),
        }
    }
}

fn excerpt(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
