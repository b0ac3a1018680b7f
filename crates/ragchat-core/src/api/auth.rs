use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::client::{checked, send_json, ApiClient};
use super::error::{ApiError, ApiResult};
use crate::session::{Session, UserProfile};

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    token_type: String,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct ResetCodeRequest<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_password: Option<&'a str>,
}

#[derive(Deserialize)]
struct CodeCheck {
    valid: bool,
}

impl ApiClient {
    /// Exchange credentials for a bearer token and fetch the user's profile
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<Session> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(ApiError::InvalidInput(
                "Username and password are required".to_string(),
            ));
        }

        let response = self
            .http()
            .post(self.url("/token"))
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(username, "login rejected");
            return Err(ApiError::InvalidCredentials);
        }

        let response = checked(response).await?;
        let body = response.bytes().await?;
        let token: TokenResponse =
            serde_json::from_slice(&body).map_err(|e| ApiError::InvalidBody(e.to_string()))?;

        let session = Session::new(token.access_token);
        let user = self
            .clone()
            .with_session(session.clone())
            .current_user()
            .await?;

        info!(username = %user.username, "signed in");
        Ok(session.with_user(user))
    }

    pub async fn register(&self, username: &str, email: &str, password: &str) -> ApiResult<UserProfile> {
        if username.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(ApiError::InvalidInput(
                "Username, email and password are required".to_string(),
            ));
        }

        let request = RegisterRequest {
            username: username.trim(),
            email: email.trim(),
            password,
        };

        send_json(self.http().post(self.url("/users/register")).json(&request)).await
    }

    pub async fn current_user(&self) -> ApiResult<UserProfile> {
        send_json(self.get("/users/me")?).await
    }

    /// Ask the server to email a reset code. Succeeds whether or not the
    /// address belongs to an account.
    pub async fn request_password_reset(&self, email: &str) -> ApiResult<()> {
        let email = required(email, "Email is required")?;
        let request = ResetCodeRequest {
            email,
            code: None,
            new_password: None,
        };
        checked(
            self.http()
                .post(self.url("/auth/request-password-reset"))
                .json(&request)
                .send()
                .await?,
        )
        .await?;
        info!("password reset requested");
        Ok(())
    }

    pub async fn verify_reset_code(&self, email: &str, code: &str) -> ApiResult<bool> {
        let request = ResetCodeRequest {
            email: required(email, "Email is required")?,
            code: Some(required(code, "Code is required")?),
            new_password: None,
        };
        let check: CodeCheck =
            send_json(self.http().post(self.url("/auth/verify-reset-code")).json(&request)).await?;
        Ok(check.valid)
    }

    /// Set a new password. The server answers the same way for a wrong code,
    /// so callers check the code with [`ApiClient::verify_reset_code`] first.
    pub async fn reset_password(&self, email: &str, code: &str, new_password: &str) -> ApiResult<()> {
        if new_password.is_empty() {
            return Err(ApiError::InvalidInput("New password is required".to_string()));
        }
        let request = ResetCodeRequest {
            email: required(email, "Email is required")?,
            code: Some(required(code, "Code is required")?),
            new_password: Some(new_password),
        };
        checked(
            self.http()
                .post(self.url("/auth/reset-password"))
                .json(&request)
                .send()
                .await?,
        )
        .await?;
        info!("password reset");
        Ok(())
    }
}

fn required<'a>(value: &'a str, message: &str) -> ApiResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(ApiError::InvalidInput(message.to_string()))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{http_response, serve_once};

    #[tokio::test]
    async fn test_login_rejection_is_invalid_credentials() {
        let (url, server) = serve_once(http_response(
            "401 Unauthorized",
            r#"{"detail":"Incorrect username or password"}"#,
        ))
        .await;
        let client = ApiClient::new(&url);

        let err = client.login(" ana ", "wrong").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));
        assert!(!err.requires_login());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /token "));
        assert!(request.contains("username=ana&password=wrong"));
    }

    #[tokio::test]
    async fn test_login_validates_before_sending() {
        let client = ApiClient::new("http://127.0.0.1:9");
        let err = client.login("  ", "pw").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_verify_reset_code_reads_validity() {
        let (url, server) = serve_once(http_response("200 OK", r#"{"valid":false}"#)).await;
        let client = ApiClient::new(&url);

        assert!(!client.verify_reset_code("ana@example.com", " 123456 ").await.unwrap());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /auth/verify-reset-code "));
        assert!(request.contains(r#"{"email":"ana@example.com","code":"123456"}"#));
    }

    #[tokio::test]
    async fn test_reset_password_sends_new_password() {
        let (url, server) = serve_once(http_response("200 OK", r#"{"ok":true}"#)).await;
        let client = ApiClient::new(&url);

        client
            .reset_password("ana@example.com", "123456", "n3w-pass")
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /auth/reset-password "));
        assert!(request.contains(
            r#"{"email":"ana@example.com","code":"123456","new_password":"n3w-pass"}"#
        ));
    }

    #[tokio::test]
    async fn test_reset_request_needs_email() {
        let client = ApiClient::new("http://127.0.0.1:9");
        let err = client.request_password_reset("   ").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }
}
