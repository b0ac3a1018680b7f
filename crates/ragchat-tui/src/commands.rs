//! One-shot subcommands that talk to the backend without the TUI.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use ragchat_core::{
    ApiClient, ApiError, ChatBackend, Config, Conversation, ConversationId, ExchangeController,
    ExchangeRequest, StoreEvent,
};
use tokio::sync::mpsc;
use tracing::debug;

pub struct Context {
    pub api_url: String,
    pub config: Config,
    pub config_path: PathBuf,
}

impl Context {
    /// Client carrying the saved session, if any
    pub fn client(&self) -> ApiClient {
        let client = ApiClient::new(&self.api_url);
        match self.config.session() {
            Some(session) => client.with_session(session),
            None => client,
        }
    }

    fn save(&self) -> Result<()> {
        self.config.save_to(&self.config_path)
    }

    /// Turn an API error into a printable one; a rejected token is forgotten
    fn report(&mut self, error: ApiError) -> anyhow::Error {
        if matches!(error, ApiError::Unauthorized) {
            self.config.forget_session();
            if let Err(e) = self.save() {
                debug!(error = %e, "could not save config");
            }
        }
        match error {
            ApiError::Unauthorized | ApiError::NotAuthenticated => {
                anyhow!("{} (run `ragchat login`)", error.user_message())
            }
            other => anyhow!(other.user_message()),
        }
    }
}

/// Use the provided value, or read one line from stdin
fn read_secret(provided: Option<String>, prompt: &str) -> Result<String> {
    if let Some(value) = provided {
        return Ok(value);
    }
    eprint!("{}: ", prompt);
    io::stderr().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(|c| c == '\r' || c == '\n').to_string())
}

pub async fn login(ctx: &mut Context, username: Option<String>, password: Option<String>) -> Result<()> {
    let username = username
        .or_else(|| ctx.config.username.clone())
        .ok_or_else(|| anyhow!("No username given (use --username)"))?;
    let password = read_secret(password, "Password")?;

    let session = ApiClient::new(&ctx.api_url)
        .login(&username, &password)
        .await
        .map_err(|e| ctx.report(e))?;

    ctx.config.remember_session(&session);
    ctx.save()?;
    println!("Signed in as {}", session.display_name());
    Ok(())
}

pub fn logout(ctx: &mut Context) -> Result<()> {
    if ctx.config.session().is_none() {
        println!("Not signed in");
        return Ok(());
    }
    ctx.config.forget_session();
    ctx.save()?;
    println!("Signed out");
    Ok(())
}

pub async fn whoami(ctx: &mut Context) -> Result<()> {
    let user = ctx.client().current_user().await.map_err(|e| ctx.report(e))?;

    println!("{} <{}>", user.username, user.email);
    if !user.roles.is_empty() {
        println!("roles: {}", user.roles.join(", "));
    }
    if user.is_admin {
        println!("admin");
    }
    Ok(())
}

pub async fn register(
    ctx: &mut Context,
    username: String,
    email: String,
    password: Option<String>,
) -> Result<()> {
    let password = read_secret(password, "Password")?;
    let user = ApiClient::new(&ctx.api_url)
        .register(&username, &email, &password)
        .await
        .map_err(|e| ctx.report(e))?;

    ctx.config.username = Some(user.username.clone());
    ctx.save()?;
    println!("Registered {}; sign in with `ragchat login`", user.username);
    Ok(())
}

/// Email a reset code, then check it and set the new password
pub async fn reset_password(
    ctx: &mut Context,
    email: String,
    code: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let client = ApiClient::new(&ctx.api_url);

    if code.is_none() {
        client
            .request_password_reset(&email)
            .await
            .map_err(|e| ctx.report(e))?;
        eprintln!("If {} has an account, a reset code is on its way", email.trim());
    }

    let code = read_secret(code, "Reset code")?;
    let valid = client
        .verify_reset_code(&email, &code)
        .await
        .map_err(|e| ctx.report(e))?;
    if !valid {
        return Err(anyhow!("Invalid or expired reset code"));
    }

    let password = read_secret(password, "New password")?;
    client
        .reset_password(&email, &code, &password)
        .await
        .map_err(|e| ctx.report(e))?;

    println!("Password updated; sign in with `ragchat login`");
    Ok(())
}

pub async fn chats(ctx: &mut Context) -> Result<()> {
    let conversations = ctx
        .client()
        .list_conversations()
        .await
        .map_err(|e| ctx.report(e))?;

    let mut stdout = io::stdout().lock();
    write_conversations(&mut stdout, &conversations)?;
    Ok(())
}

fn write_conversations(out: &mut impl Write, conversations: &[Conversation]) -> io::Result<()> {
    if conversations.is_empty() {
        writeln!(out, "No conversations yet")?;
        return Ok(());
    }
    for conversation in conversations {
        writeln!(out, "{}\t{}", conversation.id, conversation.title)?;
    }
    Ok(())
}

pub async fn rename(ctx: &mut Context, id: String, title: String) -> Result<()> {
    let title = title.trim();
    if title.is_empty() {
        return Err(anyhow!("Title cannot be empty"));
    }
    let renamed = ctx
        .client()
        .rename_conversation(&ConversationId::new(id), title)
        .await
        .map_err(|e| ctx.report(e))?;

    println!("{}\t{}", renamed.id, renamed.title);
    Ok(())
}

pub async fn ask(ctx: &mut Context, message: String, chat: Option<String>) -> Result<()> {
    let backend: Arc<dyn ChatBackend> = Arc::new(ctx.client());
    let mut stdout = io::stdout();
    let result = stream_reply(backend, &message, chat.map(ConversationId::new), &mut stdout).await;
    result.map_err(|e| match e.downcast::<ApiError>() {
        Ok(api_error) => ctx.report(api_error),
        Err(other) => other,
    })
}

/// Run one exchange and write the reply to `out` as it arrives
async fn stream_reply(
    backend: Arc<dyn ChatBackend>,
    message: &str,
    chat: Option<ConversationId>,
    out: &mut (dyn Write + Send),
) -> Result<()> {
    let request = ExchangeRequest::standalone(message, chat).map_err(|e| anyhow!("Not sent: {}", e))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let controller = ExchangeController::new(backend, tx);
    let task = tokio::spawn(async move { controller.send_message(request).await });

    // Chunks carry the whole reply so far; print only what is new
    let mut printed = 0usize;
    while let Some(event) = rx.recv().await {
        match event {
            StoreEvent::ConversationCreated { conversation, .. } => {
                eprintln!("New conversation {}", conversation.id);
            }
            StoreEvent::ExchangeChunk { content, .. } => {
                if let Some(delta) = content.get(printed..) {
                    out.write_all(delta.as_bytes())?;
                    out.flush()?;
                }
                printed = content.len();
            }
            _ => {}
        }
    }

    let outcome = task.await??;
    writeln!(out)?;
    debug!(chat_id = %outcome.conversation, "reply complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tests::{conversation, StaticBackend};

    #[test]
    fn test_write_conversations() {
        let mut out = Vec::new();
        write_conversations(&mut out, &[conversation("c1", "Trip"), conversation("c2", "Notes")]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "c1\tTrip\nc2\tNotes\n");

        let mut out = Vec::new();
        write_conversations(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "No conversations yet\n");
    }

    #[tokio::test]
    async fn test_stream_reply_prints_chunks_in_order() {
        let backend = Arc::new(StaticBackend {
            reply: vec!["Hi ".to_string(), "there".to_string(), "!".to_string()],
            ..Default::default()
        });
        let mut out = Vec::new();
        stream_reply(backend.clone(), "Hello", None, &mut out).await.unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "Hi there!\n");
        assert_eq!(*backend.sent.lock().unwrap(), vec!["Hello".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_reply_rejects_blank_message() {
        let backend = Arc::new(StaticBackend::default());
        let mut out = Vec::new();
        let err = stream_reply(backend.clone(), "   ", None, &mut out).await.unwrap_err();
        assert!(err.to_string().contains("empty"));
        assert!(backend.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_logout_clears_saved_token() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        let mut config = Config::new();
        config.access_token = Some("tok".to_string());
        config.username = Some("ana".to_string());

        let mut ctx = Context {
            api_url: "http://127.0.0.1:9".to_string(),
            config,
            config_path: config_path.clone(),
        };
        logout(&mut ctx).unwrap();

        let saved = Config::load_from(&config_path).unwrap();
        assert!(saved.access_token.is_none());
        assert_eq!(saved.username.as_deref(), Some("ana"));
    }
}
