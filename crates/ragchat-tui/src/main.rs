use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ragchat_core::Config;
use tracing::{info, warn};

mod app;
mod commands;
mod handler;
mod input;
mod logging;
mod tui;
mod ui;

use app::App;
use commands::Context;
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "ragchat", version)]
#[command(about = "Terminal client for a RAG chat server")]
struct Cli {
    /// Base URL of the chat server
    #[arg(long, env = "RAGCHAT_API_URL", global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive chat (default)
    Tui,
    /// Sign in and save the token
    Login {
        #[arg(short, long)]
        username: Option<String>,
        /// Read from stdin when omitted
        #[arg(long, env = "RAGCHAT_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the saved token
    Logout,
    /// Show the signed-in user
    Whoami,
    /// List conversations, newest first
    Chats,
    /// Send one message and print the streamed reply
    Ask {
        message: String,
        /// Continue an existing conversation instead of starting one
        #[arg(long)]
        chat: Option<String>,
    },
    /// Rename a conversation
    Rename { id: String, title: String },
    /// Create an account
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
        #[arg(long, env = "RAGCHAT_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Reset a forgotten password with an emailed code
    ResetPassword {
        #[arg(short, long)]
        email: String,
        /// Code already received; skips requesting a new one
        #[arg(long)]
        code: Option<String>,
        /// New password, read from stdin when omitted
        #[arg(long, env = "RAGCHAT_NEW_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Tui);

    if matches!(command, Commands::Tui) {
        if let Err(e) = logging::init_file() {
            eprintln!("Logging disabled: {}", e);
        }
    } else {
        logging::init_stderr();
    }

    let config_path = Config::get_config_path()?;
    let config = match Config::load_from(&config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, path = %config_path.display(), "ignoring unreadable config");
            Config::new()
        }
    };
    let api_url = config.resolve_api_url(cli.api_url.as_deref());

    let mut ctx = Context {
        api_url,
        config,
        config_path,
    };

    match command {
        Commands::Tui => run_tui(ctx).await,
        Commands::Login { username, password } => commands::login(&mut ctx, username, password).await,
        Commands::Logout => commands::logout(&mut ctx),
        Commands::Whoami => commands::whoami(&mut ctx).await,
        Commands::Chats => commands::chats(&mut ctx).await,
        Commands::Ask { message, chat } => commands::ask(&mut ctx, message, chat).await,
        Commands::Rename { id, title } => commands::rename(&mut ctx, id, title).await,
        Commands::Register {
            username,
            email,
            password,
        } => commands::register(&mut ctx, username, email, password).await,
        Commands::ResetPassword {
            email,
            code,
            password,
        } => commands::reset_password(&mut ctx, email, code, password).await,
    }
}

async fn run_tui(ctx: Context) -> Result<()> {
    info!(api_url = %ctx.api_url, "starting tui");

    // Install panic hook before entering raw mode
    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let mut events = EventHandler::new();
    let config_path: PathBuf = ctx.config_path;
    let mut app = App::new(
        ctx.api_url,
        ctx.config,
        Some(config_path),
        events.sender(),
        events.store_sender(),
    );
    app.restore_session();

    let result = run_app(&mut terminal, &mut app, &mut events).await;

    tui::restore()?;
    result
}

async fn run_app(terminal: &mut tui::Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    loop {
        terminal.draw(|frame| ui::render(app, frame))?;

        let Some(event) = events.next().await else {
            break;
        };
        handler::handle_event(app, event).await?;

        if app.should_quit {
            break;
        }
    }
    Ok(())
}
