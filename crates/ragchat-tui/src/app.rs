use std::path::PathBuf;
use std::sync::Arc;

use ragchat_core::{
    ApiClient, ChatBackend, Config, ConversationId, ConversationStore, ExchangeController, Failure,
    SendRejected, Session, StoreEvent,
};
use ratatui::widgets::ListState;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::input::TextInput;
use crate::tui::AppEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Sidebar,
    Thread,
    Composer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginField {
    #[default]
    Username,
    Password,
}

#[derive(Debug, Default)]
pub struct LoginForm {
    pub username: TextInput,
    pub password: TextInput,
    pub field: LoginField,
    pub pending: bool,
    pub error: Option<String>,
}

impl LoginForm {
    pub fn active_input(&mut self) -> &mut TextInput {
        match self.field {
            LoginField::Username => &mut self.username,
            LoginField::Password => &mut self.password,
        }
    }

    pub fn toggle_field(&mut self) {
        self.field = match self.field {
            LoginField::Username => LoginField::Password,
            LoginField::Password => LoginField::Username,
        };
    }
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub screen: Screen,
    pub input_mode: InputMode,
    pub focus: FocusPane,

    // Connection state
    pub api_url: String,
    pub config: Config,
    config_path: Option<PathBuf>,
    pub session: Option<Session>,
    controller: Option<ExchangeController>,
    /// Forwards the current session's store events; aborted on sign-out
    session_events: Option<JoinHandle<()>>,

    // Conversation state
    pub store: ConversationStore,
    pub sidebar_state: ListState,

    // Thread view
    pub thread_scroll: u16,
    pub thread_height: u16, // inner height of the thread pane, set while rendering
    pub thread_width: u16,  // inner width, used for wrap estimates
    pub follow_tail: bool,

    // Inputs
    pub composer: TextInput,
    pub rename_input: Option<TextInput>,
    pub login: LoginForm,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    events: UnboundedSender<AppEvent>,
    store_events: UnboundedSender<StoreEvent>,
}

impl App {
    pub fn new(
        api_url: String,
        config: Config,
        config_path: Option<PathBuf>,
        events: UnboundedSender<AppEvent>,
        store_events: UnboundedSender<StoreEvent>,
    ) -> Self {
        let mut login = LoginForm::default();
        if let Some(username) = &config.username {
            login.username = TextInput::with_value(username);
            login.field = LoginField::Password;
        }

        Self {
            should_quit: false,
            screen: Screen::Login,
            input_mode: InputMode::Editing,
            focus: FocusPane::Composer,
            api_url,
            config,
            config_path,
            session: None,
            controller: None,
            session_events: None,
            store: ConversationStore::new(),
            sidebar_state: ListState::default(),
            thread_scroll: 0,
            thread_height: 0,
            thread_width: 0,
            follow_tail: true,
            composer: TextInput::new(),
            rename_input: None,
            login,
            animation_frame: 0,
            events,
            store_events,
        }
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Validate a saved token in the background; success lands as `LoggedIn`
    pub fn restore_session(&mut self) {
        let Some(session) = self.config.session() else {
            return;
        };
        self.login.pending = true;
        let client = ApiClient::new(&self.api_url).with_session(session.clone());
        let events = self.events.clone();
        tokio::spawn(async move {
            let event = match client.current_user().await {
                Ok(user) => AppEvent::LoggedIn(session.with_user(user)),
                Err(e) => AppEvent::LoginFailed {
                    message: e.user_message(),
                },
            };
            let _ = events.send(event);
        });
    }

    pub fn submit_login(&mut self) {
        if self.login.pending {
            return;
        }
        let username = self.login.username.value().to_string();
        let password = self.login.password.value().to_string();
        if username.trim().is_empty() || password.is_empty() {
            self.login.error = Some("Enter a username and password".to_string());
            return;
        }

        self.login.pending = true;
        self.login.error = None;
        let client = ApiClient::new(&self.api_url);
        let events = self.events.clone();
        tokio::spawn(async move {
            let event = match client.login(&username, &password).await {
                Ok(session) => AppEvent::LoggedIn(session),
                Err(e) => AppEvent::LoginFailed {
                    message: e.user_message(),
                },
            };
            let _ = events.send(event);
        });
    }

    pub fn on_logged_in(&mut self, session: Session) {
        let client = ApiClient::new(&self.api_url).with_session(session.clone());
        self.connect(session, Arc::new(client));
    }

    /// Enter the chat screen backed by `backend`
    pub(crate) fn connect(&mut self, session: Session, backend: Arc<dyn ChatBackend>) {
        info!(user = session.display_name(), "session started");
        self.config.remember_session(&session);
        self.persist_config();

        self.controller = Some(ExchangeController::new(backend, self.open_session_channel()));
        self.session = Some(session);
        self.login = LoginForm::default();
        self.store.reset();
        self.sidebar_state.select(None);
        self.screen = Screen::Chat;
        self.focus = FocusPane::Composer;
        self.input_mode = InputMode::Editing;
        self.spawn_refresh();
    }

    pub fn on_login_failed(&mut self, message: String) {
        self.login.pending = false;
        self.login.error = Some(message);
        self.login.password.clear();
        self.login.field = LoginField::Password;
    }

    /// Drop the session and go back to the login screen
    pub fn sign_out(&mut self, reason: Option<String>) {
        if let Some(session) = self.session.take() {
            info!(user = session.display_name(), "session ended");
        }
        self.controller = None;
        self.close_session_channel();
        self.config.forget_session();
        self.persist_config();

        self.store.reset();
        self.sidebar_state.select(None);
        self.composer.clear();
        self.rename_input = None;
        self.login = LoginForm::default();
        if let Some(username) = &self.config.username {
            self.login.username = TextInput::with_value(username);
            self.login.field = LoginField::Password;
        }
        self.login.error = reason;
        self.screen = Screen::Login;
        self.input_mode = InputMode::Editing;
    }

    /// Fresh event channel for one session. Events still in flight from an
    /// earlier session die with that session's forwarder.
    fn open_session_channel(&mut self) -> UnboundedSender<StoreEvent> {
        self.close_session_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let forward = self.store_events.clone();
        self.session_events = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if forward.send(event).is_err() {
                    break;
                }
            }
        }));
        tx
    }

    fn close_session_channel(&mut self) {
        if let Some(forwarder) = self.session_events.take() {
            forwarder.abort();
        }
    }

    fn persist_config(&self) {
        if let Some(path) = &self.config_path {
            if let Err(e) = self.config.save_to(path) {
                warn!(error = %e, "could not save config");
            }
        }
    }

    // ------------------------------------------------------------------
    // Backend operations
    // ------------------------------------------------------------------

    pub fn spawn_refresh(&self) {
        if let Some(controller) = self.controller.clone() {
            tokio::spawn(async move {
                let _ = controller.refresh_conversations().await;
            });
        }
    }

    pub fn spawn_load_thread(&self, id: ConversationId) {
        if let Some(controller) = self.controller.clone() {
            tokio::spawn(async move {
                let _ = controller.load_thread(id).await;
            });
        }
    }

    /// Send the composer text; no-op while a reply is streaming
    pub fn send_message(&mut self) {
        let Some(controller) = self.controller.clone() else {
            return;
        };

        match self.store.prepare_exchange(self.composer.value()) {
            Ok(request) => {
                debug!(exchange = %request.id, "sending message");
                self.composer.clear();
                self.follow_tail = true;
                tokio::spawn(async move {
                    if let Err(e) = controller.send_message(request).await {
                        debug!(error = %e, "exchange ended with error");
                    }
                });
            }
            Err(SendRejected::Empty) => {}
            Err(SendRejected::Busy) => debug!("send ignored while streaming"),
        }
    }

    pub fn apply_store_event(&mut self, event: StoreEvent) {
        if self.screen != Screen::Chat {
            return;
        }
        if let Some(Failure {
            requires_login: true,
            message,
        }) = event.failure()
        {
            let message = message.clone();
            self.sign_out(Some(message));
            return;
        }

        if let Some(id) = self.store.apply(event) {
            self.spawn_load_thread(id);
        }
        self.sync_sidebar_to_active();
        if self.follow_tail {
            self.scroll_thread_to_bottom();
        }
    }

    // ------------------------------------------------------------------
    // Conversation navigation
    // ------------------------------------------------------------------

    pub fn open_selected_conversation(&mut self) {
        let Some(i) = self.sidebar_state.selected() else {
            return;
        };
        let Some(conversation) = self.store.conversations().get(i) else {
            return;
        };
        let id = conversation.id.clone();
        if self.store.select(id.clone()) {
            self.thread_scroll = 0;
            self.follow_tail = true;
            self.spawn_load_thread(id);
        }
    }

    pub fn start_new_conversation(&mut self) {
        self.store.start_new();
        self.sidebar_state.select(None);
        self.thread_scroll = 0;
        self.focus = FocusPane::Composer;
        self.input_mode = InputMode::Editing;
    }

    pub fn begin_rename(&mut self) {
        if let Some(conversation) = self.store.active_conversation() {
            self.rename_input = Some(TextInput::with_value(&conversation.title));
        }
    }

    pub fn submit_rename(&mut self) {
        let Some(input) = self.rename_input.take() else {
            return;
        };
        let (Some(controller), Some(id)) = (self.controller.clone(), self.store.active().cloned()) else {
            return;
        };
        let title = input.value().to_string();
        tokio::spawn(async move {
            let _ = controller.rename_conversation(id, &title).await;
        });
    }

    pub fn sidebar_down(&mut self) {
        let len = self.store.conversations().len();
        if len > 0 {
            let i = self.sidebar_state.selected().map(|i| i + 1).unwrap_or(0);
            self.sidebar_state.select(Some(i.min(len - 1)));
        }
    }

    pub fn sidebar_up(&mut self) {
        if !self.store.conversations().is_empty() {
            let i = self.sidebar_state.selected().unwrap_or(0);
            self.sidebar_state.select(Some(i.saturating_sub(1)));
        }
    }

    /// Keep the highlighted row on the active conversation after list changes
    fn sync_sidebar_to_active(&mut self) {
        let conversations = self.store.conversations();
        let active_idx = self
            .store
            .active()
            .and_then(|id| conversations.iter().position(|c| &c.id == id));
        match active_idx {
            Some(i) => self.sidebar_state.select(Some(i)),
            None => {
                if let Some(i) = self.sidebar_state.selected() {
                    if i >= conversations.len() {
                        self.sidebar_state.select(conversations.len().checked_sub(1));
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Thread scrolling and animation
    // ------------------------------------------------------------------

    pub fn cycle_focus(&mut self) {
        self.focus = match self.focus {
            FocusPane::Sidebar => FocusPane::Thread,
            FocusPane::Thread => FocusPane::Composer,
            FocusPane::Composer => FocusPane::Sidebar,
        };
        self.input_mode = if self.focus == FocusPane::Composer {
            InputMode::Editing
        } else {
            InputMode::Normal
        };
    }

    pub fn scroll_thread_down(&mut self, lines: u16) {
        let max = self.thread_line_count().saturating_sub(self.thread_height);
        self.thread_scroll = self.thread_scroll.saturating_add(lines).min(max);
        self.follow_tail = self.thread_scroll >= max;
    }

    pub fn scroll_thread_up(&mut self, lines: u16) {
        self.thread_scroll = self.thread_scroll.saturating_sub(lines);
        self.follow_tail = false;
    }

    pub fn scroll_thread_to_bottom(&mut self) {
        let visible_height = if self.thread_height > 0 { self.thread_height } else { 20 };
        self.thread_scroll = self.thread_line_count().saturating_sub(visible_height);
    }

    /// Estimated rendered height of the thread, matching the layout in `ui`
    pub fn thread_line_count(&self) -> u16 {
        // Use actual pane width for wrap calculation, default to 50 if not set
        let wrap_width = if self.thread_width > 0 {
            self.thread_width as usize
        } else {
            50
        };

        let mut total_lines: usize = 0;
        for msg in self.store.thread() {
            total_lines += 1; // Role line
            let text = msg.text();
            if text.is_empty() {
                total_lines += 1; // spinner or blank placeholder
            }
            for line in text.lines() {
                let char_count = line.chars().count();
                total_lines += char_count / wrap_width + 1;
            }
            total_lines += 1; // Blank line after message
        }
        total_lines.min(u16::MAX as usize) as u16
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.store.is_streaming() || self.login.pending {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }
}
