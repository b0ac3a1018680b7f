use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crate::app::{App, FocusPane, InputMode, Screen};
use crate::input::TextInput;
use crate::tui::AppEvent;

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick_animation(),
        AppEvent::Store(event) => app.apply_store_event(event),
        AppEvent::LoggedIn(session) => app.on_logged_in(session),
        AppEvent::LoginFailed { message } => app.on_login_failed(message),
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    match app.screen {
        Screen::Login => handle_login_key(app, key),
        Screen::Chat if app.rename_input.is_some() => handle_rename_key(app, key),
        Screen::Chat => match app.input_mode {
            InputMode::Normal => handle_chat_normal(app, key),
            InputMode::Editing => handle_composer_editing(app, key),
        },
    }
}

/// Shared line-editing keys. Returns false when the key is not an edit.
fn edit_text(input: &mut TextInput, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Backspace => input.backspace(),
        KeyCode::Delete => input.delete(),
        KeyCode::Left => input.left(),
        KeyCode::Right => input.right(),
        KeyCode::Home => input.home(),
        KeyCode::End => input.end(),
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => input.insert(c),
        _ => return false,
    }
    true
}

fn handle_login_key(app: &mut App, key: KeyEvent) {
    if key.code == KeyCode::Esc {
        app.should_quit = true;
        return;
    }
    if app.login.pending {
        return;
    }

    match key.code {
        KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => app.login.toggle_field(),
        KeyCode::Enter => {
            if app.login.username.is_empty() || app.login.password.is_empty() {
                app.login.toggle_field();
            } else {
                app.submit_login();
            }
        }
        _ => {
            edit_text(app.login.active_input(), key);
        }
    }
}

fn handle_rename_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.rename_input = None,
        KeyCode::Enter => app.submit_rename(),
        _ => {
            if let Some(input) = app.rename_input.as_mut() {
                edit_text(input, key);
            }
        }
    }
}

fn handle_chat_normal(app: &mut App, key: KeyEvent) {
    let half_page = (app.thread_height / 2).max(1);

    match key.code {
        // Quit
        KeyCode::Char('q') => app.should_quit = true,

        // Tab to switch focus
        KeyCode::Tab => app.cycle_focus(),
        KeyCode::Char('i') => {
            app.focus = FocusPane::Composer;
            app.input_mode = InputMode::Editing;
        }

        // Navigation
        KeyCode::Char('j') | KeyCode::Down => match app.focus {
            FocusPane::Sidebar => app.sidebar_down(),
            _ => app.scroll_thread_down(1),
        },
        KeyCode::Char('k') | KeyCode::Up => match app.focus {
            FocusPane::Sidebar => app.sidebar_up(),
            _ => app.scroll_thread_up(1),
        },
        KeyCode::Char('g') => {
            app.thread_scroll = 0;
            app.follow_tail = false;
        }
        KeyCode::Char('G') => {
            app.follow_tail = true;
            app.scroll_thread_to_bottom();
        }

        // Half-page scroll
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_thread_down(half_page);
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_thread_up(half_page);
        }
        KeyCode::PageDown => app.scroll_thread_down(half_page),
        KeyCode::PageUp => app.scroll_thread_up(half_page),

        // Enter/Select
        KeyCode::Enter | KeyCode::Char('l') => match app.focus {
            FocusPane::Sidebar => app.open_selected_conversation(),
            FocusPane::Composer => app.input_mode = InputMode::Editing,
            FocusPane::Thread => {}
        },

        // Conversation actions
        KeyCode::Char('n') => app.start_new_conversation(),
        KeyCode::Char('r') => app.begin_rename(),
        KeyCode::Char('R') => app.spawn_refresh(),
        KeyCode::Char('L') => app.sign_out(None),
        KeyCode::Esc => app.store.clear_error(),

        _ => {}
    }
}

fn handle_composer_editing(app: &mut App, key: KeyEvent) {
    let half_page = (app.thread_height / 2).max(1);

    match key.code {
        KeyCode::Esc => app.input_mode = InputMode::Normal,
        KeyCode::Tab => app.cycle_focus(),
        KeyCode::PageDown => app.scroll_thread_down(half_page),
        KeyCode::PageUp => app.scroll_thread_up(half_page),
        // Composer is disabled while a reply streams
        _ if app.store.is_streaming() => {}
        KeyCode::Enter => app.send_message(),
        _ => {
            edit_text(&mut app.composer, key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tests::{conversation, Harness, StaticBackend};
    use crate::app::LoginField;
    use ragchat_core::{ConversationId, StoreEvent};

    fn press(app: &mut App, code: KeyCode) {
        handle_key(app, KeyEvent::new(code, KeyModifiers::NONE));
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            press(app, KeyCode::Char(c));
        }
    }

    #[tokio::test]
    async fn test_ctrl_c_quits_from_login() {
        let mut h = Harness::new();
        handle_key(
            &mut h.app,
            KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL),
        );
        assert!(h.app.should_quit);
    }

    #[tokio::test]
    async fn test_login_form_editing() {
        let mut h = Harness::new();
        type_text(&mut h.app, "ana");
        press(&mut h.app, KeyCode::Enter); // moves to password, nothing submitted
        assert_eq!(h.app.login.field, LoginField::Password);
        assert!(!h.app.login.pending);

        type_text(&mut h.app, "pw");
        press(&mut h.app, KeyCode::Backspace);
        assert_eq!(h.app.login.username.value(), "ana");
        assert_eq!(h.app.login.password.value(), "p");
    }

    #[tokio::test]
    async fn test_composer_disabled_while_streaming() {
        let mut h = Harness::connected(StaticBackend::default());
        h.pump().await;

        type_text(&mut h.app, "Hello");
        press(&mut h.app, KeyCode::Enter);
        assert!(h.app.store.is_streaming());

        type_text(&mut h.app, "more");
        press(&mut h.app, KeyCode::Enter);
        assert!(h.app.composer.is_empty());

        // created, started, finished, refreshed
        for _ in 0..4 {
            h.pump().await;
        }
        type_text(&mut h.app, "next");
        assert_eq!(h.app.composer.value(), "next");
    }

    #[tokio::test]
    async fn test_sidebar_navigation_opens_conversation() {
        let mut h = Harness::connected(StaticBackend {
            conversations: vec![conversation("b", "B"), conversation("a", "A")],
            ..Default::default()
        });
        h.pump().await; // refresh, auto-selects "b"
        h.pump().await; // thread for "b"

        press(&mut h.app, KeyCode::Esc);
        press(&mut h.app, KeyCode::Tab); // composer -> sidebar
        assert_eq!(h.app.focus, FocusPane::Sidebar);
        press(&mut h.app, KeyCode::Char('j'));
        press(&mut h.app, KeyCode::Enter);
        assert_eq!(h.app.store.active(), Some(&ConversationId::new("a")));
        assert!(h.app.store.thread().is_empty());

        h.pump().await;
        assert_eq!(h.app.store.thread().len(), 2);
    }

    #[tokio::test]
    async fn test_rename_popup_submits_title() {
        let mut h = Harness::connected(StaticBackend {
            conversations: vec![conversation("a", "Old title")],
            ..Default::default()
        });
        h.pump().await;
        h.pump().await;

        press(&mut h.app, KeyCode::Esc);
        press(&mut h.app, KeyCode::Char('r'));
        assert_eq!(
            h.app.rename_input.as_ref().map(|i| i.value().to_string()),
            Some("Old title".to_string())
        );
        for _ in 0.."Old title".len() {
            press(&mut h.app, KeyCode::Backspace);
        }
        type_text(&mut h.app, "Trip");
        press(&mut h.app, KeyCode::Enter);
        assert!(h.app.rename_input.is_none());

        h.pump().await;
        assert_eq!(h.app.store.conversations()[0].title, "Trip");
    }

    #[tokio::test]
    async fn test_new_conversation_and_logout_keys() {
        let mut h = Harness::connected(StaticBackend::default());
        h.app.apply_store_event(StoreEvent::ConversationsRefreshed(vec![conversation("a", "A")]));
        assert!(h.app.store.active().is_some());

        press(&mut h.app, KeyCode::Esc);
        press(&mut h.app, KeyCode::Char('n'));
        assert!(h.app.store.active().is_none());
        assert_eq!(h.app.input_mode, InputMode::Editing);

        press(&mut h.app, KeyCode::Esc);
        press(&mut h.app, KeyCode::Char('L'));
        assert_eq!(h.app.screen, Screen::Login);
        assert!(h.app.session.is_none());
    }
}
