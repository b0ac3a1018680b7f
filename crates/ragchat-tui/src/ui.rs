use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};
use ragchat_core::Role;
use crate::app::{App, FocusPane, InputMode, LoginField, Screen};
use crate::input::TextInput;

/// Ensure the selected item in a list is visible by adjusting the ListState offset.
fn ensure_selected_visible(state: &mut ListState, visible_height: usize) {
    let visible_height = visible_height.max(1);

    if let Some(selected) = state.selected() {
        // Selected at bottom of the window .. selected at top
        let min_offset = selected.saturating_sub(visible_height - 1);
        let max_offset = selected;

        let new_offset = state.offset().clamp(min_offset, max_offset);
        if new_offset != state.offset() {
            *state.offset_mut() = new_offset;
        }
    }
}

/// Render a line of assistant output, turning `**bold**` runs into bold spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("**") {
        let after = &rest[start + 2..];
        match after.find("**") {
            Some(end) if end > 0 => {
                if start > 0 {
                    spans.push(Span::raw(rest[..start].to_string()));
                }
                spans.push(Span::styled(
                    after[..end].to_string(),
                    Style::default().add_modifier(Modifier::BOLD),
                ));
                rest = &after[end + 2..];
            }
            // No closing **, treat as literal
            _ => break,
        }
    }

    if !rest.is_empty() {
        spans.push(Span::raw(rest.to_string()));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

fn dots(app: &App) -> String {
    ".".repeat((app.animation_frame as usize) + 1)
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    match app.screen {
        Screen::Login => render_login_screen(app, frame, body_area),
        Screen::Chat => render_chat_screen(app, frame, body_area),
    }

    render_footer(app, frame, footer_area);

    if let Some(input) = &app.rename_input {
        render_rename_popup(input, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let user = app
        .session
        .as_ref()
        .map(|s| format!(" {} @ {}", s.display_name(), app.api_url))
        .unwrap_or_else(|| format!(" {}", app.api_url));

    let title = Line::from(vec![
        Span::styled(" ragchat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(user, Style::default().fg(Color::White)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };

    let mode_text = match (app.screen, app.input_mode) {
        (Screen::Login, _) => " LOGIN ",
        (Screen::Chat, InputMode::Normal) => " CHAT ",
        (Screen::Chat, InputMode::Editing) => " INSERT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints: &[(&str, &str)] = if app.rename_input.is_some() {
        &[("Enter", "save"), ("Esc", "cancel")]
    } else {
        match (app.screen, app.input_mode) {
            (Screen::Login, _) => &[("Tab", "switch field"), ("Enter", "sign in"), ("Esc", "quit")],
            (Screen::Chat, InputMode::Editing) => &[
                ("Enter", "send"),
                ("Esc", "normal"),
                ("Tab", "focus"),
                ("PgUp/PgDn", "scroll"),
            ],
            (Screen::Chat, InputMode::Normal) => &[
                ("j/k", "move"),
                ("Enter", "open"),
                ("n", "new"),
                ("r", "rename"),
                ("R", "refresh"),
                ("L", "logout"),
                ("q", "quit"),
            ],
        }
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    for (key, label) in hints {
        spans.push(Span::styled(format!(" {} ", key), key_style));
        spans.push(Span::styled(format!(" {} ", label), label_style));
        spans.push(Span::raw(" "));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_login_screen(app: &App, frame: &mut Frame, area: Rect) {
    let popup_width = 56.min(area.width.saturating_sub(4));
    let popup_height = 10.min(area.height);
    let popup_x = area.x + (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = area.y + (area.height.saturating_sub(popup_height)) / 2;
    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Sign in ");
    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);
    if inner.height < 7 {
        return;
    }

    let label_width = 10u16;
    let field_width = inner.width.saturating_sub(label_width) as usize;
    let rows = [
        ("Username", LoginField::Username, &app.login.username, false),
        ("Password", LoginField::Password, &app.login.password, true),
    ];

    let mut cursor = None;
    for (i, (label, field, input, masked)) in rows.into_iter().enumerate() {
        let y = inner.y + 1 + (i as u16) * 2;
        let focused = app.login.field == field;
        let label_style = if focused {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        let (visible, cursor_col) = input.visible(field_width);
        let shown = if masked {
            "*".repeat(visible.chars().count())
        } else {
            visible
        };

        frame.render_widget(
            Paragraph::new(format!("{}:", label)).style(label_style),
            Rect::new(inner.x, y, label_width, 1),
        );
        frame.render_widget(
            Paragraph::new(shown).style(Style::default().fg(Color::Cyan)),
            Rect::new(inner.x + label_width, y, inner.width.saturating_sub(label_width), 1),
        );
        if focused {
            cursor = Some((inner.x + label_width + cursor_col as u16, y));
        }
    }

    let status = if app.login.pending {
        Line::from(Span::styled(
            format!("Signing in{}", dots(app)),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        ))
    } else if let Some(error) = &app.login.error {
        Line::from(Span::styled(error.clone(), Style::default().fg(Color::Red)))
    } else {
        Line::from(Span::styled(
            "Enter your credentials",
            Style::default().fg(Color::DarkGray),
        ))
    };
    frame.render_widget(
        Paragraph::new(status),
        Rect::new(inner.x, inner.y + 6, inner.width, 1),
    );

    if let (Some(position), false) = (cursor, app.login.pending) {
        frame.set_cursor_position(position);
    }
}

fn render_chat_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let [sidebar_area, main_area] = Layout::horizontal([
        Constraint::Length(32.min(area.width / 3)),
        Constraint::Min(0),
    ])
    .areas(area);

    let error_height = if app.store.last_error().is_some() { 1 } else { 0 };
    let [thread_area, error_area, composer_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(error_height),
        Constraint::Length(3),
    ])
    .areas(main_area);

    render_sidebar(app, frame, sidebar_area);
    render_thread(app, frame, thread_area);

    if let Some(error) = app.store.last_error() {
        let line = Line::from(vec![
            Span::styled(" ! ", Style::default().bg(Color::Red).fg(Color::White)),
            Span::styled(format!(" {}", error), Style::default().fg(Color::Red)),
        ]);
        frame.render_widget(Paragraph::new(line), error_area);
    }

    render_composer(app, frame, composer_area);
}

fn render_sidebar(app: &mut App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Sidebar;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Conversations ");

    let active = app.store.active().cloned();
    let items: Vec<ListItem> = app
        .store
        .conversations()
        .iter()
        .map(|c| {
            let style = if Some(&c.id) == active.as_ref() {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(Span::styled(c.title.clone(), style)))
        })
        .collect();

    if items.is_empty() {
        let empty = Paragraph::new(Span::styled(
            "No conversations yet",
            Style::default().fg(Color::DarkGray),
        ))
        .block(block);
        frame.render_widget(empty, area);
        return;
    }

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().bg(Color::Blue).fg(Color::White))
        .highlight_symbol("> ");

    let visible_height = area.height.saturating_sub(2) as usize;
    ensure_selected_visible(&mut app.sidebar_state, visible_height);

    frame.render_stateful_widget(list, area, &mut app.sidebar_state);
}

fn render_thread(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store inner dimensions for scroll calculations
    app.thread_height = area.height.saturating_sub(2);
    app.thread_width = area.width.saturating_sub(2);

    let focused = app.focus == FocusPane::Thread;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };
    let title = app
        .store
        .active_conversation()
        .map(|c| format!(" {} ", c.title))
        .unwrap_or_else(|| " New conversation ".to_string());

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    let thread = app.store.thread();
    let text = if thread.is_empty() {
        Text::from(Span::styled(
            "Type a message below to start chatting...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let streaming = app.store.is_streaming();
        let mut lines: Vec<Line> = Vec::new();

        for (i, msg) in thread.iter().enumerate() {
            let label_style = match msg.role {
                Role::User => Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                Role::Assistant => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            };
            lines.push(Line::from(Span::styled(format!("{}:", msg.role.label()), label_style)));

            let content = msg.text();
            if content.is_empty() {
                let is_last = i + 1 == thread.len();
                let placeholder = if streaming && is_last {
                    format!("Thinking{}", dots(app))
                } else {
                    "(no reply)".to_string()
                };
                lines.push(Line::from(Span::styled(
                    placeholder,
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
            } else {
                match msg.role {
                    Role::User => lines.extend(content.lines().map(|l| Line::from(l.to_string()))),
                    Role::Assistant => lines.extend(content.lines().map(parse_markdown_line)),
                }
            }
            lines.push(Line::default());
        }

        Text::from(lines)
    };

    let paragraph = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.thread_scroll, 0));

    frame.render_widget(paragraph, area);
}

fn render_composer(app: &App, frame: &mut Frame, area: Rect) {
    let streaming = app.store.is_streaming();
    let editing = app.focus == FocusPane::Composer && app.input_mode == InputMode::Editing;

    let border_color = if streaming {
        Color::DarkGray
    } else if editing {
        Color::Yellow
    } else if app.focus == FocusPane::Composer {
        Color::Cyan
    } else {
        Color::DarkGray
    };
    let title = if streaming {
        format!(" Waiting for reply{} ", dots(app))
    } else {
        " Message (Enter to send) ".to_string()
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let (visible_text, cursor_col) = app.composer.visible(inner_width);

    let text_color = if streaming { Color::DarkGray } else { Color::Cyan };
    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(text_color))
        .block(block);

    frame.render_widget(input, area);

    // Show cursor when editing
    if editing && !streaming {
        frame.set_cursor_position((area.x + cursor_col as u16 + 1, area.y + 1));
    }
}

fn render_rename_popup(input: &TextInput, frame: &mut Frame, area: Rect) {
    // Calculate popup size and position (centered)
    let popup_width = 60.min(area.width.saturating_sub(4));
    let popup_height = 5;

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Rename conversation ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let input_area = Rect::new(inner.x, inner.y + 1, inner.width, 1);
    let (visible, cursor_col) = input.visible(inner.width as usize);
    frame.render_widget(
        Paragraph::new(visible).style(Style::default().fg(Color::Cyan)),
        input_area,
    );
    frame.set_cursor_position((input_area.x + cursor_col as u16, input_area.y));
}
