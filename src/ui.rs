use anyhow::Result;
use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::debug;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use std::{io, time::Duration};
use textwrap::wrap;
use tui_input::{backend::crossterm::EventHandler, Input};

use planit_chat::models::{Inquiry, LocalIdentity, Message, SenderRole};

pub use ratatui::backend::CrosstermBackend;
pub use ratatui::Terminal;

const EMPTY_CONVERSATION: &str = "No messages yet. Say hello!";
const CONNECTING_BANNER: &str = "Connecting to chat...";

/// What the main loop should do after a key press
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiAction {
    Quit,
    Send(String),
    Open(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Messages,
    Inbox,
}

pub struct ChatUI {
    input: Input,
    current_user_id: i64,
    role: SenderRole,
    inquiries: Vec<Inquiry>,
    active_inquiry: i64,
    selected_index: usize,
    focus: Focus,
    connected: bool,
    show_help: bool,
}

impl ChatUI {
    pub fn new(identity: &LocalIdentity, inquiries: Vec<Inquiry>, active_inquiry: i64) -> Self {
        let selected_index = inquiries
            .iter()
            .position(|i| i.id == active_inquiry)
            .unwrap_or(0);
        ChatUI {
            input: Input::default(),
            current_user_id: identity.user_id,
            role: identity.role,
            inquiries,
            active_inquiry,
            selected_index,
            focus: Focus::Messages,
            connected: false,
            show_help: false,
        }
    }

    pub fn set_connection_status(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Switch the view to another conversation; the draft is discarded
    pub fn set_active_inquiry(&mut self, inquiry_id: i64) {
        self.active_inquiry = inquiry_id;
        self.input.reset();
        self.connected = false;
        self.focus = Focus::Messages;
    }

    pub fn active_inquiry(&self) -> Option<&Inquiry> {
        self.inquiries.iter().find(|i| i.id == self.active_inquiry)
    }

    pub fn handle_input(&mut self) -> Result<Option<UiAction>> {
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(self.handle_key(key));
                }
            }
        }
        Ok(None)
    }

    fn handle_key(&mut self, key: KeyEvent) -> Option<UiAction> {
        if self.show_help {
            self.show_help = false;
            return None;
        }

        match key.code {
            KeyCode::Esc => return Some(UiAction::Quit),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Some(UiAction::Quit)
            }
            KeyCode::Char('h') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.show_help = true;
            }
            KeyCode::Tab => {
                self.focus = match self.focus {
                    Focus::Messages => Focus::Inbox,
                    Focus::Inbox => Focus::Messages,
                };
            }
            KeyCode::Up if self.focus == Focus::Inbox => {
                if !self.inquiries.is_empty() {
                    self.selected_index =
                        (self.selected_index + self.inquiries.len() - 1) % self.inquiries.len();
                }
            }
            KeyCode::Down if self.focus == Focus::Inbox => {
                if !self.inquiries.is_empty() {
                    self.selected_index = (self.selected_index + 1) % self.inquiries.len();
                }
            }
            KeyCode::Enter => match self.focus {
                Focus::Inbox => {
                    let inquiry_id = self.inquiries.get(self.selected_index)?.id;
                    if inquiry_id != self.active_inquiry {
                        debug!("Switching to inquiry {}", inquiry_id);
                        return Some(UiAction::Open(inquiry_id));
                    }
                    self.focus = Focus::Messages;
                }
                Focus::Messages => {
                    // Input is disabled until the session is up
                    if !self.connected {
                        return None;
                    }
                    let content = self.input.value().to_string();
                    if content.trim().is_empty() {
                        return None;
                    }
                    self.input.reset();
                    return Some(UiAction::Send(content));
                }
            },
            _ => {
                if self.focus == Focus::Messages && self.connected {
                    self.input.handle_event(&Event::Key(key));
                }
            }
        }
        None
    }

    pub fn draw<B: Backend>(&self, frame: &mut Frame<B>, messages: &[Message]) {
        let size = frame.size();

        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(25), // Inbox
                Constraint::Percentage(75), // Conversation
            ])
            .split(size);

        let banner_height = if self.connected { 0 } else { 1 };
        let chat_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),             // Header
                Constraint::Length(banner_height), // Connecting banner
                Constraint::Min(5),                // Messages
                Constraint::Length(3),             // Input
                Constraint::Length(1),             // Help line
            ])
            .split(chunks[1]);

        self.draw_inbox(frame, chunks[0]);
        self.draw_header(frame, chat_chunks[0]);

        if !self.connected {
            let banner = Paragraph::new(CONNECTING_BANNER)
                .style(Style::default().fg(Color::Black).bg(Color::Yellow))
                .alignment(Alignment::Center);
            frame.render_widget(banner, chat_chunks[1]);
        }

        draw_messages(frame, messages, chat_chunks[2], self.current_user_id);

        let (input_title, input_style) = if self.connected {
            ("Message", Style::default())
        } else {
            ("Message (waiting for connection)", Style::default().fg(Color::DarkGray))
        };
        let input_block = Block::default()
            .title(input_title)
            .borders(Borders::ALL)
            .border_style(match self.focus {
                Focus::Messages => Style::default().fg(Color::Yellow),
                Focus::Inbox => Style::default(),
            });
        let input_widget = Paragraph::new(self.input.value())
            .block(input_block)
            .style(input_style);
        frame.render_widget(input_widget, chat_chunks[3]);

        let help = Paragraph::new(Line::from(vec![Span::styled(
            "ESC quit | TAB switch | Up/Down select | Enter send/open | Ctrl+H help",
            Style::default().fg(Color::Gray),
        )]));
        frame.render_widget(help, chat_chunks[4]);

        if self.focus == Focus::Messages && self.connected {
            frame.set_cursor(
                chat_chunks[3].x + self.input.cursor() as u16 + 1,
                chat_chunks[3].y + 1,
            );
        }

        if self.show_help {
            draw_help_dialog(frame, size);
        }
    }

    fn draw_inbox<B: Backend>(&self, frame: &mut Frame<B>, area: Rect) {
        let items: Vec<ListItem> = self
            .inquiries
            .iter()
            .enumerate()
            .map(|(i, inquiry)| {
                let marker = if i == self.selected_index { "> " } else { "  " };
                let mut style = Style::default();
                if inquiry.id == self.active_inquiry {
                    style = style.add_modifier(Modifier::BOLD);
                }
                let mut lines = vec![Line::from(Span::styled(
                    format!("{}{}", marker, inquiry.listing.title),
                    style,
                ))];
                lines.push(Line::from(Span::styled(
                    format!("  {}", inquiry.counterpart_name(self.role)),
                    Style::default().fg(Color::Gray),
                )));
                if let Some(last) = &inquiry.last_message {
                    lines.push(Line::from(Span::styled(
                        format!("  {}", last),
                        Style::default().fg(Color::DarkGray),
                    )));
                }
                ListItem::new(lines)
            })
            .collect();

        let inbox = List::new(items).block(
            Block::default()
                .title("Inquiries (Tab to focus)")
                .borders(Borders::ALL)
                .border_style(match self.focus {
                    Focus::Inbox => Style::default().fg(Color::Yellow),
                    Focus::Messages => Style::default(),
                }),
        );
        frame.render_widget(inbox, area);
    }

    fn draw_header<B: Backend>(&self, frame: &mut Frame<B>, area: Rect) {
        let (title, details) = match self.active_inquiry() {
            Some(inquiry) => (
                inquiry.listing.title.clone(),
                format!(
                    "{} | {} | {} | {} | {} guests",
                    inquiry.counterpart_name(self.role),
                    inquiry.status,
                    inquiry.event_date,
                    inquiry.event_location,
                    inquiry.guest_count
                ),
            ),
            None => (format!("Inquiry #{}", self.active_inquiry), String::new()),
        };
        let header = Paragraph::new(details)
            .block(Block::default().title(title).borders(Borders::ALL));
        frame.render_widget(header, area);
    }
}

/// Render lines for one message: `[HH:MM] Name: content`, own messages as "You".
/// Pending messages are dimmed until the server confirms them.
fn message_lines(message: &Message, current_user_id: i64, wrap_width: usize) -> Vec<(String, Style)> {
    let timestamp = message.sent_at.with_timezone(&Local).format("%H:%M");
    let mine = message.is_from(current_user_id);
    let name = if mine { "You" } else { message.sender_name.as_str() };
    let suffix = if message.is_pending() { " (sending)" } else { "" };
    let full_content = format!("[{}] {}: {}{}", timestamp, name, message.content, suffix);

    let mut style = if mine {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };
    if message.is_pending() {
        style = style.add_modifier(Modifier::DIM);
    }

    wrap(&full_content, wrap_width.max(1))
        .into_iter()
        .map(|line| (line.into_owned(), style))
        .collect()
}

fn draw_messages<B: Backend>(f: &mut Frame<B>, messages: &[Message], area: Rect, current_user_id: i64) {
    let block = Block::default().borders(Borders::ALL).title("Messages");

    if messages.is_empty() {
        let empty = Paragraph::new(EMPTY_CONVERSATION)
            .style(Style::default().fg(Color::Gray))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(block);
        f.render_widget(empty, area);
        return;
    }

    let wrap_width = area.width.saturating_sub(2) as usize; // Account for borders
    let items: Vec<ListItem> = messages
        .iter()
        .flat_map(|m| message_lines(m, current_user_id, wrap_width))
        .map(|(line, style)| ListItem::new(Text::from(line)).style(style))
        .collect();

    // Keep the newest message in view
    let mut list_state = ListState::default();
    if !items.is_empty() {
        list_state.select(Some(items.len() - 1));
    }

    let list = List::new(items).block(block).highlight_style(Style::default());
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_help_dialog<B: Backend>(f: &mut Frame<B>, area: Rect) {
    let popup_width = 60.min(area.width.saturating_sub(4));
    let popup_height = 12.min(area.height.saturating_sub(4));
    let popup_x = (area.width - popup_width) / 2;
    let popup_y = (area.height - popup_height) / 2;
    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    let popup_block = Block::default()
        .title("Keyboard Shortcuts")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    f.render_widget(Clear, popup_area);
    f.render_widget(popup_block, popup_area);

    let inner_area = popup_area.inner(&Margin {
        vertical: 1,
        horizontal: 2,
    });

    let shortcuts = [
        ("ESC", "Quit"),
        ("Tab", "Switch between conversation and inquiries"),
        ("Up/Down", "Select an inquiry (when inquiries are focused)"),
        ("Enter", "Send message / open selected inquiry"),
        ("Ctrl+H", "Show this help"),
        ("", ""),
        ("Press any key to close this dialog", ""),
    ];
    let items: Vec<ListItem> = shortcuts
        .iter()
        .map(|(key, desc)| {
            let line = Line::from(vec![
                Span::styled(format!("{:<10}", key), Style::default().fg(Color::Green)),
                Span::raw(desc.to_string()),
            ]);
            ListItem::new(line)
        })
        .collect();
    f.render_widget(List::new(items), inner_area);
}

pub fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

pub fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
