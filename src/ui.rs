use crate::config::{AppConfig, SocialNetwork};
use crate::coordinator::{Notice, PlaybackState, SessionSnapshot};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Tabs},
    Frame,
};
use std::sync::Arc;

// Layout constants for better maintainability
const HEADER_HEIGHT: u16 = 4;
const TABS_HEIGHT: u16 = 3;
const FOOTER_HEIGHT: u16 = 3;
const STATUS_HEIGHT: u16 = 3;
const MARGIN: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Home,
    Settings,
    Social,
}

impl Tab {
    pub const ALL: [Tab; 3] = [Tab::Home, Tab::Settings, Tab::Social];

    pub fn title(&self) -> &'static str {
        match self {
            Tab::Home => "Home",
            Tab::Settings => "Settings",
            Tab::Social => "Social",
        }
    }

    fn index(&self) -> usize {
        Tab::ALL.iter().position(|t| t == self).unwrap_or(0)
    }

    pub fn next(&self) -> Tab {
        Tab::ALL[(self.index() + 1) % Tab::ALL.len()]
    }

    pub fn previous(&self) -> Tab {
        Tab::ALL[(self.index() + Tab::ALL.len() - 1) % Tab::ALL.len()]
    }
}

#[derive(Debug, Clone, Copy)]
struct Palette {
    accent: Color,
    text: Color,
    muted: Color,
    playing: Color,
    warning: Color,
    background: Color,
}

impl Palette {
    fn for_mode(dark: bool) -> Self {
        if dark {
            Palette {
                accent: Color::Magenta,
                text: Color::White,
                muted: Color::Gray,
                playing: Color::Green,
                warning: Color::Yellow,
                background: Color::Reset,
            }
        } else {
            Palette {
                accent: Color::Blue,
                text: Color::Black,
                muted: Color::DarkGray,
                playing: Color::Green,
                warning: Color::Red,
                background: Color::White,
            }
        }
    }
}

pub struct UIState {
    pub config: Arc<AppConfig>,
    pub tab: Tab,
    pub dark_mode: bool,
    pub session: SessionSnapshot,
    // Slider position; the live countdown is in sleep_remaining
    pub sleep_minutes: u32,
    pub sleep_active: bool,
    pub sleep_remaining: u32,
    pub social_state: ListState,
    pub status_message: String,
    pub should_quit: bool,
}

impl UIState {
    pub fn new(config: Arc<AppConfig>) -> Self {
        let mut social_state = ListState::default();
        if !config.social_links.visible().is_empty() {
            social_state.select(Some(0));
        }

        Self {
            dark_mode: config.enable_dark_mode,
            config,
            tab: Tab::Home,
            session: SessionSnapshot::default(),
            sleep_minutes: 0,
            sleep_active: false,
            sleep_remaining: 0,
            social_state,
            status_message: String::new(),
            should_quit: false,
        }
    }

    /// The social link under the cursor, if any are visible
    pub fn selected_link(&self) -> Option<(SocialNetwork, String)> {
        let index = self.social_state.selected()?;
        self.config
            .social_links
            .visible()
            .get(index)
            .map(|(network, url)| (*network, url.to_string()))
    }

    pub fn next_link(&mut self) {
        let count = self.config.social_links.visible().len();
        if count > 0 {
            let next = self.social_state.selected().map_or(0, |i| (i + 1) % count);
            self.social_state.select(Some(next));
        }
    }

    pub fn previous_link(&mut self) {
        let count = self.config.social_links.visible().len();
        if count > 0 {
            let prev = self.social_state.selected().map_or(0, |i| (i + count - 1) % count);
            self.social_state.select(Some(prev));
        }
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }
}

pub fn render_ui(f: &mut Frame, app: &mut UIState) {
    let palette = Palette::for_mode(app.dark_mode);
    f.render_widget(
        Block::default().style(Style::default().bg(palette.background)),
        f.area(),
    );

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(MARGIN)
        .constraints([
            Constraint::Length(HEADER_HEIGHT),
            Constraint::Length(TABS_HEIGHT),
            Constraint::Min(8),
            Constraint::Length(STATUS_HEIGHT),
            Constraint::Length(FOOTER_HEIGHT),
        ])
        .split(f.area());

    render_header(f, chunks[0], app, &palette);
    render_tabs(f, chunks[1], app, &palette);
    match app.tab {
        Tab::Home => render_home(f, chunks[2], app, &palette),
        Tab::Settings => render_settings(f, chunks[2], app, &palette),
        Tab::Social => render_social(f, chunks[2], app, &palette),
    }
    render_status(f, chunks[3], app, &palette);
    render_footer(f, chunks[4], app, &palette);
}

pub fn status_label(snapshot: &SessionSnapshot) -> &'static str {
    match &snapshot.state {
        PlaybackState::Playing if snapshot.is_buffering => "BUFFERING",
        PlaybackState::Playing => "PLAYING",
        PlaybackState::Preparing => "CONNECTING",
        PlaybackState::Paused => "PAUSED",
        PlaybackState::Error(_) => "ERROR",
        PlaybackState::Idle | PlaybackState::Stopped => "STOPPED",
    }
}

fn render_header(f: &mut Frame, area: Rect, app: &UIState, palette: &Palette) {
    let status = status_label(&app.session);
    let status_color = if app.session.is_playing { palette.playing } else { palette.warning };

    let content = vec![
        Line::from(vec![
            Span::styled(&app.config.app_name, Style::default().fg(palette.accent).add_modifier(Modifier::BOLD)),
            Span::styled(" - live radio ", Style::default().fg(palette.muted)),
            Span::styled(status, Style::default().fg(status_color).add_modifier(Modifier::BOLD)),
        ]),
        Line::from(vec![
            Span::styled("Stream: ", Style::default().fg(palette.text)),
            Span::styled(&app.config.stream_url, Style::default().fg(palette.muted)),
        ]),
    ];

    let header = Paragraph::new(Text::from(content)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(palette.accent))
            .title("Now Playing"),
    );
    f.render_widget(header, area);
}

fn render_tabs(f: &mut Frame, area: Rect, app: &UIState, palette: &Palette) {
    let titles: Vec<Line> = Tab::ALL.iter().map(|t| Line::from(t.title())).collect();
    let tabs = Tabs::new(titles)
        .select(app.tab.index())
        .style(Style::default().fg(palette.muted))
        .highlight_style(Style::default().fg(palette.accent).add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(tabs, area);
}

fn render_home(f: &mut Frame, area: Rect, app: &UIState, palette: &Palette) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)])
        .split(area);

    let (big, color) = if app.session.is_playing {
        ("▶  On air", palette.playing)
    } else if app.session.state.is_active() {
        ("…  Connecting", palette.warning)
    } else {
        ("■  Stopped", palette.muted)
    };
    let mut lines = vec![
        Line::from(""),
        Line::from(Span::styled(big, Style::default().fg(color).add_modifier(Modifier::BOLD))),
    ];
    if app.session.is_buffering {
        lines.push(Line::from(Span::styled("Buffering…", Style::default().fg(palette.warning))));
    }
    let player = Paragraph::new(Text::from(lines))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title("Player"));
    f.render_widget(player, rows[0]);

    if app.config.sleep_timer {
        let label = if app.sleep_active {
            format!("Sleep in {} min (set to {} min)", app.sleep_remaining, app.sleep_minutes)
        } else {
            "Sleep timer off".to_string()
        };
        let ratio = f64::from(app.sleep_minutes) / f64::from(crate::sleep_timer::MAX_SLEEP_MINUTES);
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Sleep Timer"))
            .gauge_style(Style::default().fg(palette.accent))
            .ratio(ratio.clamp(0.0, 1.0))
            .label(label);
        f.render_widget(gauge, rows[1]);
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

fn render_settings(f: &mut Frame, area: Rect, app: &UIState, palette: &Palette) {
    let config = &app.config;
    let rows = [
        ("Dark mode (D to toggle)", app.dark_mode),
        ("Background playback", config.enable_background_playback),
        ("Reconnect on disconnect", config.reconnect_on_disconnect),
        ("Media button controls", config.enable_bluetooth_controls),
        ("Notifications", config.enable_notifications),
        ("Sleep timer", config.sleep_timer),
        ("Android Auto", config.enable_android_auto),
        ("Chromecast", config.enable_chromecast),
    ];

    let items: Vec<ListItem> = rows
        .iter()
        .map(|(name, value)| {
            let color = if *value { palette.playing } else { palette.muted };
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:<28}", name), Style::default().fg(palette.text)),
                Span::styled(on_off(*value), Style::default().fg(color).add_modifier(Modifier::BOLD)),
            ]))
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(palette.accent))
            .title("Settings"),
    );
    f.render_widget(list, area);
}

fn render_social(f: &mut Frame, area: Rect, app: &mut UIState, palette: &Palette) {
    let items: Vec<ListItem> = app
        .config
        .social_links
        .visible()
        .into_iter()
        .map(|(network, url)| {
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:<10}", network.label()), Style::default().fg(palette.text).add_modifier(Modifier::BOLD)),
                Span::styled(url.to_string(), Style::default().fg(palette.muted)),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(palette.accent))
                .title("Follow us"),
        )
        .highlight_style(Style::default().fg(Color::Black).bg(palette.accent).add_modifier(Modifier::BOLD))
        .highlight_symbol(" > ");

    f.render_stateful_widget(list, area, &mut app.social_state);
}

fn render_status(f: &mut Frame, area: Rect, app: &UIState, palette: &Palette) {
    // Determine status text priority (owned String)
    let text = if let PlaybackState::Error(reason) = &app.session.state {
        format!("Stream error: {}", reason)
    } else if app.session.notice == Some(Notice::FocusDenied) {
        "Another app is using the audio output".to_string()
    } else if !app.status_message.is_empty() {
        app.status_message.clone()
    } else {
        String::new()
    };

    let status = Paragraph::new(Text::from(Line::from(vec![Span::styled(
        text,
        Style::default().fg(palette.text),
    )])))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(palette.muted))
            .title("Status"),
    );

    f.render_widget(status, area);
}

fn render_footer(f: &mut Frame, area: Rect, app: &UIState, palette: &Palette) {
    let key = |k: &'static str| Span::styled(k, Style::default().fg(palette.accent).add_modifier(Modifier::BOLD));
    let label = |l: &'static str| Span::styled(l, Style::default().fg(palette.text));

    let mut spans = vec![key("SPACE "), label("Play/Pause • "), key("TAB "), label("Switch • ")];
    match app.tab {
        Tab::Home if app.config.sleep_timer => {
            spans.extend([key("+/- "), label("Sleep timer • ")]);
        }
        Tab::Settings => spans.extend([key("D "), label("Dark mode • ")]),
        Tab::Social => spans.extend([key("↑/↓ ENTER "), label("Open link • ")]),
        _ => {}
    }
    spans.extend([key("Q "), label("Quit")]);

    let controls = Paragraph::new(Text::from(Line::from(spans)))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(palette.muted))
                .title("Controls"),
        );

    f.render_widget(controls, area);
}
