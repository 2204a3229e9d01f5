use crossterm::{execute, terminal::SetTitle};
use log::{debug, warn};
use std::io;

use crate::coordinator::PlaybackState;

/// The one transport button a notification offers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportAction {
    Play,
    Pause,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub text: String,
    pub action: TransportAction,
}

impl Notification {
    pub fn for_state(app_name: &str, state: &PlaybackState, buffering: bool) -> Self {
        let (text, action) = match state {
            PlaybackState::Preparing => ("Connecting…".to_string(), TransportAction::Pause),
            PlaybackState::Playing if buffering => ("Buffering…".to_string(), TransportAction::Pause),
            PlaybackState::Playing => ("Live Streaming".to_string(), TransportAction::Pause),
            PlaybackState::Paused => ("Paused".to_string(), TransportAction::Play),
            PlaybackState::Stopped | PlaybackState::Idle => ("Stopped".to_string(), TransportAction::Play),
            PlaybackState::Error(reason) => (format!("Error: {}", reason), TransportAction::Play),
        };
        Self {
            title: app_name.to_string(),
            text,
            action,
        }
    }

    /// Single-line rendering, e.g. `▶ MiRadioApp - Live Streaming`
    pub fn line(&self) -> String {
        let icon = match self.action {
            TransportAction::Pause => "▶",
            TransportAction::Play => "⏸",
        };
        format!("{} {} - {}", icon, self.title, self.text)
    }
}

pub trait NotificationPresenter: Send {
    fn render(&mut self, notification: &Notification);
    fn dismiss(&mut self);
}

/// Shows the notification in the terminal window title.
pub struct TerminalTitlePresenter {
    last: Option<String>,
}

impl TerminalTitlePresenter {
    pub fn new() -> Self {
        Self { last: None }
    }

    fn set_title(title: &str) {
        if let Err(e) = execute!(io::stdout(), SetTitle(title)) {
            warn!("Failed to update terminal title: {}", e);
        }
    }
}

impl NotificationPresenter for TerminalTitlePresenter {
    fn render(&mut self, notification: &Notification) {
        let line = notification.line();
        if self.last.as_deref() == Some(line.as_str()) {
            return;
        }
        debug!("Notification: {}", line);
        Self::set_title(&line);
        self.last = Some(line);
    }

    fn dismiss(&mut self) {
        if self.last.take().is_some() {
            Self::set_title("");
        }
    }
}
