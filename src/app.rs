use anyhow::{Context, Result};
use crossterm::event::KeyCode;
use log::{debug, info};
use std::process::Command as ProcessCommand;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::coordinator::SessionHandle;
use crate::sleep_timer::{SleepTimer, MAX_SLEEP_MINUTES};
use crate::ui::{Tab, UIState as UIApp};

const SLEEP_STEP_MINUTES: u32 = 5;

pub struct AppController {
    pub ui_app: UIApp,
    session: SessionHandle,
    sleep_timer: SleepTimer,
}

impl AppController {
    pub fn new(config: Arc<AppConfig>, session: SessionHandle, sleep_timer: SleepTimer) -> Self {
        Self {
            ui_app: UIApp::new(config),
            session,
            sleep_timer,
        }
    }

    /// Pull the latest session snapshot and timer countdown into the view.
    pub fn refresh(&mut self) {
        self.ui_app.session = self.session.snapshot();
        self.ui_app.sleep_active = self.sleep_timer.is_active();
        self.ui_app.sleep_remaining = self.sleep_timer.remaining_minutes();
        if !self.ui_app.sleep_active && self.ui_app.sleep_minutes > 0 && self.ui_app.sleep_remaining == 0 {
            // Timer ran out; snap the slider back
            self.ui_app.sleep_minutes = 0;
        }
    }

    pub async fn handle_key_event(&mut self, key_code: KeyCode) -> Result<bool> {
        match key_code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Char('Q') => {
                self.ui_app.quit();
                return Ok(true);
            }
            KeyCode::Char(' ') => {
                self.session.toggle().await?;
            }
            KeyCode::Tab | KeyCode::Right => self.ui_app.tab = self.ui_app.tab.next(),
            KeyCode::BackTab | KeyCode::Left => self.ui_app.tab = self.ui_app.tab.previous(),
            KeyCode::Char('1') => self.ui_app.tab = Tab::Home,
            KeyCode::Char('2') => self.ui_app.tab = Tab::Settings,
            KeyCode::Char('3') => self.ui_app.tab = Tab::Social,
            KeyCode::Char('+') | KeyCode::Char('=') if self.ui_app.tab == Tab::Home => {
                self.adjust_sleep_timer(true);
            }
            KeyCode::Char('-') if self.ui_app.tab == Tab::Home => {
                self.adjust_sleep_timer(false);
            }
            KeyCode::Char('d') | KeyCode::Char('D') if self.ui_app.tab == Tab::Settings => {
                self.ui_app.dark_mode = !self.ui_app.dark_mode;
                debug!("Dark mode {}", if self.ui_app.dark_mode { "on" } else { "off" });
            }
            KeyCode::Up if self.ui_app.tab == Tab::Social => self.ui_app.previous_link(),
            KeyCode::Down if self.ui_app.tab == Tab::Social => self.ui_app.next_link(),
            KeyCode::Enter if self.ui_app.tab == Tab::Social => self.open_selected_link(),
            _ => {}
        }
        Ok(false)
    }

    /// The terminal lost focus. Without background playback that means pause.
    pub async fn handle_focus_lost(&mut self) -> Result<()> {
        if !self.ui_app.config.enable_background_playback && self.ui_app.session.state.is_active() {
            info!("Window left the foreground, pausing");
            self.session.pause().await?;
        }
        Ok(())
    }

    fn adjust_sleep_timer(&mut self, increase: bool) {
        if !self.ui_app.config.sleep_timer {
            self.ui_app.status_message = "Sleep timer is disabled in config".to_string();
            return;
        }

        let minutes = if increase {
            (self.ui_app.sleep_minutes + SLEEP_STEP_MINUTES).min(MAX_SLEEP_MINUTES)
        } else {
            self.ui_app.sleep_minutes.saturating_sub(SLEEP_STEP_MINUTES)
        };
        self.ui_app.sleep_minutes = minutes;
        self.sleep_timer.start(minutes);
        self.ui_app.sleep_active = self.sleep_timer.is_active();
        self.ui_app.sleep_remaining = self.sleep_timer.remaining_minutes();

        self.ui_app.status_message = if minutes == 0 {
            "Sleep timer off".to_string()
        } else {
            format!("Playback will pause in {} minutes", minutes)
        };
    }

    fn open_selected_link(&mut self) {
        let Some((network, url)) = self.ui_app.selected_link() else {
            return;
        };
        self.ui_app.status_message = match open_in_browser(&url) {
            Ok(()) => format!("Opened {}", network.label()),
            Err(e) => format!("Could not open {}: {}", network.label(), e),
        };
    }
}

fn open_in_browser(url: &str) -> Result<()> {
    let (program, args): (&str, Vec<&str>) = if cfg!(target_os = "macos") {
        ("open", vec![url])
    } else if cfg!(target_os = "windows") {
        ("cmd", vec!["/C", "start", "", url])
    } else {
        ("xdg-open", vec![url])
    };

    debug!("Opening {} with {}", url, program);
    ProcessCommand::new(program)
        .args(&args)
        .spawn()
        .with_context(|| format!("failed to launch {}", program))?;
    Ok(())
}
