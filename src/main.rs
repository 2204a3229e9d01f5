mod actions;
mod app;
mod audio;
mod config;
mod control;
mod coordinator;
mod engine;
mod focus;
mod notification;
mod sleep_timer;
mod ui;
mod utils;

use anyhow::{Context, Result};
use app::AppController;
use clap::{Parser, Subcommand, ValueEnum};
use crossterm::{
    event::{self, DisableFocusChange, EnableFocusChange, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{info, warn};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use control::{ControlRequest, ControlServer};
use coordinator::{session_channel, SessionCoordinator};
use engine::{PlaybackEngine, SilentEngine, StreamError, UnavailableEngine};
use focus::FocusArbiter;
use notification::TerminalTitlePresenter;
use sleep_timer::SleepTimer;

#[derive(Parser, Debug)]
#[command(name = "miradio", version, about = "Single-station internet radio player")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Loopback port for the control socket
    #[arg(long, global = true, default_value_t = control::DEFAULT_CONTROL_PORT)]
    control_port: u16,

    /// Simulate playback without opening an audio device
    #[arg(long)]
    no_audio: bool,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Send a transport command to a running player
    Ctl {
        #[arg(value_enum)]
        action: CtlAction,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CtlAction {
    Play,
    Pause,
}

impl From<CtlAction> for ControlRequest {
    fn from(action: CtlAction) -> Self {
        match action {
            CtlAction::Play => ControlRequest::Play,
            CtlAction::Pause => ControlRequest::Pause,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if let Some(CliCommand::Ctl { action }) = cli.command {
        let request = ControlRequest::from(action);
        control::send_request(control::control_addr(cli.control_port), request).await?;
        println!("{}: ok", request.as_line());
        return Ok(());
    }

    let config = Arc::new(config::load_async(cli.config.clone()).await);
    info!("Loaded config for {}", config.app_name);

    // Session wiring: one queue, one coordinator, every surface holds a handle
    let session = CancellationToken::new();
    let (handle, events_rx, snapshots) = session_channel();
    let (arbiter, focus_signals) = FocusArbiter::new(handle.events());

    let engine: Box<dyn PlaybackEngine> = if cli.no_audio {
        Box::new(SilentEngine::new(handle.events()))
    } else {
        match audio::StreamEngine::new(handle.events()) {
            Ok(engine) => Box::new(engine),
            // Keep the UI up; every play attempt shows the device error
            Err(StreamError::Output(reason)) => {
                warn!("Audio output unavailable: {}", reason);
                Box::new(UnavailableEngine::new(reason))
            }
            Err(e) => return Err(e).context("failed to start the stream engine"),
        }
    };

    let coordinator = SessionCoordinator::new(
        config.clone(),
        engine,
        arbiter,
        TerminalTitlePresenter::new(),
        snapshots,
        session.clone(),
    );
    let session_task = tokio::spawn(coordinator.run(events_rx));

    match ControlServer::bind(control::control_addr(cli.control_port), handle.clone(), focus_signals).await {
        Ok(server) => {
            tokio::spawn(server.serve(session.child_token()));
        }
        Err(e) => warn!("Control socket disabled: {:#}", e),
    }

    // Set up panic handler to restore terminal
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), DisableFocusChange, LeaveAlternateScreen);
        original_hook(panic);
    }));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableFocusChange)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let sleep_timer = SleepTimer::new(handle.events(), session.clone());
    let mut app_controller = AppController::new(config, handle.clone(), sleep_timer);

    // Run the main loop
    let res = run_app(&mut terminal, &mut app_controller).await;

    // Release the session before the terminal, so the title is cleared last
    if handle.shutdown().await.is_err() {
        warn!("Playback session was already closed");
    }
    if let Err(e) = session_task.await {
        warn!("Playback session task failed: {}", e);
    }
    session.cancel();

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), DisableFocusChange, LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app_controller: &mut AppController,
) -> Result<()> {
    loop {
        app_controller.refresh();

        // Render UI
        terminal.draw(|f| ui::render_ui(f, &mut app_controller.ui_app))?;

        // Handle input with shorter timeout for better responsiveness
        if event::poll(Duration::from_millis(50))? {
            match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                    if app_controller.handle_key_event(key.code).await? {
                        break; // Quit was requested
                    }
                }
                Ok(Event::FocusLost) => app_controller.handle_focus_lost().await?,
                Ok(_) => {} // Resize and the rest redraw on the next pass
                Err(e) => warn!("Failed to read terminal event: {}", e),
            }
        }

        // Small delay to prevent high CPU usage but keep responsive
        sleep(Duration::from_millis(16)).await; // ~60 FPS

        if app_controller.ui_app.should_quit {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["miradio"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.json"));
        assert_eq!(cli.control_port, 47474);
        assert!(!cli.no_audio);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_ctl_subcommand() {
        let cli = Cli::try_parse_from(["miradio", "ctl", "pause", "--control-port", "5000"]).unwrap();
        assert_eq!(cli.control_port, 5000);
        match cli.command {
            Some(CliCommand::Ctl { action }) => {
                assert_eq!(ControlRequest::from(action), ControlRequest::Pause)
            }
            None => panic!("expected ctl subcommand"),
        }
        assert!(Cli::try_parse_from(["miradio", "ctl", "rewind"]).is_err());
    }
}
