//! Playback session coordinator
//!
//! The coordinator is the only writer of [`PlaybackState`]. User commands,
//! engine reports and focus changes all arrive on one queue and are applied
//! in order by [`SessionCoordinator::run`], so no two transitions ever race.
//! Everything else talks to the session through a cloneable [`SessionHandle`].

use anyhow::Result;
use log::{debug, info, warn};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::actions::{Command, EngineEvent, EngineReport, FocusChange, SessionEvent};
use crate::config::AppConfig;
use crate::engine::{EngineState, LoadId, PlaybackEngine};
use crate::focus::AudioFocus;
use crate::notification::{Notification, NotificationPresenter};

pub const SESSION_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Preparing,
    Playing,
    Paused,
    Stopped,
    Error(String),
}

impl PlaybackState {
    /// Preparing or playing: the user wants sound right now.
    pub fn is_active(&self) -> bool {
        matches!(self, PlaybackState::Preparing | PlaybackState::Playing)
    }
}

/// Conditions worth telling the user about that are not playback states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    FocusDenied,
}

/// What observers see of the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: PlaybackState,
    pub is_playing: bool,
    pub is_buffering: bool,
    pub notice: Option<Notice>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: PlaybackState::Idle,
            is_playing: false,
            is_buffering: false,
            notice: None,
        }
    }
}

/// Cloneable entry point to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::Sender<SessionEvent>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub async fn send(&self, command: Command) -> Result<()> {
        self.events
            .send(command.into())
            .await
            .map_err(|_| anyhow::anyhow!("playback session has shut down"))
    }

    pub async fn play(&self) -> Result<()> {
        self.send(Command::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(Command::Pause).await
    }

    pub async fn toggle(&self) -> Result<()> {
        self.send(Command::TogglePlayback).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    /// Raw queue sender, for collaborators that feed events of their own
    pub fn events(&self) -> mpsc::Sender<SessionEvent> {
        self.events.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }
}

/// Create the session queue and the handle that feeds it.
pub fn session_channel() -> (SessionHandle, mpsc::Receiver<SessionEvent>, watch::Sender<SessionSnapshot>) {
    let (events, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
    let (snapshot_tx, snapshots) = watch::channel(SessionSnapshot::default());
    (SessionHandle { events, snapshots }, rx, snapshot_tx)
}

pub struct SessionCoordinator<E, F, N> {
    config: Arc<AppConfig>,
    engine: E,
    focus: F,
    presenter: N,
    snapshots: watch::Sender<SessionSnapshot>,
    session: CancellationToken,
    state: PlaybackState,
    buffering: bool,
    // Load id of the stream the engine currently holds
    media: Option<LoadId>,
    // The loaded stream has delivered audio at least once
    media_ready: bool,
    has_focus: bool,
    resume_on_regain: bool,
    notice: Option<Notice>,
    released: bool,
}

impl<E, F, N> SessionCoordinator<E, F, N>
where
    E: PlaybackEngine,
    F: AudioFocus,
    N: NotificationPresenter,
{
    pub fn new(
        config: Arc<AppConfig>,
        engine: E,
        focus: F,
        presenter: N,
        snapshots: watch::Sender<SessionSnapshot>,
        session: CancellationToken,
    ) -> Self {
        Self {
            config,
            engine,
            focus,
            presenter,
            snapshots,
            session,
            state: PlaybackState::Idle,
            buffering: false,
            media: None,
            media_ready: false,
            has_focus: false,
            resume_on_regain: false,
            notice: None,
            released: false,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn has_focus(&self) -> bool {
        self.has_focus
    }

    /// Drain the session queue until shutdown, then release everything.
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) {
        info!("Playback session started for {}", self.config.stream_url);
        self.publish();

        while let Some(event) = events.recv().await {
            if self.handle(event).is_break() {
                break;
            }
        }

        self.teardown();
        info!("Playback session ended");
    }

    pub fn handle(&mut self, event: SessionEvent) -> ControlFlow<()> {
        if self.released {
            debug!("Ignoring {:?} after teardown", event);
            return ControlFlow::Break(());
        }

        match event {
            SessionEvent::Command(Command::Play) => self.play(),
            SessionEvent::Command(Command::Pause) => self.pause(),
            SessionEvent::Command(Command::TogglePlayback) => {
                if self.state.is_active() {
                    self.pause()
                } else {
                    self.play()
                }
            }
            SessionEvent::Command(Command::Shutdown) => {
                self.teardown();
                return ControlFlow::Break(());
            }
            SessionEvent::Engine(report) => self.on_engine(report),
            SessionEvent::Focus(change) => self.on_focus(change),
        }
        ControlFlow::Continue(())
    }

    fn play(&mut self) {
        if self.state.is_active() {
            debug!("Play ignored, already {:?}", self.state);
            return;
        }

        // A grant kept through a transient loss is not ours to use until the
        // other app lets go, so ask again
        if !self.has_focus || self.resume_on_regain {
            if !self.focus.request() {
                info!("Audio focus denied, not starting playback");
                self.notice = Some(Notice::FocusDenied);
                self.publish();
                return;
            }
            self.has_focus = true;
        }
        self.notice = None;
        self.resume_on_regain = false;

        if self.state == PlaybackState::Paused && self.media.is_some() {
            self.resume();
        } else if !self.start_stream() {
            self.release_focus();
        }
        self.refresh();
    }

    fn resume(&mut self) {
        self.engine.play();
        if self.media_ready {
            self.set_state(PlaybackState::Playing);
        } else {
            self.set_state(PlaybackState::Preparing);
        }
    }

    /// Load the configured stream and start it. Returns false if the engine
    /// refused the stream outright.
    fn start_stream(&mut self) -> bool {
        match self.engine.load(&self.config.stream_url) {
            Ok(load) => {
                self.media = Some(load);
                self.media_ready = false;
                self.buffering = false;
                self.engine.play();
                self.set_state(PlaybackState::Preparing);
                true
            }
            Err(e) => {
                warn!("Cannot prepare stream: {}", e);
                self.media = None;
                self.buffering = false;
                self.set_state(PlaybackState::Error(e.to_string()));
                false
            }
        }
    }

    fn pause(&mut self) {
        if self.state.is_active() {
            self.engine.pause();
            self.buffering = false;
            self.set_state(PlaybackState::Paused);
        }
        self.resume_on_regain = false;
        self.release_focus();
        self.refresh();
    }

    fn on_engine(&mut self, report: EngineReport) {
        if self.media != Some(report.load) {
            debug!("Ignoring report for stale load {}: {:?}", report.load, report.event);
            return;
        }

        match report.event {
            EngineEvent::State(EngineState::Ready) => {
                self.media_ready = true;
                self.buffering = false;
                if self.state == PlaybackState::Preparing {
                    self.set_state(PlaybackState::Playing);
                }
            }
            EngineEvent::State(EngineState::Buffering) => {
                if self.state.is_active() {
                    self.buffering = true;
                }
            }
            EngineEvent::State(EngineState::Ended) => {
                self.media = None;
                self.buffering = false;
                if self.state.is_active() {
                    self.set_state(PlaybackState::Stopped);
                    self.after_disconnect();
                }
            }
            EngineEvent::State(EngineState::Idle) => {}
            EngineEvent::Failed(reason) => {
                warn!("Stream failed: {}", reason);
                self.media = None;
                self.buffering = false;
                let was_paused = self.state == PlaybackState::Paused;
                self.set_state(PlaybackState::Error(reason));
                if was_paused {
                    self.release_focus();
                } else {
                    self.after_disconnect();
                }
            }
        }
        self.refresh();
    }

    // Reconnect immediately if configured, otherwise give the output back.
    fn after_disconnect(&mut self) {
        if self.config.reconnect_on_disconnect && self.has_focus {
            info!("Stream disconnected, reconnecting");
            if !self.start_stream() {
                self.release_focus();
            }
        } else {
            self.release_focus();
        }
    }

    fn on_focus(&mut self, change: FocusChange) {
        match change {
            FocusChange::TransientLoss => {
                if self.state.is_active() {
                    self.engine.pause();
                    self.buffering = false;
                    self.set_state(PlaybackState::Paused);
                    self.resume_on_regain = true;
                }
            }
            FocusChange::Lost => {
                // The grant is gone already; nothing left to abandon
                self.has_focus = false;
                self.resume_on_regain = false;
                if self.state.is_active() {
                    self.engine.pause();
                    self.buffering = false;
                    self.set_state(PlaybackState::Paused);
                }
            }
            FocusChange::Regained => {
                if self.resume_on_regain && self.has_focus && self.state == PlaybackState::Paused {
                    self.resume_on_regain = false;
                    self.notice = None;
                    if self.media.is_some() {
                        self.resume();
                    } else if !self.start_stream() {
                        self.release_focus();
                    }
                }
            }
        }
        self.refresh();
    }

    fn release_focus(&mut self) {
        if self.has_focus {
            self.focus.abandon();
            self.has_focus = false;
        }
    }

    /// Release focus, engine and session resources, in that order. Each step
    /// runs even if an earlier one failed.
    pub fn teardown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        info!("Tearing down playback session");

        self.resume_on_regain = false;
        self.release_focus();

        if let Err(e) = self.engine.release() {
            warn!("Failed to release playback engine: {:#}", e);
        }
        self.media = None;
        self.buffering = false;

        self.presenter.dismiss();
        self.session.cancel();

        self.set_state(PlaybackState::Stopped);
        self.publish();
    }

    fn set_state(&mut self, next: PlaybackState) {
        if self.state != next {
            debug!("Session state changing from {:?} to {:?}", self.state, next);
            self.state = next;
        }
    }

    fn refresh(&mut self) {
        if self.config.enable_notifications {
            let notification = Notification::for_state(&self.config.app_name, &self.state, self.buffering);
            self.presenter.render(&notification);
        }
        self.publish();
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            state: self.state.clone(),
            is_playing: self.state == PlaybackState::Playing,
            is_buffering: self.buffering,
            notice: self.notice,
        };
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
